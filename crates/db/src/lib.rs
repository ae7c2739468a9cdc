pub mod repositories;
pub mod service;

pub use repositories::{
    ApprovalRepository, InMemoryApprovalRepository, RepositoryError, StoredChain,
};
pub use service::{ApprovalWorkflowService, Decision, ServiceError, Submission};
