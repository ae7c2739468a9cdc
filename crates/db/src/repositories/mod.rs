use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use servicedesk_core::domain::approval::{
    ApprovalId, ApprovalRecord, ApprovalRecordDraft, ApprovalStatus, RequestId,
};

pub mod memory;

pub use memory::InMemoryApprovalRepository;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("approval `{0}` was not found")]
    NotFound(ApprovalId),
    #[error("approval `{approval_id}` is {actual}, expected {expected}")]
    StaleStatus { approval_id: ApprovalId, expected: ApprovalStatus, actual: ApprovalStatus },
    #[error("draft for request {found} cannot be stored in the chain of request {expected}")]
    RequestMismatch { expected: RequestId, found: RequestId },
    #[error("duplicate approval for request {request_id}, level {level}, approver {approver_id}")]
    DuplicateApprover { request_id: RequestId, level: u32, approver_id: String },
}

/// Result of `insert_chain`. `replayed` is set when the request already had a chain and
/// `records` is that stored chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredChain {
    pub records: Vec<ApprovalRecord>,
    pub replayed: bool,
}

/// Storage for approval records.
///
/// `insert_chain` writes a whole chain at once so readers never see part of one, and a
/// second call for the same request returns the stored chain untouched.
/// `replace_if_status` only writes when the stored status still equals `expected`.
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    async fn insert_chain(
        &self,
        request_id: RequestId,
        drafts: Vec<ApprovalRecordDraft>,
        created_at: DateTime<Utc>,
    ) -> Result<StoredChain, RepositoryError>;

    async fn list_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError>;

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, RepositoryError>;

    async fn replace_if_status(
        &self,
        record: ApprovalRecord,
        expected: ApprovalStatus,
    ) -> Result<(), RepositoryError>;
}
