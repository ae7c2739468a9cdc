pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod sla;

pub use approvals::chain::{
    build_chain, ChainOutcome, ChainReport, SkippedDescriptor, StartRequest,
};
pub use approvals::incident::{auto_approve, INCIDENT_AUTO_APPROVAL_COMMENT};
pub use approvals::resolver::{
    ApproverResolver, BackupAssignment, InMemoryUserDirectory, ResolvedApprover,
    UnresolvedReason, UserDirectory,
};
pub use approvals::state::{
    activate_next_level, blocking_level, carry_forward_prior_approvals, decision_notifications,
    is_actionable, overall_status, request_disposition, resubmit, transition, LevelActivation,
    NotificationIntent, RequestDisposition, CARRY_FORWARD_COMMENT,
};
pub use approvals::{ChainProgress, WorkflowEngine};
pub use domain::approval::{
    ApprovalId, ApprovalRecord, ApprovalRecordDraft, ApprovalStatus, OverallApprovalStatus,
    RequestClass, RequestId, UserId,
};
pub use domain::requester::{DepartmentId, RequesterProfile};
pub use domain::template::{
    parse_template_levels, ApprovalLevelDefinition, ApproverDescriptor, ParsedTemplate,
    TemplateError,
};
pub use errors::{ApplicationError, DomainError, InterfaceError, WorkflowError};
pub use sla::{
    assign_sla, compute_due_at, compute_response_due_at, evaluate_sla, SlaAssignment, SlaClock,
    SlaDuration, SlaPolicyEntry, SlaPolicyTable, SlaState, SlaStatus,
};
