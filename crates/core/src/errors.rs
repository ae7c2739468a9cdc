use thiserror::Error;

use crate::domain::approval::{ApprovalId, ApprovalStatus};
use crate::domain::template::TemplateError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("invalid approval transition from {current} to {attempted}")]
    InvalidTransition { current: ApprovalStatus, attempted: ApprovalStatus },
    #[error("no SLA policy is configured for priority `{priority}`")]
    UnknownPriority { priority: String },
    #[error("SLA due date for priority `{priority}` is outside the representable time range")]
    DueAtOutOfRange { priority: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("approval `{approval_id}` is blocked until level {blocking_level} is approved")]
    NotActionable { approval_id: ApprovalId, blocking_level: u32 },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("unconfigured priority: {message}")]
    UnconfiguredPriority { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => "This approval was already decided.",
            Self::UnconfiguredPriority { .. } => {
                "The priority tier is not configured. Contact an administrator."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::InvalidConfiguration { .. } => {
                "The service configuration is invalid. Check the config file and environment."
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::UnconfiguredPriority { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::InvalidConfiguration { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::UnconfiguredPriority { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::InvalidConfiguration { correlation_id: id, .. } => {
                *id = correlation_id
            }
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        let message = value.to_string();
        match value {
            ApplicationError::Domain(DomainError::Workflow(
                WorkflowError::InvalidTransition { .. },
            )) => Self::Conflict { message, correlation_id },
            ApplicationError::Domain(DomainError::Workflow(WorkflowError::UnknownPriority {
                ..
            })) => Self::UnconfiguredPriority { message, correlation_id },
            ApplicationError::Domain(DomainError::Workflow(WorkflowError::DueAtOutOfRange {
                ..
            }))
            | ApplicationError::Domain(DomainError::Template(_))
            | ApplicationError::Domain(DomainError::NotActionable { .. })
            | ApplicationError::NotFound(_) => Self::BadRequest { message, correlation_id },
            ApplicationError::Persistence(_) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::Configuration(_) => {
                Self::InvalidConfiguration { message, correlation_id }
            }
        }
    }
}
