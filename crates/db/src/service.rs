use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use servicedesk_core::approvals::chain::{ChainReport, StartRequest};
use servicedesk_core::approvals::resolver::UserDirectory;
use servicedesk_core::approvals::state::{
    decision_notifications, overall_status, request_disposition, resubmit, NotificationIntent,
    RequestDisposition,
};
use servicedesk_core::approvals::{
    chain_audit_event, decision_audit_event, ChainProgress, WorkflowEngine,
};
use servicedesk_core::audit::{AuditContext, AuditSink};
use servicedesk_core::domain::approval::{
    ApprovalId, ApprovalRecord, ApprovalStatus, OverallApprovalStatus, RequestClass, RequestId,
};
use servicedesk_core::errors::{ApplicationError, DomainError, WorkflowError};

use crate::repositories::{ApprovalRepository, RepositoryError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("approval `{0}` was not found")]
    ApprovalNotFound(ApprovalId),
}

impl From<ServiceError> for ApplicationError {
    fn from(error: ServiceError) -> Self {
        match error {
            ServiceError::Domain(domain) => Self::Domain(domain),
            ServiceError::ApprovalNotFound(id) => Self::NotFound(format!("approval {id}")),
            ServiceError::Repository(RepositoryError::NotFound(id)) => {
                Self::NotFound(format!("approval {id}"))
            }
            ServiceError::Repository(other) => Self::Persistence(other.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub records: Vec<ApprovalRecord>,
    pub report: ChainReport,
    pub replayed: bool,
    pub overall_status: OverallApprovalStatus,
    pub disposition: RequestDisposition,
    pub notifications: Vec<NotificationIntent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub record: ApprovalRecord,
    pub progress: ChainProgress,
    pub overall_status: OverallApprovalStatus,
    pub disposition: RequestDisposition,
    pub notifications: Vec<NotificationIntent>,
}

/// Runs the approval workflow against a repository.
///
/// Every write is a compare-and-swap on the stored status, so two approvers racing on the
/// same record see exactly one success and one `InvalidTransition`.
pub struct ApprovalWorkflowService<R, D> {
    repository: R,
    engine: WorkflowEngine<D>,
    audit_sink: Arc<dyn AuditSink>,
}

impl<R, D> ApprovalWorkflowService<R, D>
where
    R: ApprovalRepository,
    D: UserDirectory,
{
    pub fn new(repository: R, engine: WorkflowEngine<D>, audit_sink: Arc<dyn AuditSink>) -> Self {
        Self { repository, engine, audit_sink }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    /// Opens the approval chain of a request.
    ///
    /// Submitting the same request again returns the stored chain with `replayed` set and
    /// neither audits nor notifies a second time.
    pub async fn submit(
        &self,
        class: RequestClass,
        request: StartRequest,
        audit: &AuditContext,
    ) -> Result<Submission, ServiceError> {
        let outcome = self.engine.start(class, &request);
        let stored = self
            .repository
            .insert_chain(request.request_id, outcome.drafts, request.submitted_at)
            .await?;
        let records = stored.records;

        let overall_status = overall_status(&records);
        let notifications = if stored.replayed {
            info!(
                event_name = "approval.request.replayed",
                request_id = %request.request_id,
                records = records.len(),
                "approval request already submitted, returning stored chain"
            );
            Vec::new()
        } else {
            self.audit_sink.emit(chain_audit_event(audit, class, &outcome.report));
            info!(
                event_name = "approval.request.submitted",
                request_id = %request.request_id,
                request_class = class.as_str(),
                records = records.len(),
                overall_status = overall_status.as_str(),
                "approval request submitted"
            );
            submission_notifications(request.request_id, &records)
        };

        Ok(Submission {
            disposition: request_disposition(&records),
            overall_status,
            notifications,
            report: outcome.report,
            replayed: stored.replayed,
            records,
        })
    }

    /// Applies a decision and moves the chain on. The transition is audited once the stored
    /// record has been swapped, so a lost race is recorded as rejected.
    pub async fn decide(
        &self,
        approval_id: &ApprovalId,
        new_status: ApprovalStatus,
        comment: Option<String>,
        acted_at: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<Decision, ServiceError> {
        let current = self.load(approval_id).await?;
        let chain = self.repository.list_for_request(current.request_id).await?;

        let updated = match self.engine.decide(&current, &chain, new_status, comment, acted_at) {
            Ok(updated) => updated,
            Err(error) => {
                self.emit_decision(audit, &current, new_status, Err(&error));
                return Err(error.into());
            }
        };
        match self.repository.replace_if_status(updated.clone(), current.status).await {
            Ok(()) => self.emit_decision(audit, &current, new_status, Ok(&updated)),
            Err(RepositoryError::StaleStatus { actual, .. }) => {
                let error = DomainError::from(WorkflowError::InvalidTransition {
                    current: actual,
                    attempted: new_status,
                });
                self.emit_decision(audit, &current, new_status, Err(&error));
                return Err(error.into());
            }
            Err(other) => return Err(other.into()),
        }

        let progress = if updated.status == ApprovalStatus::Approved {
            let merged: Vec<ApprovalRecord> = chain
                .into_iter()
                .map(|record| if record.id == updated.id { updated.clone() } else { record })
                .collect();
            self.engine.advance(&merged, acted_at)
        } else {
            ChainProgress::default()
        };
        for changed in progress.changed_records() {
            match self
                .repository
                .replace_if_status(changed.clone(), ApprovalStatus::PendingApproval)
                .await
            {
                Ok(()) => {}
                Err(RepositoryError::StaleStatus { approval_id, actual, .. }) => warn!(
                    event_name = "approval.chain.progress_skipped",
                    approval_id = %approval_id,
                    actual = actual.as_str(),
                    "record changed concurrently, leaving it as stored"
                ),
                Err(other) => return Err(other.into()),
            }
        }

        let records = self.repository.list_for_request(updated.request_id).await?;
        Ok(Decision {
            notifications: decision_notifications(&updated, &records, &progress.activation),
            overall_status: overall_status(&records),
            disposition: request_disposition(&records),
            record: updated,
            progress,
        })
    }

    /// Puts a record that was sent back for clarification into its approver's queue again.
    pub async fn resubmit(
        &self,
        approval_id: &ApprovalId,
        resubmitted_at: DateTime<Utc>,
    ) -> Result<ApprovalRecord, ServiceError> {
        let current = self.load(approval_id).await?;
        let updated = resubmit(&current, resubmitted_at).map_err(DomainError::from)?;
        self.repository
            .replace_if_status(updated.clone(), ApprovalStatus::ForClarification)
            .await
            .map_err(|error| lost_race(error, ApprovalStatus::PendingApproval))?;

        info!(
            event_name = "approval.clarification.resubmitted",
            approval_id = %updated.id,
            request_id = %updated.request_id,
            "approval resubmitted after clarification"
        );
        Ok(updated)
    }

    pub async fn overall_status(
        &self,
        request_id: RequestId,
    ) -> Result<OverallApprovalStatus, ServiceError> {
        Ok(overall_status(&self.repository.list_for_request(request_id).await?))
    }

    pub async fn records(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<ApprovalRecord>, ServiceError> {
        Ok(self.repository.list_for_request(request_id).await?)
    }

    fn emit_decision(
        &self,
        audit: &AuditContext,
        record: &ApprovalRecord,
        new_status: ApprovalStatus,
        result: Result<&ApprovalRecord, &DomainError>,
    ) {
        self.audit_sink.emit(decision_audit_event(audit, record, new_status, result));
    }

    async fn load(&self, approval_id: &ApprovalId) -> Result<ApprovalRecord, ServiceError> {
        self.repository
            .find_by_id(approval_id)
            .await?
            .ok_or_else(|| ServiceError::ApprovalNotFound(approval_id.clone()))
    }
}

fn lost_race(error: RepositoryError, attempted: ApprovalStatus) -> ServiceError {
    match error {
        RepositoryError::StaleStatus { actual, .. } => {
            DomainError::from(WorkflowError::InvalidTransition { current: actual, attempted })
                .into()
        }
        other => other.into(),
    }
}

fn submission_notifications(
    request_id: RequestId,
    records: &[ApprovalRecord],
) -> Vec<NotificationIntent> {
    if overall_status(records) == OverallApprovalStatus::Approved {
        return vec![NotificationIntent::RequestApproved { request_id }];
    }
    records
        .iter()
        .filter(|record| record.is_pending() && record.sent_at.is_some())
        .map(|record| NotificationIntent::ApprovalRequired {
            approval_id: record.id.clone(),
            approver_id: record.approver_id,
            level: record.level,
        })
        .collect()
}
