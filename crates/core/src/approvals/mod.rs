pub mod chain;
pub mod incident;
pub mod resolver;
pub mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::approval::{ApprovalRecord, ApprovalStatus, RequestClass};
use crate::errors::DomainError;

use self::chain::{build_chain, ChainOutcome, ChainReport, StartRequest};
use self::incident::auto_approve;
use self::resolver::{ApproverResolver, UserDirectory};
use self::state::{
    activate_next_level, blocking_level, carry_forward_prior_approvals, transition,
    LevelActivation,
};

/// Records produced when the chain moves on after a decision.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProgress {
    pub carried_forward: Vec<ApprovalRecord>,
    pub activation: LevelActivation,
}

impl ChainProgress {
    pub fn changed_records(&self) -> impl Iterator<Item = &ApprovalRecord> {
        self.carried_forward.iter().chain(self.activation.newly_sent.iter())
    }
}

pub struct WorkflowEngine<D> {
    directory: D,
    carry_forward_prior_approvals: bool,
}

impl<D> WorkflowEngine<D>
where
    D: UserDirectory,
{
    pub fn new(directory: D) -> Self {
        Self { directory, carry_forward_prior_approvals: true }
    }

    pub fn with_carry_forward(mut self, enabled: bool) -> Self {
        self.carry_forward_prior_approvals = enabled;
        self
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Builds the initial chain for a new request. Incidents skip human review.
    pub fn start(&self, class: RequestClass, request: &StartRequest) -> ChainOutcome {
        let resolver = ApproverResolver::new(&self.directory, request.submitted_at);
        match class {
            RequestClass::Service => build_chain(request, &resolver),
            RequestClass::Incident => auto_approve(
                request.request_id,
                &request.levels,
                &request.requester,
                &resolver,
                request.submitted_at,
            ),
        }
    }

    pub fn start_with_audit<S>(
        &self,
        class: RequestClass,
        request: &StartRequest,
        sink: &S,
        audit: &AuditContext,
    ) -> ChainOutcome
    where
        S: AuditSink + ?Sized,
    {
        let outcome = self.start(class, request);
        sink.emit(chain_audit_event(audit, class, &outcome.report));
        outcome
    }

    /// Applies an approver's decision after checking that every lower level is approved.
    pub fn decide(
        &self,
        record: &ApprovalRecord,
        all: &[ApprovalRecord],
        new_status: ApprovalStatus,
        comment: Option<String>,
        acted_at: DateTime<Utc>,
    ) -> Result<ApprovalRecord, DomainError> {
        let result = self.checked_transition(record, all, new_status, comment, acted_at);
        match &result {
            Ok(updated) => info!(
                event_name = "approval.transition.applied",
                approval_id = %updated.id,
                request_id = %updated.request_id,
                level = updated.level,
                from = record.status.as_str(),
                to = updated.status.as_str(),
                "approval decision applied"
            ),
            Err(error) => warn!(
                event_name = "approval.transition.rejected",
                approval_id = %record.id,
                request_id = %record.request_id,
                attempted = new_status.as_str(),
                error = %error,
                "approval decision rejected"
            ),
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    pub fn decide_with_audit<S>(
        &self,
        record: &ApprovalRecord,
        all: &[ApprovalRecord],
        new_status: ApprovalStatus,
        comment: Option<String>,
        acted_at: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<ApprovalRecord, DomainError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.decide(record, all, new_status, comment, acted_at);
        sink.emit(decision_audit_event(audit, record, new_status, result.as_ref()));
        result
    }

    /// Carries prior approvals forward into the current level, then sends whatever is left
    /// pending there.
    pub fn advance(&self, records: &[ApprovalRecord], now: DateTime<Utc>) -> ChainProgress {
        let carried_forward = if self.carry_forward_prior_approvals {
            carry_forward_prior_approvals(records, now)
        } else {
            Vec::new()
        };

        let merged: Vec<ApprovalRecord> = records
            .iter()
            .map(|record| {
                carried_forward
                    .iter()
                    .find(|carried| carried.id == record.id)
                    .unwrap_or(record)
                    .clone()
            })
            .collect();

        ChainProgress { activation: activate_next_level(&merged, now), carried_forward }
    }

    fn checked_transition(
        &self,
        record: &ApprovalRecord,
        all: &[ApprovalRecord],
        new_status: ApprovalStatus,
        comment: Option<String>,
        acted_at: DateTime<Utc>,
    ) -> Result<ApprovalRecord, DomainError> {
        if !record.status.is_terminal() {
            if let Some(blocking_level) = blocking_level(record, all) {
                return Err(DomainError::NotActionable {
                    approval_id: record.id.clone(),
                    blocking_level,
                });
            }
        }
        Ok(transition(record, new_status, comment, acted_at)?)
    }
}

/// Audit event for a chain opened by [`WorkflowEngine::start`].
pub fn chain_audit_event(
    audit: &AuditContext,
    class: RequestClass,
    report: &ChainReport,
) -> AuditEvent {
    let (event_type, category) = match class {
        RequestClass::Service => ("approval.chain.built", AuditCategory::Chain),
        RequestClass::Incident => ("approval.incident.auto_approved", AuditCategory::AutoApproval),
    };
    audit
        .event(event_type, category, AuditOutcome::Success)
        .with_metadata("request_class", class.as_str())
        .with_metadata("records", report.produced_records.to_string())
        .with_metadata("skipped", report.skipped.len().to_string())
        .with_metadata("empty_chain", report.is_empty_chain().to_string())
}

/// Audit event for a decision on `record`. `result` must be the outcome that was actually
/// stored, so callers persisting the record emit this only after the write settles.
pub fn decision_audit_event(
    audit: &AuditContext,
    record: &ApprovalRecord,
    new_status: ApprovalStatus,
    result: Result<&ApprovalRecord, &DomainError>,
) -> AuditEvent {
    let event = match result {
        Ok(updated) => audit
            .event("approval.transition.applied", AuditCategory::Transition, AuditOutcome::Success)
            .with_metadata("from", record.status.as_str())
            .with_metadata("to", updated.status.as_str()),
        Err(error) => audit
            .event(
                "approval.transition.rejected",
                AuditCategory::Transition,
                AuditOutcome::Rejected,
            )
            .with_metadata("attempted", new_status.as_str())
            .with_metadata("error", error.to_string()),
    };
    event
        .with_metadata("approval_id", record.id.to_string())
        .with_metadata("level", record.level.to_string())
}
