use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use servicedesk_core::approvals::chain::StartRequest;
use servicedesk_core::approvals::resolver::{BackupAssignment, InMemoryUserDirectory};
use servicedesk_core::approvals::state::{request_disposition, RequestDisposition};
use servicedesk_core::approvals::WorkflowEngine;
use servicedesk_core::audit::{AuditContext, AuditEvent, InMemoryAuditSink};
use servicedesk_core::config::AppConfig;
use servicedesk_core::domain::approval::{
    ApprovalRecord, ApprovalStatus, OverallApprovalStatus, RequestClass, RequestId, UserId,
};
use servicedesk_core::domain::requester::RequesterProfile;
use servicedesk_core::domain::template::{parse_template_levels, RejectedDescriptor};
use servicedesk_core::errors::{ApplicationError, DomainError};
use servicedesk_core::sla::{assign_sla_with_audit, SlaAssignment};
use servicedesk_db::{
    ApprovalWorkflowService, Decision, InMemoryApprovalRepository, ServiceError, Submission,
};

use crate::commands::{CommandResult, EXIT_INPUT};

/// A request, its organisation snapshot and an optional list of approver decisions to replay.
#[derive(Debug, Deserialize)]
pub struct ChainScenario {
    pub request_id: RequestId,
    #[serde(default = "default_class")]
    pub class: RequestClass,
    pub priority: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub requester: RequesterProfile,
    #[serde(default)]
    pub known_users: Vec<UserId>,
    #[serde(default)]
    pub backups: Vec<BackupAssignment>,
    #[serde(default)]
    pub workflow: Value,
    #[serde(default)]
    pub additional_approvers: Vec<UserId>,
    #[serde(default)]
    pub decisions: Vec<ScenarioDecision>,
}

#[derive(Debug, Deserialize)]
pub struct ScenarioDecision {
    pub level: u32,
    pub approver_id: UserId,
    pub status: ApprovalStatus,
    pub comment: Option<String>,
    pub at: Option<DateTime<Utc>>,
}

fn default_class() -> RequestClass {
    RequestClass::Service
}

#[derive(Debug, Serialize)]
struct ChainRun {
    rejected_descriptors: Vec<RejectedDescriptor>,
    sla: Option<SlaAssignment>,
    submission: Submission,
    decisions: Vec<Decision>,
    overall_status: OverallApprovalStatus,
    disposition: RequestDisposition,
    records: Vec<ApprovalRecord>,
    audit_events: Vec<AuditEvent>,
}

enum RunError {
    Input(String),
    Application { class: &'static str, error: ApplicationError, correlation_id: String },
}

impl RunError {
    fn application(class: &'static str, correlation_id: &str, error: ApplicationError) -> Self {
        Self::Application { class, error, correlation_id: correlation_id.to_owned() }
    }

    fn into_result(self) -> CommandResult {
        match self {
            Self::Input(message) => {
                CommandResult::failure("chain", "invalid_input", message, EXIT_INPUT)
            }
            Self::Application { class, error, correlation_id } => {
                CommandResult::application_failure("chain", class, error, &correlation_id)
            }
        }
    }
}

pub fn run(config: &AppConfig, scenario_path: &Path) -> CommandResult {
    let scenario = match read_scenario(scenario_path) {
        Ok(scenario) => scenario,
        Err(error) => return error.into_result(),
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure("chain", "runtime", error.to_string(), 1);
        }
    };

    match runtime.block_on(run_scenario(config, scenario)) {
        Ok(report) => CommandResult::success("chain", &report),
        Err(error) => error.into_result(),
    }
}

fn read_scenario(path: &Path) -> Result<ChainScenario, RunError> {
    let raw = fs::read_to_string(path).map_err(|error| {
        RunError::Input(format!("could not read scenario `{}`: {error}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|error| {
        RunError::Input(format!("could not parse scenario `{}`: {error}", path.display()))
    })
}

async fn run_scenario(config: &AppConfig, scenario: ChainScenario) -> Result<ChainRun, RunError> {
    let request_id = scenario.request_id;
    let audit = AuditContext::new(Some(request_id), format!("cli-{request_id}"), "cli");
    let correlation_id = audit.correlation_id.as_str();
    let workflow_error = |error: ServiceError| {
        RunError::application("workflow", correlation_id, error.into())
    };

    let template = parse_template_levels(&scenario.workflow).map_err(|error| {
        RunError::application("template", correlation_id, DomainError::from(error).into())
    })?;

    let sink = InMemoryAuditSink::default();
    let sla = scenario
        .priority
        .as_deref()
        .map(|priority| {
            assign_sla_with_audit(
                priority,
                scenario.submitted_at,
                &config.sla.policies,
                &sink,
                &audit,
            )
        })
        .transpose()
        .map_err(|error| {
            RunError::application("sla_policy", correlation_id, DomainError::from(error).into())
        })?;

    let directory = scenario
        .backups
        .into_iter()
        .fold(InMemoryUserDirectory::with_users(scenario.known_users), |directory, backup| {
            directory.with_backup(backup)
        });
    let engine = WorkflowEngine::new(directory)
        .with_carry_forward(config.workflow.carry_forward_prior_approvals);
    let repository = InMemoryApprovalRepository::default();
    let service = ApprovalWorkflowService::new(repository, engine, Arc::new(sink.clone()));

    let submission = service
        .submit(
            scenario.class,
            StartRequest {
                request_id,
                levels: template.levels,
                additional_approvers: scenario.additional_approvers,
                requester: scenario.requester,
                submitted_at: scenario.submitted_at,
            },
            &audit,
        )
        .await
        .map_err(workflow_error)?;

    let mut decisions = Vec::with_capacity(scenario.decisions.len());
    for decision in scenario.decisions {
        let records = service.records(request_id).await.map_err(workflow_error)?;
        let target = records
            .iter()
            .find(|record| {
                record.level == decision.level && record.approver_id == decision.approver_id
            })
            .ok_or_else(|| {
                RunError::Input(format!(
                    "no approval at level {} for approver {}",
                    decision.level, decision.approver_id
                ))
            })?;

        let actor = AuditContext::new(
            Some(request_id),
            correlation_id,
            format!("approver:{}", decision.approver_id),
        );
        let outcome = service
            .decide(
                &target.id,
                decision.status,
                decision.comment,
                decision.at.unwrap_or(scenario.submitted_at),
                &actor,
            )
            .await
            .map_err(workflow_error)?;
        decisions.push(outcome);
    }

    let records = service.records(request_id).await.map_err(workflow_error)?;
    let overall_status = service.overall_status(request_id).await.map_err(workflow_error)?;

    Ok(ChainRun {
        rejected_descriptors: template.rejected,
        sla,
        submission,
        decisions,
        overall_status,
        disposition: request_disposition(&records),
        records,
        audit_events: sink.events(),
    })
}
