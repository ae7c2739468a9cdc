use chrono::{DateTime, Utc};
use serde::Serialize;

use servicedesk_core::config::AppConfig;
use servicedesk_core::errors::{ApplicationError, DomainError};
use servicedesk_core::sla::{assign_sla, evaluate_sla, SlaAssignment, SlaStatus};

use crate::commands::{CommandResult, EXIT_INPUT};

#[derive(Debug, Serialize)]
struct SlaReport {
    assignment: SlaAssignment,
    response_status: SlaStatus,
    resolution_status: SlaStatus,
}

/// Assigns an SLA to a request raised at `reference_time` and reports its status at `now`.
pub fn run(
    config: &AppConfig,
    priority: &str,
    reference_time: Option<&str>,
    now: DateTime<Utc>,
) -> CommandResult {
    let reference_time = match reference_time.map(parse_timestamp).transpose() {
        Ok(value) => value.unwrap_or(now),
        Err(message) => return CommandResult::failure("sla", "invalid_input", message, EXIT_INPUT),
    };

    match assign_sla(priority, reference_time, &config.sla.policies) {
        Ok(assignment) => {
            let threshold = config.sla.at_risk_threshold();
            let report = SlaReport {
                response_status: evaluate_sla(assignment.response_due_at, now, threshold),
                resolution_status: evaluate_sla(assignment.resolution_due_at, now, threshold),
                assignment,
            };
            CommandResult::success("sla", &report)
        }
        Err(error) => CommandResult::application_failure(
            "sla",
            "sla_policy",
            ApplicationError::from(DomainError::from(error)),
            "cli-sla",
        ),
    }
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| format!("`{raw}` is not an RFC 3339 timestamp: {error}"))
}
