use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::approval::{
    ApprovalId, ApprovalRecord, ApprovalStatus, OverallApprovalStatus, RequestId, UserId,
};
use crate::errors::WorkflowError;

pub const CARRY_FORWARD_COMMENT: &str =
    "Auto approved by System since the approver has already approved in one of the previous levels.";

/// Applies a human decision to a single record.
///
/// Returns a new record; the input is never modified. Terminal records and a
/// `pending_approval` target are refused with [`WorkflowError::InvalidTransition`].
pub fn transition(
    record: &ApprovalRecord,
    new_status: ApprovalStatus,
    comment: Option<String>,
    acted_at: DateTime<Utc>,
) -> Result<ApprovalRecord, WorkflowError> {
    if record.status.is_terminal() || new_status == ApprovalStatus::PendingApproval {
        return Err(WorkflowError::InvalidTransition {
            current: record.status,
            attempted: new_status,
        });
    }

    let mut updated = record.clone();
    updated.status = new_status;
    updated.acted_at = Some(acted_at);
    if comment.is_some() {
        updated.comment = comment;
    }
    Ok(updated)
}

/// Returns a record sent back for clarification to the approver's queue.
pub fn resubmit(
    record: &ApprovalRecord,
    resubmitted_at: DateTime<Utc>,
) -> Result<ApprovalRecord, WorkflowError> {
    if record.status != ApprovalStatus::ForClarification {
        return Err(WorkflowError::InvalidTransition {
            current: record.status,
            attempted: ApprovalStatus::PendingApproval,
        });
    }

    let mut updated = record.clone();
    updated.status = ApprovalStatus::PendingApproval;
    updated.acted_at = None;
    updated.sent_at = Some(resubmitted_at);
    Ok(updated)
}

/// Lowest level below `record` that still has a record not yet approved.
pub fn blocking_level(record: &ApprovalRecord, all: &[ApprovalRecord]) -> Option<u32> {
    all.iter()
        .filter(|other| other.request_id == record.request_id)
        .filter(|other| other.level < record.level && other.status != ApprovalStatus::Approved)
        .map(|other| other.level)
        .min()
}

/// Levels with no records never block, so a level is actionable once every record below
/// it is approved.
pub fn is_actionable(record: &ApprovalRecord, all: &[ApprovalRecord]) -> bool {
    blocking_level(record, all).is_none()
}

/// The lowest level that still has an undecided or non-approved record.
pub fn current_level(records: &[ApprovalRecord]) -> Option<u32> {
    records
        .iter()
        .filter(|record| record.status != ApprovalStatus::Approved)
        .map(|record| record.level)
        .min()
}

pub fn overall_status(records: &[ApprovalRecord]) -> OverallApprovalStatus {
    if records.is_empty() {
        return OverallApprovalStatus::NotRequired;
    }
    if records.iter().any(|record| record.status == ApprovalStatus::Rejected) {
        return OverallApprovalStatus::Rejected;
    }
    if records.iter().any(|record| record.status == ApprovalStatus::ForClarification) {
        return OverallApprovalStatus::ForClarification;
    }
    if records.iter().all(|record| record.status == ApprovalStatus::Approved) {
        return OverallApprovalStatus::Approved;
    }
    OverallApprovalStatus::PendingApproval
}

/// Pending records in the current level that have never been sent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelActivation {
    pub level: Option<u32>,
    pub newly_sent: Vec<ApprovalRecord>,
}

pub fn activate_next_level(records: &[ApprovalRecord], now: DateTime<Utc>) -> LevelActivation {
    let Some(level) = current_level(records) else {
        return LevelActivation::default();
    };

    let newly_sent = records
        .iter()
        .filter(|record| record.level == level && record.is_pending() && record.sent_at.is_none())
        .map(|record| {
            let mut sent = record.clone();
            sent.sent_at = Some(now);
            sent
        })
        .collect();

    LevelActivation { level: Some(level), newly_sent }
}

/// Approves pending records in the current level whose approver already approved an earlier
/// level of the same request.
pub fn carry_forward_prior_approvals(
    records: &[ApprovalRecord],
    now: DateTime<Utc>,
) -> Vec<ApprovalRecord> {
    let Some(level) = current_level(records) else {
        return Vec::new();
    };

    let prior_approvers: BTreeSet<UserId> = records
        .iter()
        .filter(|record| record.level < level && record.status == ApprovalStatus::Approved)
        .map(|record| record.approver_id)
        .collect();

    records
        .iter()
        .filter(|record| {
            record.level == level
                && record.is_pending()
                && prior_approvers.contains(&record.approver_id)
        })
        .map(|record| {
            let mut approved = record.clone();
            approved.status = ApprovalStatus::Approved;
            approved.auto_flag = true;
            approved.comment = Some(CARRY_FORWARD_COMMENT.to_owned());
            approved.acted_at = Some(now);
            approved.sent_at.get_or_insert(now);
            approved
        })
        .collect()
}

/// What the request should do next given its approval records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestDisposition {
    AwaitingApproval,
    ForClarification,
    Closed,
    Open,
}

impl RequestDisposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingApproval => "awaiting_approval",
            Self::ForClarification => "for_clarification",
            Self::Closed => "closed",
            Self::Open => "open",
        }
    }
}

pub fn request_disposition(records: &[ApprovalRecord]) -> RequestDisposition {
    match overall_status(records) {
        OverallApprovalStatus::NotRequired | OverallApprovalStatus::Approved => {
            RequestDisposition::Open
        }
        OverallApprovalStatus::Rejected => RequestDisposition::Closed,
        OverallApprovalStatus::ForClarification => RequestDisposition::ForClarification,
        OverallApprovalStatus::PendingApproval => RequestDisposition::AwaitingApproval,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NotificationIntent {
    ApprovalRequired { approval_id: ApprovalId, approver_id: UserId, level: u32 },
    ClarificationRequested { approval_id: ApprovalId, request_id: RequestId },
    RequestApproved { request_id: RequestId },
    RequestRejected { request_id: RequestId },
}

/// Notifications owed after `decided` changed and `activation` was computed.
pub fn decision_notifications(
    decided: &ApprovalRecord,
    records: &[ApprovalRecord],
    activation: &LevelActivation,
) -> Vec<NotificationIntent> {
    let mut intents = Vec::new();
    if decided.status == ApprovalStatus::ForClarification {
        intents.push(NotificationIntent::ClarificationRequested {
            approval_id: decided.id.clone(),
            request_id: decided.request_id,
        });
    }

    match overall_status(records) {
        OverallApprovalStatus::Rejected => {
            intents.push(NotificationIntent::RequestRejected { request_id: decided.request_id });
        }
        OverallApprovalStatus::Approved => {
            intents.push(NotificationIntent::RequestApproved { request_id: decided.request_id });
        }
        OverallApprovalStatus::PendingApproval => {
            intents.extend(activation.newly_sent.iter().map(|record| {
                NotificationIntent::ApprovalRequired {
                    approval_id: record.id.clone(),
                    approver_id: record.approver_id,
                    level: record.level,
                }
            }));
        }
        OverallApprovalStatus::NotRequired | OverallApprovalStatus::ForClarification => {}
    }

    intents
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{
        activate_next_level, blocking_level, carry_forward_prior_approvals,
        decision_notifications, is_actionable, overall_status, request_disposition, resubmit,
        transition, NotificationIntent, RequestDisposition, CARRY_FORWARD_COMMENT,
    };
    use crate::domain::approval::{
        ApprovalId, ApprovalRecord, ApprovalStatus, OverallApprovalStatus, RequestId, UserId,
    };
    use crate::errors::WorkflowError;

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, 0, 0).unwrap()
    }

    fn record(id: &str, level: u32, approver: i64, status: ApprovalStatus) -> ApprovalRecord {
        ApprovalRecord {
            id: ApprovalId(id.to_owned()),
            request_id: RequestId(77),
            level,
            level_name: format!("Level {level}"),
            approver_id: UserId(approver),
            diverted_from: None,
            status,
            auto_flag: false,
            comment: None,
            sent_at: (level == 1).then(|| at(8)),
            acted_at: None,
            created_at: at(8),
        }
    }

    #[test]
    fn pending_record_can_be_approved_once() {
        let pending = record("a-1", 1, 42, ApprovalStatus::PendingApproval);

        let approved = transition(&pending, ApprovalStatus::Approved, Some("ok".to_owned()), at(9))
            .expect("pending record accepts a decision");
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert_eq!(approved.acted_at, Some(at(9)));
        assert_eq!(approved.comment.as_deref(), Some("ok"));
        assert_eq!(pending.status, ApprovalStatus::PendingApproval);

        let error = transition(&approved, ApprovalStatus::Rejected, None, at(10))
            .expect_err("approved record is terminal");
        assert_eq!(
            error,
            WorkflowError::InvalidTransition {
                current: ApprovalStatus::Approved,
                attempted: ApprovalStatus::Rejected,
            }
        );
    }

    #[test]
    fn terminal_records_refuse_every_target() {
        for current in [ApprovalStatus::Approved, ApprovalStatus::Rejected] {
            for target in [
                ApprovalStatus::PendingApproval,
                ApprovalStatus::Approved,
                ApprovalStatus::Rejected,
                ApprovalStatus::ForClarification,
            ] {
                let decided = record("a-1", 1, 42, current);
                assert!(transition(&decided, target, None, at(9)).is_err());
            }
        }
    }

    #[test]
    fn pending_is_not_a_valid_target() {
        let pending = record("a-1", 1, 42, ApprovalStatus::PendingApproval);
        assert!(transition(&pending, ApprovalStatus::PendingApproval, None, at(9)).is_err());
    }

    #[test]
    fn clarification_round_trip_returns_record_to_pending() {
        let pending = record("a-1", 1, 42, ApprovalStatus::PendingApproval);
        let clarify = transition(&pending, ApprovalStatus::ForClarification, None, at(9))
            .expect("clarification is a valid target");

        let resubmitted = resubmit(&clarify, at(11)).expect("clarification can be resubmitted");
        assert_eq!(resubmitted.status, ApprovalStatus::PendingApproval);
        assert_eq!(resubmitted.acted_at, None);
        assert_eq!(resubmitted.sent_at, Some(at(11)));

        assert!(resubmit(&pending, at(11)).is_err());
    }

    #[test]
    fn later_level_waits_for_every_lower_record() {
        let mut records = vec![
            record("a-1", 1, 42, ApprovalStatus::PendingApproval),
            record("a-2", 1, 43, ApprovalStatus::Approved),
            record("b-1", 2, 7, ApprovalStatus::PendingApproval),
        ];
        assert!(is_actionable(&records[0], &records));
        assert!(!is_actionable(&records[2], &records));
        assert_eq!(blocking_level(&records[2], &records), Some(1));

        records[0].status = ApprovalStatus::Approved;
        assert!(is_actionable(&records[2], &records));

        records[1].status = ApprovalStatus::ForClarification;
        assert!(!is_actionable(&records[2], &records));
    }

    #[test]
    fn missing_levels_do_not_block_later_levels() {
        let records = vec![record("b-1", 2, 7, ApprovalStatus::PendingApproval)];
        assert!(is_actionable(&records[0], &records));
    }

    #[test]
    fn overall_status_follows_precedence() {
        assert_eq!(overall_status(&[]), OverallApprovalStatus::NotRequired);

        let mixed = vec![
            record("a-1", 1, 42, ApprovalStatus::Approved),
            record("b-1", 2, 7, ApprovalStatus::ForClarification),
            record("c-1", 3, 8, ApprovalStatus::Rejected),
        ];
        assert_eq!(overall_status(&mixed), OverallApprovalStatus::Rejected);
        assert_eq!(overall_status(&mixed[..2]), OverallApprovalStatus::ForClarification);
        assert_eq!(overall_status(&mixed[..1]), OverallApprovalStatus::Approved);

        let partial = vec![
            record("a-1", 1, 42, ApprovalStatus::Approved),
            record("b-1", 2, 7, ApprovalStatus::PendingApproval),
        ];
        assert_eq!(overall_status(&partial), OverallApprovalStatus::PendingApproval);
    }

    #[test]
    fn disposition_closes_rejected_and_opens_approved_requests() {
        assert_eq!(request_disposition(&[]), RequestDisposition::Open);
        let rejected = vec![record("a-1", 1, 42, ApprovalStatus::Rejected)];
        assert_eq!(request_disposition(&rejected), RequestDisposition::Closed);
        let pending = vec![record("a-1", 1, 42, ApprovalStatus::PendingApproval)];
        assert_eq!(request_disposition(&pending), RequestDisposition::AwaitingApproval);
    }

    #[test]
    fn activation_sends_unsent_records_of_next_level() {
        let records = vec![
            record("a-1", 1, 42, ApprovalStatus::Approved),
            record("b-1", 2, 7, ApprovalStatus::PendingApproval),
            record("b-2", 2, 8, ApprovalStatus::PendingApproval),
            record("c-1", 3, 9, ApprovalStatus::PendingApproval),
        ];

        let activation = activate_next_level(&records, at(12));

        assert_eq!(activation.level, Some(2));
        let sent: Vec<&str> =
            activation.newly_sent.iter().map(|record| record.id.0.as_str()).collect();
        assert_eq!(sent, vec!["b-1", "b-2"]);
        assert!(activation.newly_sent.iter().all(|record| record.sent_at == Some(at(12))));

        let again = activate_next_level(&[records[0].clone()], at(12));
        assert_eq!(again.level, None);
    }

    #[test]
    fn carry_forward_approves_repeat_approvers_in_current_level() {
        let records = vec![
            record("a-1", 1, 42, ApprovalStatus::Approved),
            record("b-1", 2, 42, ApprovalStatus::PendingApproval),
            record("b-2", 2, 8, ApprovalStatus::PendingApproval),
            record("c-1", 3, 42, ApprovalStatus::PendingApproval),
        ];

        let carried = carry_forward_prior_approvals(&records, at(12) + Duration::minutes(5));

        assert_eq!(carried.len(), 1);
        assert_eq!(carried[0].id, ApprovalId("b-1".to_owned()));
        assert_eq!(carried[0].status, ApprovalStatus::Approved);
        assert!(carried[0].auto_flag);
        assert_eq!(carried[0].comment.as_deref(), Some(CARRY_FORWARD_COMMENT));
    }

    #[test]
    fn final_approval_notifies_request_approved() {
        let records = vec![
            record("a-1", 1, 42, ApprovalStatus::Approved),
            record("b-1", 2, 7, ApprovalStatus::Approved),
        ];
        let activation = activate_next_level(&records, at(12));

        let intents = decision_notifications(&records[1], &records, &activation);

        assert_eq!(
            intents,
            vec![NotificationIntent::RequestApproved { request_id: RequestId(77) }]
        );
    }

    #[test]
    fn level_completion_notifies_next_approvers() {
        let records = vec![
            record("a-1", 1, 42, ApprovalStatus::Approved),
            record("b-1", 2, 7, ApprovalStatus::PendingApproval),
        ];
        let activation = activate_next_level(&records, at(12));

        let intents = decision_notifications(&records[0], &records, &activation);

        assert_eq!(
            intents,
            vec![NotificationIntent::ApprovalRequired {
                approval_id: ApprovalId("b-1".to_owned()),
                approver_id: UserId(7),
                level: 2,
            }]
        );
    }
}
