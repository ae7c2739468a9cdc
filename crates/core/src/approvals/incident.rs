use chrono::{DateTime, Utc};
use tracing::info;

use crate::approvals::chain::{resolve_levels, ChainOutcome, ChainReport};
use crate::approvals::resolver::{ApproverResolver, UserDirectory};
use crate::domain::approval::{ApprovalRecordDraft, ApprovalStatus, RequestId};
use crate::domain::requester::RequesterProfile;
use crate::domain::template::ApprovalLevelDefinition;

pub const INCIDENT_AUTO_APPROVAL_COMMENT: &str = "Automatically approved for incident request";

/// Synthesizes an already approved chain for an incident.
///
/// Uses the same resolution and deduplication as [`crate::approvals::chain::build_chain`] over
/// every level, ignores ad-hoc approvers, and never emits a pending record.
pub fn auto_approve<D>(
    request_id: RequestId,
    levels: &[ApprovalLevelDefinition],
    requester: &RequesterProfile,
    resolver: &ApproverResolver<D>,
    acted_at: DateTime<Utc>,
) -> ChainOutcome
where
    D: UserDirectory,
{
    let mut report = ChainReport::default();
    let resolved = resolve_levels(request_id, levels, &[], requester, resolver, &mut report);

    let drafts: Vec<ApprovalRecordDraft> = resolved
        .iter()
        .flat_map(|level| {
            level.approvers.iter().map(move |approver| ApprovalRecordDraft {
                request_id,
                level: level.definition.level,
                level_name: level.definition.display_name.clone(),
                approver_id: approver.user_id,
                diverted_from: approver.diverted_from,
                status: ApprovalStatus::Approved,
                auto_flag: true,
                comment: Some(INCIDENT_AUTO_APPROVAL_COMMENT.to_owned()),
                sent_at: Some(acted_at),
                acted_at: Some(acted_at),
            })
        })
        .collect();

    report.produced_records = drafts.len();
    info!(
        event_name = "approval.incident.auto_approved",
        request_id = %request_id,
        records = report.produced_records,
        skipped = report.skipped.len(),
        "incident approval chain auto-approved"
    );

    ChainOutcome { drafts, report }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{auto_approve, INCIDENT_AUTO_APPROVAL_COMMENT};
    use crate::approvals::resolver::{ApproverResolver, InMemoryUserDirectory};
    use crate::domain::approval::{ApprovalStatus, RequestId, UserId};
    use crate::domain::requester::RequesterProfile;
    use crate::domain::template::{ApprovalLevelDefinition, ApproverDescriptor};

    #[test]
    fn resolvable_levels_are_approved_with_auto_flag() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 22, 15, 0).unwrap();
        let directory = InMemoryUserDirectory::with_users([UserId(7)]);
        let resolver = ApproverResolver::new(&directory, now);
        let requester = RequesterProfile::new(UserId(1)).with_manager(UserId(42));
        let levels = vec![
            ApprovalLevelDefinition::new(1, "Manager", vec![ApproverDescriptor::ReportingManager]),
            ApprovalLevelDefinition::new(
                2,
                "IT",
                vec![
                    ApproverDescriptor::Explicit(UserId(7)),
                    ApproverDescriptor::Explicit(UserId(7)),
                ],
            ),
        ];

        let outcome = auto_approve(RequestId(9), &levels, &requester, &resolver, now);

        assert_eq!(outcome.drafts.len(), 2);
        for draft in &outcome.drafts {
            assert_eq!(draft.status, ApprovalStatus::Approved);
            assert!(draft.auto_flag);
            assert_eq!(draft.acted_at, Some(now));
            assert_eq!(draft.comment.as_deref(), Some(INCIDENT_AUTO_APPROVAL_COMMENT));
        }
        assert_eq!(outcome.report.expected_descriptors, 3);
    }

    #[test]
    fn repeated_level_numbers_do_not_duplicate_approved_records() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 22, 15, 0).unwrap();
        let directory = InMemoryUserDirectory::with_users([UserId(7)]);
        let resolver = ApproverResolver::new(&directory, now);
        let levels = vec![
            ApprovalLevelDefinition::new(1, "IT", vec![ApproverDescriptor::Explicit(UserId(7))]),
            ApprovalLevelDefinition::new(1, "Ops", vec![ApproverDescriptor::Explicit(UserId(7))]),
        ];

        let outcome =
            auto_approve(RequestId(9), &levels, &RequesterProfile::new(UserId(1)), &resolver, now);

        assert_eq!(outcome.drafts.len(), 1);
        assert_eq!(outcome.drafts[0].level_name, "IT");
    }

    #[test]
    fn unresolvable_incident_chain_is_empty() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 22, 15, 0).unwrap();
        let directory = InMemoryUserDirectory::default();
        let resolver = ApproverResolver::new(&directory, now);
        let levels =
            vec![ApprovalLevelDefinition::new(1, "Head", vec![ApproverDescriptor::DepartmentHead])];

        let outcome =
            auto_approve(RequestId(9), &levels, &RequesterProfile::new(UserId(1)), &resolver, now);

        assert!(outcome.drafts.is_empty());
        assert!(outcome.report.is_empty_chain());
        assert!(outcome.report.nobody_resolved());
    }
}
