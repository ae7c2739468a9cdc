use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::approvals::resolver::{
    ApproverResolver, ResolvedApprover, UnresolvedReason, UserDirectory,
};
use crate::domain::approval::{ApprovalRecordDraft, ApprovalStatus, RequestId, UserId};
use crate::domain::requester::RequesterProfile;
use crate::domain::template::{ApprovalLevelDefinition, ApproverDescriptor};

/// Everything needed to open the approval chain of a freshly created request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRequest {
    pub request_id: RequestId,
    pub levels: Vec<ApprovalLevelDefinition>,
    #[serde(default)]
    pub additional_approvers: Vec<UserId>,
    pub requester: RequesterProfile,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedDescriptor {
    pub level: u32,
    pub descriptor: ApproverDescriptor,
    pub reason: UnresolvedReason,
}

/// Diagnostics for a chain build. Skips never abort the build, they only land here.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub skipped: Vec<SkippedDescriptor>,
    pub expected_descriptors: usize,
    pub produced_records: usize,
}

impl ChainReport {
    pub fn is_empty_chain(&self) -> bool {
        self.produced_records == 0
    }

    /// True when descriptors were configured but not a single one resolved.
    pub fn nobody_resolved(&self) -> bool {
        self.expected_descriptors > 0 && self.skipped.len() == self.expected_descriptors
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainOutcome {
    pub drafts: Vec<ApprovalRecordDraft>,
    pub report: ChainReport,
}

pub(crate) struct ResolvedLevel<'a> {
    pub definition: &'a ApprovalLevelDefinition,
    pub approvers: Vec<ResolvedApprover>,
}

/// Resolves every level in ascending order, deduplicating by final identity per level.
///
/// Definitions sharing a level number are merged into one level named after the first of
/// them. `first_level_extras` are appended to the effective descriptor list of the lowest
/// level.
pub(crate) fn resolve_levels<'a, D>(
    request_id: RequestId,
    levels: &'a [ApprovalLevelDefinition],
    first_level_extras: &[UserId],
    requester: &RequesterProfile,
    resolver: &ApproverResolver<D>,
    report: &mut ChainReport,
) -> Vec<ResolvedLevel<'a>>
where
    D: UserDirectory,
{
    let mut ordered: Vec<&ApprovalLevelDefinition> = levels.iter().collect();
    ordered.sort_by_key(|definition| definition.level);

    let mut merged: Vec<(&ApprovalLevelDefinition, Vec<ApproverDescriptor>)> = Vec::new();
    for definition in ordered {
        match merged.last_mut() {
            Some((first, descriptors)) if first.level == definition.level => {
                descriptors.extend(definition.approvers.iter().cloned());
            }
            _ => merged.push((definition, definition.approvers.clone())),
        }
    }

    let mut resolved_levels = Vec::with_capacity(merged.len());
    for (position, (definition, mut descriptors)) in merged.into_iter().enumerate() {
        if position == 0 {
            let extras = first_level_extras.iter().copied().map(ApproverDescriptor::Explicit);
            descriptors.extend(extras);
        }
        report.expected_descriptors += descriptors.len();

        let mut seen = HashSet::new();
        let mut approvers = Vec::new();
        for descriptor in descriptors {
            match resolver.resolve(&descriptor, requester) {
                Ok(approver) => {
                    if seen.insert(approver.user_id) {
                        approvers.push(approver);
                    }
                }
                Err(reason) => {
                    warn!(
                        event_name = "approval.chain.descriptor_skipped",
                        request_id = %request_id,
                        level = definition.level,
                        descriptor = %descriptor,
                        reason = reason.as_str(),
                        "skipping approver descriptor that did not resolve"
                    );
                    report.skipped.push(SkippedDescriptor {
                        level: definition.level,
                        descriptor,
                        reason,
                    });
                }
            }
        }

        resolved_levels.push(ResolvedLevel { definition, approvers });
    }

    resolved_levels
}

/// Builds pending drafts for a service request.
///
/// Records in the lowest level that produced any approver are stamped as sent at submission
/// time. Levels with no surviving approver produce nothing and do not block later levels.
pub fn build_chain<D>(request: &StartRequest, resolver: &ApproverResolver<D>) -> ChainOutcome
where
    D: UserDirectory,
{
    let mut report = ChainReport::default();
    let resolved = resolve_levels(
        request.request_id,
        &request.levels,
        &request.additional_approvers,
        &request.requester,
        resolver,
        &mut report,
    );

    let first_active_level = resolved
        .iter()
        .find(|level| !level.approvers.is_empty())
        .map(|level| level.definition.level);

    let drafts: Vec<ApprovalRecordDraft> = resolved
        .iter()
        .flat_map(|level| {
            let sent_at = (Some(level.definition.level) == first_active_level)
                .then_some(request.submitted_at);
            level.approvers.iter().map(move |approver| ApprovalRecordDraft {
                request_id: request.request_id,
                level: level.definition.level,
                level_name: level.definition.display_name.clone(),
                approver_id: approver.user_id,
                diverted_from: approver.diverted_from,
                status: ApprovalStatus::PendingApproval,
                auto_flag: false,
                comment: None,
                sent_at,
                acted_at: None,
            })
        })
        .collect();

    report.produced_records = drafts.len();
    info!(
        event_name = "approval.chain.built",
        request_id = %request.request_id,
        levels = request.levels.len(),
        records = report.produced_records,
        skipped = report.skipped.len(),
        "approval chain built"
    );

    ChainOutcome { drafts, report }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use chrono::{NaiveDate, TimeZone, Utc};

    use super::{build_chain, StartRequest};
    use crate::approvals::resolver::{
        ApproverResolver, BackupAssignment, InMemoryUserDirectory, UnresolvedReason,
    };
    use crate::domain::approval::{ApprovalStatus, RequestId, UserId};
    use crate::domain::requester::{DepartmentId, RequesterProfile};
    use crate::domain::template::{ApprovalLevelDefinition, ApproverDescriptor};

    fn submitted_at() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    fn request(
        levels: Vec<ApprovalLevelDefinition>,
        additional_approvers: Vec<UserId>,
        requester: RequesterProfile,
    ) -> StartRequest {
        StartRequest {
            request_id: RequestId(500),
            levels,
            additional_approvers,
            requester,
            submitted_at: submitted_at(),
        }
    }

    fn manager_then_explicit() -> Vec<ApprovalLevelDefinition> {
        vec![
            ApprovalLevelDefinition::new(1, "Manager", vec![ApproverDescriptor::ReportingManager]),
            ApprovalLevelDefinition::new(2, "IT", vec![ApproverDescriptor::Explicit(UserId(7))]),
        ]
    }

    #[test]
    fn manager_and_explicit_levels_produce_one_pending_record_each() {
        let directory = InMemoryUserDirectory::with_users([UserId(7), UserId(42)]);
        let resolver = ApproverResolver::new(&directory, submitted_at());
        let requester = RequesterProfile::new(UserId(1)).with_manager(UserId(42));

        let outcome = build_chain(&request(manager_then_explicit(), vec![], requester), &resolver);

        assert_eq!(outcome.drafts.len(), 2);
        assert_eq!(outcome.drafts[0].level, 1);
        assert_eq!(outcome.drafts[0].approver_id, UserId(42));
        assert_eq!(outcome.drafts[0].sent_at, Some(submitted_at()));
        assert_eq!(outcome.drafts[1].level, 2);
        assert_eq!(outcome.drafts[1].approver_id, UserId(7));
        assert_eq!(outcome.drafts[1].sent_at, None);
        assert!(outcome
            .drafts
            .iter()
            .all(|draft| draft.status == ApprovalStatus::PendingApproval && !draft.auto_flag));
        assert!(outcome.report.skipped.is_empty());
    }

    #[test]
    fn missing_manager_skips_level_and_sends_next_level_immediately() {
        let directory = InMemoryUserDirectory::with_users([UserId(7)]);
        let resolver = ApproverResolver::new(&directory, submitted_at());

        let outcome = build_chain(
            &request(manager_then_explicit(), vec![], RequesterProfile::new(UserId(1))),
            &resolver,
        );

        assert_eq!(outcome.drafts.len(), 1);
        assert_eq!(outcome.drafts[0].level, 2);
        assert_eq!(outcome.drafts[0].sent_at, Some(submitted_at()));
        assert_eq!(outcome.report.skipped.len(), 1);
        assert_eq!(outcome.report.skipped[0].reason, UnresolvedReason::NoManagerConfigured);
        assert_eq!(outcome.report.expected_descriptors, 2);
        assert_eq!(outcome.report.produced_records, 1);
    }

    #[test]
    fn additional_approvers_are_appended_to_first_level_and_deduplicated() {
        let directory = InMemoryUserDirectory::with_users([UserId(7), UserId(8), UserId(42)]);
        let resolver = ApproverResolver::new(&directory, submitted_at());
        let requester = RequesterProfile::new(UserId(1)).with_manager(UserId(42));
        let levels = vec![ApprovalLevelDefinition::new(
            1,
            "Level 1",
            vec![ApproverDescriptor::ReportingManager, ApproverDescriptor::Explicit(UserId(42))],
        )];

        let outcome = build_chain(
            &request(levels, vec![UserId(8), UserId(42), UserId(99)], requester),
            &resolver,
        );

        let approvers: Vec<UserId> = outcome.drafts.iter().map(|draft| draft.approver_id).collect();
        assert_eq!(approvers, vec![UserId(42), UserId(8)]);
        assert_eq!(outcome.report.expected_descriptors, 5);
        assert_eq!(outcome.report.skipped.len(), 1);
        assert_eq!(
            outcome.report.skipped[0].reason,
            UnresolvedReason::NotFound { user_id: UserId(99) }
        );
    }

    #[test]
    fn levels_are_processed_in_ascending_order_regardless_of_input_order() {
        let directory = InMemoryUserDirectory::with_users([UserId(7), UserId(9)]);
        let resolver = ApproverResolver::new(&directory, submitted_at());
        let levels = vec![
            ApprovalLevelDefinition::new(2, "Two", vec![ApproverDescriptor::Explicit(UserId(9))]),
            ApprovalLevelDefinition::new(1, "One", vec![ApproverDescriptor::Explicit(UserId(7))]),
        ];

        let start = request(levels, vec![UserId(9)], RequesterProfile::new(UserId(1)));

        let outcome = build_chain(&start, &resolver);

        let pairs: Vec<(u32, UserId)> =
            outcome.drafts.iter().map(|draft| (draft.level, draft.approver_id)).collect();
        assert_eq!(pairs, vec![(1, UserId(7)), (1, UserId(9)), (2, UserId(9))]);
    }

    #[test]
    fn definitions_sharing_a_level_number_merge_into_one_level() {
        let directory = InMemoryUserDirectory::with_users([UserId(7), UserId(8)]);
        let resolver = ApproverResolver::new(&directory, submitted_at());
        let levels = vec![
            ApprovalLevelDefinition::new(1, "Lead", vec![ApproverDescriptor::Explicit(UserId(7))]),
            ApprovalLevelDefinition::new(
                1,
                "Lead again",
                vec![
                    ApproverDescriptor::Explicit(UserId(7)),
                    ApproverDescriptor::Explicit(UserId(8)),
                ],
            ),
        ];
        let start = request(levels, vec![UserId(7)], RequesterProfile::new(UserId(1)));

        let outcome = build_chain(&start, &resolver);

        let keys: HashSet<_> = outcome.drafts.iter().map(|draft| draft.dedup_key()).collect();
        assert_eq!(keys.len(), outcome.drafts.len());
        let approvers: Vec<UserId> = outcome.drafts.iter().map(|draft| draft.approver_id).collect();
        assert_eq!(approvers, vec![UserId(7), UserId(8)]);
        assert!(outcome.drafts.iter().all(|draft| draft.level_name == "Lead"));
        assert!(outcome.drafts.iter().all(|draft| draft.sent_at == Some(submitted_at())));
        assert_eq!(outcome.report.expected_descriptors, 4);
    }

    #[test]
    fn deduplication_uses_identity_after_backup_diversion() {
        let directory = InMemoryUserDirectory::with_users([UserId(7), UserId(70)]).with_backup(
            BackupAssignment {
                original_approver_id: UserId(7),
                backup_approver_id: UserId(70),
                starts_on: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                ends_on: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            },
        );
        let resolver = ApproverResolver::new(&directory, submitted_at());
        let levels = vec![ApprovalLevelDefinition::new(
            1,
            "Level 1",
            vec![
                ApproverDescriptor::Explicit(UserId(7)),
                ApproverDescriptor::Explicit(UserId(70)),
            ],
        )];

        let outcome =
            build_chain(&request(levels, vec![], RequesterProfile::new(UserId(1))), &resolver);

        assert_eq!(outcome.drafts.len(), 1);
        assert_eq!(outcome.drafts[0].approver_id, UserId(70));
        assert_eq!(outcome.drafts[0].diverted_from, Some(UserId(7)));
    }

    #[test]
    fn all_unresolved_descriptors_yield_empty_chain() {
        let directory = InMemoryUserDirectory::default();
        let resolver = ApproverResolver::new(&directory, submitted_at());
        let requester = RequesterProfile::new(UserId(1)).with_department(DepartmentId(4), None);
        let levels = vec![
            ApprovalLevelDefinition::new(1, "Head", vec![ApproverDescriptor::DepartmentHead]),
            ApprovalLevelDefinition::new(2, "Named", vec![ApproverDescriptor::Explicit(UserId(5))]),
        ];

        let outcome = build_chain(&request(levels, vec![], requester), &resolver);

        assert!(outcome.drafts.is_empty());
        assert!(outcome.report.is_empty_chain());
        assert!(outcome.report.nobody_resolved());
    }

    #[test]
    fn identical_inputs_build_identical_chains() {
        let directory = InMemoryUserDirectory::with_users([UserId(7), UserId(8), UserId(42)]);
        let resolver = ApproverResolver::new(&directory, submitted_at());
        let requester = RequesterProfile::new(UserId(1)).with_manager(UserId(42));
        let start = request(manager_then_explicit(), vec![UserId(8)], requester);

        let first = build_chain(&start, &resolver);
        let second = build_chain(&start, &resolver);

        assert_eq!(first, second);
        let keys: HashSet<_> = first.drafts.iter().map(|draft| draft.dedup_key()).collect();
        assert_eq!(keys.len(), first.drafts.len());
    }
}
