use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use servicedesk_core::domain::approval::{
    ApprovalId, ApprovalRecord, ApprovalRecordDraft, ApprovalStatus, RequestId,
};

use super::{ApprovalRepository, RepositoryError, StoredChain};

#[derive(Default)]
struct ApprovalStore {
    chains: HashMap<RequestId, Vec<ApprovalId>>,
    records: HashMap<ApprovalId, ApprovalRecord>,
}

impl ApprovalStore {
    fn chain(&self, request_id: RequestId) -> Option<Vec<ApprovalRecord>> {
        self.chains.get(&request_id).map(|ids| {
            ids.iter().filter_map(|id| self.records.get(id)).cloned().collect()
        })
    }
}

#[derive(Default)]
pub struct InMemoryApprovalRepository {
    store: RwLock<ApprovalStore>,
}

fn validate_drafts(
    request_id: RequestId,
    drafts: &[ApprovalRecordDraft],
) -> Result<(), RepositoryError> {
    let mut seen = HashSet::new();
    for draft in drafts {
        if draft.request_id != request_id {
            return Err(RepositoryError::RequestMismatch {
                expected: request_id,
                found: draft.request_id,
            });
        }
        if !seen.insert(draft.dedup_key()) {
            return Err(RepositoryError::DuplicateApprover {
                request_id,
                level: draft.level,
                approver_id: draft.approver_id.to_string(),
            });
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn insert_chain(
        &self,
        request_id: RequestId,
        drafts: Vec<ApprovalRecordDraft>,
        created_at: DateTime<Utc>,
    ) -> Result<StoredChain, RepositoryError> {
        let mut store = self.store.write().await;
        if let Some(records) = store.chain(request_id) {
            return Ok(StoredChain { records, replayed: true });
        }
        validate_drafts(request_id, &drafts)?;

        let records: Vec<ApprovalRecord> = drafts
            .into_iter()
            .map(|draft| draft.into_record(ApprovalId::generate(), created_at))
            .collect();
        store.chains.insert(request_id, records.iter().map(|record| record.id.clone()).collect());
        for record in &records {
            store.records.insert(record.id.clone(), record.clone());
        }
        Ok(StoredChain { records, replayed: false })
    }

    async fn list_for_request(
        &self,
        request_id: RequestId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.chain(request_id).unwrap_or_default())
    }

    async fn find_by_id(&self, id: &ApprovalId) -> Result<Option<ApprovalRecord>, RepositoryError> {
        let store = self.store.read().await;
        Ok(store.records.get(id).cloned())
    }

    async fn replace_if_status(
        &self,
        record: ApprovalRecord,
        expected: ApprovalStatus,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.write().await;
        let stored = store
            .records
            .get_mut(&record.id)
            .ok_or_else(|| RepositoryError::NotFound(record.id.clone()))?;

        if stored.request_id != record.request_id {
            return Err(RepositoryError::RequestMismatch {
                expected: stored.request_id,
                found: record.request_id,
            });
        }
        if stored.status != expected {
            return Err(RepositoryError::StaleStatus {
                approval_id: record.id,
                expected,
                actual: stored.status,
            });
        }

        *stored = record;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use servicedesk_core::domain::approval::{
        ApprovalId, ApprovalRecordDraft, ApprovalStatus, RequestId, UserId,
    };

    use crate::repositories::{ApprovalRepository, InMemoryApprovalRepository, RepositoryError};

    fn draft(request_id: i64, level: u32, approver: i64) -> ApprovalRecordDraft {
        ApprovalRecordDraft {
            request_id: RequestId(request_id),
            level,
            level_name: format!("Level {level}"),
            approver_id: UserId(approver),
            diverted_from: None,
            status: ApprovalStatus::PendingApproval,
            auto_flag: false,
            comment: None,
            sent_at: None,
            acted_at: None,
        }
    }

    fn created_at() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn chain_insert_is_replay_safe() {
        let repo = InMemoryApprovalRepository::default();
        let drafts = vec![draft(1, 1, 42), draft(1, 2, 7)];

        let first =
            repo.insert_chain(RequestId(1), drafts.clone(), created_at()).await.expect("insert");
        let replay = repo.insert_chain(RequestId(1), drafts, created_at()).await.expect("replay");

        assert!(!first.replayed);
        assert!(replay.replayed);
        assert_eq!(first.records, replay.records);
        let listed = repo.list_for_request(RequestId(1)).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].level, 1);
        assert_eq!(listed[1].level, 2);
    }

    #[tokio::test]
    async fn empty_chain_is_remembered() {
        let repo = InMemoryApprovalRepository::default();

        let stored =
            repo.insert_chain(RequestId(3), Vec::new(), created_at()).await.expect("insert");
        let replay = repo
            .insert_chain(RequestId(3), vec![draft(3, 1, 42)], created_at())
            .await
            .expect("replay");

        assert!(stored.records.is_empty());
        assert!(replay.replayed);
        assert!(replay.records.is_empty());
    }

    #[tokio::test]
    async fn chain_insert_rejects_duplicates_and_foreign_drafts() {
        let repo = InMemoryApprovalRepository::default();

        let duplicate = repo
            .insert_chain(RequestId(1), vec![draft(1, 1, 42), draft(1, 1, 42)], created_at())
            .await;
        assert!(matches!(duplicate, Err(RepositoryError::DuplicateApprover { level: 1, .. })));

        let foreign = repo.insert_chain(RequestId(1), vec![draft(2, 1, 42)], created_at()).await;
        assert_eq!(
            foreign,
            Err(RepositoryError::RequestMismatch { expected: RequestId(1), found: RequestId(2) })
        );
        assert!(repo.list_for_request(RequestId(1)).await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn replace_if_status_is_compare_and_swap() {
        let repo = InMemoryApprovalRepository::default();
        let stored = repo
            .insert_chain(RequestId(1), vec![draft(1, 1, 42)], created_at())
            .await
            .expect("insert")
            .records;

        let mut approved = stored[0].clone();
        approved.status = ApprovalStatus::Approved;
        repo.replace_if_status(approved.clone(), ApprovalStatus::PendingApproval)
            .await
            .expect("first writer wins");

        let mut rejected = stored[0].clone();
        rejected.status = ApprovalStatus::Rejected;
        let error = repo
            .replace_if_status(rejected, ApprovalStatus::PendingApproval)
            .await
            .expect_err("second writer loses");
        assert_eq!(
            error,
            RepositoryError::StaleStatus {
                approval_id: stored[0].id.clone(),
                expected: ApprovalStatus::PendingApproval,
                actual: ApprovalStatus::Approved,
            }
        );

        let found = repo.find_by_id(&stored[0].id).await.expect("find");
        assert_eq!(found, Some(approved));

        let missing = repo.find_by_id(&ApprovalId("nope".to_owned())).await.expect("find");
        assert_eq!(missing, None);
    }
}
