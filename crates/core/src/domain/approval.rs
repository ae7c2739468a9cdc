use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub i64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

impl ApprovalId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a single approval record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    PendingApproval,
    Approved,
    Rejected,
    ForClarification,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ForClarification => "for_clarification",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending_approval" => Some(Self::PendingApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "for_clarification" => Some(Self::ForClarification),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-level status derived from the full set of approval records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallApprovalStatus {
    NotRequired,
    PendingApproval,
    Approved,
    Rejected,
    ForClarification,
}

impl OverallApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequired => "not_required",
            Self::PendingApproval => "pending_approval",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ForClarification => "for_clarification",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "not_required" => Some(Self::NotRequired),
            "pending_approval" => Some(Self::PendingApproval),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "for_clarification" => Some(Self::ForClarification),
            _ => None,
        }
    }
}

impl fmt::Display for OverallApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    Service,
    Incident,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Incident => "incident",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "service" => Some(Self::Service),
            "incident" => Some(Self::Incident),
            _ => None,
        }
    }
}

/// An approval record that has been computed but not yet persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecordDraft {
    pub request_id: RequestId,
    pub level: u32,
    pub level_name: String,
    pub approver_id: UserId,
    pub diverted_from: Option<UserId>,
    pub status: ApprovalStatus,
    pub auto_flag: bool,
    pub comment: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub acted_at: Option<DateTime<Utc>>,
}

impl ApprovalRecordDraft {
    pub fn dedup_key(&self) -> (RequestId, u32, UserId) {
        (self.request_id, self.level, self.approver_id)
    }

    pub fn into_record(self, id: ApprovalId, created_at: DateTime<Utc>) -> ApprovalRecord {
        ApprovalRecord {
            id,
            request_id: self.request_id,
            level: self.level,
            level_name: self.level_name,
            approver_id: self.approver_id,
            diverted_from: self.diverted_from,
            status: self.status,
            auto_flag: self.auto_flag,
            comment: self.comment,
            sent_at: self.sent_at,
            acted_at: self.acted_at,
            created_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: ApprovalId,
    pub request_id: RequestId,
    pub level: u32,
    pub level_name: String,
    pub approver_id: UserId,
    pub diverted_from: Option<UserId>,
    pub status: ApprovalStatus,
    pub auto_flag: bool,
    pub comment: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub acted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalRecord {
    pub fn dedup_key(&self) -> (RequestId, u32, UserId) {
        (self.request_id, self.level, self.approver_id)
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::PendingApproval
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalStatus, OverallApprovalStatus, RequestClass};

    #[test]
    fn approval_status_round_trips_from_storage_encoding() {
        let cases = [
            ApprovalStatus::PendingApproval,
            ApprovalStatus::Approved,
            ApprovalStatus::Rejected,
            ApprovalStatus::ForClarification,
        ];

        for status in cases {
            assert_eq!(ApprovalStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn overall_status_uses_snake_case_wire_names() {
        let encoded = serde_json::to_string(&OverallApprovalStatus::NotRequired)
            .expect("status should serialize");
        assert_eq!(encoded, "\"not_required\"");
        assert_eq!(
            OverallApprovalStatus::parse(" For_Clarification "),
            Some(OverallApprovalStatus::ForClarification)
        );
    }

    #[test]
    fn only_approved_and_rejected_are_terminal() {
        assert!(ApprovalStatus::Approved.is_terminal());
        assert!(ApprovalStatus::Rejected.is_terminal());
        assert!(!ApprovalStatus::PendingApproval.is_terminal());
        assert!(!ApprovalStatus::ForClarification.is_terminal());
    }

    #[test]
    fn request_class_parse_rejects_unknown_values() {
        assert_eq!(RequestClass::parse("Incident"), Some(RequestClass::Incident));
        assert_eq!(RequestClass::parse("change"), None);
    }
}
