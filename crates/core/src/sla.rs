//! SLA due-date arithmetic and escalation status.
//!
//! Policies are stored as day/hour/minute parts and normalized to whole minutes before any
//! date math. The calculator only adds a duration to an instant; time zones stay with the
//! caller's `DateTime`.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::errors::WorkflowError;

const PRIORITY_ALIASES: &[(&str, &str)] = &[("critical", "top")];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaDuration {
    #[serde(default)]
    pub days: i64,
    #[serde(default)]
    pub hours: i64,
    #[serde(default)]
    pub minutes: i64,
}

impl SlaDuration {
    pub fn new(days: i64, hours: i64, minutes: i64) -> Self {
        Self { days, hours, minutes }
    }

    pub fn from_hours(hours: i64) -> Self {
        Self { days: 0, hours, minutes: 0 }
    }

    /// Negative parts count as zero.
    pub fn total_minutes(&self) -> i64 {
        self.days
            .max(0)
            .saturating_mul(24 * 60)
            .saturating_add(self.hours.max(0).saturating_mul(60))
            .saturating_add(self.minutes.max(0))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaPolicyEntry {
    pub name: String,
    pub response: SlaDuration,
    pub resolution: SlaDuration,
}

impl SlaPolicyEntry {
    pub fn new(name: impl Into<String>, response: SlaDuration, resolution: SlaDuration) -> Self {
        Self { name: name.into(), response, resolution }
    }
}

/// Priority label to policy lookup. Labels match case-insensitively.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlaPolicyTable {
    policies: BTreeMap<String, SlaPolicyEntry>,
}

impl SlaPolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(mut self, priority: &str, entry: SlaPolicyEntry) -> Self {
        self.insert(priority, entry);
        self
    }

    pub fn insert(&mut self, priority: &str, entry: SlaPolicyEntry) {
        self.policies.insert(normalize_priority(priority), entry);
    }

    pub fn get(&self, priority: &str) -> Option<&SlaPolicyEntry> {
        self.policies.get(&normalize_priority(priority))
    }

    pub fn priorities(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SlaPolicyEntry)> {
        self.policies.iter().map(|(priority, entry)| (priority.as_str(), entry))
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    fn lookup(&self, priority: &str) -> Result<&SlaPolicyEntry, WorkflowError> {
        self.get(priority).ok_or_else(|| {
            warn!(
                event_name = "sla.priority.unknown",
                priority,
                configured = self.policies.len(),
                "no SLA policy configured for priority"
            );
            WorkflowError::UnknownPriority { priority: priority.to_owned() }
        })
    }
}

pub fn normalize_priority(priority: &str) -> String {
    let key = priority.trim().to_ascii_lowercase();
    PRIORITY_ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .map(|(_, canonical)| (*canonical).to_owned())
        .unwrap_or(key)
}

fn add_minutes<Tz>(
    priority: &str,
    reference: DateTime<Tz>,
    minutes: i64,
) -> Result<DateTime<Tz>, WorkflowError>
where
    Tz: TimeZone,
{
    Duration::try_minutes(minutes)
        .and_then(|delta| reference.checked_add_signed(delta))
        .ok_or_else(|| WorkflowError::DueAtOutOfRange { priority: priority.to_owned() })
}

/// Resolution deadline for `priority` counted from `reference`.
pub fn compute_due_at<Tz>(
    priority: &str,
    reference: DateTime<Tz>,
    table: &SlaPolicyTable,
) -> Result<DateTime<Tz>, WorkflowError>
where
    Tz: TimeZone,
{
    let policy = table.lookup(priority)?;
    add_minutes(priority, reference, policy.resolution.total_minutes())
}

/// First-response deadline for `priority` counted from `reference`.
pub fn compute_response_due_at<Tz>(
    priority: &str,
    reference: DateTime<Tz>,
    table: &SlaPolicyTable,
) -> Result<DateTime<Tz>, WorkflowError>
where
    Tz: TimeZone,
{
    let policy = table.lookup(priority)?;
    add_minutes(priority, reference, policy.response.total_minutes())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaAssignment {
    pub priority: String,
    pub policy_name: String,
    pub reference_time: DateTime<Utc>,
    pub response_due_at: DateTime<Utc>,
    pub resolution_due_at: DateTime<Utc>,
}

pub fn assign_sla(
    priority: &str,
    reference_time: DateTime<Utc>,
    table: &SlaPolicyTable,
) -> Result<SlaAssignment, WorkflowError> {
    let policy = table.lookup(priority)?;
    Ok(SlaAssignment {
        priority: normalize_priority(priority),
        policy_name: policy.name.clone(),
        reference_time,
        response_due_at: add_minutes(priority, reference_time, policy.response.total_minutes())?,
        resolution_due_at: add_minutes(
            priority,
            reference_time,
            policy.resolution.total_minutes(),
        )?,
    })
}

pub fn assign_sla_with_audit<S>(
    priority: &str,
    reference_time: DateTime<Utc>,
    table: &SlaPolicyTable,
    sink: &S,
    audit: &AuditContext,
) -> Result<SlaAssignment, WorkflowError>
where
    S: AuditSink + ?Sized,
{
    let result = assign_sla(priority, reference_time, table);
    let event = match &result {
        Ok(assignment) => audit
            .event("sla.assigned", AuditCategory::Sla, AuditOutcome::Success)
            .with_metadata("policy", assignment.policy_name.clone())
            .with_metadata("resolution_due_at", assignment.resolution_due_at.to_rfc3339()),
        Err(error) => audit
            .event("sla.assignment_failed", AuditCategory::Sla, AuditOutcome::Failed)
            .with_metadata("error", error.to_string()),
    };
    sink.emit(event.with_metadata("priority", priority));
    result
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlaState {
    OnTrack,
    AtRisk,
    Breached,
}

impl SlaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnTrack => "on_track",
            Self::AtRisk => "at_risk",
            Self::Breached => "breached",
        }
    }

    pub fn requires_escalation(&self) -> bool {
        matches!(self, Self::Breached)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaStatus {
    pub state: SlaState,
    pub due_at: DateTime<Utc>,
    pub remaining_minutes: i64,
}

fn state_for(remaining: Duration, at_risk_threshold: Duration) -> SlaState {
    if remaining < Duration::zero() {
        SlaState::Breached
    } else if remaining <= at_risk_threshold {
        SlaState::AtRisk
    } else {
        SlaState::OnTrack
    }
}

pub fn evaluate_sla(
    due_at: DateTime<Utc>,
    now: DateTime<Utc>,
    at_risk_threshold: Duration,
) -> SlaStatus {
    let remaining = due_at.signed_duration_since(now);
    SlaStatus {
        state: state_for(remaining, at_risk_threshold),
        due_at,
        remaining_minutes: remaining.num_minutes().max(0),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PausedSla {
    pub paused_at: DateTime<Utc>,
    pub remaining_minutes: i64,
}

/// A resolution deadline that can be stopped while the request waits on someone else.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaClock {
    priority: String,
    due_at: DateTime<Utc>,
    paused: Option<PausedSla>,
}

impl SlaClock {
    pub fn start(assignment: &SlaAssignment) -> Self {
        Self {
            priority: assignment.priority.clone(),
            due_at: assignment.resolution_due_at,
            paused: None,
        }
    }

    pub fn due_at(&self) -> DateTime<Utc> {
        self.due_at
    }

    pub fn paused(&self) -> Option<PausedSla> {
        self.paused
    }

    pub fn is_paused(&self) -> bool {
        self.paused.is_some()
    }

    /// Freezes the remaining time. Pausing twice keeps the first snapshot.
    ///
    /// The snapshot is signed: a clock paused after its due time stays breached, and
    /// resuming it keeps the deadline the same distance in the past.
    pub fn pause(&mut self, now: DateTime<Utc>) -> PausedSla {
        *self.paused.get_or_insert_with(|| PausedSla {
            paused_at: now,
            remaining_minutes: self.due_at.signed_duration_since(now).num_minutes(),
        })
    }

    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<DateTime<Utc>, WorkflowError> {
        if let Some(paused) = self.paused {
            self.due_at = add_minutes(&self.priority, now, paused.remaining_minutes)?;
            self.paused = None;
        }
        Ok(self.due_at)
    }

    pub fn status(&self, now: DateTime<Utc>, at_risk_threshold: Duration) -> SlaStatus {
        match self.paused {
            Some(paused) => {
                let remaining = Duration::minutes(paused.remaining_minutes);
                SlaStatus {
                    state: state_for(remaining, at_risk_threshold),
                    due_at: self.due_at,
                    remaining_minutes: paused.remaining_minutes.max(0),
                }
            }
            None => evaluate_sla(self.due_at, now, at_risk_threshold),
        }
    }
}
