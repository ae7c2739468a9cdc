use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::approval::UserId;
use crate::domain::requester::{DepartmentId, RequesterProfile};
use crate::domain::template::ApproverDescriptor;

/// Read-only lookups the resolver needs from the user directory.
pub trait UserDirectory {
    fn user_exists(&self, user_id: UserId) -> bool;

    /// Backup approver standing in for `approver_id` at `at`, if one is configured.
    fn active_backup(&self, _approver_id: UserId, _at: DateTime<Utc>) -> Option<UserId> {
        None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupAssignment {
    pub original_approver_id: UserId,
    pub backup_approver_id: UserId,
    pub starts_on: NaiveDate,
    pub ends_on: NaiveDate,
}

impl BackupAssignment {
    fn covers(&self, day: NaiveDate) -> bool {
        self.starts_on <= day && day <= self.ends_on
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryUserDirectory {
    users: HashSet<UserId>,
    backups: Vec<BackupAssignment>,
}

impl InMemoryUserDirectory {
    pub fn with_users(users: impl IntoIterator<Item = UserId>) -> Self {
        Self { users: users.into_iter().collect(), backups: Vec::new() }
    }

    pub fn with_backup(mut self, assignment: BackupAssignment) -> Self {
        self.backups.push(assignment);
        self
    }
}

impl UserDirectory for InMemoryUserDirectory {
    fn user_exists(&self, user_id: UserId) -> bool {
        self.users.contains(&user_id)
    }

    fn active_backup(&self, approver_id: UserId, at: DateTime<Utc>) -> Option<UserId> {
        let day = at.date_naive();
        self.backups
            .iter()
            .find(|assignment| {
                assignment.original_approver_id == approver_id && assignment.covers(day)
            })
            .map(|assignment| assignment.backup_approver_id)
    }
}

impl<T> UserDirectory for &T
where
    T: UserDirectory + ?Sized,
{
    fn user_exists(&self, user_id: UserId) -> bool {
        (**self).user_exists(user_id)
    }

    fn active_backup(&self, approver_id: UserId, at: DateTime<Utc>) -> Option<UserId> {
        (**self).active_backup(approver_id, at)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedApprover {
    pub user_id: UserId,
    pub diverted_from: Option<UserId>,
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnresolvedReason {
    #[error("user {user_id} does not exist")]
    NotFound { user_id: UserId },
    #[error("requester has no reporting manager configured")]
    NoManagerConfigured,
    #[error("{}", department_head_message(*department_id))]
    NoDepartmentHeadConfigured { department_id: Option<DepartmentId> },
}

impl UnresolvedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::NoManagerConfigured => "no_manager_configured",
            Self::NoDepartmentHeadConfigured { .. } => "no_department_head_configured",
        }
    }
}

fn department_head_message(department_id: Option<DepartmentId>) -> String {
    match department_id {
        Some(department_id) => format!("department {department_id} has no head configured"),
        None => "requester is not assigned to a department".to_owned(),
    }
}

/// Maps approver descriptors to concrete users relative to one requester.
pub struct ApproverResolver<D> {
    directory: D,
    resolved_at: DateTime<Utc>,
}

impl<D> ApproverResolver<D>
where
    D: UserDirectory,
{
    pub fn new(directory: D, resolved_at: DateTime<Utc>) -> Self {
        Self { directory, resolved_at }
    }

    pub fn resolve(
        &self,
        descriptor: &ApproverDescriptor,
        requester: &RequesterProfile,
    ) -> Result<ResolvedApprover, UnresolvedReason> {
        let user_id = match descriptor {
            ApproverDescriptor::Explicit(user_id) => {
                if !self.directory.user_exists(*user_id) {
                    return Err(UnresolvedReason::NotFound { user_id: *user_id });
                }
                *user_id
            }
            ApproverDescriptor::ReportingManager => {
                requester.manager_id.ok_or(UnresolvedReason::NoManagerConfigured)?
            }
            ApproverDescriptor::DepartmentHead => match requester.department_id {
                None => {
                    return Err(UnresolvedReason::NoDepartmentHeadConfigured {
                        department_id: None,
                    })
                }
                Some(department_id) => requester.department_head_id.ok_or(
                    UnresolvedReason::NoDepartmentHeadConfigured {
                        department_id: Some(department_id),
                    },
                )?,
            },
        };

        Ok(self.divert_to_backup(user_id))
    }

    fn divert_to_backup(&self, user_id: UserId) -> ResolvedApprover {
        match self.directory.active_backup(user_id, self.resolved_at) {
            Some(backup) if backup != user_id => {
                ResolvedApprover { user_id: backup, diverted_from: Some(user_id) }
            }
            _ => ResolvedApprover { user_id, diverted_from: None },
        }
    }
}
