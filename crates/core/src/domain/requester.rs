use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::approval::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DepartmentId(pub i64);

impl fmt::Display for DepartmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only snapshot of the requester's organisational relationships, fetched once per
/// resolution pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequesterProfile {
    pub user_id: UserId,
    #[serde(default)]
    pub manager_id: Option<UserId>,
    #[serde(default)]
    pub department_id: Option<DepartmentId>,
    #[serde(default)]
    pub department_head_id: Option<UserId>,
}

impl RequesterProfile {
    pub fn new(user_id: UserId) -> Self {
        Self { user_id, manager_id: None, department_id: None, department_head_id: None }
    }

    pub fn with_manager(mut self, manager_id: UserId) -> Self {
        self.manager_id = Some(manager_id);
        self
    }

    pub fn with_department(mut self, department_id: DepartmentId, head: Option<UserId>) -> Self {
        self.department_id = Some(department_id);
        self.department_head_id = head;
        self
    }
}
