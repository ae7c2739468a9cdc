use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::domain::approval::UserId;

const REPORTING_MANAGER_CODE: i64 = -1;
const DEPARTMENT_HEAD_CODE: i64 = -2;

/// Who must approve a level, decided once when template configuration is loaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "user_id", rename_all = "snake_case")]
pub enum ApproverDescriptor {
    Explicit(UserId),
    ReportingManager,
    DepartmentHead,
}

impl fmt::Display for ApproverDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit(user_id) => write!(f, "explicit:{user_id}"),
            Self::ReportingManager => f.write_str("reporting_manager"),
            Self::DepartmentHead => f.write_str("department_head"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLevelDefinition {
    pub level: u32,
    pub display_name: String,
    pub approvers: Vec<ApproverDescriptor>,
}

impl ApprovalLevelDefinition {
    pub fn new(
        level: u32,
        display_name: impl Into<String>,
        approvers: Vec<ApproverDescriptor>,
    ) -> Self {
        Self { level, display_name: display_name.into(), approvers }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedDescriptor {
    pub level: u32,
    pub raw: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedTemplate {
    pub levels: Vec<ApprovalLevelDefinition>,
    pub rejected: Vec<RejectedDescriptor>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("approval workflow must be an object with a `levels` array or an array of levels")]
    MissingLevels,
    #[error("approval level {level} must be an object")]
    MalformedLevel { level: u32 },
}

/// Parses a template's approval workflow into typed level definitions.
///
/// Levels are numbered by position starting at 1. Approver entries that cannot be mapped to
/// a descriptor are collected in [`ParsedTemplate::rejected`] and never reach resolution.
pub fn parse_template_levels(workflow: &Value) -> Result<ParsedTemplate, TemplateError> {
    let raw_levels = match workflow {
        Value::Null => return Ok(ParsedTemplate::default()),
        Value::Array(levels) => levels,
        Value::Object(map) => match map.get("levels") {
            Some(Value::Array(levels)) => levels,
            None | Some(Value::Null) => return Ok(ParsedTemplate::default()),
            Some(_) => return Err(TemplateError::MissingLevels),
        },
        _ => return Err(TemplateError::MissingLevels),
    };

    let mut parsed = ParsedTemplate::default();
    for (index, raw_level) in raw_levels.iter().enumerate() {
        let level = index as u32 + 1;
        let Value::Object(fields) = raw_level else {
            return Err(TemplateError::MalformedLevel { level });
        };

        let display_name = ["displayName", "display_name", "name"]
            .iter()
            .find_map(|key| fields.get(*key).and_then(Value::as_str))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Level {level}"));

        let mut approvers = Vec::new();
        let entries = fields.get("approvers").and_then(Value::as_array);
        for entry in entries.into_iter().flatten() {
            match parse_descriptor(entry) {
                Ok(descriptor) => approvers.push(descriptor),
                Err(reason) => {
                    warn!(
                        event_name = "approval.template.descriptor_rejected",
                        level,
                        raw = %entry,
                        reason = %reason,
                        "skipping approver entry that does not map to a descriptor"
                    );
                    parsed.rejected.push(RejectedDescriptor {
                        level,
                        raw: entry.to_string(),
                        reason,
                    });
                }
            }
        }

        parsed.levels.push(ApprovalLevelDefinition { level, display_name, approvers });
    }

    Ok(parsed)
}

pub fn parse_descriptor(raw: &Value) -> Result<ApproverDescriptor, String> {
    match raw {
        Value::Number(number) => match number.as_i64() {
            Some(code) => descriptor_from_code(code),
            None => Err(format!("approver id `{number}` is not an integer")),
        },
        Value::String(text) => descriptor_from_text(text),
        Value::Object(fields) => {
            if let Some(kind) = fields.get("type").and_then(Value::as_str) {
                if let Some(descriptor) = role_from_tag(kind) {
                    return Ok(descriptor);
                }
            }
            match fields.get("id") {
                Some(id) if !id.is_null() => parse_descriptor(id),
                _ => Err("approver object has neither a recognised `type` nor an `id`".to_owned()),
            }
        }
        other => Err(format!("unsupported approver value `{other}`")),
    }
}

fn descriptor_from_code(code: i64) -> Result<ApproverDescriptor, String> {
    match code {
        REPORTING_MANAGER_CODE => Ok(ApproverDescriptor::ReportingManager),
        DEPARTMENT_HEAD_CODE => Ok(ApproverDescriptor::DepartmentHead),
        id if id > 0 => Ok(ApproverDescriptor::Explicit(UserId(id))),
        other => Err(format!("unknown approver code `{other}`")),
    }
}

fn descriptor_from_text(text: &str) -> Result<ApproverDescriptor, String> {
    if let Some(descriptor) = role_from_tag(text) {
        return Ok(descriptor);
    }

    match text.trim().parse::<i64>() {
        Ok(code) => descriptor_from_code(code),
        Err(_) => Err(format!("unrecognised approver `{}`", text.trim())),
    }
}

fn role_from_tag(tag: &str) -> Option<ApproverDescriptor> {
    match tag.trim().to_ascii_lowercase().as_str() {
        "reporting_to" | "reporting_manager" => Some(ApproverDescriptor::ReportingManager),
        "department_head" => Some(ApproverDescriptor::DepartmentHead),
        _ => None,
    }
}
