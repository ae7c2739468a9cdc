use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use toml::Value;

use servicedesk_core::config::AppConfig;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct EffectiveConfig {
    config_file: Option<String>,
    config: AppConfig,
    sources: BTreeMap<String, String>,
}

/// Prints the effective configuration with the source of each value
/// (env > file > default).
pub fn run(config_path: Option<&Path>) -> CommandResult {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(error) => return CommandResult::config_failure("config", &error),
    };

    let file_path = detect_config_path(config_path);
    let file_doc = file_path.as_deref().and_then(load_config_file_doc);
    let source = |key_path: &str, env_keys: &[&str]| {
        field_source(key_path, env_keys, file_doc.as_ref(), file_path.as_deref())
    };

    let mut sources = BTreeMap::new();
    sources.insert(
        "sla.at_risk_threshold_minutes".to_string(),
        source("sla.at_risk_threshold_minutes", &["SERVICEDESK_SLA_AT_RISK_THRESHOLD_MINUTES"]),
    );
    for priority in config.sla.policies.priorities() {
        let key = format!("sla.policies.{priority}");
        sources.insert(key.clone(), source(&key, &[]));
    }
    sources.insert(
        "workflow.carry_forward_prior_approvals".to_string(),
        source(
            "workflow.carry_forward_prior_approvals",
            &["SERVICEDESK_WORKFLOW_CARRY_FORWARD_PRIOR_APPROVALS"],
        ),
    );
    sources.insert(
        "logging.level".to_string(),
        source("logging.level", &["SERVICEDESK_LOGGING_LEVEL", "SERVICEDESK_LOG_LEVEL"]),
    );
    sources.insert(
        "logging.format".to_string(),
        source("logging.format", &["SERVICEDESK_LOGGING_FORMAT", "SERVICEDESK_LOG_FORMAT"]),
    );

    CommandResult::success(
        "config",
        &EffectiveConfig {
            config_file: file_path.map(|path| path.display().to_string()),
            config,
            sources,
        },
    )
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    [PathBuf::from("servicedesk.toml"), PathBuf::from("config/servicedesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    file_doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let (Some(doc), Some(path)) = (file_doc, file_path) {
        if contains_path(doc, key_path) {
            return format!("file ({})", path.display());
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}
