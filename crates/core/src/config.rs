use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sla::{normalize_priority, SlaDuration, SlaPolicyEntry, SlaPolicyTable};

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub sla: SlaConfig,
    pub workflow: WorkflowConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct SlaConfig {
    pub at_risk_threshold_minutes: i64,
    pub policies: SlaPolicyTable,
}

impl SlaConfig {
    pub fn at_risk_threshold(&self) -> Duration {
        Duration::minutes(self.at_risk_threshold_minutes)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct WorkflowConfig {
    pub carry_forward_prior_approvals: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub at_risk_threshold_minutes: Option<i64>,
    pub carry_forward_prior_approvals: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sla: SlaConfig { at_risk_threshold_minutes: 120, policies: default_policies() },
            workflow: WorkflowConfig { carry_forward_prior_approvals: true },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn default_policies() -> SlaPolicyTable {
    let tiers = [
        ("low", "Low", 24, 72),
        ("medium", "Medium", 8, 24),
        ("high", "High", 4, 8),
        ("top", "Top", 1, 2),
    ];
    tiers
        .into_iter()
        .fold(SlaPolicyTable::new(), |table, (priority, label, response, resolution)| {
            table.with_policy(
                priority,
                SlaPolicyEntry::new(
                    format!("Default SLA - {label} Priority"),
                    SlaDuration::from_hours(response),
                    SlaDuration::from_hours(resolution),
                ),
            )
        })
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("servicedesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Merges a file patch. Alias tiers such as `critical` land on their canonical tier; a
    /// file naming both an alias and its canonical tier is rejected.
    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(sla) = patch.sla {
            if let Some(threshold) = sla.at_risk_threshold_minutes {
                self.sla.at_risk_threshold_minutes = threshold;
            }
            reject_aliased_policies(&sla.policies)?;
            for (priority, policy) in sla.policies {
                let mut entry = self.sla.policies.get(&priority).cloned().unwrap_or_else(|| {
                    SlaPolicyEntry::new(
                        format!("{} Priority", normalize_priority(&priority)),
                        SlaDuration::default(),
                        SlaDuration::default(),
                    )
                });
                policy.apply_to(&mut entry);
                self.sla.policies.insert(&priority, entry);
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(carry_forward) = workflow.carry_forward_prior_approvals {
                self.workflow.carry_forward_prior_approvals = carry_forward;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("SERVICEDESK_SLA_AT_RISK_THRESHOLD_MINUTES") {
            self.sla.at_risk_threshold_minutes =
                parse_i64("SERVICEDESK_SLA_AT_RISK_THRESHOLD_MINUTES", &value)?;
        }
        if let Some(value) = read_env("SERVICEDESK_WORKFLOW_CARRY_FORWARD_PRIOR_APPROVALS") {
            self.workflow.carry_forward_prior_approvals =
                parse_bool("SERVICEDESK_WORKFLOW_CARRY_FORWARD_PRIOR_APPROVALS", &value)?;
        }

        let log_level =
            read_env("SERVICEDESK_LOGGING_LEVEL").or_else(|| read_env("SERVICEDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SERVICEDESK_LOGGING_FORMAT").or_else(|| read_env("SERVICEDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(threshold) = overrides.at_risk_threshold_minutes {
            self.sla.at_risk_threshold_minutes = threshold;
        }
        if let Some(carry_forward) = overrides.carry_forward_prior_approvals {
            self.workflow.carry_forward_prior_approvals = carry_forward;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_sla(&self.sla)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("servicedesk.toml"), PathBuf::from("config/servicedesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn reject_aliased_policies(policies: &BTreeMap<String, SlaPolicyPatch>) -> Result<(), ConfigError> {
    let mut seen: BTreeMap<String, &str> = BTreeMap::new();
    for priority in policies.keys() {
        let canonical = normalize_priority(priority);
        if let Some(previous) = seen.insert(canonical.clone(), priority) {
            return Err(ConfigError::Validation(format!(
                "sla.policies.{previous} and sla.policies.{priority} both configure priority \
                 `{canonical}`"
            )));
        }
    }
    Ok(())
}

fn validate_sla(sla: &SlaConfig) -> Result<(), ConfigError> {
    if sla.policies.is_empty() {
        return Err(ConfigError::Validation(
            "sla.policies must configure at least one priority".to_string(),
        ));
    }

    if !(0..=7 * 24 * 60).contains(&sla.at_risk_threshold_minutes) {
        return Err(ConfigError::Validation(
            "sla.at_risk_threshold_minutes must be between 0 and 10080".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    sla: Option<SlaPatch>,
    workflow: Option<WorkflowPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlaPatch {
    at_risk_threshold_minutes: Option<i64>,
    #[serde(default)]
    policies: BTreeMap<String, SlaPolicyPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct SlaPolicyPatch {
    name: Option<String>,
    response_days: Option<i64>,
    response_hours: Option<i64>,
    response_minutes: Option<i64>,
    resolution_days: Option<i64>,
    resolution_hours: Option<i64>,
    resolution_minutes: Option<i64>,
}

impl SlaPolicyPatch {
    fn apply_to(self, entry: &mut SlaPolicyEntry) {
        if let Some(name) = self.name {
            entry.name = name;
        }
        patch_duration(
            &mut entry.response,
            self.response_days,
            self.response_hours,
            self.response_minutes,
        );
        patch_duration(
            &mut entry.resolution,
            self.resolution_days,
            self.resolution_hours,
            self.resolution_minutes,
        );
    }
}

fn patch_duration(
    duration: &mut SlaDuration,
    days: Option<i64>,
    hours: Option<i64>,
    minutes: Option<i64>,
) {
    if let Some(days) = days {
        duration.days = days;
    }
    if let Some(hours) = hours {
        duration.hours = hours;
    }
    if let Some(minutes) = minutes {
        duration.minutes = minutes;
    }
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    carry_forward_prior_approvals: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
