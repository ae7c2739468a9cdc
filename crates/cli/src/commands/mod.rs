pub mod chain;
pub mod config;
pub mod sla;

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use servicedesk_core::config::{AppConfig, ConfigError, LoadOptions};
use servicedesk_core::errors::{ApplicationError, InterfaceError};

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_INPUT: u8 = 3;
pub const EXIT_DOMAIN: u8 = 4;
pub const EXIT_UNAVAILABLE: u8 = 5;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, payload: &impl Serialize) -> Self {
        let outcome = match serde_json::to_value(payload) {
            Ok(payload) => CommandOutcome {
                command: command.to_string(),
                status: "ok".to_string(),
                error_class: None,
                message: None,
                detail: None,
                correlation_id: None,
                payload: Some(payload),
            },
            Err(error) => return Self::failure(command, "serialization", error.to_string(), 1),
        };
        Self { exit_code: 0, output: serialize_outcome(outcome) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let outcome = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: Some(message.into()),
            detail: None,
            correlation_id: None,
            payload: None,
        };
        Self { exit_code, output: serialize_outcome(outcome) }
    }

    /// Reports an engine or service failure with display text for the user, the technical
    /// detail and the correlation id it was raised under.
    pub fn application_failure(
        command: &str,
        error_class: &str,
        error: ApplicationError,
        correlation_id: &str,
    ) -> Self {
        let interface = error.into_interface(correlation_id);
        let exit_code = match &interface {
            InterfaceError::InvalidConfiguration { .. } => EXIT_CONFIG,
            InterfaceError::ServiceUnavailable { .. } => EXIT_UNAVAILABLE,
            InterfaceError::BadRequest { .. }
            | InterfaceError::Conflict { .. }
            | InterfaceError::UnconfiguredPriority { .. } => EXIT_DOMAIN,
        };
        let outcome = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: Some(interface.user_message().to_string()),
            detail: Some(interface.to_string()),
            correlation_id: Some(interface.correlation_id().to_string()),
            payload: None,
        };
        Self { exit_code, output: serialize_outcome(outcome) }
    }

    pub fn config_failure(command: &str, error: &ConfigError) -> Self {
        Self::application_failure(
            command,
            "config_validation",
            ApplicationError::Configuration(error.to_string()),
            &format!("cli-{command}"),
        )
    }
}

/// Loads configuration, insisting on the file when a path was given explicitly.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    AppConfig::load(LoadOptions {
        config_path: config_path.map(Path::to_path_buf),
        require_file: config_path.is_some(),
        ..LoadOptions::default()
    })
}

fn serialize_outcome(outcome: CommandOutcome) -> String {
    serde_json::to_string(&outcome).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
