//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use mealgate_config::ConfigError;
use mealgate_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Setup ────────────────────────────────────────────────────────
    #[error("No venue data file configured")]
    #[diagnostic(
        code(mealgate::no_data),
        help(
            "Pass --data <FILE>, set MEALGATE_DATA, or add data_file to {path}"
        )
    )]
    NoData { path: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(code(mealgate::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(
        code(mealgate::config),
        help("Check the config file with: mealgate config show")
    )]
    Config(#[from] ConfigError),

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(mealgate::not_found),
        help("Run: mealgate {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── Gates ────────────────────────────────────────────────────────
    #[error("Gate '{gate_id}' is offline")]
    #[diagnostic(
        code(mealgate::gate_offline),
        help(
            "{detail}\n\
             Check power and wiring, then: mealgate gate status {gate_id}"
        )
    )]
    GateOffline { gate_id: String, detail: String },

    #[error("Gate '{gate_id}' did not respond in time")]
    #[diagnostic(
        code(mealgate::gate_timeout),
        help("Raise supervisor.command_timeout_ms or check the gate's network path.")
    )]
    GateTimeout { gate_id: String },

    #[error("Gate '{gate_id}' refused {action}: {reason}")]
    #[diagnostic(
        code(mealgate::gate_state),
        help("RESET clears an error; EMERGENCY_OPEN is accepted in any state but OFFLINE.")
    )]
    GateState {
        gate_id: String,
        action: String,
        reason: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(mealgate::validation))]
    Validation { field: String, reason: String },

    // ── Engine ───────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(code(mealgate::core))]
    Core(CoreError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(mealgate::json))]
    Json(#[from] serde_json::Error),

    #[error("YAML rendering failed: {0}")]
    #[diagnostic(code(mealgate::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML rendering failed: {0}")]
    #[diagnostic(code(mealgate::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::GateOffline { .. } => exit_code::CONNECTION,
            Self::GateTimeout { .. } => exit_code::TIMEOUT,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::NoData { .. } | Self::ConfigExists { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::GateNotFound { gate_id } => CliError::NotFound {
                resource_type: "gate".into(),
                identifier: gate_id.to_string(),
                list_command: "gate list".into(),
            },

            CoreError::GateOffline { ref gate_id } | CoreError::GateTransport { ref gate_id, .. } => {
                CliError::GateOffline {
                    gate_id: gate_id.to_string(),
                    detail: err.to_string(),
                }
            }

            CoreError::GateTimeout { gate_id, .. } => CliError::GateTimeout {
                gate_id: gate_id.to_string(),
            },

            CoreError::InvalidState {
                gate_id,
                action,
                door_state,
            } => CliError::GateState {
                gate_id: gate_id.to_string(),
                action: action.to_string(),
                reason: format!("door is {door_state}"),
            },

            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                list_command: format!("{entity_type} list"),
                resource_type: entity_type,
                identifier,
            },

            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "input".into(),
                reason: message,
            },

            other => CliError::Core(other),
        }
    }
}
