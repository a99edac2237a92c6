// ── Core error types ──
//
// Domain errors from mealgate-core. Field callers never see raw socket or
// HTTP failures; `error_code()` maps every variant to a stable `ErrorCode`
// and the `From<mealgate_gate::Error>` impl keeps driver detail for logs.

use std::time::Duration;

use thiserror::Error;

use crate::model::{DoorState, EntityId, ErrorCode};
use mealgate_gate::GateAction;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Gate errors ──────────────────────────────────────────────────
    #[error("Gate not found: {gate_id}")]
    GateNotFound { gate_id: EntityId },

    #[error("Gate {gate_id} is offline")]
    GateOffline { gate_id: EntityId },

    #[error("Gate {gate_id} did not respond within {}ms", timeout.as_millis())]
    GateTimeout { gate_id: EntityId, timeout: Duration },

    #[error("Gate {gate_id} unreachable: {reason}")]
    GateTransport { gate_id: EntityId, reason: String },

    #[error("Gate {gate_id} cannot {action} while door is {door_state}")]
    InvalidState {
        gate_id: EntityId,
        action: GateAction,
        door_state: DoorState,
    },

    #[error("Gate driver error: {0}")]
    Driver(#[from] mealgate_gate::Error),

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Entity not found: {entity_type} with id {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    #[error("Usage update for card {card_id} kept conflicting after {attempts} attempts")]
    Conflict { card_id: EntityId, attempts: u32 },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Repository error: {message}")]
    Repository { message: String },

    #[error("Audit sink error: {message}")]
    Audit { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Operation timed out after {}ms", timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Attach a gate id to a driver failure.
    pub fn from_driver(gate_id: &EntityId, err: mealgate_gate::Error) -> Self {
        match err {
            mealgate_gate::Error::Timeout { timeout } => Self::GateTimeout {
                gate_id: gate_id.clone(),
                timeout,
            },
            other if other.is_timeout() => Self::GateTimeout {
                gate_id: gate_id.clone(),
                timeout: Duration::ZERO,
            },
            other => Self::GateTransport {
                gate_id: gate_id.clone(),
                reason: other.to_string(),
            },
        }
    }

    /// Stable code surfaced to field callers.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::GateNotFound { .. } => ErrorCode::GateNotFound,
            Self::GateOffline { .. } | Self::GateTransport { .. } => ErrorCode::GateOffline,
            Self::GateTimeout { .. } => ErrorCode::GateTimeout,
            Self::Driver(e) if e.is_timeout() => ErrorCode::GateTimeout,
            Self::Driver(e) if e.is_transport() => ErrorCode::GateOffline,
            Self::NotFound { entity_type, .. } if entity_type == "gate" => ErrorCode::GateNotFound,
            _ => ErrorCode::SystemError,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Repository {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_timeout_maps_to_gate_timeout() {
        let err = CoreError::from_driver(
            &EntityId::from("g1"),
            mealgate_gate::Error::Timeout {
                timeout: Duration::from_millis(500),
            },
        );
        assert_eq!(err.error_code(), ErrorCode::GateTimeout);
    }

    #[test]
    fn driver_rejection_is_reported_as_offline() {
        let err = CoreError::from_driver(
            &EntityId::from("g1"),
            mealgate_gate::Error::Rejected {
                status: 500,
                body: "boom".into(),
            },
        );
        assert_eq!(err.error_code(), ErrorCode::GateOffline);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn domain_failures_are_system_errors() {
        let err = CoreError::Conflict {
            card_id: EntityId::from("c1"),
            attempts: 5,
        };
        assert_eq!(err.error_code(), ErrorCode::SystemError);
    }
}
