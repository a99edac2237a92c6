// ── Gate configuration, observed state and control events ──

use chrono::{DateTime, Utc};
use mealgate_gate::{DoorStatus, GateAction, GateCommand, GateEndpoint, GateProtocol};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use strum::{Display, EnumString};

use super::{EntityId, ErrorCode};
use crate::error::CoreError;

// ── Configuration ───────────────────────────────────────────────────

/// Gate record as written by the administration layer.
///
/// Only the fields for the gate's `protocol` need be present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateConfig {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    pub protocol: GateProtocol,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub serial_port: Option<String>,
    #[serde(default)]
    pub baud_rate: Option<u32>,
    /// RS485 board address; boards on one port must differ.
    #[serde(default)]
    pub bus_address: Option<u8>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default, deserialize_with = "secret_opt", skip_serializing)]
    pub api_key: Option<SecretString>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub max_capacity: Option<u32>,
}

fn default_true() -> bool {
    true
}

fn secret_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(d)?.map(SecretString::from))
}

impl GateConfig {
    /// Validate the protocol-specific fields and build the driver endpoint.
    pub fn endpoint(&self) -> Result<GateEndpoint, CoreError> {
        let missing = |field: &str| CoreError::Config {
            message: format!("gate {} ({}) is missing {field}", self.id, self.protocol),
        };
        let endpoint = match self.protocol {
            GateProtocol::TcpIp => GateEndpoint::tcp(
                self.ip_address.clone().ok_or_else(|| missing("ipAddress"))?,
                self.port.ok_or_else(|| missing("port"))?,
            ),
            GateProtocol::Rs485 => GateEndpoint::rs485(
                self.serial_port.clone().ok_or_else(|| missing("serialPort"))?,
                self.baud_rate.ok_or_else(|| missing("baudRate"))?,
                self.bus_address.unwrap_or(1),
            ),
            GateProtocol::Http => GateEndpoint::http(
                &self.http_base_url().ok_or_else(|| missing("ipAddress"))?,
                self.api_key.clone(),
            ),
        };
        endpoint.map_err(|e| CoreError::Config {
            message: format!("gate {}: {e}", self.id),
        })
    }

    /// `baseUrl` when set, otherwise `http://{ipAddress}[:{port}]`.
    pub fn http_base_url(&self) -> Option<String> {
        if let Some(url) = &self.base_url {
            return Some(url.clone());
        }
        let ip = self.ip_address.as_deref()?;
        Some(match self.port {
            Some(port) => format!("http://{ip}:{port}"),
            None => format!("http://{ip}"),
        })
    }
}

// ── Observed state ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Connectivity {
    Online,
    Offline,
    /// Not yet confirmed by a successful poll.
    Checking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum DoorState {
    Open,
    Closed,
    Unknown,
    Error,
    Maintenance,
}

impl DoorState {
    /// States a device report cannot move the door out of.
    pub fn is_latched(self) -> bool {
        matches!(self, Self::Error | Self::Maintenance)
    }
}

impl From<DoorStatus> for DoorState {
    fn from(status: DoorStatus) -> Self {
        match status {
            DoorStatus::Open => Self::Open,
            DoorStatus::Closed => Self::Closed,
            DoorStatus::Error => Self::Error,
        }
    }
}

/// Supervisor's view of one gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateState {
    pub gate_id: EntityId,
    pub connectivity: Connectivity,
    pub door_state: DoorState,
    /// Door state is last-known, not confirmed by the latest poll.
    pub stale: bool,
    pub consecutive_failures: u32,
    pub last_poll_at: Option<DateTime<Utc>>,
    pub last_command_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl GateState {
    pub fn new(gate_id: EntityId) -> Self {
        Self {
            gate_id,
            connectivity: Connectivity::Checking,
            door_state: DoorState::Unknown,
            stale: false,
            consecutive_failures: 0,
            last_poll_at: None,
            last_command_at: None,
            last_error: None,
        }
    }
}

// ── External control interface ──────────────────────────────────────

/// Body of a gate control call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateControlRequest {
    pub action: GateAction,
    #[serde(default)]
    pub duration: Option<u16>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl From<GateControlRequest> for GateCommand {
    fn from(req: GateControlRequest) -> Self {
        Self {
            action: req.action,
            duration_secs: req.duration,
            reason: req.reason,
        }
    }
}

/// `data` payload of a control response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateStateView {
    pub status: DoorState,
    pub connectivity: Connectivity,
    pub stale: bool,
    pub last_command_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&GateState> for GateStateView {
    fn from(s: &GateState) -> Self {
        Self {
            status: s.door_state,
            connectivity: s.connectivity,
            stale: s.stale,
            last_command_at: s.last_command_at,
            last_error: s.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateControlResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<GateStateView>,
}

// ── Audit events ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GateEventKind {
    #[serde(rename_all = "camelCase")]
    Command {
        action: GateAction,
        duration_secs: Option<u16>,
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Connectivity { from: Connectivity, to: Connectivity },
    #[serde(rename_all = "camelCase")]
    Maintenance { enabled: bool },
}

/// One entry of the gate control log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateEvent {
    pub gate_id: EntityId,
    #[serde(flatten)]
    pub kind: GateEventKind,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}
