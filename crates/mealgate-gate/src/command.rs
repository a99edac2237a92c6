// ── Protocol-neutral gate command types ──
//
// Every driver consumes a `GateCommand` and normalizes whatever the
// device sends back into a `GateResponse`. The supervisor never sees
// protocol bytes.

use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

use crate::error::Error;

/// Longest reason string forwarded to a device.
pub const MAX_REASON_LEN: usize = 200;

/// What the gate should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum GateAction {
    Open,
    Close,
    Reset,
    EmergencyOpen,
    Status,
}

impl GateAction {
    /// Single-byte opcode shared by the TCP and RS485 frame formats.
    pub fn opcode(self) -> u8 {
        match self {
            Self::Status => 0x00,
            Self::Open => 0x01,
            Self::Close => 0x02,
            Self::Reset => 0x03,
            Self::EmergencyOpen => 0x04,
        }
    }

    pub fn from_opcode(op: u8) -> Option<Self> {
        match op {
            0x00 => Some(Self::Status),
            0x01 => Some(Self::Open),
            0x02 => Some(Self::Close),
            0x03 => Some(Self::Reset),
            0x04 => Some(Self::EmergencyOpen),
            _ => None,
        }
    }

    /// Door status a device is expected to end up in after a successful
    /// command, for protocols that acknowledge without reporting state.
    pub fn implied_status(self) -> Option<DoorStatus> {
        match self {
            Self::Open | Self::EmergencyOpen => Some(DoorStatus::Open),
            Self::Close => Some(DoorStatus::Closed),
            Self::Reset | Self::Status => None,
        }
    }
}

/// An imperative command for one gate.
///
/// `duration_secs` is the auto-reclose hint handed to the device; the
/// device, not the caller, is responsible for closing again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCommand {
    pub action: GateAction,
    #[serde(default, rename = "duration", skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl GateCommand {
    pub fn new(action: GateAction) -> Self {
        Self {
            action,
            duration_secs: None,
            reason: None,
        }
    }

    pub fn status() -> Self {
        Self::new(GateAction::Status)
    }

    pub fn with_duration(mut self, secs: u16) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Reason truncated on a char boundary to what devices accept.
    pub fn wire_reason(&self) -> &str {
        let reason = self.reason.as_deref().unwrap_or("");
        if reason.len() <= MAX_REASON_LEN {
            return reason;
        }
        let mut end = MAX_REASON_LEN;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.get(..end).unwrap_or("")
    }
}

/// Door status as reported by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum DoorStatus {
    Open,
    Closed,
    Error,
}

impl DoorStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::Error => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Closed),
            1 => Some(Self::Open),
            2 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Normalized outcome of one driver round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResponse {
    pub status: DoorStatus,
    /// Protocol-specific payload kept for the control log.
    pub raw: String,
}

/// Wire protocol spoken by a gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum GateProtocol {
    #[serde(rename = "TCP_IP")]
    #[strum(to_string = "TCP_IP", serialize = "tcp")]
    TcpIp,
    #[serde(rename = "RS485")]
    #[strum(to_string = "RS485", serialize = "rs485")]
    Rs485,
    #[serde(rename = "HTTP")]
    #[strum(to_string = "HTTP", serialize = "http")]
    Http,
}

/// Where and how to reach one gate.
#[derive(Clone)]
pub enum GateEndpoint {
    Tcp {
        host: String,
        port: u16,
    },
    Rs485 {
        port: String,
        baud_rate: u32,
        /// Bus address of the controller board (several gates may share a port).
        address: u8,
    },
    Http {
        base_url: Url,
        api_key: Option<SecretString>,
    },
}

impl GateEndpoint {
    pub fn protocol(&self) -> GateProtocol {
        match self {
            Self::Tcp { .. } => GateProtocol::TcpIp,
            Self::Rs485 { .. } => GateProtocol::Rs485,
            Self::Http { .. } => GateProtocol::Http,
        }
    }

    pub fn tcp(host: impl Into<String>, port: u16) -> Result<Self, Error> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(Error::Config("TCP gate requires an IP address".into()));
        }
        if port == 0 {
            return Err(Error::Config("TCP gate requires a non-zero port".into()));
        }
        Ok(Self::Tcp { host, port })
    }

    pub fn rs485(port: impl Into<String>, baud_rate: u32, address: u8) -> Result<Self, Error> {
        let port = port.into();
        if port.trim().is_empty() {
            return Err(Error::Config("RS485 gate requires a serial port".into()));
        }
        if baud_rate == 0 {
            return Err(Error::Config("RS485 gate requires a baud rate".into()));
        }
        Ok(Self::Rs485 {
            port,
            baud_rate,
            address,
        })
    }

    pub fn http(base_url: &str, api_key: Option<SecretString>) -> Result<Self, Error> {
        let base_url = Url::parse(base_url)?;
        Ok(Self::Http { base_url, api_key })
    }
}

impl fmt::Debug for GateEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Self::Rs485 {
                port,
                baud_rate,
                address,
            } => write!(f, "rs485://{port}@{baud_rate}#{address}"),
            Self::Http { base_url, .. } => write!(f, "{base_url}"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn action_serializes_screaming_snake() {
        let json = serde_json::to_string(&GateAction::EmergencyOpen).unwrap();
        assert_eq!(json, "\"EMERGENCY_OPEN\"");
        let parsed: GateAction = "emergency_open".parse().unwrap();
        assert_eq!(parsed, GateAction::EmergencyOpen);
    }

    #[test]
    fn opcodes_are_bijective() {
        for action in [
            GateAction::Open,
            GateAction::Close,
            GateAction::Reset,
            GateAction::EmergencyOpen,
            GateAction::Status,
        ] {
            assert_eq!(GateAction::from_opcode(action.opcode()), Some(action));
        }
        assert_eq!(GateAction::from_opcode(0x7f), None);
    }

    #[test]
    fn protocol_names_match_gate_configuration() {
        assert_eq!(GateProtocol::TcpIp.to_string(), "TCP_IP");
        assert_eq!("RS485".parse::<GateProtocol>().unwrap(), GateProtocol::Rs485);
        let p: GateProtocol = serde_json::from_str("\"HTTP\"").unwrap();
        assert_eq!(p, GateProtocol::Http);
    }

    #[test]
    fn wire_reason_truncates_on_char_boundary() {
        let long = "é".repeat(150);
        let cmd = GateCommand::new(GateAction::Open).with_reason(long);
        let reason = cmd.wire_reason();
        assert!(reason.len() <= MAX_REASON_LEN);
        assert!(reason.chars().all(|c| c == 'é'));
    }

    #[test]
    fn command_json_uses_duration_key() {
        let cmd = GateCommand::new(GateAction::Open)
            .with_duration(5)
            .with_reason("guest");
        let v = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v["action"], "OPEN");
        assert_eq!(v["duration"], 5);
        assert_eq!(v["reason"], "guest");
    }

    #[test]
    fn endpoint_validation() {
        assert!(GateEndpoint::tcp("", 4001).is_err());
        assert!(GateEndpoint::tcp("10.0.0.5", 0).is_err());
        assert!(GateEndpoint::rs485("/dev/ttyUSB0", 0, 1).is_err());
        assert!(GateEndpoint::http("not a url", None).is_err());
        let ep = GateEndpoint::rs485("/dev/ttyUSB0", 9600, 3).unwrap();
        assert_eq!(ep.protocol(), GateProtocol::Rs485);
        assert_eq!(format!("{ep:?}"), "rs485:///dev/ttyUSB0@9600#3");
    }
}
