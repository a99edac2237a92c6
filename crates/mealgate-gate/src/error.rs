use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `mealgate-gate` crate.
///
/// Covers every failure mode across the three gate protocols.
/// `mealgate-core` maps these into supervisor outcomes and error codes.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// The device did not answer within the command timeout.
    #[error("Gate did not respond within {}ms", timeout.as_millis())]
    Timeout { timeout: Duration },

    /// Socket or serial I/O failure (connection refused, port vanished, ...).
    #[error("I/O error talking to gate: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serial port could not be opened or configured.
    #[error("Serial port {port} unavailable: {reason}")]
    Serial { port: String, reason: String },

    // ── Protocol ────────────────────────────────────────────────────
    /// The device answered with bytes or a body we could not interpret.
    #[error("Malformed gate response: {message}")]
    Protocol { message: String },

    /// The device (or its HTTP front-end) refused the command.
    #[error("Gate rejected command (status {status}): {body}")]
    Rejected { status: u16, body: String },

    // ── Configuration ───────────────────────────────────────────────
    /// Endpoint description is incomplete for the chosen protocol.
    #[error("Invalid gate endpoint: {0}")]
    Config(String),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Returns `true` if the device simply did not answer in time.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Http(e) => e.is_timeout(),
            Self::Io(e) => e.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }

    /// Returns `true` if the failure happened below the gate protocol
    /// (no usable transport at all).
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Io(_) | Self::Serial { .. } => true,
            Self::Http(e) => e.is_connect() || e.is_request(),
            _ => self.is_timeout(),
        }
    }
}
