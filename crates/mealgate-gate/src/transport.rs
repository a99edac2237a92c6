// Shared transport configuration for all gate drivers.
//
// TCP and RS485 drivers only need the connect timeout; the HTTP driver
// builds its reqwest::Client from the TLS and header settings here.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// TLS verification mode for HTTP gate controllers.
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (gate controllers often ship self-signed).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building driver connections.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    /// Upper bound for establishing a TCP/HTTP connection. The per-command
    /// timeout still bounds the whole round-trip.
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            connect_timeout: Duration::from_secs(3),
            user_agent: concat!("mealgate/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client`, injecting `X-API-KEY` when a key is set.
    pub fn build_http_client(&self, api_key: Option<&SecretString>) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();
        if let Some(key) = api_key {
            let mut value = HeaderValue::from_str(key.expose_secret())
                .map_err(|_| Error::Config("API key contains invalid header characters".into()))?;
            value.set_sensitive(true);
            headers.insert("X-API-KEY", value);
        }

        let mut builder = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .user_agent(self.user_agent.clone())
            .default_headers(headers);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Config(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Config(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))
    }
}
