//! Configuration for mealgate.
//!
//! One TOML file (platform config dir, or an explicit path) merged with
//! `MEALGATE_`-prefixed environment variables, plus credential resolution
//! for HTTP gate controllers (env → keyring → plaintext). Translation
//! functions turn the file model into `mealgate_core` runtime configs.
//!
//! Nested keys are addressed in the environment with a double underscore:
//! `MEALGATE_VENUE__UTC_OFFSET_MINUTES=180`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mealgate_core::{
    AutoOpen, EntityId, GateConfig, GateProtocol, RetryPolicy, ScanConfig, StationId,
    SupervisorConfig, TlsMode, TransportConfig,
};

const KEYRING_SERVICE: &str = "mealgate";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: impl Into<String>, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// JSON fixture with cards, guests, restaurants and meal windows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_file: Option<PathBuf>,

    #[serde(default)]
    pub defaults: Defaults,

    #[serde(default)]
    pub venue: Venue,

    #[serde(default)]
    pub supervisor: Supervisor,

    #[serde(default)]
    pub auto_open: AutoOpenSection,

    #[serde(default)]
    pub audit: Audit,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gates: Vec<GateEntry>,

    /// Station id → restaurant id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub stations: BTreeMap<String, String>,
}

/// CLI presentation defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Venue {
    /// Venue offset from UTC, used for "now" and meal window times.
    #[serde(default)]
    pub utc_offset_minutes: i32,

    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,

    #[serde(default = "default_conflict_retries")]
    pub max_conflict_retries: u32,

    /// Second-language texts keyed by error code name or `ALLOW`.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub messages: HashMap<String, String>,
}

impl Default for Venue {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            scan_timeout_ms: default_scan_timeout_ms(),
            max_conflict_retries: default_conflict_retries(),
            messages: HashMap::new(),
        }
    }
}

fn default_scan_timeout_ms() -> u64 {
    2000
}
fn default_conflict_retries() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Supervisor {
    /// Zero disables background polling.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    #[serde(default = "default_offline_after")]
    pub offline_after_failures: u32,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,

    /// Accept self-signed certificates from HTTP gate controllers.
    #[serde(default)]
    pub insecure: bool,

    /// Custom CA for HTTP gate controllers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            command_timeout_ms: default_command_timeout_ms(),
            offline_after_failures: default_offline_after(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            insecure: false,
            ca_cert: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    5
}
fn default_command_timeout_ms() -> u64 {
    3000
}
fn default_offline_after() -> u32 {
    3
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    200
}
fn default_retry_max_backoff_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutoOpenSection {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_open_duration")]
    pub duration_secs: u16,
}

impl Default for AutoOpenSection {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_secs: default_open_duration(),
        }
    }
}

fn default_open_duration() -> u16 {
    5
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Audit {
    /// JSON-lines audit file. Unset: audit records go to the log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// A `[[gates]]` entry. Only the fields of its protocol are needed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateEntry {
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// `TCP_IP`, `RS485` or `HTTP`.
    pub protocol: GateProtocol,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_port: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud_rate: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus_address: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// API key (plaintext, prefer keyring or env var).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment variable holding the API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default = "default_true")]
    pub is_active: bool,

    /// Hold the gate in MAINTENANCE while supervised.
    #[serde(default)]
    pub maintenance: bool,
}

fn default_true() -> bool {
    true
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "mealgate", "mealgate").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("mealgate");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the config from `path` + environment. A missing file is not an
/// error; defaults and environment still apply.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MEALGATE_").split("__"));

    let config: Config = figment.extract()?;
    config.validate()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<PathBuf, ConfigError> {
    let path = config_path();
    save_config_to(cfg, &path)?;
    Ok(path)
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Validation ──────────────────────────────────────────────────────

impl Config {
    /// Check values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        venue_offset(self.venue.utc_offset_minutes)?;
        if self.venue.scan_timeout_ms == 0 {
            return Err(invalid("venue.scan_timeout_ms", "must be above zero"));
        }
        if self.supervisor.command_timeout_ms == 0 {
            return Err(invalid("supervisor.command_timeout_ms", "must be above zero"));
        }
        if self.supervisor.offline_after_failures == 0 {
            return Err(invalid("supervisor.offline_after_failures", "must be at least 1"));
        }
        if self.auto_open.enabled && self.auto_open.duration_secs == 0 {
            return Err(invalid("auto_open.duration_secs", "must be above zero"));
        }

        let mut seen = HashSet::new();
        for gate in &self.gates {
            if gate.id.trim().is_empty() {
                return Err(invalid("gates.id", "must not be empty"));
            }
            if !seen.insert(gate.id.as_str()) {
                return Err(invalid("gates.id", format!("duplicate gate '{}'", gate.id)));
            }
        }
        Ok(())
    }
}

fn venue_offset(minutes: i32) -> Result<FixedOffset, ConfigError> {
    minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| {
            invalid(
                "venue.utc_offset_minutes",
                format!("{minutes} is outside ±24h"),
            )
        })
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve an HTTP gate's API key: env var → keyring → plaintext.
///
/// Keys are optional; `None` means the controller is called without one.
pub fn resolve_gate_api_key(gate: &GateEntry) -> Option<SecretString> {
    // 1. Entry's api_key_env → env var lookup
    if let Some(ref env_name) = gate.api_key_env {
        if let Ok(val) = std::env::var(env_name) {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, &keyring_user(&gate.id)) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    gate.api_key.clone().map(SecretString::from)
}

/// Store a gate API key in the system keyring.
pub fn store_gate_api_key(gate_id: &str, key: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &keyring_user(gate_id))
        .and_then(|entry| entry.set_password(key))
        .map_err(|e| invalid("keyring", e.to_string()))
}

fn keyring_user(gate_id: &str) -> String {
    format!("gate/{gate_id}/api-key")
}

// ── Translation to core configs ─────────────────────────────────────

/// Scan pipeline settings.
pub fn to_scan_config(cfg: &Config) -> Result<ScanConfig, ConfigError> {
    Ok(ScanConfig {
        scan_timeout: Duration::from_millis(cfg.venue.scan_timeout_ms),
        venue_offset: venue_offset(cfg.venue.utc_offset_minutes)?,
        max_conflict_retries: cfg.venue.max_conflict_retries,
        auto_open: cfg.auto_open.enabled.then_some(AutoOpen {
            duration_secs: cfg.auto_open.duration_secs,
        }),
        localized_messages: cfg.venue.messages.clone(),
    })
}

/// Gate supervision settings.
pub fn to_supervisor_config(cfg: &Config) -> SupervisorConfig {
    let s = &cfg.supervisor;
    SupervisorConfig {
        poll_interval: Duration::from_secs(s.poll_interval_secs),
        command_timeout: Duration::from_millis(s.command_timeout_ms),
        offline_after_failures: s.offline_after_failures,
        retry: RetryPolicy {
            max_attempts: s.retry_attempts,
            initial_backoff: Duration::from_millis(s.retry_backoff_ms),
            max_backoff: Duration::from_millis(s.retry_max_backoff_ms),
        },
    }
}

/// Driver transport settings (TLS for HTTP gates).
pub fn to_transport_config(cfg: &Config) -> TransportConfig {
    let tls = if cfg.supervisor.insecure {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = cfg.supervisor.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };
    TransportConfig {
        tls,
        ..TransportConfig::default()
    }
}

/// `[[gates]]` as core gate records, API keys resolved.
///
/// Every active gate's protocol fields are checked here so a bad entry
/// fails at load rather than at the first poll.
pub fn to_gate_configs(cfg: &Config) -> Result<Vec<GateConfig>, ConfigError> {
    cfg.gates
        .iter()
        .map(|entry| {
            let api_key = match entry.protocol {
                GateProtocol::Http => resolve_gate_api_key(entry),
                GateProtocol::TcpIp | GateProtocol::Rs485 => None,
            };
            let gate = GateConfig {
                id: EntityId::from(entry.id.as_str()),
                name: entry.name.clone(),
                protocol: entry.protocol,
                ip_address: entry.ip_address.clone(),
                port: entry.port,
                serial_port: entry.serial_port.clone(),
                baud_rate: entry.baud_rate,
                bus_address: entry.bus_address,
                base_url: entry.base_url.clone(),
                api_key,
                is_active: entry.is_active,
                max_capacity: None,
            };
            if gate.is_active {
                gate.endpoint()
                    .map_err(|e| invalid(format!("gates.{}", entry.id), e.to_string()))?;
            }
            Ok(gate)
        })
        .collect()
}

/// Gates pinned to maintenance in the config file.
pub fn maintenance_gates(cfg: &Config) -> Vec<EntityId> {
    cfg.gates
        .iter()
        .filter(|g| g.maintenance)
        .map(|g| EntityId::from(g.id.as_str()))
        .collect()
}

/// `[stations]` as typed bindings.
pub fn to_station_bindings(cfg: &Config) -> Vec<(StationId, EntityId)> {
    cfg.stations
        .iter()
        .map(|(station, restaurant)| {
            (
                StationId::from(station.as_str()),
                EntityId::from(restaurant.as_str()),
            )
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.defaults.output, "table");
        assert_eq!(cfg.supervisor.poll_interval_secs, 5);
        assert!(cfg.gates.is_empty());
    }

    #[test]
    fn full_file_translates_to_core_configs() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
data_file = "venue.json"

[venue]
utc_offset_minutes = 180
scan_timeout_ms = 1500

[venue.messages]
OUTSIDE_MEAL_TIME = "Yemek saati dışında"

[supervisor]
poll_interval_secs = 10
retry_attempts = 2

[auto_open]
enabled = true
duration_secs = 8

[[gates]]
id = "gate-1"
protocol = "TCP_IP"
ip_address = "10.0.0.5"
port = 4001

[[gates]]
id = "gate-2"
protocol = "HTTP"
base_url = "http://10.0.0.9"
api_key = "plain"
maintenance = true

[stations]
north-1 = "rest-1"
"#,
        );
        let cfg = load_config_from(&path).unwrap();

        let scan = to_scan_config(&cfg).unwrap();
        assert_eq!(scan.venue_offset.local_minus_utc(), 180 * 60);
        assert_eq!(scan.scan_timeout, Duration::from_millis(1500));
        assert_eq!(scan.auto_open, Some(AutoOpen { duration_secs: 8 }));
        assert_eq!(scan.localized_messages.len(), 1);

        let sup = to_supervisor_config(&cfg);
        assert_eq!(sup.poll_interval, Duration::from_secs(10));
        assert_eq!(sup.retry.max_attempts, 2);

        let gates = to_gate_configs(&cfg).unwrap();
        assert_eq!(gates.len(), 2);
        assert_eq!(gates[1].protocol, GateProtocol::Http);
        assert!(gates[1].api_key.is_some());
        assert_eq!(maintenance_gates(&cfg), vec![EntityId::from("gate-2")]);

        assert_eq!(
            to_station_bindings(&cfg),
            vec![(StationId::from("north-1"), EntityId::from("rest-1"))]
        );
    }

    #[test]
    fn incomplete_gate_is_rejected() {
        let cfg = Config {
            gates: vec![GateEntry {
                id: "gate-1".into(),
                name: String::new(),
                protocol: GateProtocol::Rs485,
                ip_address: None,
                port: None,
                serial_port: Some("/dev/ttyUSB0".into()),
                baud_rate: None,
                bus_address: None,
                base_url: None,
                api_key: None,
                api_key_env: None,
                is_active: true,
                maintenance: false,
            }],
            ..Config::default()
        };
        let err = to_gate_configs(&cfg).unwrap_err();
        assert!(err.to_string().contains("gates.gate-1"));
    }

    #[test]
    fn out_of_range_offset_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "[venue]\nutc_offset_minutes = 2000\n");
        assert!(matches!(
            load_config_from(&path),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn duplicate_gate_ids_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let gate = "[[gates]]\nid = \"g\"\nprotocol = \"TCP_IP\"\n";
        let path = write(&dir, &format!("{gate}{gate}"));
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");
        let mut cfg = Config::default();
        cfg.venue.utc_offset_minutes = -300;
        cfg.stations.insert("bar-2".into(), "rest-9".into());
        save_config_to(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.venue.utc_offset_minutes, -300);
        assert_eq!(loaded.stations.get("bar-2").map(String::as_str), Some("rest-9"));
    }
}
