//! Shared helpers for command handlers.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mealgate_config::{self as config, Config};
use mealgate_core::{
    AuditSink, GateSupervisor, JsonlAuditSink, MemoryRepository, NativeDriverFactory,
    TracingAuditSink,
};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Config file in effect: `--config`, else the platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config::config_path)
}

/// Load the config file; a missing file yields defaults.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(config::load_config_from(&config_file(global))?)
}

/// Build the in-memory repository from the venue data file plus the gates
/// and station bindings in the config file.
///
/// With `require_data` unset, a missing data file leaves the repository
/// with config-defined gates only.
pub async fn load_repository(
    global: &GlobalOpts,
    cfg: &Config,
    require_data: bool,
) -> Result<Arc<MemoryRepository>, CliError> {
    let data_file = global.data.clone().or_else(|| cfg.data_file.clone());
    let repo = match data_file {
        Some(path) => MemoryRepository::load(&path).await?,
        None if require_data => {
            return Err(CliError::NoData {
                path: config_file(global).display().to_string(),
            });
        }
        None => MemoryRepository::new(),
    };

    for gate in config::to_gate_configs(cfg)? {
        repo.upsert_gate(gate);
    }
    for (station, restaurant) in config::to_station_bindings(cfg) {
        repo.bind_station(station, restaurant);
    }
    Ok(Arc::new(repo))
}

pub fn audit_sink(cfg: &Config) -> Arc<dyn AuditSink> {
    match &cfg.audit.path {
        Some(path) => Arc::new(JsonlAuditSink::new(path.clone())),
        None => Arc::new(TracingAuditSink),
    }
}

/// Supervisor over every active gate in the repository, with the
/// config file's maintenance pins applied.
pub async fn build_supervisor(
    cfg: &Config,
    repo: &MemoryRepository,
    audit: Arc<dyn AuditSink>,
    poll_interval: Option<u64>,
) -> Result<GateSupervisor, CliError> {
    let mut sup_config = config::to_supervisor_config(cfg);
    if let Some(secs) = poll_interval {
        sup_config.poll_interval = Duration::from_secs(secs);
    }
    let factory = NativeDriverFactory::new(config::to_transport_config(cfg));
    let supervisor = GateSupervisor::from_repository(repo, sup_config, &factory, audit).await?;

    for gate_id in config::maintenance_gates(cfg) {
        if supervisor.state(&gate_id).is_some() {
            supervisor.set_maintenance(&gate_id, true).await?;
        }
    }
    Ok(supervisor)
}

pub fn fmt_time<Tz: chrono::TimeZone>(t: Option<&chrono::DateTime<Tz>>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    t.map(|t| t.format("%Y-%m-%d %H:%M:%S %:z").to_string())
        .unwrap_or_default()
}
