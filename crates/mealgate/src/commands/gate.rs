//! Gate command handlers.

use serde::Serialize;
use tabled::Tabled;
use tokio::sync::mpsc;
use tracing::{debug, info};

use mealgate_config as config;
use mealgate_core::{
    EntityId, EntityRepository, GateAction, GateCommand as CoreGateCommand, GateConfig,
    GateProtocol, GateState, GateStateView, GateSupervisor,
};

use crate::cli::{GateActionArgs, GateArgs, GateCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GateSummary {
    id: EntityId,
    name: String,
    protocol: GateProtocol,
    endpoint: String,
    is_active: bool,
    maintenance: bool,
}

impl GateSummary {
    fn new(gate: &GateConfig, maintenance: bool) -> Self {
        Self {
            id: gate.id.clone(),
            name: gate.name.clone(),
            protocol: gate.protocol,
            endpoint: endpoint_label(gate),
            is_active: gate.is_active,
            maintenance,
        }
    }
}

fn endpoint_label(gate: &GateConfig) -> String {
    let or_dash = |v: Option<String>| v.unwrap_or_else(|| "-".into());
    match gate.protocol {
        GateProtocol::TcpIp => format!(
            "{}:{}",
            or_dash(gate.ip_address.clone()),
            or_dash(gate.port.map(|p| p.to_string()))
        ),
        GateProtocol::Rs485 => format!(
            "{}@{} #{}",
            or_dash(gate.serial_port.clone()),
            or_dash(gate.baud_rate.map(|b| b.to_string())),
            gate.bus_address.unwrap_or(1)
        ),
        GateProtocol::Http => or_dash(gate.http_base_url()),
    }
}

#[derive(Tabled)]
struct GateRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "Endpoint")]
    endpoint: String,
    #[tabled(rename = "Active")]
    active: String,
}

impl From<&GateSummary> for GateRow {
    fn from(g: &GateSummary) -> Self {
        Self {
            id: g.id.to_string(),
            name: g.name.clone(),
            protocol: g.protocol.to_string(),
            endpoint: g.endpoint.clone(),
            active: match (g.is_active, g.maintenance) {
                (false, _) => "no",
                (true, true) => "maintenance",
                (true, false) => "yes",
            }
            .into(),
        }
    }
}

#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Gate")]
    gate: String,
    #[tabled(rename = "Link")]
    connectivity: String,
    #[tabled(rename = "Door")]
    door: String,
    #[tabled(rename = "Failures")]
    failures: String,
    #[tabled(rename = "Last Poll")]
    last_poll: String,
    #[tabled(rename = "Error")]
    error: String,
}

fn state_row(s: &GateState, color: bool) -> StateRow {
    let mut connectivity = output::paint_connectivity(s.connectivity, color);
    if s.stale {
        connectivity.push_str(" (stale)");
    }
    StateRow {
        gate: s.gate_id.to_string(),
        connectivity,
        door: output::paint_door(s.door_state, color),
        failures: s.consecutive_failures.to_string(),
        last_poll: util::fmt_time(s.last_poll_at.as_ref()),
        error: s.last_error.clone().unwrap_or_default(),
    }
}

fn view_detail(gate_id: &EntityId, v: &GateStateView, color: bool) -> String {
    output::detail_block(&[
        ("Gate", gate_id.to_string()),
        ("Door", output::paint_door(v.status, color)),
        ("Link", output::paint_connectivity(v.connectivity, color)),
        ("Stale", if v.stale { "yes".into() } else { String::new() }),
        ("Last command", util::fmt_time(v.last_command_at.as_ref())),
        ("Error", v.last_error.clone().unwrap_or_default()),
    ])
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: GateArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = util::load_config(global)?;
    let color = output::should_color(&global.color);

    match args.command {
        GateCommand::List => {
            let repo = util::load_repository(global, &cfg, false).await?;
            let pinned = config::maintenance_gates(&cfg);
            let gates = repo.gate_configs().await?;
            let summaries: Vec<GateSummary> = gates
                .iter()
                .map(|g| GateSummary::new(g, pinned.contains(&g.id)))
                .collect();
            let out = output::render_list(
                &global.output,
                &summaries,
                |g| GateRow::from(g),
                |g| g.id.to_string(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        GateCommand::Status { gate } => {
            let repo = util::load_repository(global, &cfg, false).await?;
            let supervisor =
                util::build_supervisor(&cfg, &repo, util::audit_sink(&cfg), None).await?;
            let ids = match gate {
                Some(id) => vec![EntityId::from(id.as_str())],
                None => supervisor.gate_ids(),
            };
            let mut states = Vec::with_capacity(ids.len());
            for id in &ids {
                states.push(supervisor.refresh(id).await?);
            }
            let out = output::render_list(
                &global.output,
                &states,
                |s| state_row(s, color),
                |s| format!("{} {} {}", s.gate_id, s.connectivity, s.door_state),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        GateCommand::Open(action) => run_action(&cfg, global, GateAction::Open, action).await,
        GateCommand::Close(action) => run_action(&cfg, global, GateAction::Close, action).await,
        GateCommand::Reset(action) => run_action(&cfg, global, GateAction::Reset, action).await,
        GateCommand::EmergencyOpen(action) => {
            run_action(&cfg, global, GateAction::EmergencyOpen, action).await
        }

        GateCommand::Maintenance { gate, off } => {
            let path = util::config_file(global);
            let mut cfg = cfg;
            let entry = cfg
                .gates
                .iter_mut()
                .find(|g| g.id == gate)
                .ok_or_else(|| CliError::NotFound {
                    resource_type: "gate".into(),
                    identifier: gate.clone(),
                    list_command: "gate list".into(),
                })?;
            entry.maintenance = !off;
            config::save_config_to(&cfg, &path)?;
            info!(gate_id = %gate, enabled = !off, "maintenance pin saved");
            if !global.quiet {
                let verb = if off { "released from" } else { "pinned to" };
                eprintln!("✓ Gate '{gate}' {verb} maintenance");
            }
            Ok(())
        }

        GateCommand::Watch { interval } => watch(&cfg, global, interval, color).await,
    }
}

async fn run_action(
    cfg: &config::Config,
    global: &GlobalOpts,
    action: GateAction,
    args: GateActionArgs,
) -> Result<(), CliError> {
    let repo = util::load_repository(global, cfg, false).await?;
    let supervisor = util::build_supervisor(cfg, &repo, util::audit_sink(cfg), None).await?;
    let gate_id = EntityId::from(args.gate.as_str());

    // A fresh supervisor has not seen the gate yet; poll once so the
    // guards judge the current state.
    supervisor.refresh(&gate_id).await?;

    let command = CoreGateCommand {
        action,
        duration_secs: args.duration,
        reason: args.reason,
    };
    debug!(gate_id = %gate_id, action = %action, "issuing gate command");
    let state = supervisor.execute(&gate_id, command).await?;

    let view = GateStateView::from(&state);
    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &view,
        |v| view_detail(&gate_id, v, color),
        |v| v.status.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Watch ───────────────────────────────────────────────────────────

async fn watch(
    cfg: &config::Config,
    global: &GlobalOpts,
    interval: Option<u64>,
    color: bool,
) -> Result<(), CliError> {
    let repo = util::load_repository(global, cfg, false).await?;
    let supervisor =
        util::build_supervisor(cfg, &repo, util::audit_sink(cfg), interval).await?;
    if supervisor.gate_ids().is_empty() {
        return Err(CliError::Validation {
            field: "gates".into(),
            reason: "no active gates configured".into(),
        });
    }

    let (tx, mut rx) = mpsc::channel::<GateState>(64);
    spawn_forwarders(&supervisor, &tx);
    drop(tx);

    supervisor.start().await;
    info!(gates = supervisor.gate_ids().len(), "watching gates");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = rx.recv() => match next {
                Some(state) => {
                    let line = watch_line(&global.output, &state, color)?;
                    output::print_output(&line, global.quiet);
                }
                None => break,
            },
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

fn spawn_forwarders(supervisor: &GateSupervisor, tx: &mpsc::Sender<GateState>) {
    for gate_id in supervisor.gate_ids() {
        let Some(mut updates) = supervisor.subscribe(&gate_id) else {
            continue;
        };
        let tx = tx.clone();
        tokio::spawn(async move {
            loop {
                let state = updates.borrow_and_update().clone();
                if tx.send(state).await.is_err() {
                    break;
                }
                if updates.changed().await.is_err() {
                    break;
                }
            }
        });
    }
}

fn watch_line(format: &OutputFormat, s: &GateState, color: bool) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::Table => {
            let stale = if s.stale { " (stale)" } else { "" };
            format!(
                "{}  {:<12} {}{stale}  {}  failures={}",
                chrono::Local::now().format("%H:%M:%S"),
                s.gate_id,
                output::paint_connectivity(s.connectivity, color),
                output::paint_door(s.door_state, color),
                s.consecutive_failures
            )
        }
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(s)?,
        OutputFormat::Yaml => format!("---\n{}", serde_yaml::to_string(s)?),
        OutputFormat::Plain => format!("{} {} {}", s.gate_id, s.connectivity, s.door_state),
    })
}
