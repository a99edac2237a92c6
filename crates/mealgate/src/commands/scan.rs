//! `mealgate scan`: decide one scan against the venue data.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use mealgate_config as config;
use mealgate_core::{
    EntityRepository, ScanOrchestrator, ScanRequest, ScanResult, ScanType, StationId,
};

use crate::cli::{GlobalOpts, ScanArgs, ScanTypeArg};
use crate::error::CliError;
use crate::output;

use super::util;

fn parse_at(raw: &str) -> Result<DateTime<Utc>, CliError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CliError::Validation {
            field: "at".into(),
            reason: format!("expected an RFC 3339 timestamp: {e}"),
        })
}

fn detail(result: &ScanResult, color: bool) -> String {
    let code = result
        .error_code
        .map(|c| c.to_string())
        .unwrap_or_default();
    let localized = if result.message_localized == result.message {
        String::new()
    } else {
        result.message_localized.clone()
    };

    let mut pairs = vec![
        ("Outcome", output::paint_outcome(result.outcome, color)),
        ("Code", code),
        ("Message", result.message.clone()),
        ("Localized", localized),
    ];
    if let Some(ref guest) = result.guest {
        pairs.push(("Guest", format!("{} {}", guest.first_name, guest.last_name)));
        pairs.push(("Room", guest.room_number.clone().unwrap_or_default()));
    }
    if let Some(ref card) = result.card {
        pairs.push(("Card", card.id.to_string()));
        pairs.push(("Usage", format!("{}/{}", card.usage_count, card.max_usage)));
    }
    if let Some(ref restaurant) = result.restaurant {
        pairs.push(("Restaurant", restaurant.name.clone()));
    }
    pairs.push((
        "Station",
        result
            .station_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
    ));
    pairs.push(("Time", util::fmt_time(Some(&result.timestamp))));
    pairs.push(("Scan", result.scan_id.to_string()));
    output::detail_block(&pairs)
}

pub async fn handle(args: ScanArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = util::load_config(global)?;
    let at = args.at.as_deref().map(parse_at).transpose()?;
    let repo = util::load_repository(global, &cfg, true).await?;
    let audit = util::audit_sink(&cfg);
    let scan_config = config::to_scan_config(&cfg)?;

    let supervisor = if scan_config.auto_open.is_some() {
        let supervisor = util::build_supervisor(&cfg, &repo, Arc::clone(&audit), None).await?;
        for gate_id in supervisor.gate_ids() {
            supervisor.refresh(&gate_id).await?;
        }
        Some(supervisor)
    } else {
        None
    };

    let repository: Arc<dyn EntityRepository> = repo;
    let mut orchestrator = ScanOrchestrator::new(repository, audit, scan_config);
    if let Some(supervisor) = supervisor {
        orchestrator = orchestrator.with_supervisor(supervisor);
    }

    let station = args.station.map(StationId::new);
    let context = orchestrator.station_context(station.clone(), at).await?;
    let request = ScanRequest {
        card_data: args.card_data,
        scan_type: match args.scan_type {
            ScanTypeArg::Qr => ScanType::Qr,
            ScanTypeArg::Rfid => ScanType::Rfid,
        },
        station_id: station,
    };

    debug!(scan_type = %request.scan_type, "deciding scan");
    let result = orchestrator.handle_scan(request, context).await;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &result,
        |r| detail(r, color),
        |r| r.outcome.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
