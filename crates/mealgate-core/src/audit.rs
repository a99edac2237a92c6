// ── Audit sinks ──
//
// Append-only destinations for scan results and gate control events.
// Callers treat every write as best-effort: a failing sink is logged and
// never undoes the action being audited.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::CoreError;
use crate::model::{GateEvent, GateEventKind, ScanResult};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_scan(&self, result: &ScanResult) -> Result<(), CoreError>;

    async fn record_gate_event(&self, event: &GateEvent) -> Result<(), CoreError>;
}

// ── Tracing ─────────────────────────────────────────────────────────

/// Emits each record as a structured `tracing` event on target `audit`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record_scan(&self, r: &ScanResult) -> Result<(), CoreError> {
        let code = r.error_code.map_or_else(|| "-".to_owned(), |c| c.to_string());
        let card_id = r.card.as_ref().map_or_else(|| "-".to_owned(), |c| c.id.to_string());
        let station = r.station_id.as_ref().map_or("-", |s| s.as_str());
        info!(
            target: "audit",
            scan_id = %r.scan_id,
            outcome = %r.outcome,
            code = %code,
            card_id = %card_id,
            station,
            "scan"
        );
        Ok(())
    }

    async fn record_gate_event(&self, e: &GateEvent) -> Result<(), CoreError> {
        let what = match &e.kind {
            GateEventKind::Command { action, .. } => action.to_string(),
            GateEventKind::Connectivity { from, to } => format!("{from}->{to}"),
            GateEventKind::Maintenance { enabled } => format!("maintenance={enabled}"),
        };
        let code = e.error_code.map_or_else(|| "-".to_owned(), |c| c.to_string());
        info!(
            target: "audit",
            gate_id = %e.gate_id,
            event = %what,
            success = e.success,
            code = %code,
            "gate"
        );
        Ok(())
    }
}

// ── Memory ──────────────────────────────────────────────────────────

/// Keeps every record in memory. Handy for tests and one-shot commands.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    scans: Mutex<Vec<ScanResult>>,
    gate_events: Mutex<Vec<GateEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scans(&self) -> Vec<ScanResult> {
        self.scans.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn gate_events(&self) -> Vec<GateEvent> {
        self.gate_events.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> CoreError {
    CoreError::Audit {
        message: "audit buffer lock poisoned".into(),
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record_scan(&self, result: &ScanResult) -> Result<(), CoreError> {
        self.scans.lock().map_err(poisoned)?.push(result.clone());
        Ok(())
    }

    async fn record_gate_event(&self, event: &GateEvent) -> Result<(), CoreError> {
        self.gate_events
            .lock()
            .map_err(poisoned)?
            .push(event.clone());
        Ok(())
    }
}

// ── JSON lines ──────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum Record<'a> {
    Scan(&'a ScanResult),
    Gate(&'a GateEvent),
}

/// Appends one JSON object per line to a file.
///
/// Writes are serialized so lines from concurrent callers never interleave.
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    file: tokio::sync::Mutex<Option<tokio::fs::File>>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, record: &Record<'_>) -> Result<(), CoreError> {
        let mut line = serde_json::to_vec(record).map_err(|e| CoreError::Audit {
            message: e.to_string(),
        })?;
        line.push(b'\n');

        let io_err = |e: std::io::Error| CoreError::Audit {
            message: format!("{}: {e}", self.path.display()),
        };

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
            let file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(io_err)?;
            *guard = Some(file);
        }
        let Some(file) = guard.as_mut() else {
            return Err(CoreError::Internal("audit file handle missing".into()));
        };
        if let Err(e) = async {
            file.write_all(&line).await?;
            file.flush().await
        }
        .await
        {
            // Reopen on the next write.
            *guard = None;
            return Err(io_err(e));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record_scan(&self, result: &ScanResult) -> Result<(), CoreError> {
        self.append(&Record::Scan(result)).await
    }

    async fn record_gate_event(&self, event: &GateEvent) -> Result<(), CoreError> {
        self.append(&Record::Gate(event)).await
    }
}
