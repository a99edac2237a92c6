//! Scan pipeline.
//!
//! [`ScanOrchestrator::handle_scan`] turns one raw scan into exactly one
//! [`ScanResult`]:
//!
//! decode → snapshot read → [`validator::evaluate`] → usage commit (ALLOW
//! only) → result → audit → optional gate open.
//!
//! Nothing in the pipeline escapes as an error. Malformed input is a
//! `CARD_NOT_FOUND` denial; repository failures and timeouts become a
//! `SYSTEM_ERROR` denial. Auditing and the gate open are best-effort and
//! never change the result.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mealgate_gate::{GateAction, GateCommand};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::AuditSink;
use crate::config::ScanConfig;
use crate::error::CoreError;
use crate::ledger::{Consumption, UsageLedger};
use crate::messages::MessageCatalog;
use crate::model::{ErrorCode, Outcome, ScanRequest, ScanResult, StationContext, StationId};
use crate::store::{EntityRepository, ScanSnapshot};
use crate::supervisor::GateSupervisor;
use crate::token;
use crate::validator::{self, Decision, EvaluationInput};

pub struct ScanOrchestrator {
    repository: Arc<dyn EntityRepository>,
    ledger: UsageLedger,
    audit: Arc<dyn AuditSink>,
    messages: MessageCatalog,
    config: ScanConfig,
    supervisor: Option<GateSupervisor>,
}

impl ScanOrchestrator {
    pub fn new(
        repository: Arc<dyn EntityRepository>,
        audit: Arc<dyn AuditSink>,
        config: ScanConfig,
    ) -> Self {
        let ledger = UsageLedger::new(Arc::clone(&repository), config.max_conflict_retries);
        let messages = MessageCatalog::new(config.localized_messages.clone());
        Self {
            repository,
            ledger,
            audit,
            messages,
            config,
            supervisor: None,
        }
    }

    /// Route ALLOW decisions to the restaurant's gate when auto-open is on.
    #[must_use]
    pub fn with_supervisor(mut self, supervisor: GateSupervisor) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Resolve the station's restaurant and the venue-local scan time.
    ///
    /// `at` overrides the clock (manual entry, replays, tests).
    pub async fn station_context(
        &self,
        station_id: Option<StationId>,
        at: Option<DateTime<Utc>>,
    ) -> Result<StationContext, CoreError> {
        let restaurant_id = match &station_id {
            Some(station) => self.repository.station_restaurant(station).await?,
            None => None,
        };
        let now = at
            .unwrap_or_else(Utc::now)
            .with_timezone(&self.config.venue_offset);
        Ok(StationContext {
            station_id,
            restaurant_id,
            now,
        })
    }

    /// Decide one scan. Always returns a result.
    pub async fn handle_scan(&self, request: ScanRequest, station: StationContext) -> ScanResult {
        let scan_id = Uuid::new_v4();
        let timeout = self.config.scan_timeout;

        let (decision, snapshot) =
            match tokio::time::timeout(timeout, self.decide(&request, &station)).await {
                Ok(Ok(decided)) => decided,
                Ok(Err(e)) => {
                    error!(%scan_id, error = %e, "scan failed");
                    (Decision::system_error(), ScanSnapshot::default())
                }
                Err(_) => {
                    error!(%scan_id, ?timeout, "scan timed out");
                    (Decision::system_error(), ScanSnapshot::default())
                }
            };

        let result = self.build_result(scan_id, &request, &station, decision, &snapshot);
        let code = result
            .error_code
            .map_or_else(|| "-".to_owned(), |c| c.to_string());
        info!(%scan_id, outcome = %result.outcome, code = %code, "scan decided");

        if let Err(e) = self.audit.record_scan(&result).await {
            error!(%scan_id, error = %e, "failed to record scan");
        }

        if result.outcome == Outcome::Allow {
            self.auto_open(scan_id, &snapshot).await;
        }
        result
    }

    async fn decide(
        &self,
        request: &ScanRequest,
        station: &StationContext,
    ) -> Result<(Decision, ScanSnapshot), CoreError> {
        let payload = match token::decode(&request.card_data) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "scan payload rejected");
                return Ok((
                    Decision::deny(ErrorCode::CardNotFound),
                    ScanSnapshot::default(),
                ));
            }
        };

        let mut snapshot = self.repository.load_scan_snapshot(&payload).await?;
        let decision = validator::evaluate(
            &EvaluationInput {
                payload: &payload,
                card: snapshot.card.as_ref(),
                guest: snapshot.guest.as_ref(),
                restaurant: snapshot.restaurant.as_ref(),
                meal_windows: &snapshot.meal_windows,
                station_restaurant: station.restaurant_id.as_ref(),
            },
            station.now,
        );
        if !decision.is_allowed() {
            return Ok((decision, snapshot));
        }

        let Some(card_id) = snapshot.card.as_ref().map(|c| c.id.clone()) else {
            return Ok((Decision::deny(ErrorCode::CardNotFound), snapshot));
        };
        let decision = match self.ledger.try_consume(&card_id).await? {
            Consumption::Consumed {
                usage_count,
                max_usage,
            } => {
                if let Some(card) = snapshot.card.as_mut() {
                    card.usage_count = usage_count;
                    card.max_usage = max_usage;
                }
                decision
            }
            Consumption::LimitExceeded => Decision::warn(ErrorCode::MealLimitExceeded),
            Consumption::NotFound => Decision::deny(ErrorCode::CardNotFound),
        };
        Ok((decision, snapshot))
    }

    fn build_result(
        &self,
        scan_id: Uuid,
        request: &ScanRequest,
        station: &StationContext,
        decision: Decision,
        snapshot: &ScanSnapshot,
    ) -> ScanResult {
        ScanResult {
            scan_id,
            success: decision.outcome == Outcome::Allow,
            outcome: decision.outcome,
            error_code: decision.code,
            message: self.messages.message(decision.code).to_owned(),
            message_localized: self.messages.localized(decision.code).to_owned(),
            card: snapshot.card.as_ref().map(Into::into),
            guest: snapshot.guest.as_ref().map(Into::into),
            restaurant: snapshot.restaurant.as_ref().map(Into::into),
            scan_type: request.scan_type,
            station_id: station.station_id.clone(),
            timestamp: station.now,
        }
    }

    async fn auto_open(&self, scan_id: Uuid, snapshot: &ScanSnapshot) {
        let (Some(auto_open), Some(supervisor)) = (self.config.auto_open, &self.supervisor) else {
            return;
        };
        let Some(gate_id) = snapshot.restaurant.as_ref().and_then(|r| r.gate_id.as_ref()) else {
            return;
        };
        let command = GateCommand::new(GateAction::Open)
            .with_duration(auto_open.duration_secs)
            .with_reason(format!("scan {scan_id}"));
        match supervisor.execute(gate_id, command).await {
            Ok(_) => debug!(%scan_id, %gate_id, "gate opened for scan"),
            Err(e) => warn!(%scan_id, %gate_id, error = %e, "gate did not open for allowed scan"),
        }
    }
}

