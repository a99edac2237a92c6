// ── Gate supervisor ──
//
// Owns the observed state of every active gate. One background task per
// gate polls STATUS on a fixed interval; imperative commands are routed
// through the same per-gate driver. State lives in a `watch` channel per
// gate so consumers can snapshot or follow it.
//
// Every transport attempt takes a ticket from the gate's sequence. An
// outcome is applied only if its ticket is newer than the last applied
// one, so a slow reply can never overwrite a fresher observation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use mealgate_gate::{
    GateAction, GateCommand, GateDriver, GateResponse, SerialBus, TransportConfig, build_driver,
};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::audit::AuditSink;
use crate::config::SupervisorConfig;
use crate::error::CoreError;
use crate::model::{
    Connectivity, DoorState, EntityId, ErrorCode, GateConfig, GateControlRequest,
    GateControlResponse, GateEvent, GateEventKind, GateState,
};
use crate::store::EntityRepository;

// ── Driver factory ───────────────────────────────────────────────

/// Resolves the driver for a gate, once, when supervision starts.
pub trait DriverFactory: Send + Sync {
    fn build(&self, gate: &GateConfig) -> Result<Arc<dyn GateDriver>, CoreError>;
}

/// Builds real TCP/RS485/HTTP drivers. RS485 gates share one serial bus.
pub struct NativeDriverFactory {
    transport: TransportConfig,
    bus: SerialBus,
}

impl NativeDriverFactory {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            bus: SerialBus::native(),
        }
    }
}

impl DriverFactory for NativeDriverFactory {
    fn build(&self, gate: &GateConfig) -> Result<Arc<dyn GateDriver>, CoreError> {
        let endpoint = gate.endpoint()?;
        debug!(gate_id = %gate.id, ?endpoint, "resolved gate driver");
        Ok(build_driver(&endpoint, &self.transport, &self.bus)?)
    }
}

// ── Per-gate slot ────────────────────────────────────────────────

struct GateSlot {
    config: GateConfig,
    driver: Arc<dyn GateDriver>,
    state: watch::Sender<GateState>,
    next_ticket: AtomicU64,
    /// Only touched inside `state`'s modify closure, which serializes it.
    applied_ticket: AtomicU64,
}

impl GateSlot {
    fn new(config: GateConfig, driver: Arc<dyn GateDriver>) -> Self {
        let (state, _) = watch::channel(GateState::new(config.id.clone()));
        Self {
            config,
            driver,
            state,
            next_ticket: AtomicU64::new(0),
            applied_ticket: AtomicU64::new(0),
        }
    }

    fn id(&self) -> &EntityId {
        &self.config.id
    }

    fn ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Run `f` against the state if `ticket` is the newest outcome so far.
    fn apply<R>(&self, ticket: u64, f: impl FnOnce(&mut GateState) -> R) -> Option<R> {
        let mut out = None;
        self.state.send_if_modified(|state| {
            if ticket <= self.applied_ticket.load(Ordering::SeqCst) {
                return false;
            }
            self.applied_ticket.store(ticket, Ordering::SeqCst);
            out = Some(f(state));
            true
        });
        if out.is_none() {
            debug!(gate_id = %self.id(), ticket, "discarding stale gate outcome");
        }
        out
    }

    fn snapshot(&self) -> GateState {
        self.state.borrow().clone()
    }
}

// ── GateSupervisor ───────────────────────────────────────────────

/// Cheaply cloneable handle to the supervision of all configured gates.
#[derive(Clone)]
pub struct GateSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    config: SupervisorConfig,
    gates: DashMap<EntityId, Arc<GateSlot>>,
    audit: Arc<dyn AuditSink>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl GateSupervisor {
    /// Supervise every active gate in `gates`. Gates whose driver cannot
    /// be built are logged and left out.
    pub fn new(
        config: SupervisorConfig,
        gates: Vec<GateConfig>,
        factory: &dyn DriverFactory,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let slots = DashMap::new();
        for gate in gates {
            if !gate.is_active {
                debug!(gate_id = %gate.id, "gate inactive, not supervised");
                continue;
            }
            match factory.build(&gate) {
                Ok(driver) => {
                    slots.insert(gate.id.clone(), Arc::new(GateSlot::new(gate, driver)));
                }
                Err(e) => warn!(gate_id = %gate.id, error = %e, "gate not supervised"),
            }
        }

        Self {
            inner: Arc::new(SupervisorInner {
                config,
                gates: slots,
                audit,
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Load gate configs from the repository and supervise them.
    pub async fn from_repository(
        repository: &dyn EntityRepository,
        config: SupervisorConfig,
        factory: &dyn DriverFactory,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, CoreError> {
        let gates = repository.gate_configs().await?;
        Ok(Self::new(config, gates, factory, audit))
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn one poll task per gate. Polls start immediately.
    pub async fn start(&self) {
        let interval = self.inner.config.poll_interval;
        if interval.is_zero() {
            debug!("gate polling disabled");
            return;
        }
        let mut handles = self.inner.task_handles.lock().await;
        if !handles.is_empty() {
            return;
        }
        for slot in self.inner.gates.iter() {
            let sup = self.clone();
            let slot = Arc::clone(slot.value());
            let cancel = self.inner.cancel.child_token();
            handles.push(tokio::spawn(poll_task(sup, slot, cancel)));
        }
        info!(gates = handles.len(), ?interval, "gate supervision started");
    }

    /// Cancel poll tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("gate supervision stopped");
    }

    // ── State access ─────────────────────────────────────────────

    pub fn gate_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.inner.gates.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn gate_config(&self, gate_id: &EntityId) -> Option<GateConfig> {
        self.inner.gates.get(gate_id).map(|s| s.config.clone())
    }

    pub fn state(&self, gate_id: &EntityId) -> Option<GateState> {
        self.inner.gates.get(gate_id).map(|s| s.snapshot())
    }

    pub fn states(&self) -> Vec<GateState> {
        let mut states: Vec<GateState> = self.inner.gates.iter().map(|s| s.snapshot()).collect();
        states.sort_by(|a, b| a.gate_id.cmp(&b.gate_id));
        states
    }

    pub fn subscribe(&self, gate_id: &EntityId) -> Option<watch::Receiver<GateState>> {
        self.inner.gates.get(gate_id).map(|s| s.state.subscribe())
    }

    fn slot(&self, gate_id: &EntityId) -> Result<Arc<GateSlot>, CoreError> {
        self.inner
            .gates
            .get(gate_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| CoreError::GateNotFound {
                gate_id: gate_id.clone(),
            })
    }

    // ── Polling ──────────────────────────────────────────────────

    /// Manual re-poll: a single STATUS attempt, outside the retry policy.
    ///
    /// A failed attempt counts toward the offline threshold like any poll
    /// and is visible in the returned state's `last_error`.
    pub async fn refresh(&self, gate_id: &EntityId) -> Result<GateState, CoreError> {
        let slot = self.slot(gate_id)?;
        let _ = self.poll_once(&slot).await;
        Ok(slot.snapshot())
    }

    async fn poll_once(&self, slot: &GateSlot) -> Result<GateState, CoreError> {
        let ticket = slot.ticket();
        match self.dispatch(slot, &GateCommand::status()).await {
            Ok(resp) => {
                self.poll_succeeded(slot, ticket, &resp).await;
                Ok(slot.snapshot())
            }
            Err(e) => {
                self.poll_failed(slot, ticket, &e).await;
                Err(e)
            }
        }
    }

    /// STATUS with the retry policy; one failure counted per cycle.
    async fn poll_cycle(&self, slot: &GateSlot) {
        let policy = &self.inner.config.retry;
        let attempts = policy.attempts();
        let mut last_failure = None;

        for attempt in 1..=attempts {
            let ticket = slot.ticket();
            match self.dispatch(slot, &GateCommand::status()).await {
                Ok(resp) => {
                    self.poll_succeeded(slot, ticket, &resp).await;
                    return;
                }
                Err(e) => {
                    debug!(gate_id = %slot.id(), attempt, error = %e, "status attempt failed");
                    last_failure = Some((ticket, e));
                }
            }
            if attempt < attempts {
                tokio::time::sleep(policy.backoff(attempt)).await;
            }
        }

        if let Some((ticket, e)) = last_failure {
            self.poll_failed(slot, ticket, &e).await;
        }
    }

    async fn poll_succeeded(&self, slot: &GateSlot, ticket: u64, resp: &GateResponse) {
        let now = Utc::now();
        let reported = DoorState::from(resp.status);
        let came_online = slot.apply(ticket, |s| {
            let from = s.connectivity;
            s.connectivity = Connectivity::Online;
            s.consecutive_failures = 0;
            s.stale = false;
            s.last_poll_at = Some(now);
            s.last_error = None;
            if !s.door_state.is_latched() {
                s.door_state = reported;
            }
            (from != Connectivity::Online).then_some(from)
        });

        if let Some(Some(from)) = came_online {
            info!(gate_id = %slot.id(), %from, door = %reported, "gate online");
            self.record(GateEvent {
                gate_id: slot.id().clone(),
                kind: GateEventKind::Connectivity {
                    from,
                    to: Connectivity::Online,
                },
                success: true,
                error_code: None,
                detail: Some(resp.raw.clone()),
                timestamp: now,
            })
            .await;
        }
    }

    async fn poll_failed(&self, slot: &GateSlot, ticket: u64, err: &CoreError) {
        let now = Utc::now();
        let threshold = self.inner.config.offline_after_failures.max(1);
        let message = err.to_string();
        let outcome = slot.apply(ticket, |s| {
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
            s.last_error = Some(message.clone());
            s.last_poll_at = Some(now);
            let went_offline = (s.consecutive_failures >= threshold
                && s.connectivity != Connectivity::Offline)
                .then(|| {
                    let from = s.connectivity;
                    s.connectivity = Connectivity::Offline;
                    s.stale = true;
                    from
                });
            (s.consecutive_failures, went_offline)
        });

        let Some((failures, went_offline)) = outcome else {
            return;
        };
        warn!(gate_id = %slot.id(), failures, error = %message, "gate status poll failed");

        if let Some(from) = went_offline {
            warn!(gate_id = %slot.id(), failures, "gate offline");
            self.record(GateEvent {
                gate_id: slot.id().clone(),
                kind: GateEventKind::Connectivity {
                    from,
                    to: Connectivity::Offline,
                },
                success: false,
                error_code: Some(ErrorCode::GateOffline),
                detail: Some(message),
                timestamp: now,
            })
            .await;
        }
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Issue a command to a gate.
    ///
    /// Guards are checked against the current state before any transport
    /// is attempted. Commands are never retried; a failure is reported and
    /// the next poll proceeds independently.
    pub async fn execute(
        &self,
        gate_id: &EntityId,
        command: GateCommand,
    ) -> Result<GateState, CoreError> {
        let slot = self.slot(gate_id)?;

        if command.action == GateAction::Status {
            let result = self.poll_once(&slot).await;
            self.record_command(&slot, &command, result.as_ref().err())
                .await;
            return result;
        }

        if let Err(rejection) = check_guards(&slot.snapshot(), command.action) {
            debug!(gate_id = %gate_id, action = %command.action, reason = %rejection, "command refused");
            self.record_command(&slot, &command, Some(&rejection)).await;
            return Err(rejection);
        }

        slot.state
            .send_modify(|s| s.last_command_at = Some(Utc::now()));
        let ticket = slot.ticket();
        info!(
            gate_id = %gate_id,
            action = %command.action,
            duration = command.duration_secs,
            reason = command.reason.as_deref().unwrap_or(""),
            "dispatching gate command"
        );

        match self.dispatch(&slot, &command).await {
            Ok(resp) => {
                let reported = DoorState::from(resp.status);
                slot.apply(ticket, |s| {
                    apply_command_outcome(s, command.action, reported);
                });
                self.record_command(&slot, &command, None).await;
                Ok(slot.snapshot())
            }
            Err(e) => {
                let message = e.to_string();
                slot.apply(ticket, |s| s.last_error = Some(message));
                warn!(gate_id = %gate_id, action = %command.action, error = %e, "gate command failed");
                self.record_command(&slot, &command, Some(&e)).await;
                Err(e)
            }
        }
    }

    /// [`execute`](Self::execute) shaped as the external control response.
    pub async fn control(
        &self,
        gate_id: &EntityId,
        request: GateControlRequest,
    ) -> GateControlResponse {
        let action = request.action;
        match self.execute(gate_id, request.into()).await {
            Ok(state) => GateControlResponse {
                success: true,
                message: format!("{action} completed"),
                error_code: None,
                data: Some((&state).into()),
            },
            Err(e) => {
                let code = e.error_code();
                GateControlResponse {
                    success: false,
                    message: code.default_message().to_owned(),
                    error_code: Some(code),
                    data: self.state(gate_id).as_ref().map(Into::into),
                }
            }
        }
    }

    /// Pin a gate to MAINTENANCE, or release it to UNKNOWN.
    pub async fn set_maintenance(
        &self,
        gate_id: &EntityId,
        enabled: bool,
    ) -> Result<GateState, CoreError> {
        let slot = self.slot(gate_id)?;
        let ticket = slot.ticket();
        slot.apply(ticket, |s| {
            if enabled {
                s.door_state = DoorState::Maintenance;
            } else if s.door_state == DoorState::Maintenance {
                s.door_state = DoorState::Unknown;
            }
        });
        info!(gate_id = %gate_id, enabled, "gate maintenance mode changed");
        self.record(GateEvent {
            gate_id: gate_id.clone(),
            kind: GateEventKind::Maintenance { enabled },
            success: true,
            error_code: None,
            detail: None,
            timestamp: Utc::now(),
        })
        .await;
        Ok(slot.snapshot())
    }

    // ── Helpers ──────────────────────────────────────────────────

    async fn dispatch(
        &self,
        slot: &GateSlot,
        command: &GateCommand,
    ) -> Result<GateResponse, CoreError> {
        let timeout = self.inner.config.command_timeout;
        let gate_id = slot.id().to_string();
        match tokio::time::timeout(timeout, slot.driver.send(&gate_id, command, timeout)).await {
            Ok(Ok(resp)) => Ok(resp),
            Ok(Err(e)) => Err(CoreError::from_driver(slot.id(), e)),
            Err(_) => Err(CoreError::GateTimeout {
                gate_id: slot.id().clone(),
                timeout,
            }),
        }
    }

    async fn record_command(&self, slot: &GateSlot, command: &GateCommand, err: Option<&CoreError>) {
        self.record(GateEvent {
            gate_id: slot.id().clone(),
            kind: GateEventKind::Command {
                action: command.action,
                duration_secs: command.duration_secs,
                reason: command.reason.clone(),
            },
            success: err.is_none(),
            error_code: err.map(CoreError::error_code),
            detail: err.map(ToString::to_string),
            timestamp: Utc::now(),
        })
        .await;
    }

    async fn record(&self, event: GateEvent) {
        if let Err(e) = self.inner.audit.record_gate_event(&event).await {
            error!(gate_id = %event.gate_id, error = %e, "failed to record gate event");
        }
    }
}

/// Refuse commands the current state cannot accept.
fn check_guards(state: &GateState, action: GateAction) -> Result<(), CoreError> {
    let offline = || CoreError::GateOffline {
        gate_id: state.gate_id.clone(),
    };
    match action {
        GateAction::Status => Ok(()),
        GateAction::Reset | GateAction::EmergencyOpen => {
            if state.connectivity == Connectivity::Offline {
                return Err(offline());
            }
            Ok(())
        }
        GateAction::Open | GateAction::Close => {
            if state.connectivity != Connectivity::Online {
                return Err(offline());
            }
            if state.door_state.is_latched() {
                return Err(CoreError::InvalidState {
                    gate_id: state.gate_id.clone(),
                    action,
                    door_state: state.door_state,
                });
            }
            Ok(())
        }
    }
}

fn apply_command_outcome(s: &mut GateState, action: GateAction, reported: DoorState) {
    s.last_error = None;
    match action {
        GateAction::Reset => {
            if s.door_state != DoorState::Maintenance {
                s.door_state = DoorState::Unknown;
            }
        }
        _ => {
            if !s.door_state.is_latched() {
                s.door_state = reported;
            }
        }
    }
}

// ── Background tasks ─────────────────────────────────────────────

async fn poll_task(supervisor: GateSupervisor, slot: Arc<GateSlot>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(supervisor.inner.config.poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = supervisor.poll_cycle(&slot) => {}
                }
            }
        }
    }
    debug!(gate_id = %slot.id(), "poll task stopped");
}
