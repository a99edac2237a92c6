//! Scan decisions and gate supervision for guest meal access.
//!
//! - **[`ScanOrchestrator`]**: decodes a scan, reads one consistent
//!   [`ScanSnapshot`] from the injected [`EntityRepository`], runs the
//!   ordered checks in [`validator`], commits usage through the
//!   [`UsageLedger`] and emits exactly one [`ScanResult`].
//!
//! - **[`GateSupervisor`]**: polls every active gate in the background,
//!   tracks connectivity and door state, and routes OPEN / CLOSE / RESET /
//!   EMERGENCY_OPEN commands through the gate's driver from
//!   `mealgate-gate`.
//!
//! - **[`AuditSink`]**: where scan results and gate events go. Writes are
//!   best-effort and never change an outcome.
//!
//! Persistence is never owned here; [`MemoryRepository`] backs the CLI and
//! tests.

pub mod audit;
pub mod config;
pub mod error;
pub mod ledger;
pub mod messages;
pub mod model;
pub mod orchestrator;
pub mod store;
pub mod supervisor;
pub mod token;
pub mod validator;

// ── Primary re-exports ──────────────────────────────────────────────
pub use audit::{AuditSink, JsonlAuditSink, MemoryAuditSink, TracingAuditSink};
pub use config::{AutoOpen, RetryPolicy, ScanConfig, SupervisorConfig};
pub use error::CoreError;
pub use ledger::{Consumption, UsageLedger};
pub use messages::MessageCatalog;
pub use orchestrator::ScanOrchestrator;
pub use store::{EntityRepository, Fixture, MemoryRepository, ScanSnapshot};
pub use supervisor::{DriverFactory, GateSupervisor, NativeDriverFactory};
pub use token::{DecodeError, ScanPayload};
pub use validator::{Decision, EvaluationInput};

pub use model::{
    Card, CardSnapshot, CardToken, Connectivity, DoorState, EntityId, ErrorClass, ErrorCode,
    GateConfig, GateControlRequest, GateControlResponse, GateEvent, GateEventKind, GateState,
    GateStateView, Guest, GuestSnapshot, MealWindow, Outcome, Restaurant, RestaurantSnapshot,
    ScanRequest, ScanResult, ScanType, StationContext, StationId, TokenClaims,
};

// Driver-level types callers need to build commands.
pub use mealgate_gate::{
    DoorStatus, GateAction, GateCommand, GateDriver, GateProtocol, GateResponse, TlsMode,
    TransportConfig,
};
