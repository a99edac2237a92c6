// ── Domain model ──

pub mod card;
pub mod entity_id;
pub mod error_code;
pub mod gate;
pub mod guest;
pub mod restaurant;
pub mod scan;

pub use card::{Card, CardToken, TokenClaims};
pub use entity_id::{EntityId, StationId};
pub use error_code::{ErrorClass, ErrorCode, Outcome};
pub use gate::{
    Connectivity, DoorState, GateConfig, GateControlRequest, GateControlResponse, GateEvent,
    GateEventKind, GateState, GateStateView,
};
pub use guest::Guest;
pub use restaurant::{MealWindow, Restaurant};
pub use scan::{
    CardSnapshot, GuestSnapshot, RestaurantSnapshot, ScanRequest, ScanResult, ScanType,
    StationContext,
};
