// ── Repository contract ──
//
// The engine never owns persistence. Everything it reads or writes goes
// through an injected `EntityRepository`.

mod memory;

pub use memory::{Fixture, MemoryRepository};

use async_trait::async_trait;

use crate::error::CoreError;
use crate::model::{Card, EntityId, GateConfig, Guest, MealWindow, Restaurant, StationId};
use crate::token::ScanPayload;

/// Entities one scan is evaluated against, read together.
#[derive(Debug, Clone, Default)]
pub struct ScanSnapshot {
    pub card: Option<Card>,
    pub guest: Option<Guest>,
    /// The token's restaurant for structured payloads, otherwise the
    /// guest's home restaurant.
    pub restaurant: Option<Restaurant>,
    /// Windows belonging to `restaurant`.
    pub meal_windows: Vec<MealWindow>,
}

#[async_trait]
pub trait EntityRepository: Send + Sync {
    /// Single consistent read of everything the validator needs.
    async fn load_scan_snapshot(&self, payload: &ScanPayload) -> Result<ScanSnapshot, CoreError>;

    async fn station_restaurant(&self, station: &StationId) -> Result<Option<EntityId>, CoreError>;

    /// `(usage_count, max_usage)` of a card, by card id.
    async fn card_usage(&self, card_id: &EntityId) -> Result<Option<(u32, u32)>, CoreError>;

    /// Set `usage_count` to `new` only if it still equals `expected`.
    ///
    /// Returns `false` when the stored value moved (or the card vanished).
    async fn compare_and_set_usage(
        &self,
        card_id: &EntityId,
        expected: u32,
        new: u32,
    ) -> Result<bool, CoreError>;

    async fn gate_configs(&self) -> Result<Vec<GateConfig>, CoreError>;
}
