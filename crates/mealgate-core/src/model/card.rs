// ── Cards and the tokens printed on them ──

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EntityId;

/// Mutable card record owned by the persistence layer.
///
/// `usage_count` is only ever changed through the usage ledger, which
/// keeps `0 <= usage_count <= max_usage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: EntityId,
    /// Value encoded on the physical card (QR text or RFID UID).
    pub card_data: String,
    pub guest_id: EntityId,
    #[serde(default)]
    pub meal_window_id: Option<EntityId>,
    pub is_active: bool,
    #[serde(default)]
    pub usage_count: u32,
    pub max_usage: u32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

impl Card {
    /// Inclusive on both ends.
    pub fn is_valid_at<Tz: chrono::TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        self.valid_from <= *now && *now <= self.valid_to
    }

    pub fn has_remaining_uses(&self) -> bool {
        self.usage_count < self.max_usage
    }
}

/// Entitlement snapshot embedded verbatim in a scannable payload.
///
/// Immutable once issued; [`CardToken::issue`] seals it with a checksum
/// that decoding verifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CardToken {
    pub card_id: EntityId,
    pub guest_id: EntityId,
    pub restaurant_id: EntityId,
    #[serde(default)]
    pub meal_window_ids: BTreeSet<EntityId>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub max_usage: u32,
    pub checksum: String,
}

/// Fields of a token before it is sealed.
#[derive(Debug, Clone)]
pub struct TokenClaims {
    pub card_id: EntityId,
    pub guest_id: EntityId,
    pub restaurant_id: EntityId,
    pub meal_window_ids: BTreeSet<EntityId>,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub max_usage: u32,
}

impl CardToken {
    pub fn issue(claims: TokenClaims) -> Self {
        let mut token = Self {
            card_id: claims.card_id,
            guest_id: claims.guest_id,
            restaurant_id: claims.restaurant_id,
            meal_window_ids: claims.meal_window_ids,
            valid_from: claims.valid_from,
            valid_to: claims.valid_to,
            max_usage: claims.max_usage,
            checksum: String::new(),
        };
        token.checksum = crate::token::checksum(&token);
        token
    }

    /// Claims a token for an existing card, as done at issuance time.
    pub fn claims_for(card: &Card, restaurant_id: EntityId) -> TokenClaims {
        TokenClaims {
            card_id: card.id.clone(),
            guest_id: card.guest_id.clone(),
            restaurant_id,
            meal_window_ids: card.meal_window_id.iter().cloned().collect(),
            valid_from: card.valid_from,
            valid_to: card.valid_to,
            max_usage: card.max_usage,
        }
    }
}
