// ── Scan request / result ──

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use super::{Card, EntityId, ErrorCode, Guest, Outcome, Restaurant, StationId};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum ScanType {
    #[default]
    Qr,
    Rfid,
}

/// A scan as submitted by a station or by staff entering a card manually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    pub card_data: String,
    #[serde(default)]
    pub scan_type: ScanType,
    #[serde(default)]
    pub station_id: Option<StationId>,
}

/// Where and when a scan happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationContext {
    pub station_id: Option<StationId>,
    /// Restaurant the station guards, if it is bound to one.
    pub restaurant_id: Option<EntityId>,
    /// Venue-local time of the scan.
    pub now: DateTime<FixedOffset>,
}

// ── Snapshots ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSnapshot {
    pub id: EntityId,
    pub card_data: String,
    pub usage_count: u32,
    pub max_usage: u32,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
    pub is_active: bool,
}

impl From<&Card> for CardSnapshot {
    fn from(c: &Card) -> Self {
        Self {
            id: c.id.clone(),
            card_data: c.card_data.clone(),
            usage_count: c.usage_count,
            max_usage: c.max_usage,
            valid_from: c.valid_from,
            valid_to: c.valid_to,
            is_active: c.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuestSnapshot {
    pub id: EntityId,
    pub first_name: String,
    pub last_name: String,
    pub room_number: Option<String>,
    pub is_active: bool,
}

impl From<&Guest> for GuestSnapshot {
    fn from(g: &Guest) -> Self {
        Self {
            id: g.id.clone(),
            first_name: g.first_name.clone(),
            last_name: g.last_name.clone(),
            room_number: g.room_number.clone(),
            is_active: g.is_active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestaurantSnapshot {
    pub id: EntityId,
    pub name: String,
    pub name_localized: Option<String>,
}

impl From<&Restaurant> for RestaurantSnapshot {
    fn from(r: &Restaurant) -> Self {
        Self {
            id: r.id.clone(),
            name: r.name.clone(),
            name_localized: r.name_localized.clone(),
        }
    }
}

// ── Result ──────────────────────────────────────────────────────────

/// Outcome of one scan. Created once, never mutated, sent to the audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub scan_id: Uuid,
    pub success: bool,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    pub message: String,
    pub message_localized: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<CardSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guest: Option<GuestSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restaurant: Option<RestaurantSnapshot>,
    pub scan_type: ScanType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station_id: Option<StationId>,
    pub timestamp: DateTime<FixedOffset>,
}
