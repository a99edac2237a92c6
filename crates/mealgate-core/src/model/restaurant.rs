// ── Restaurants and their meal service windows ──

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::EntityId;
use crate::error::CoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restaurant {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub name_localized: Option<String>,
    pub is_active: bool,
    /// Weak reference; the gate is supervised independently.
    #[serde(default)]
    pub gate_id: Option<EntityId>,
}

/// A named time-of-day interval, in venue local time.
///
/// Times are written `HH:MM` (seconds optional) in fixtures and tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealWindow {
    pub id: EntityId,
    pub restaurant_id: EntityId,
    pub name: String,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    pub is_active: bool,
}

impl MealWindow {
    /// Half-open: `start <= t < end`.
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start_time <= t && t < self.end_time
    }

    /// Reject windows that are empty or wrap past midnight.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.end_time <= self.start_time {
            return Err(CoreError::ValidationFailed {
                message: format!(
                    "meal window {} ({}) ends at {} which is not after its start {}; \
                     overnight windows are not supported",
                    self.id,
                    self.name,
                    self.end_time.format("%H:%M"),
                    self.start_time.format("%H:%M"),
                ),
            });
        }
        Ok(())
    }
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&t.format("%H:%M"))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}
