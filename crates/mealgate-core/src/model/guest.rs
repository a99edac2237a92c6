use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::EntityId;

/// A hotel guest. Inactive guests, or guests past `expired_date`,
/// invalidate every card they hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Guest {
    pub id: EntityId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub room_number: Option<String>,
    pub is_active: bool,
    pub check_in_date: NaiveDate,
    pub check_out_date: NaiveDate,
    #[serde(default)]
    pub expired_date: Option<DateTime<Utc>>,
    pub restaurant_id: EntityId,
}

impl Guest {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// `true` once `now` reaches `expired_date`.
    pub fn has_checked_out<Tz: chrono::TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        self.expired_date.is_some_and(|expired| *now >= expired)
    }
}
