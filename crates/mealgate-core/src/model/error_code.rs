// ── Decision vocabulary ──
//
// Stable identifiers shared by API responses, field UIs and the audit log.
// Renaming a variant is a breaking change for every scanner station.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Tri-state outcome of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Every check passed and usage was committed.
    Allow,
    /// Identity or authorization failure, or an infrastructure fault.
    Deny,
    /// Right card, wrong time or over its limit.
    Warn,
}

/// How staff should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    Authorization,
    Entitlement,
    Infrastructure,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ErrorCode {
    CardNotFound,
    CardExpired,
    CardDisabled,
    GuestInactive,
    GuestCheckout,
    MealLimitExceeded,
    OutsideMealTime,
    RestaurantNotFound,
    GateNotFound,
    GateOffline,
    GateTimeout,
    SystemError,
}

impl ErrorCode {
    pub fn class(self) -> ErrorClass {
        match self {
            Self::CardNotFound
            | Self::CardExpired
            | Self::CardDisabled
            | Self::GuestInactive
            | Self::GuestCheckout
            | Self::RestaurantNotFound => ErrorClass::Authorization,
            Self::MealLimitExceeded | Self::OutsideMealTime => ErrorClass::Entitlement,
            Self::GateNotFound | Self::GateOffline | Self::GateTimeout | Self::SystemError => {
                ErrorClass::Infrastructure
            }
        }
    }

    /// Outcome a scan carries when it fails with this code.
    pub fn outcome(self) -> Outcome {
        match self.class() {
            ErrorClass::Entitlement => Outcome::Warn,
            ErrorClass::Authorization | ErrorClass::Infrastructure => Outcome::Deny,
        }
    }

    /// English text shown when no localized override is configured.
    pub fn default_message(self) -> &'static str {
        match self {
            Self::CardNotFound => "Card not recognized",
            Self::CardExpired => "Card is outside its validity period",
            Self::CardDisabled => "Card has been disabled",
            Self::GuestInactive => "Guest is not active",
            Self::GuestCheckout => "Guest has checked out",
            Self::MealLimitExceeded => "Meal limit reached for this card",
            Self::OutsideMealTime => "Outside meal service hours",
            Self::RestaurantNotFound => "Card is not valid at this restaurant",
            Self::GateNotFound => "Gate not found",
            Self::GateOffline => "Gate is offline",
            Self::GateTimeout => "Gate did not respond in time",
            Self::SystemError => "System error, please contact staff",
        }
    }
}
