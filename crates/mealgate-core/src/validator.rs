//! Entitlement evaluation.
//!
//! [`evaluate`] is a pure function over one consistent snapshot of the
//! card, guest, restaurant and meal windows. It runs a fixed sequence of
//! checks and the first failing one decides the outcome:
//!
//! | # | check | failure |
//! |---|-------|---------|
//! | 1 | card exists (and matches the token's guest) | DENY `CARD_NOT_FOUND` |
//! | 2 | card active | DENY `CARD_DISABLED` |
//! | 3 | `valid_from <= now <= valid_to` | DENY `CARD_EXPIRED` |
//! | 4 | guest exists and active | DENY `GUEST_INACTIVE` |
//! | 5 | `now < guest.expired_date` | DENY `GUEST_CHECKOUT` |
//! | 6 | restaurant exists, active, and is the station's | DENY `RESTAURANT_NOT_FOUND` |
//! | 7 | inside an entitled, active meal window | WARN `OUTSIDE_MEAL_TIME` |
//! | 8 | `usage_count < max_usage` | WARN `MEAL_LIMIT_EXCEEDED` |
//!
//! Passing all eight yields ALLOW. The usage bound is checked again by the
//! ledger at commit time; this check only classifies.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::model::{Card, EntityId, ErrorCode, Guest, MealWindow, Outcome, Restaurant};
use crate::token::ScanPayload;

/// Everything one evaluation looks at.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInput<'a> {
    pub payload: &'a ScanPayload,
    pub card: Option<&'a Card>,
    pub guest: Option<&'a Guest>,
    pub restaurant: Option<&'a Restaurant>,
    /// Windows of `restaurant`; others are ignored.
    pub meal_windows: &'a [MealWindow],
    /// Restaurant the scanning station is bound to, if any.
    pub station_restaurant: Option<&'a EntityId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub outcome: Outcome,
    pub code: Option<ErrorCode>,
}

impl Decision {
    pub fn allow() -> Self {
        Self {
            outcome: Outcome::Allow,
            code: None,
        }
    }

    pub fn deny(code: ErrorCode) -> Self {
        Self {
            outcome: Outcome::Deny,
            code: Some(code),
        }
    }

    pub fn warn(code: ErrorCode) -> Self {
        Self {
            outcome: Outcome::Warn,
            code: Some(code),
        }
    }

    pub fn system_error() -> Self {
        Self::deny(ErrorCode::SystemError)
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }
}

/// Classify a scan. Never panics, never does I/O.
pub fn evaluate(input: &EvaluationInput<'_>, now: DateTime<FixedOffset>) -> Decision {
    match check(input, now) {
        Ok(()) => Decision::allow(),
        Err(code) => match code.outcome() {
            Outcome::Warn => Decision::warn(code),
            Outcome::Deny | Outcome::Allow => Decision::deny(code),
        },
    }
}

fn check(input: &EvaluationInput<'_>, now: DateTime<FixedOffset>) -> Result<(), ErrorCode> {
    let token = input.payload.token();

    // 1. identity
    let card = input.card.ok_or(ErrorCode::CardNotFound)?;
    if let Some(token) = token {
        if token.card_id != card.id || token.guest_id != card.guest_id {
            return Err(ErrorCode::CardNotFound);
        }
    }

    // 2–3. card status and validity
    if !card.is_active {
        return Err(ErrorCode::CardDisabled);
    }
    if !card.is_valid_at(&now) {
        return Err(ErrorCode::CardExpired);
    }

    // 4–5. guest
    let guest = input
        .guest
        .filter(|g| g.is_active && g.id == card.guest_id)
        .ok_or(ErrorCode::GuestInactive)?;
    if guest.has_checked_out(&now) {
        return Err(ErrorCode::GuestCheckout);
    }

    // 6. restaurant
    let restaurant = input
        .restaurant
        .filter(|r| r.is_active)
        .ok_or(ErrorCode::RestaurantNotFound)?;
    if input
        .station_restaurant
        .is_some_and(|expected| *expected != restaurant.id)
        || token.is_some_and(|t| t.restaurant_id != restaurant.id)
    {
        return Err(ErrorCode::RestaurantNotFound);
    }

    // 7. meal window
    let mut entitled: BTreeSet<&EntityId> = card.meal_window_id.iter().collect();
    if let Some(token) = token {
        entitled.extend(token.meal_window_ids.iter());
    }
    let time_of_day = now.time();
    let in_window = input.meal_windows.iter().any(|w| {
        w.is_active
            && w.restaurant_id == restaurant.id
            && (entitled.is_empty() || entitled.contains(&w.id))
            && w.contains(time_of_day)
    });
    if !in_window {
        return Err(ErrorCode::OutsideMealTime);
    }

    // 8. usage
    if !card.has_remaining_uses() {
        return Err(ErrorCode::MealLimitExceeded);
    }

    Ok(())
}
