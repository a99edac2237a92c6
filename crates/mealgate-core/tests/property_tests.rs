//! Property tests for the payload codec and the entitlement checks.
//!
//! Inputs are generated across id shapes (legacy strings and UUIDs),
//! sub-second timestamps, venue offsets and the full range of guest,
//! restaurant and usage states.
#![allow(clippy::unwrap_used)]

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use mealgate_core::token::{self, DecodeError, ScanPayload};
use mealgate_core::validator::{self, Decision, EvaluationInput};
use mealgate_core::{
    Card, CardToken, EntityId, ErrorCode, Guest, MealWindow, Restaurant, TokenClaims,
};
use proptest::prelude::*;
use uuid::Uuid;

// ── Strategies ──────────────────────────────────────────────────────

fn arb_id() -> impl Strategy<Value = EntityId> {
    prop_oneof![
        "[A-Za-z0-9_:.-]{1,24}".prop_map(EntityId::from),
        any::<u128>().prop_map(|n| EntityId::from(Uuid::from_u128(n))),
    ]
}

/// 1970 through 2099, nanosecond precision.
fn arb_instant() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..4_102_444_800, 0u32..1_000_000_000)
        .prop_map(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).unwrap())
}

fn arb_offset() -> impl Strategy<Value = FixedOffset> {
    (-12i32..=14).prop_map(|h| FixedOffset::east_opt(h * 3600).unwrap())
}

fn arb_claims() -> impl Strategy<Value = TokenClaims> {
    (
        arb_id(),
        arb_id(),
        arb_id(),
        proptest::collection::btree_set(arb_id(), 0..6),
        arb_instant(),
        arb_instant(),
        any::<u32>(),
    )
        .prop_map(
            |(card_id, guest_id, restaurant_id, meal_window_ids, valid_from, valid_to, max_usage)| {
                TokenClaims {
                    card_id,
                    guest_id,
                    restaurant_id,
                    meal_window_ids,
                    valid_from,
                    valid_to,
                    max_usage,
                }
            },
        )
}

fn small_id(prefix: &'static str) -> impl Strategy<Value = EntityId> {
    (1u8..=2).prop_map(move |n| EntityId::from(format!("{prefix}-{n}")))
}

fn arb_guest() -> impl Strategy<Value = Guest> {
    (
        small_id("guest"),
        small_id("rest"),
        any::<bool>(),
        proptest::option::of(arb_instant()),
    )
        .prop_map(|(id, restaurant_id, is_active, expired_date)| Guest {
            id,
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            room_number: None,
            is_active,
            check_in_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            check_out_date: NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(),
            expired_date,
            restaurant_id,
        })
}

fn arb_restaurant() -> impl Strategy<Value = Restaurant> {
    (small_id("rest"), any::<bool>()).prop_map(|(id, is_active)| Restaurant {
        id,
        name: "Main".into(),
        name_localized: None,
        is_active,
        gate_id: None,
    })
}

/// A same-day window of one to sixty minutes.
fn arb_window() -> impl Strategy<Value = MealWindow> {
    (
        small_id("window"),
        small_id("rest"),
        0u32..23,
        0u32..60,
        1i64..=60,
        any::<bool>(),
    )
        .prop_map(|(id, restaurant_id, h, m, len, is_active)| {
            let start_time = NaiveTime::from_hms_opt(h, m, 0).unwrap();
            MealWindow {
                id,
                restaurant_id,
                name: "Meal".into(),
                start_time,
                end_time: start_time + Duration::minutes(len),
                is_active,
            }
        })
}

/// Everything around a card that the checks after validity look at.
#[derive(Debug, Clone)]
struct Surroundings {
    guest: Option<Guest>,
    restaurant: Option<Restaurant>,
    windows: Vec<MealWindow>,
    station: Option<EntityId>,
    card_window: Option<EntityId>,
    usage_count: u32,
    max_usage: u32,
    /// `Some` scans a structured token naming this restaurant.
    token_restaurant: Option<EntityId>,
}

fn arb_surroundings() -> impl Strategy<Value = Surroundings> {
    (
        proptest::option::of(arb_guest()),
        proptest::option::of(arb_restaurant()),
        proptest::collection::vec(arb_window(), 0..4),
        proptest::option::of(small_id("rest")),
        proptest::option::of(small_id("window")),
        0u32..5,
        0u32..5,
        proptest::option::of(small_id("rest")),
    )
        .prop_map(
            |(guest, restaurant, windows, station, card_window, usage_count, max_usage, token_restaurant)| {
                Surroundings {
                    guest,
                    restaurant,
                    windows,
                    station,
                    card_window,
                    usage_count,
                    max_usage,
                    token_restaurant,
                }
            },
        )
}

fn payload_for(card: &Card, token_restaurant: Option<&EntityId>) -> ScanPayload {
    match token_restaurant {
        Some(restaurant) => {
            ScanPayload::Structured(CardToken::issue(CardToken::claims_for(card, restaurant.clone())))
        }
        None => ScanPayload::bare(&card.card_data),
    }
}

// ── Codec ───────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn issued_token_survives_encode_decode(claims in arb_claims()) {
        let issued = CardToken::issue(claims);
        let raw = token::encode(&issued).unwrap();
        prop_assert_eq!(token::decode(&raw).unwrap(), ScanPayload::Structured(issued));
    }

    #[test]
    fn changed_usage_cap_breaks_the_checksum(claims in arb_claims(), bump in 1u32..1000) {
        let mut issued = CardToken::issue(claims);
        issued.max_usage = issued.max_usage.wrapping_add(bump);
        let raw = serde_json::to_string(&issued).unwrap();
        prop_assert_eq!(token::decode(&raw), Err(DecodeError::ChecksumMismatch));
    }
}

// ── Validator ───────────────────────────────────────────────────────

proptest! {
    /// Disabled or missing cards are decided earlier, so the card here is
    /// present and active; everything else is arbitrary.
    #[test]
    fn scan_after_valid_to_is_expired(
        valid_to in arb_instant(),
        span_ms in 0i64..31_536_000_000,
        overdue_ms in 1i64..31_536_000_000,
        offset in arb_offset(),
        s in arb_surroundings(),
    ) {
        let card = Card {
            id: "card-1".into(),
            card_data: "QR-0001".into(),
            guest_id: "guest-1".into(),
            meal_window_id: s.card_window.clone(),
            is_active: true,
            usage_count: s.usage_count,
            max_usage: s.max_usage,
            valid_from: valid_to - Duration::milliseconds(span_ms),
            valid_to,
        };
        let payload = payload_for(&card, s.token_restaurant.as_ref());
        let now = (valid_to + Duration::milliseconds(overdue_ms)).with_timezone(&offset);

        let decision = validator::evaluate(
            &EvaluationInput {
                payload: &payload,
                card: Some(&card),
                guest: s.guest.as_ref(),
                restaurant: s.restaurant.as_ref(),
                meal_windows: &s.windows,
                station_restaurant: s.station.as_ref(),
            },
            now,
        );
        prop_assert_eq!(decision, Decision::deny(ErrorCode::CardExpired));
    }

    #[test]
    fn fully_entitled_scan_is_allowed(
        day in 0i64..20_000,
        window in arb_window(),
        into_window in 0i64..60,
        offset in arb_offset(),
        before_ms in 0i64..31_536_000_000,
        after_ms in 0i64..31_536_000_000,
        checkout_ms in proptest::option::of(1i64..31_536_000_000),
        (usage_count, max_usage) in (1u32..10).prop_flat_map(|max| (0..max, Just(max))),
        restrict_to_window in any::<bool>(),
        bind_station in any::<bool>(),
        use_token in any::<bool>(),
    ) {
        let restaurant_id = window.restaurant_id.clone();
        let window = MealWindow { is_active: true, ..window };
        let length = (window.end_time - window.start_time).num_minutes();
        let local = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap().and_time(window.start_time)
            + Duration::days(day)
            + Duration::minutes(into_window % length);
        let now = offset.from_local_datetime(&local).single().unwrap();
        let now_utc = now.with_timezone(&Utc);

        let card = Card {
            id: "card-1".into(),
            card_data: "QR-0001".into(),
            guest_id: "guest-1".into(),
            meal_window_id: restrict_to_window.then(|| window.id.clone()),
            is_active: true,
            usage_count,
            max_usage,
            valid_from: now_utc - Duration::milliseconds(before_ms),
            valid_to: now_utc + Duration::milliseconds(after_ms),
        };
        let guest = Guest {
            id: "guest-1".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            room_number: None,
            is_active: true,
            check_in_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            check_out_date: NaiveDate::from_ymd_opt(2024, 1, 20).unwrap(),
            expired_date: checkout_ms.map(|ms| now_utc + Duration::milliseconds(ms)),
            restaurant_id: restaurant_id.clone(),
        };
        let restaurant = Restaurant {
            id: restaurant_id.clone(),
            name: "Main".into(),
            name_localized: None,
            is_active: true,
            gate_id: None,
        };
        let payload = payload_for(&card, use_token.then_some(&restaurant_id));
        let station = bind_station.then(|| restaurant_id.clone());
        let windows = [window];

        let decision = validator::evaluate(
            &EvaluationInput {
                payload: &payload,
                card: Some(&card),
                guest: Some(&guest),
                restaurant: Some(&restaurant),
                meal_windows: &windows,
                station_restaurant: station.as_ref(),
            },
            now,
        );
        prop_assert_eq!(decision, Decision::allow());
    }
}
