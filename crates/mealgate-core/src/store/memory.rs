// ── In-memory repository ──
//
// DashMap-backed storage for the CLI, demos and tests. Cards resolve by
// id first, then by the raw data printed on them.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{EntityRepository, ScanSnapshot};
use crate::error::CoreError;
use crate::model::{Card, EntityId, GateConfig, Guest, MealWindow, Restaurant, StationId};
use crate::token::ScanPayload;

/// Serialized seed data, e.g. a `venue.json` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Fixture {
    pub cards: Vec<Card>,
    pub guests: Vec<Guest>,
    pub restaurants: Vec<Restaurant>,
    pub meal_windows: Vec<MealWindow>,
    pub gates: Vec<GateConfig>,
    /// Station id -> restaurant id.
    pub stations: BTreeMap<StationId, EntityId>,
}

#[derive(Default)]
pub struct MemoryRepository {
    cards: DashMap<EntityId, Card>,
    /// card_data -> card id
    card_data: DashMap<String, EntityId>,
    guests: DashMap<EntityId, Guest>,
    restaurants: DashMap<EntityId, Restaurant>,
    meal_windows: DashMap<EntityId, MealWindow>,
    gates: DashMap<EntityId, GateConfig>,
    stations: DashMap<StationId, EntityId>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fixture(fixture: Fixture) -> Result<Self, CoreError> {
        let repo = Self::new();
        for w in fixture.meal_windows {
            repo.upsert_meal_window(w)?;
        }
        for c in fixture.cards {
            repo.upsert_card(c)?;
        }
        for g in fixture.guests {
            repo.upsert_guest(g);
        }
        for r in fixture.restaurants {
            repo.upsert_restaurant(r);
        }
        for g in fixture.gates {
            repo.upsert_gate(g);
        }
        for (station, restaurant) in fixture.stations {
            repo.bind_station(station, restaurant);
        }
        debug!(
            cards = repo.cards.len(),
            guests = repo.guests.len(),
            restaurants = repo.restaurants.len(),
            gates = repo.gates.len(),
            "fixture loaded"
        );
        Ok(repo)
    }

    /// Read a JSON fixture file.
    pub async fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CoreError::Repository {
                message: format!("cannot read {}: {e}", path.display()),
            })?;
        let fixture: Fixture = serde_json::from_str(&raw)?;
        Self::from_fixture(fixture)
    }

    /// Dump the current contents back into fixture form.
    pub fn to_fixture(&self) -> Fixture {
        fn values<K: std::hash::Hash + Eq, V: Clone>(map: &DashMap<K, V>) -> Vec<V> {
            map.iter().map(|r| r.value().clone()).collect()
        }
        Fixture {
            cards: values(&self.cards),
            guests: values(&self.guests),
            restaurants: values(&self.restaurants),
            meal_windows: values(&self.meal_windows),
            gates: values(&self.gates),
            stations: self
                .stations
                .iter()
                .map(|r| (r.key().clone(), r.value().clone()))
                .collect(),
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    pub fn upsert_card(&self, card: Card) -> Result<(), CoreError> {
        if card.usage_count > card.max_usage {
            return Err(CoreError::ValidationFailed {
                message: format!(
                    "card {} has usage {} above its maximum {}",
                    card.id, card.usage_count, card.max_usage
                ),
            });
        }
        if let Some(old) = self.cards.get(&card.id) {
            if old.card_data != card.card_data {
                self.card_data.remove(&old.card_data);
            }
        }
        self.card_data.insert(card.card_data.clone(), card.id.clone());
        self.cards.insert(card.id.clone(), card);
        Ok(())
    }

    pub fn upsert_guest(&self, guest: Guest) {
        self.guests.insert(guest.id.clone(), guest);
    }

    pub fn upsert_restaurant(&self, restaurant: Restaurant) {
        self.restaurants.insert(restaurant.id.clone(), restaurant);
    }

    /// Overnight windows are refused.
    pub fn upsert_meal_window(&self, window: MealWindow) -> Result<(), CoreError> {
        window.validate()?;
        self.meal_windows.insert(window.id.clone(), window);
        Ok(())
    }

    pub fn upsert_gate(&self, gate: GateConfig) {
        self.gates.insert(gate.id.clone(), gate);
    }

    pub fn bind_station(&self, station: StationId, restaurant: EntityId) {
        self.stations.insert(station, restaurant);
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn card(&self, key: &EntityId) -> Option<Card> {
        if let Some(card) = self.cards.get(key) {
            return Some(card.clone());
        }
        self.card_by_data(&key.to_string())
    }

    /// Card whose printed data is exactly `data`.
    pub fn card_by_data(&self, data: &str) -> Option<Card> {
        let id = self.card_data.get(data)?.value().clone();
        self.cards.get(&id).map(|c| c.clone())
    }

    pub fn guest(&self, id: &EntityId) -> Option<Guest> {
        self.guests.get(id).map(|g| g.clone())
    }

    pub fn restaurant(&self, id: &EntityId) -> Option<Restaurant> {
        self.restaurants.get(id).map(|r| r.clone())
    }

    pub fn restaurants(&self) -> Vec<Restaurant> {
        self.restaurants.iter().map(|r| r.value().clone()).collect()
    }

    fn windows_of(&self, restaurant: &EntityId) -> Vec<MealWindow> {
        let mut windows: Vec<MealWindow> = self
            .meal_windows
            .iter()
            .filter(|w| w.restaurant_id == *restaurant)
            .map(|w| w.value().clone())
            .collect();
        windows.sort_by_key(|w| w.start_time);
        windows
    }
}

#[async_trait]
impl EntityRepository for MemoryRepository {
    async fn load_scan_snapshot(&self, payload: &ScanPayload) -> Result<ScanSnapshot, CoreError> {
        let card = match payload {
            ScanPayload::LegacyBareId { id, raw } => self
                .cards
                .get(id)
                .map(|c| c.clone())
                .or_else(|| self.card_by_data(raw)),
            ScanPayload::Structured(token) => self.card(&token.card_id),
        };
        let guest = card.as_ref().and_then(|c| self.guest(&c.guest_id));
        let restaurant_id = match payload {
            ScanPayload::Structured(token) => Some(token.restaurant_id.clone()),
            ScanPayload::LegacyBareId { .. } => guest.as_ref().map(|g| g.restaurant_id.clone()),
        };
        let restaurant = restaurant_id.as_ref().and_then(|id| self.restaurant(id));
        let meal_windows = restaurant_id
            .as_ref()
            .map(|id| self.windows_of(id))
            .unwrap_or_default();
        Ok(ScanSnapshot {
            card,
            guest,
            restaurant,
            meal_windows,
        })
    }

    async fn station_restaurant(&self, station: &StationId) -> Result<Option<EntityId>, CoreError> {
        Ok(self.stations.get(station).map(|r| r.value().clone()))
    }

    async fn card_usage(&self, card_id: &EntityId) -> Result<Option<(u32, u32)>, CoreError> {
        Ok(self
            .cards
            .get(card_id)
            .map(|c| (c.usage_count, c.max_usage)))
    }

    async fn compare_and_set_usage(
        &self,
        card_id: &EntityId,
        expected: u32,
        new: u32,
    ) -> Result<bool, CoreError> {
        let Some(mut card) = self.cards.get_mut(card_id) else {
            return Ok(false);
        };
        if card.usage_count != expected || new > card.max_usage {
            return Ok(false);
        }
        card.usage_count = new;
        Ok(true)
    }

    async fn gate_configs(&self) -> Result<Vec<GateConfig>, CoreError> {
        let mut gates: Vec<GateConfig> = self.gates.iter().map(|g| g.value().clone()).collect();
        gates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(gates)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixture() -> Fixture {
        serde_json::from_value(json!({
            "cards": [{
                "id": "card-1", "cardData": "QR-0001", "guestId": "guest-1",
                "isActive": true, "usageCount": 0, "maxUsage": 2,
                "validFrom": "2024-01-01T00:00:00Z", "validTo": "2024-01-20T23:59:59Z"
            }],
            "guests": [{
                "id": "guest-1", "firstName": "Ada", "lastName": "Lovelace",
                "isActive": true, "checkInDate": "2024-01-01", "checkOutDate": "2024-01-20",
                "restaurantId": "rest-1"
            }],
            "restaurants": [{ "id": "rest-1", "name": "Main", "isActive": true }],
            "mealWindows": [{
                "id": "lunch", "restaurantId": "rest-1", "name": "Lunch",
                "startTime": "12:00", "endTime": "15:00", "isActive": true
            }],
            "stations": { "north-1": "rest-1" }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn card_resolves_by_card_data() {
        let repo = MemoryRepository::from_fixture(fixture()).unwrap();
        let snap = repo
            .load_scan_snapshot(&ScanPayload::bare("QR-0001"))
            .await
            .unwrap();
        assert_eq!(snap.card.unwrap().id, EntityId::from("card-1"));
        assert_eq!(snap.restaurant.unwrap().name, "Main");
        assert_eq!(snap.meal_windows.len(), 1);
    }

    #[tokio::test]
    async fn uuid_shaped_card_data_matches_as_scanned() {
        let mut f = fixture();
        f.cards[0].card_data = "550E8400-E29B-41D4-A716-446655440000".into();
        let mut second = f.cards[0].clone();
        second.id = "card-2".into();
        second.card_data = "550e8400e29b41d4a716446655440001".into();
        f.cards.push(second);
        let repo = MemoryRepository::from_fixture(f).unwrap();

        for (scanned, card_id) in [
            ("550E8400-E29B-41D4-A716-446655440000", "card-1"),
            ("550e8400e29b41d4a716446655440001", "card-2"),
        ] {
            let payload = crate::token::decode(scanned).unwrap();
            let snap = repo.load_scan_snapshot(&payload).await.unwrap();
            assert_eq!(snap.card.unwrap().id, EntityId::from(card_id), "{scanned}");
        }

        let lowered = ScanPayload::bare("550e8400-e29b-41d4-a716-446655440000");
        assert!(repo.load_scan_snapshot(&lowered).await.unwrap().card.is_none());
    }

    #[tokio::test]
    async fn compare_and_set_respects_expected_and_max() {
        let repo = MemoryRepository::from_fixture(fixture()).unwrap();
        let id = EntityId::from("card-1");
        assert!(!repo.compare_and_set_usage(&id, 1, 2).await.unwrap());
        assert!(repo.compare_and_set_usage(&id, 0, 1).await.unwrap());
        assert!(!repo.compare_and_set_usage(&id, 1, 3).await.unwrap());
        assert_eq!(repo.card_usage(&id).await.unwrap(), Some((1, 2)));
    }

    #[test]
    fn overnight_window_in_fixture_is_refused() {
        let mut f = fixture();
        f.meal_windows[0].end_time = chrono::NaiveTime::from_hms_opt(2, 0, 0).unwrap();
        assert!(matches!(
            MemoryRepository::from_fixture(f),
            Err(CoreError::ValidationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn stations_map_to_restaurants() {
        let repo = MemoryRepository::from_fixture(fixture()).unwrap();
        assert_eq!(
            repo.station_restaurant(&"north-1".into()).await.unwrap(),
            Some(EntityId::from("rest-1"))
        );
        assert_eq!(repo.station_restaurant(&"south-9".into()).await.unwrap(), None);
    }
}
