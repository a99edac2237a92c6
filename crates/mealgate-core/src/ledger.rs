//! Per-card usage accounting.
//!
//! Two layers keep `usage_count <= max_usage` under concurrent scans:
//!
//! 1. In process, a lock table serializes every consume of the same card,
//!    so read-check-write runs once at a time per card id.
//! 2. Across processes, the write is a compare-and-set against the stored
//!    count; a lost race re-reads and re-checks the bound.
//!
//! The bound is always re-checked here, at commit time, regardless of what
//! the validator saw.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::EntityId;
use crate::store::EntityRepository;

/// Result of one consume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    Consumed { usage_count: u32, max_usage: u32 },
    LimitExceeded,
    NotFound,
}

pub struct UsageLedger {
    repository: Arc<dyn EntityRepository>,
    locks: DashMap<EntityId, Arc<Mutex<()>>>,
    max_conflict_retries: u32,
}

impl UsageLedger {
    pub fn new(repository: Arc<dyn EntityRepository>, max_conflict_retries: u32) -> Self {
        Self {
            repository,
            locks: DashMap::new(),
            max_conflict_retries,
        }
    }

    /// Increment a card's usage if it is still below its maximum.
    ///
    /// The lock entry is pruned even when the caller drops this future
    /// mid-flight, e.g. on a scan timeout.
    pub async fn try_consume(&self, card_id: &EntityId) -> Result<Consumption, CoreError> {
        let entry = LockEntry {
            ledger: self,
            card_id,
            lock: self.lock_for(card_id),
        };
        let _guard = entry.lock.lock().await;
        self.commit(card_id).await
    }

    /// Number of cards with a lock entry (held or awaited).
    pub fn active_locks(&self) -> usize {
        self.locks.len()
    }

    fn lock_for(&self, card_id: &EntityId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(card_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    async fn commit(&self, card_id: &EntityId) -> Result<Consumption, CoreError> {
        let attempts = self.max_conflict_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let Some((usage, max)) = self.repository.card_usage(card_id).await? else {
                return Ok(Consumption::NotFound);
            };
            if usage >= max {
                debug!(%card_id, usage, max, "usage limit reached at commit");
                return Ok(Consumption::LimitExceeded);
            }
            let next = usage + 1;
            if self
                .repository
                .compare_and_set_usage(card_id, usage, next)
                .await?
            {
                debug!(%card_id, usage = next, max, "usage committed");
                return Ok(Consumption::Consumed {
                    usage_count: next,
                    max_usage: max,
                });
            }
            debug!(%card_id, attempt, "usage write conflicted, re-reading");
        }
        warn!(%card_id, attempts, "giving up on contended usage write");
        Err(CoreError::Conflict {
            card_id: card_id.clone(),
            attempts,
        })
    }
}

/// Holds one reference to a card's lock and prunes the table entry when
/// released.
struct LockEntry<'a> {
    ledger: &'a UsageLedger,
    card_id: &'a EntityId,
    lock: Arc<Mutex<()>>,
}

impl Drop for LockEntry<'_> {
    fn drop(&mut self) {
        // Only the table and this entry still reference the lock.
        self.ledger.locks.remove_if(self.card_id, |_, lock| {
            Arc::ptr_eq(lock, &self.lock) && Arc::strong_count(lock) == 2
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{Card, GateConfig, StationId};
    use crate::store::{MemoryRepository, ScanSnapshot};
    use crate::token::ScanPayload;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn card(max_usage: u32) -> Card {
        Card {
            id: "card-1".into(),
            card_data: "QR-0001".into(),
            guest_id: "guest-1".into(),
            meal_window_id: None,
            is_active: true,
            usage_count: 0,
            max_usage,
            valid_from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            valid_to: Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap(),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumes_of_single_use_card() {
        let repo = Arc::new(MemoryRepository::new());
        repo.upsert_card(card(1)).unwrap();
        let ledger = Arc::new(UsageLedger::new(repo.clone(), 5));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let ledger = Arc::clone(&ledger);
            tasks.push(tokio::spawn(async move {
                ledger.try_consume(&"card-1".into()).await.unwrap()
            }));
        }
        let mut consumed = 0;
        let mut exceeded = 0;
        for t in tasks {
            match t.await.unwrap() {
                Consumption::Consumed { usage_count, .. } => {
                    assert_eq!(usage_count, 1);
                    consumed += 1;
                }
                Consumption::LimitExceeded => exceeded += 1,
                Consumption::NotFound => panic!("card vanished"),
            }
        }
        assert_eq!((consumed, exceeded), (1, 15));
        assert_eq!(repo.card(&"card-1".into()).unwrap().usage_count, 1);
        assert_eq!(ledger.active_locks(), 0);
    }

    #[tokio::test]
    async fn unknown_card_is_not_found() {
        let ledger = UsageLedger::new(Arc::new(MemoryRepository::new()), 5);
        assert_eq!(
            ledger.try_consume(&"nope".into()).await.unwrap(),
            Consumption::NotFound
        );
    }

    /// Repository whose count is bumped by "another process" between our
    /// read and our write, `steal` times.
    struct Contended {
        inner: MemoryRepository,
        steal: AtomicU32,
    }

    #[async_trait]
    impl EntityRepository for Contended {
        async fn load_scan_snapshot(&self, p: &ScanPayload) -> Result<ScanSnapshot, CoreError> {
            self.inner.load_scan_snapshot(p).await
        }
        async fn station_restaurant(&self, s: &StationId) -> Result<Option<EntityId>, CoreError> {
            self.inner.station_restaurant(s).await
        }
        async fn card_usage(&self, id: &EntityId) -> Result<Option<(u32, u32)>, CoreError> {
            self.inner.card_usage(id).await
        }
        async fn compare_and_set_usage(
            &self,
            id: &EntityId,
            expected: u32,
            new: u32,
        ) -> Result<bool, CoreError> {
            if self.steal.load(Ordering::SeqCst) > 0 {
                self.steal.fetch_sub(1, Ordering::SeqCst);
                self.inner.compare_and_set_usage(id, expected, new).await?;
                return Ok(false);
            }
            self.inner.compare_and_set_usage(id, expected, new).await
        }
        async fn gate_configs(&self) -> Result<Vec<GateConfig>, CoreError> {
            self.inner.gate_configs().await
        }
    }

    /// Repository whose usage read never completes.
    struct Stalled(MemoryRepository);

    #[async_trait]
    impl EntityRepository for Stalled {
        async fn load_scan_snapshot(&self, p: &ScanPayload) -> Result<ScanSnapshot, CoreError> {
            self.0.load_scan_snapshot(p).await
        }
        async fn station_restaurant(&self, s: &StationId) -> Result<Option<EntityId>, CoreError> {
            self.0.station_restaurant(s).await
        }
        async fn card_usage(&self, _: &EntityId) -> Result<Option<(u32, u32)>, CoreError> {
            std::future::pending().await
        }
        async fn compare_and_set_usage(
            &self,
            id: &EntityId,
            expected: u32,
            new: u32,
        ) -> Result<bool, CoreError> {
            self.0.compare_and_set_usage(id, expected, new).await
        }
        async fn gate_configs(&self) -> Result<Vec<GateConfig>, CoreError> {
            self.0.gate_configs().await
        }
    }

    #[tokio::test]
    async fn timed_out_consume_releases_its_lock_entry() {
        let ledger = UsageLedger::new(Arc::new(Stalled(MemoryRepository::new())), 5);
        let card_id: EntityId = "card-1".into();
        let consume = ledger.try_consume(&card_id);
        let waited = tokio::time::timeout(std::time::Duration::from_millis(20), consume).await;
        assert!(waited.is_err());
        assert_eq!(ledger.active_locks(), 0);
    }

    #[tokio::test]
    async fn lost_write_rechecks_the_bound() {
        let inner = MemoryRepository::new();
        inner.upsert_card(card(1)).unwrap();
        let repo = Arc::new(Contended {
            inner,
            steal: AtomicU32::new(1),
        });
        let ledger = UsageLedger::new(repo, 5);
        // The stolen write used up the only meal.
        assert_eq!(
            ledger.try_consume(&"card-1".into()).await.unwrap(),
            Consumption::LimitExceeded
        );
    }

    #[tokio::test]
    async fn persistent_conflict_gives_up() {
        let inner = MemoryRepository::new();
        inner.upsert_card(card(100)).unwrap();
        let repo = Arc::new(Contended {
            inner,
            steal: AtomicU32::new(50),
        });
        let ledger = UsageLedger::new(repo, 2);
        let err = ledger.try_consume(&"card-1".into()).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict { attempts: 3, .. }));
    }
}
