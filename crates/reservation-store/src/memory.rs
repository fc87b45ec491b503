use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    OrderId, Reservation, ReservationId, ReservationQuery, ReservationStoreError, Result,
    StockUnit,
    store::{ReservationStore, StockCounters, StockSource, UnitOfWork},
};

/// Default upper bound on waiting for a stock-unit lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

type Table = Arc<RwLock<HashMap<ReservationId, Reservation>>>;
type LockRegistry = Arc<Mutex<HashMap<StockUnit, Arc<Mutex<()>>>>>;

/// In-memory reservation store for single-process deployments and tests.
///
/// Stock-unit locks are process-local mutexes keyed by (variant, location), so
/// this store gives no mutual exclusion across processes.
#[derive(Clone)]
pub struct InMemoryReservationStore {
    reservations: Table,
    locks: LockRegistry,
    lock_timeout: Duration,
}

impl Default for InMemoryReservationStore {
    fn default() -> Self {
        Self {
            reservations: Arc::default(),
            locks: Arc::default(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

impl InMemoryReservationStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long a unit of work waits for a stock-unit lock.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Returns the total number of stored reservations, in any status.
    pub async fn reservation_count(&self) -> usize {
        self.reservations.read().await.len()
    }

    /// Returns a committed reservation by ID.
    pub async fn get(&self, id: ReservationId) -> Option<Reservation> {
        self.reservations.read().await.get(&id).cloned()
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    type Unit = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork> {
        Ok(InMemoryUnitOfWork {
            reservations: Arc::clone(&self.reservations),
            locks: Arc::clone(&self.locks),
            lock_timeout: self.lock_timeout,
            held: Vec::new(),
            observed: HashMap::new(),
            staged: Vec::new(),
        })
    }
}

/// A unit of work over [`InMemoryReservationStore`].
///
/// Writes are staged locally. On commit every staged record is checked against
/// the version this unit observed (or, for records it never read, against the
/// `Reserved` status) and the whole batch is applied under one write lock.
pub struct InMemoryUnitOfWork {
    reservations: Table,
    locks: LockRegistry,
    lock_timeout: Duration,
    held: Vec<(StockUnit, OwnedMutexGuard<()>)>,
    observed: HashMap<ReservationId, Reservation>,
    staged: Vec<Reservation>,
}

impl InMemoryUnitOfWork {
    /// Committed records overlaid with this unit's staged writes.
    async fn visible(&self) -> Vec<Reservation> {
        let table = self.reservations.read().await;
        let mut records: Vec<Reservation> = table
            .values()
            .filter(|r| !self.staged.iter().any(|s| s.id == r.id))
            .cloned()
            .collect();
        drop(table);

        records.extend(self.staged.iter().cloned());
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.id.as_uuid().cmp(&b.id.as_uuid()))
        });
        records
    }

    fn check_write(
        &self,
        table: &HashMap<ReservationId, Reservation>,
        record: &Reservation,
    ) -> Result<()> {
        // Same rule as the CHECK constraint on the PostgreSQL table.
        if record.quantity == 0 {
            return Err(ReservationStoreError::InvalidRecord(format!(
                "reservation {} has quantity 0",
                record.id
            )));
        }

        match (table.get(&record.id), self.observed.get(&record.id)) {
            (Some(stored), Some(seen)) if stored != seen => Err(ReservationStoreError::Conflict {
                reservation_id: record.id,
            }),
            (Some(stored), None) if !stored.is_active() => Err(ReservationStoreError::Conflict {
                reservation_id: record.id,
            }),
            (Some(_), _) => Ok(()),
            (None, _) => {
                let duplicate = record.is_active()
                    && table.values().any(|r| {
                        r.is_active()
                            && r.id != record.id
                            && r.order_id == record.order_id
                            && r.holds(&record.stock_unit())
                    });
                if duplicate {
                    Err(ReservationStoreError::ActiveLineExists {
                        order_id: record.order_id.clone(),
                        unit: record.stock_unit(),
                    })
                } else {
                    Ok(())
                }
            }
        }
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn lock_stock_unit(&mut self, unit: &StockUnit) -> Result<()> {
        if self.held.iter().any(|(held, _)| held == unit) {
            return Ok(());
        }

        let mutex = {
            let mut registry = self.locks.lock().await;
            // Guards and waiters each own a clone; a lone entry is idle.
            registry.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(registry.entry(unit.clone()).or_default())
        };

        let guard = tokio::time::timeout(self.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| ReservationStoreError::LockTimeout { unit: unit.clone() })?;

        tracing::trace!(%unit, "stock unit locked");
        self.held.push((unit.clone(), guard));
        Ok(())
    }

    async fn find(&mut self, query: &ReservationQuery) -> Result<Vec<Reservation>> {
        let matching: Vec<Reservation> = self
            .visible()
            .await
            .into_iter()
            .filter(|r| query.matches(r))
            .collect();

        for record in &matching {
            if !self.staged.iter().any(|s| s.id == record.id) {
                self.observed
                    .entry(record.id)
                    .or_insert_with(|| record.clone());
            }
        }

        Ok(matching)
    }

    async fn upsert(&mut self, reservation: &Reservation) -> Result<()> {
        match self.staged.iter_mut().find(|s| s.id == reservation.id) {
            Some(slot) => *slot = reservation.clone(),
            None => self.staged.push(reservation.clone()),
        }
        Ok(())
    }

    async fn sum_active_quantity(
        &mut self,
        unit: &StockUnit,
        exclude_order: Option<&OrderId>,
        as_of: DateTime<Utc>,
    ) -> Result<u64> {
        let total = self
            .visible()
            .await
            .iter()
            .filter(|r| r.holds(unit) && r.counts_against_stock_at(as_of))
            .filter(|r| exclude_order != Some(&r.order_id))
            .map(|r| u64::from(r.quantity))
            .sum();
        Ok(total)
    }

    async fn commit(self) -> Result<()> {
        let mut table = self.reservations.write().await;

        for record in &self.staged {
            self.check_write(&table, record)?;
        }

        for record in &self.staged {
            table.insert(record.id, record.clone());
        }

        tracing::trace!(writes = self.staged.len(), "unit of work committed");
        Ok(())
    }
}

/// In-memory stock counters, standing in for the host's inventory tables.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockSource {
    counters: Arc<RwLock<HashMap<StockUnit, StockCounters>>>,
}

impl InMemoryStockSource {
    /// Creates a new stock source with no known stock units.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or replaces) the counters of a stock unit.
    pub async fn set_counters(&self, unit: StockUnit, on_hand: i64, allocated: i64) {
        self.counters
            .write()
            .await
            .insert(unit, StockCounters::new(on_hand, allocated));
    }
}

#[async_trait]
impl StockSource for InMemoryStockSource {
    async fn stock_counters(&self, unit: &StockUnit) -> Result<Option<StockCounters>> {
        Ok(self.counters.read().await.get(unit).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReservationStatus;
    use chrono::Duration as ChronoDuration;

    fn unit() -> StockUnit {
        StockUnit::new("V1", "L1")
    }

    fn create_test_reservation(order: &str, quantity: u32, ttl: ChronoDuration) -> Reservation {
        let now = Utc::now();
        Reservation::new(OrderId::new(order), unit(), quantity, now + ttl, None, now)
    }

    async fn insert(store: &InMemoryReservationStore, reservation: &Reservation) {
        let mut work = store.begin().await.unwrap();
        work.upsert(reservation).await.unwrap();
        work.commit().await.unwrap();
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let store = InMemoryReservationStore::new();
        let r = create_test_reservation("A", 2, ChronoDuration::minutes(5));
        insert(&store, &r).await;

        assert_eq!(store.reservation_count().await, 1);
        assert_eq!(store.get(r.id).await, Some(r));
    }

    #[tokio::test]
    async fn dropped_unit_leaves_no_trace() {
        let store = InMemoryReservationStore::new();
        let r = create_test_reservation("A", 2, ChronoDuration::minutes(5));

        let mut work = store.begin().await.unwrap();
        work.upsert(&r).await.unwrap();
        let staged = work.find(&ReservationQuery::new()).await.unwrap();
        assert_eq!(staged.len(), 1);
        drop(work);

        assert_eq!(store.reservation_count().await, 0);
    }

    #[tokio::test]
    async fn sum_excludes_expired_terminal_and_excluded_order() {
        let store = InMemoryReservationStore::new();
        insert(&store, &create_test_reservation("A", 2, ChronoDuration::minutes(5))).await;
        insert(&store, &create_test_reservation("B", 3, ChronoDuration::minutes(5))).await;
        insert(&store, &create_test_reservation("C", 7, ChronoDuration::minutes(-1))).await;

        let mut released = create_test_reservation("D", 11, ChronoDuration::minutes(5));
        released
            .transition_to(ReservationStatus::Released, Utc::now())
            .unwrap();
        insert(&store, &released).await;

        let mut work = store.begin().await.unwrap();
        let now = Utc::now();
        assert_eq!(work.sum_active_quantity(&unit(), None, now).await.unwrap(), 5);
        assert_eq!(
            work.sum_active_quantity(&unit(), Some(&OrderId::new("A")), now)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            work.sum_active_quantity(&StockUnit::new("V2", "L1"), None, now)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn concurrent_modification_is_a_conflict() {
        let store = InMemoryReservationStore::new();
        let r = create_test_reservation("A", 2, ChronoDuration::minutes(5));
        insert(&store, &r).await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let mut a = first.find(&ReservationQuery::by_id(r.id)).await.unwrap().remove(0);
        let mut b = second.find(&ReservationQuery::by_id(r.id)).await.unwrap().remove(0);

        a.transition_to(ReservationStatus::Confirmed, Utc::now()).unwrap();
        first.upsert(&a).await.unwrap();
        first.commit().await.unwrap();

        b.transition_to(ReservationStatus::Released, Utc::now()).unwrap();
        second.upsert(&b).await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, ReservationStoreError::Conflict { .. }));

        let stored = store.get(r.id).await.unwrap();
        assert_eq!(stored.status, ReservationStatus::Confirmed);
    }

    #[tokio::test]
    async fn second_active_line_is_rejected() {
        let store = InMemoryReservationStore::new();
        insert(&store, &create_test_reservation("A", 2, ChronoDuration::minutes(5))).await;

        let mut work = store.begin().await.unwrap();
        work.upsert(&create_test_reservation("A", 4, ChronoDuration::minutes(5)))
            .await
            .unwrap();
        let err = work.commit().await.unwrap_err();
        assert!(matches!(err, ReservationStoreError::ActiveLineExists { .. }));
        assert_eq!(store.reservation_count().await, 1);
    }

    #[tokio::test]
    async fn stock_unit_lock_is_exclusive_until_unit_ends() {
        let store = InMemoryReservationStore::new().with_lock_timeout(Duration::from_millis(50));

        let mut first = store.begin().await.unwrap();
        first.lock_stock_unit(&unit()).await.unwrap();
        // re-entrant within the same unit
        first.lock_stock_unit(&unit()).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.lock_stock_unit(&unit()).await.unwrap_err();
        assert!(matches!(err, ReservationStoreError::LockTimeout { .. }));

        let mut other_unit = store.begin().await.unwrap();
        other_unit
            .lock_stock_unit(&StockUnit::new("V2", "L1"))
            .await
            .unwrap();

        drop(first);
        second.lock_stock_unit(&unit()).await.unwrap();
    }

    #[tokio::test]
    async fn idle_stock_unit_locks_are_pruned() {
        let store = InMemoryReservationStore::new().with_lock_timeout(Duration::from_millis(50));

        for variant in ["V1", "V2", "V3"] {
            let mut work = store.begin().await.unwrap();
            work.lock_stock_unit(&StockUnit::new(variant, "L1"))
                .await
                .unwrap();
        }
        assert!(store.locks.lock().await.len() <= 1);

        let mut held = store.begin().await.unwrap();
        held.lock_stock_unit(&unit()).await.unwrap();
        let mut other = store.begin().await.unwrap();
        other
            .lock_stock_unit(&StockUnit::new("V9", "L1"))
            .await
            .unwrap();

        // the held lock survives pruning and still excludes other units of work
        let registry_len = store.locks.lock().await.len();
        assert_eq!(registry_len, 2);
        let mut waiter = store.begin().await.unwrap();
        let err = waiter.lock_stock_unit(&unit()).await.unwrap_err();
        assert!(matches!(err, ReservationStoreError::LockTimeout { .. }));

        drop(held);
        drop(other);
        waiter.lock_stock_unit(&unit()).await.unwrap();
        assert_eq!(store.locks.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn zero_quantity_record_is_not_committed() {
        let store = InMemoryReservationStore::new();
        let r = create_test_reservation("A", 0, ChronoDuration::minutes(5));

        let mut work = store.begin().await.unwrap();
        work.upsert(&r).await.unwrap();
        let err = work.commit().await.unwrap_err();
        assert!(matches!(err, ReservationStoreError::InvalidRecord(_)));
        assert_eq!(store.reservation_count().await, 0);

        let mut live = create_test_reservation("B", 2, ChronoDuration::minutes(5));
        insert(&store, &live).await;
        let mut work = store.begin().await.unwrap();
        live = work.find(&ReservationQuery::by_id(live.id)).await.unwrap().remove(0);
        live.refresh(0, live.expires_at, Utc::now());
        work.upsert(&live).await.unwrap();
        assert!(matches!(
            work.commit().await.unwrap_err(),
            ReservationStoreError::InvalidRecord(_)
        ));
        assert_eq!(store.get(live.id).await.unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn stock_source_returns_none_for_unknown_units() {
        let source = InMemoryStockSource::new();
        source.set_counters(unit(), 10, 2).await;

        assert_eq!(
            source.stock_counters(&unit()).await.unwrap(),
            Some(StockCounters::new(10, 2))
        );
        assert!(
            source
                .stock_counters(&StockUnit::new("V9", "L1"))
                .await
                .unwrap()
                .is_none()
        );
    }
}
