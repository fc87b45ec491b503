use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{OrderId, Reservation, ReservationQuery, Result, StockUnit};

/// One logical transaction against the reservation store.
///
/// Reads observe the unit's own staged writes. Nothing becomes visible to other
/// units until [`UnitOfWork::commit`] succeeds; dropping the unit aborts it.
/// Stock-unit locks taken through [`UnitOfWork::lock_stock_unit`] are held until
/// the unit commits, aborts or is dropped.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Acquires the exclusive lock for a stock unit.
    ///
    /// Blocks until the lock is free or the store's lock timeout elapses, in
    /// which case `LockTimeout` is returned. Re-locking a unit already held by
    /// this unit of work is a no-op.
    async fn lock_stock_unit(&mut self, unit: &StockUnit) -> Result<()>;

    /// Returns the records matching `query`, oldest first.
    async fn find(&mut self, query: &ReservationQuery) -> Result<Vec<Reservation>>;

    /// Inserts the record, or overwrites the stored record with the same ID.
    ///
    /// Overwriting a record that another unit changed in the meantime, or one
    /// that is no longer `Reserved`, fails with `Conflict` (at the latest on
    /// commit).
    async fn upsert(&mut self, reservation: &Reservation) -> Result<()>;

    /// Sums the quantity of `Reserved` records on `unit` whose expiry lies after
    /// `as_of`, skipping records owned by `exclude_order`.
    async fn sum_active_quantity(
        &mut self,
        unit: &StockUnit,
        exclude_order: Option<&OrderId>,
        as_of: DateTime<Utc>,
    ) -> Result<u64>;

    /// Makes every staged write visible atomically and releases held locks.
    async fn commit(self) -> Result<()>;
}

/// Core trait for reservation store implementations.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait ReservationStore: Send + Sync {
    type Unit: UnitOfWork;

    /// Starts a new unit of work.
    async fn begin(&self) -> Result<Self::Unit>;
}

/// Extension trait providing convenience methods for reservation stores.
#[async_trait]
pub trait ReservationStoreExt: ReservationStore {
    /// Runs a read-only query in a throwaway unit of work.
    async fn find(&self, query: ReservationQuery) -> Result<Vec<Reservation>> {
        let mut unit = self.begin().await?;
        unit.find(&query).await
    }

    /// Computes the active reserved quantity on a stock unit without locking it.
    async fn sum_active_quantity(
        &self,
        unit: &StockUnit,
        exclude_order: Option<&OrderId>,
        as_of: DateTime<Utc>,
    ) -> Result<u64> {
        let mut work = self.begin().await?;
        work.sum_active_quantity(unit, exclude_order, as_of).await
    }
}

// Blanket implementation for all ReservationStore implementations
impl<T: ReservationStore + ?Sized> ReservationStoreExt for T {}

/// On-hand and allocated counters of one stock unit, owned by the host's
/// inventory system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StockCounters {
    pub on_hand: i64,
    pub allocated: i64,
}

impl StockCounters {
    pub fn new(on_hand: i64, allocated: i64) -> Self {
        Self { on_hand, allocated }
    }
}

/// Read access to the host's stock counters.
#[async_trait]
pub trait StockSource: Send + Sync {
    /// Returns the counters for a stock unit, or `None` if the unit is unknown.
    async fn stock_counters(&self, unit: &StockUnit) -> Result<Option<StockCounters>>;
}
