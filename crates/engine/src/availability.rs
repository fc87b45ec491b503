//! Sellable quantity of a stock unit.

use chrono::{DateTime, Utc};
use common::{OrderId, StockUnit};
use reservation_store::{StockCounters, StockSource, UnitOfWork};

use crate::error::{ReservationError, Result};

/// Derives available stock from the stock source and unexpired holds.
///
/// `available = on_hand - allocated - reserved`, where `reserved` sums the
/// `Reserved` records on the unit whose expiry lies after `now`. Records past
/// their expiry stop counting immediately, whether or not a sweep has run.
pub struct AvailabilityCalculator<K: StockSource> {
    stock: K,
}

impl<K: StockSource> AvailabilityCalculator<K> {
    pub fn new(stock: K) -> Self {
        Self { stock }
    }

    /// Computes availability within `work`, optionally ignoring the holds of
    /// `exclude_order` so an order can resize its own reservation.
    pub async fn available_stock<U: UnitOfWork>(
        &self,
        work: &mut U,
        unit: &StockUnit,
        exclude_order: Option<&OrderId>,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let counters = self
            .stock
            .stock_counters(unit)
            .await?
            .ok_or_else(|| ReservationError::StockUnitNotFound(unit.clone()))?;

        let reserved = work.sum_active_quantity(unit, exclude_order, now).await?;
        let available = available_quantity(counters, reserved);

        tracing::debug!(
            %unit,
            on_hand = counters.on_hand,
            allocated = counters.allocated,
            reserved,
            available,
            "computed available stock"
        );

        Ok(available)
    }
}

/// Applies the availability formula, clamping inconsistent counters to zero.
pub fn available_quantity(counters: StockCounters, reserved: u64) -> u64 {
    let reserved = i64::try_from(reserved).unwrap_or(i64::MAX);
    let available = counters
        .on_hand
        .saturating_sub(counters.allocated)
        .saturating_sub(reserved);
    u64::try_from(available).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use reservation_store::{
        InMemoryReservationStore, InMemoryStockSource, Reservation, ReservationStore,
    };

    #[test]
    fn formula_subtracts_allocated_and_reserved() {
        assert_eq!(available_quantity(StockCounters::new(10, 2), 5), 3);
        assert_eq!(available_quantity(StockCounters::new(10, 2), 0), 8);
    }

    #[test]
    fn formula_clamps_at_zero() {
        assert_eq!(available_quantity(StockCounters::new(3, 5), 0), 0);
        assert_eq!(available_quantity(StockCounters::new(10, 2), 20), 0);
        assert_eq!(available_quantity(StockCounters::new(10, 0), u64::MAX), 0);
    }

    #[tokio::test]
    async fn excluded_order_does_not_reduce_availability() {
        let unit = StockUnit::new("V", "L");
        let stock = InMemoryStockSource::new();
        stock.set_counters(unit.clone(), 10, 2).await;
        let store = InMemoryReservationStore::new();

        let now = Utc::now();
        let mut work = store.begin().await.unwrap();
        work.upsert(&Reservation::new(
            OrderId::new("A"),
            unit.clone(),
            5,
            now + Duration::minutes(15),
            None,
            now,
        ))
        .await
        .unwrap();
        work.commit().await.unwrap();

        let calculator = AvailabilityCalculator::new(stock);
        let mut work = store.begin().await.unwrap();
        assert_eq!(
            calculator
                .available_stock(&mut work, &unit, None, now)
                .await
                .unwrap(),
            3
        );
        assert_eq!(
            calculator
                .available_stock(&mut work, &unit, Some(&OrderId::new("A")), now)
                .await
                .unwrap(),
            8
        );
    }

    #[tokio::test]
    async fn unknown_unit_is_not_found() {
        let calculator = AvailabilityCalculator::new(InMemoryStockSource::new());
        let store = InMemoryReservationStore::new();
        let mut work = store.begin().await.unwrap();

        let err = calculator
            .available_stock(&mut work, &StockUnit::new("nope", "L"), None, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ReservationError::StockUnitNotFound(_)));
    }
}
