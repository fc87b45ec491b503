//! Reservation engine: holds, extensions, confirmations and releases.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use common::{ChannelId, OrderId, StockUnit};
use reservation_store::{
    Reservation, ReservationQuery, ReservationStatus, ReservationStore, ReservationStoreExt,
    StockSource, UnitOfWork,
};

use crate::availability::AvailabilityCalculator;
use crate::config::ReservationConfig;
use crate::error::{ReservationError, Result};

/// Request to hold stock for one order line.
#[derive(Debug, Clone)]
pub struct HoldRequest {
    pub order_id: OrderId,
    pub unit: StockUnit,
    pub quantity: u32,
    /// Hold lifetime; the configured reservation TTL when `None`.
    pub ttl: Option<Duration>,
    pub channel_id: Option<ChannelId>,
}

impl HoldRequest {
    pub fn new(order_id: impl Into<OrderId>, unit: StockUnit, quantity: u32) -> Self {
        Self {
            order_id: order_id.into(),
            unit,
            quantity,
            ttl: None,
            channel_id: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn in_channel(mut self, channel_id: impl Into<ChannelId>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }
}

/// Orchestrates reservation changes under concurrency control.
///
/// Every operation runs in one unit of work of the store: it either commits
/// fully or leaves no trace. Holds additionally take the exclusive lock of their
/// stock unit before reading availability and keep it until the write commits,
/// which serializes competing holds on the same unit.
pub struct ReservationEngine<S, K>
where
    S: ReservationStore,
    K: StockSource,
{
    store: S,
    calculator: AvailabilityCalculator<K>,
    config: ReservationConfig,
}

impl<S, K> ReservationEngine<S, K>
where
    S: ReservationStore,
    K: StockSource,
{
    /// Creates a new reservation engine.
    pub fn new(store: S, stock: K, config: ReservationConfig) -> Self {
        Self {
            store,
            calculator: AvailabilityCalculator::new(stock),
            config,
        }
    }

    pub fn config(&self) -> &ReservationConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Creates or resizes the hold of an order on a stock unit.
    ///
    /// Availability is computed as if the order's own existing hold did not
    /// exist, so resizing never needs a prior release. Fails with
    /// `InsufficientStock` (and writes nothing) when the requested quantity
    /// exceeds it.
    #[tracing::instrument(
        skip(self, request),
        fields(order_id = %request.order_id, unit = %request.unit, quantity = request.quantity)
    )]
    pub async fn hold(&self, request: HoldRequest) -> Result<Reservation> {
        if request.quantity == 0 {
            return Err(ReservationError::InvalidQuantity {
                quantity: request.quantity,
            });
        }
        let ttl = request.ttl.unwrap_or(self.config.reservation_ttl);

        let started = Instant::now();
        let mut work = self.store.begin().await?;
        work.lock_stock_unit(&request.unit).await?;

        let now = Utc::now();
        let available = self
            .calculator
            .available_stock(&mut work, &request.unit, Some(&request.order_id), now)
            .await?;

        if u64::from(request.quantity) > available {
            metrics::counter!("reservations_insufficient_stock_total").increment(1);
            tracing::info!(available, "insufficient stock for reservation");
            return Err(ReservationError::InsufficientStock {
                variant_id: request.unit.variant_id,
                location_id: request.unit.location_id,
                requested: request.quantity,
                available,
            });
        }

        let expires_at = expiry_after(now, ttl)?;
        let existing = work
            .find(
                &ReservationQuery::active_line(request.order_id.clone(), request.unit.clone())
                    .for_update(),
            )
            .await?
            .into_iter()
            .next();

        let reservation = match existing {
            Some(mut reservation) => {
                reservation.refresh(request.quantity, expires_at, now);
                tracing::debug!(reservation_id = %reservation.id, "updated reservation");
                reservation
            }
            None => {
                let reservation = Reservation::new(
                    request.order_id,
                    request.unit,
                    request.quantity,
                    expires_at,
                    request.channel_id,
                    now,
                );
                tracing::debug!(reservation_id = %reservation.id, "created reservation");
                reservation
            }
        };

        work.upsert(&reservation).await?;
        work.commit().await?;

        metrics::counter!("reservations_held_total").increment(1);
        metrics::histogram!("reservation_hold_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        Ok(reservation)
    }

    /// Marks every active hold of the order as confirmed. Returns how many
    /// records changed; a repeated call finds nothing and returns 0.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm(&self, order_id: &OrderId) -> Result<usize> {
        let count = self
            .finish_order(order_id, ReservationStatus::Confirmed)
            .await?;
        metrics::counter!("reservations_confirmed_total").increment(count as u64);
        Ok(count)
    }

    /// Releases every active hold of the order. Returns how many records
    /// changed; a repeated call finds nothing and returns 0.
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn release(&self, order_id: &OrderId) -> Result<usize> {
        let count = self
            .finish_order(order_id, ReservationStatus::Released)
            .await?;
        metrics::counter!("reservations_released_total").increment(count as u64);
        Ok(count)
    }

    /// Releases the active hold of a single order line, e.g. when the line is
    /// removed from the cart. Returns whether a hold was found.
    #[tracing::instrument(skip(self), fields(order_id = %order_id, unit = %unit))]
    pub async fn release_line(&self, order_id: &OrderId, unit: &StockUnit) -> Result<bool> {
        let mut work = self.store.begin().await?;
        work.lock_stock_unit(unit).await?;

        let Some(mut reservation) = work
            .find(&ReservationQuery::active_line(order_id.clone(), unit.clone()).for_update())
            .await?
            .into_iter()
            .next()
        else {
            return Ok(false);
        };

        reservation.transition_to(ReservationStatus::Released, Utc::now())?;
        work.upsert(&reservation).await?;
        work.commit().await?;

        metrics::counter!("reservations_released_total").increment(1);
        tracing::debug!(reservation_id = %reservation.id, "released reservation line");
        Ok(true)
    }

    /// Resets the expiry of an active hold to `now + ttl`, keeping its quantity.
    /// Returns false, and creates nothing, when the line has no active hold.
    #[tracing::instrument(skip(self), fields(order_id = %order_id, unit = %unit))]
    pub async fn extend(&self, order_id: &OrderId, unit: &StockUnit, ttl: Duration) -> Result<bool> {
        let mut work = self.store.begin().await?;
        work.lock_stock_unit(unit).await?;

        let Some(mut reservation) = work
            .find(&ReservationQuery::active_line(order_id.clone(), unit.clone()).for_update())
            .await?
            .into_iter()
            .next()
        else {
            return Ok(false);
        };

        let now = Utc::now();
        reservation.extend_until(expiry_after(now, ttl)?, now);
        work.upsert(&reservation).await?;
        work.commit().await?;

        tracing::debug!(
            reservation_id = %reservation.id,
            expires_at = %reservation.expires_at,
            "extended reservation"
        );
        Ok(true)
    }

    /// Returns the active holds of an order. Read-only, takes no locks.
    pub async fn list_active(&self, order_id: &OrderId) -> Result<Vec<Reservation>> {
        Ok(self
            .store
            .find(ReservationQuery::active_for_order(order_id.clone()))
            .await?)
    }

    /// Returns the current availability of a stock unit, optionally ignoring
    /// the holds of one order. Read-only, takes no locks.
    pub async fn available_stock(
        &self,
        unit: &StockUnit,
        exclude_order: Option<&OrderId>,
    ) -> Result<u64> {
        let mut work = self.store.begin().await?;
        self.calculator
            .available_stock(&mut work, unit, exclude_order, Utc::now())
            .await
    }

    async fn finish_order(&self, order_id: &OrderId, next: ReservationStatus) -> Result<usize> {
        let mut work = self.store.begin().await?;
        let now = Utc::now();

        let active = work
            .find(&ReservationQuery::active_for_order(order_id.clone()).for_update())
            .await?;
        let count = active.len();

        for mut reservation in active {
            reservation.transition_to(next, now)?;
            work.upsert(&reservation).await?;
            tracing::debug!(reservation_id = %reservation.id, status = %next, "reservation finished");
        }

        work.commit().await?;
        Ok(count)
    }
}

/// `now + ttl`, or `InvalidTtl` when the result is not a representable timestamp.
fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|offset| now.checked_add_signed(offset))
        .ok_or(ReservationError::InvalidTtl(ttl))
}
