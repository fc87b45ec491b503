use chrono::{DateTime, Utc};

use crate::{
    ChannelId, LocationId, OrderId, Reservation, ReservationId, ReservationStatus, StockUnit,
    VariantId,
};

/// Builder for constructing reservation queries.
///
/// Every field is an optional filter; an empty query matches all records.
#[derive(Debug, Clone, Default)]
pub struct ReservationQuery {
    /// Filter by reservation ID.
    pub reservation_id: Option<ReservationId>,

    /// Filter by owning order.
    pub order_id: Option<OrderId>,

    /// Filter by product variant.
    pub variant_id: Option<VariantId>,

    /// Filter by stock location.
    pub location_id: Option<LocationId>,

    /// Filter by status.
    pub status: Option<ReservationStatus>,

    /// Filter by channel.
    pub channel_id: Option<ChannelId>,

    /// Only records whose `expires_at` lies strictly before this instant.
    pub expired_before: Option<DateTime<Utc>>,

    /// Lock matched rows until the unit of work ends. Set on reads that are
    /// followed by a write of the same records.
    pub lock_rows: bool,
}

impl ReservationQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a single reservation.
    pub fn by_id(id: ReservationId) -> Self {
        Self {
            reservation_id: Some(id),
            ..Default::default()
        }
    }

    /// Creates a query for all reservations of an order.
    pub fn for_order(order_id: OrderId) -> Self {
        Self {
            order_id: Some(order_id),
            ..Default::default()
        }
    }

    /// Creates a query for the `Reserved` records of an order.
    pub fn active_for_order(order_id: OrderId) -> Self {
        Self::for_order(order_id).status(ReservationStatus::Reserved)
    }

    /// Creates a query for the `Reserved` record of one order line.
    pub fn active_line(order_id: OrderId, unit: StockUnit) -> Self {
        Self::active_for_order(order_id).stock_unit(unit)
    }

    /// Creates a query for `Reserved` records that expired before `now`.
    pub fn expired(now: DateTime<Utc>) -> Self {
        Self::new()
            .status(ReservationStatus::Reserved)
            .expired_before(now)
    }

    /// Filters by owning order.
    pub fn order_id(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    /// Filters by product variant.
    pub fn variant_id(mut self, variant_id: VariantId) -> Self {
        self.variant_id = Some(variant_id);
        self
    }

    /// Filters by stock location.
    pub fn location_id(mut self, location_id: LocationId) -> Self {
        self.location_id = Some(location_id);
        self
    }

    /// Filters by both halves of a stock unit.
    pub fn stock_unit(self, unit: StockUnit) -> Self {
        self.variant_id(unit.variant_id).location_id(unit.location_id)
    }

    /// Filters by status.
    pub fn status(mut self, status: ReservationStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filters by channel.
    pub fn channel_id(mut self, channel_id: ChannelId) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    /// Keeps only records that expired strictly before `instant`.
    pub fn expired_before(mut self, instant: DateTime<Utc>) -> Self {
        self.expired_before = Some(instant);
        self
    }

    /// Locks the matched rows for the rest of the unit of work.
    pub fn for_update(mut self) -> Self {
        self.lock_rows = true;
        self
    }

    /// Returns true if `reservation` satisfies every filter set on this query.
    pub fn matches(&self, reservation: &Reservation) -> bool {
        if let Some(id) = self.reservation_id
            && reservation.id != id
        {
            return false;
        }
        if let Some(ref order_id) = self.order_id
            && &reservation.order_id != order_id
        {
            return false;
        }
        if let Some(ref variant_id) = self.variant_id
            && &reservation.variant_id != variant_id
        {
            return false;
        }
        if let Some(ref location_id) = self.location_id
            && &reservation.location_id != location_id
        {
            return false;
        }
        if let Some(status) = self.status
            && reservation.status != status
        {
            return false;
        }
        if let Some(ref channel_id) = self.channel_id
            && reservation.channel_id.as_ref() != Some(channel_id)
        {
            return false;
        }
        if let Some(instant) = self.expired_before
            && !reservation.is_expired_at(instant)
        {
            return false;
        }
        true
    }
}
