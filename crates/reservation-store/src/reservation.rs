use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    ChannelId, LocationId, OrderId, ReservationId, ReservationStoreError, Result, StockUnit,
    VariantId,
};

/// The lifecycle status of a reservation.
///
/// ```text
/// Reserved ──┬──► Confirmed
///            └──► Released
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    /// Stock is held for an in-progress order.
    Reserved,

    /// Payment succeeded; the hold became a permanent allocation (terminal).
    Confirmed,

    /// The hold was cancelled or expired (terminal).
    Released,
}

impl ReservationStatus {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReservationStatus::Reserved)
    }

    /// Returns true if a record in this status may move to `next`.
    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        matches!(
            (self, next),
            (ReservationStatus::Reserved, ReservationStatus::Confirmed)
                | (ReservationStatus::Reserved, ReservationStatus::Released)
        )
    }

    /// Returns the persisted name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Reserved => "reserved",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Released => "released",
        }
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = ReservationStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "reserved" => Ok(ReservationStatus::Reserved),
            "confirmed" => Ok(ReservationStatus::Confirmed),
            "released" => Ok(ReservationStatus::Released),
            other => Err(ReservationStoreError::InvalidRecord(format!(
                "unknown reservation status '{other}'"
            ))),
        }
    }
}

/// A provisional hold of `quantity` units of one stock unit for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub order_id: OrderId,
    pub variant_id: VariantId,
    pub location_id: LocationId,
    /// Always greater than zero.
    pub quantity: u32,
    pub status: ReservationStatus,
    /// Only meaningful while `status` is `Reserved`.
    pub expires_at: DateTime<Utc>,
    pub channel_id: Option<ChannelId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a new `Reserved` record.
    pub fn new(
        order_id: OrderId,
        unit: StockUnit,
        quantity: u32,
        expires_at: DateTime<Utc>,
        channel_id: Option<ChannelId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ReservationId::new(),
            order_id,
            variant_id: unit.variant_id,
            location_id: unit.location_id,
            quantity,
            status: ReservationStatus::Reserved,
            expires_at,
            channel_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the stock unit this reservation holds.
    pub fn stock_unit(&self) -> StockUnit {
        StockUnit::new(self.variant_id.clone(), self.location_id.clone())
    }

    /// Returns true if the record holds the given stock unit.
    pub fn holds(&self, unit: &StockUnit) -> bool {
        self.variant_id == unit.variant_id && self.location_id == unit.location_id
    }

    /// Returns true while the record is in `Reserved` status.
    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Reserved
    }

    /// Returns true once `expires_at` lies strictly before `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Returns true if the record reduces availability at `now`.
    pub fn counts_against_stock_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at > now
    }

    /// Overwrites quantity and expiry of an active hold.
    pub fn refresh(&mut self, quantity: u32, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.quantity = quantity;
        self.expires_at = expires_at;
        self.updated_at = now;
    }

    /// Moves the expiry of an active hold without touching its quantity.
    pub fn extend_until(&mut self, expires_at: DateTime<Utc>, now: DateTime<Utc>) {
        self.expires_at = expires_at;
        self.updated_at = now;
    }

    /// Applies a status transition, rejecting anything that leaves a terminal state.
    pub fn transition_to(&mut self, next: ReservationStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ReservationStoreError::InvalidTransition {
                reservation_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}
