//! Inventory reservation engine.
//!
//! Provisionally holds stock for in-progress orders so concurrent shoppers
//! cannot oversell a stock unit:
//! - `AvailabilityCalculator` derives sellable quantity from stock counters and
//!   unexpired holds
//! - `ReservationEngine` creates, extends, confirms and releases holds under a
//!   per-stock-unit lock
//! - `ExpirationSweeper` periodically releases holds whose TTL ran out
//! - `OrderLifecycleAdapter` maps order workflow transitions onto the engine

pub mod availability;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod sweeper;

pub use availability::AvailabilityCalculator;
pub use config::{ReservationConfig, ReturnToCartPolicy};
pub use engine::{HoldRequest, ReservationEngine};
pub use error::{ReservationError, Result};
pub use lifecycle::{
    EXPIRED_RESERVATIONS_MESSAGE, OrderLifecycleAdapter, OrderProcessHooks, OrderRef, OrderState,
};
pub use sweeper::{ExpirationSweeper, SweepReport, SweeperHandle};
