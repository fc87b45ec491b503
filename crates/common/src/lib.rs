//! Shared identifier types for the inventory reservation system.

mod types;

pub use types::{ChannelId, LocationId, OrderId, ReservationId, StockUnit, VariantId};
