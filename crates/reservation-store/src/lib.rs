pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod reservation;
pub mod store;

pub use common::{ChannelId, LocationId, OrderId, ReservationId, StockUnit, VariantId};
pub use error::{ReservationStoreError, Result};
pub use memory::{InMemoryReservationStore, InMemoryStockSource, InMemoryUnitOfWork};
pub use postgres::{PostgresReservationStore, PostgresStockSource, PostgresUnitOfWork};
pub use query::ReservationQuery;
pub use reservation::{Reservation, ReservationStatus};
pub use store::{ReservationStore, ReservationStoreExt, StockCounters, StockSource, UnitOfWork};
