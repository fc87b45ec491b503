//! HTTP handlers and the state they share.

pub mod admin;
pub mod health;
pub mod metrics;
pub mod reservations;
pub mod stock;
pub mod transitions;

use std::sync::Arc;

use engine::{ExpirationSweeper, OrderLifecycleAdapter, ReservationEngine};
use reservation_store::{ReservationStore, StockSource};

/// Shared application state accessible from all handlers.
pub struct AppState<S: ReservationStore, K: StockSource> {
    pub engine: Arc<ReservationEngine<S, K>>,
    pub lifecycle: OrderLifecycleAdapter<S, K>,
    pub sweeper: Arc<ExpirationSweeper<S>>,
}
