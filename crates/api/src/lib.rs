//! HTTP host service for the inventory reservation engine.
//!
//! Exposes holds, availability and order transitions over REST, runs the
//! expiration sweeper, and reports structured logs (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use engine::{ExpirationSweeper, OrderLifecycleAdapter, ReservationConfig, ReservationEngine};
use metrics_exporter_prometheus::PrometheusHandle;
use reservation_store::{InMemoryStockSource, ReservationStore, StockSource};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, K>(state: Arc<AppState<S, K>>, metrics_handle: PrometheusHandle) -> Router
where
    S: ReservationStore + 'static,
    K: StockSource + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/stock/{variant_id}/{location_id}/available",
            get(routes::stock::available::<S, K>),
        )
        .route(
            "/orders/{order_id}/reservations",
            post(routes::reservations::hold::<S, K>).get(routes::reservations::list::<S, K>),
        )
        .route(
            "/orders/{order_id}/reservations/extend",
            post(routes::reservations::extend::<S, K>),
        )
        .route(
            "/orders/{order_id}/reservations/{variant_id}/{location_id}",
            delete(routes::reservations::release_line::<S, K>),
        )
        .route(
            "/orders/{order_id}/transitions",
            post(routes::transitions::transition::<S, K>),
        )
        .route("/admin/sweep", post(routes::admin::sweep::<S, K>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Routes for editing in-memory stock counters, mounted when no database is
/// configured.
pub fn stock_admin_router(stock: InMemoryStockSource) -> Router {
    Router::new()
        .route(
            "/admin/stock/{variant_id}/{location_id}",
            put(routes::admin::set_stock),
        )
        .with_state(stock)
}

/// Wires the engine, lifecycle adapter and sweeper over one store.
pub fn create_default_state<S, K>(store: S, stock: K, config: ReservationConfig) -> Arc<AppState<S, K>>
where
    S: ReservationStore + Clone + 'static,
    K: StockSource + 'static,
{
    let sweeper = Arc::new(ExpirationSweeper::from_config(store.clone(), &config));
    let engine = Arc::new(ReservationEngine::new(store, stock, config));
    let lifecycle = OrderLifecycleAdapter::new(Arc::clone(&engine));

    Arc::new(AppState {
        engine,
        lifecycle,
        sweeper,
    })
}
