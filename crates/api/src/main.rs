//! API server entry point.

use std::sync::Arc;

use api::config::Config;
use api::routes::AppState;
use axum::Router;
use reservation_store::{
    InMemoryReservationStore, InMemoryStockSource, PostgresReservationStore, PostgresStockSource,
    ReservationStore, StockSource,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Starts the sweeper, serves until a shutdown signal, then stops the sweeper.
async fn serve<S, K>(config: &Config, state: Arc<AppState<S, K>>, app: Router)
where
    S: ReservationStore + 'static,
    K: StockSource + 'static,
{
    let sweeper = Arc::clone(&state.sweeper).start();

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    sweeper.shutdown().await;
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let reservation = config.reservation.clone();
    tracing::info!(
        ttl_ms = reservation.reservation_ttl.as_millis() as u64,
        cleanup_interval_ms = reservation.cleanup_interval.as_millis() as u64,
        extend_on_return_to_cart = reservation.extend_on_return_to_cart,
        "reservation options loaded"
    );

    // 3. Pick the store and serve
    match config.database_url.as_deref() {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(url)
                .await
                .expect("failed to connect to database");

            let store = PostgresReservationStore::new(pool.clone())
                .with_lock_timeout(reservation.lock_timeout);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL reservation store");

            let state =
                api::create_default_state(store, PostgresStockSource::new(pool), reservation);
            let app = api::create_app(Arc::clone(&state), metrics_handle);
            serve(&config, state, app).await;
        }
        None => {
            if reservation.distributed_lock {
                tracing::warn!(
                    "RESERVATION_DISTRIBUTED_LOCK is set but the in-memory store only locks within this process"
                );
            }
            tracing::info!("DATABASE_URL not set, using in-memory reservation store");

            let store = InMemoryReservationStore::new().with_lock_timeout(reservation.lock_timeout);
            let stock = InMemoryStockSource::new();

            let state = api::create_default_state(store, stock.clone(), reservation);
            let app = api::create_app(Arc::clone(&state), metrics_handle)
                .merge(api::stock_admin_router(stock));
            serve(&config, state, app).await;
        }
    }
}
