//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and truncate the tables between
//! cases, so they are serialized and need Docker. Run with:
//!
//! ```bash
//! cargo test -p reservation-store --test postgres_integration -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use reservation_store::{
    OrderId, PostgresReservationStore, PostgresStockSource, Reservation, ReservationQuery,
    ReservationStatus, ReservationStore, ReservationStoreError, ReservationStoreExt,
    StockCounters, StockSource, StockUnit, UnitOfWork,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_stock_reservations.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh pool with cleared tables
async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE stock_reservations, stock_levels")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

fn unit() -> StockUnit {
    StockUnit::new("V1", "L1")
}

fn create_test_reservation(order: &str, quantity: u32, ttl: ChronoDuration) -> Reservation {
    let now = Utc::now();
    Reservation::new(OrderId::new(order), unit(), quantity, now + ttl, None, now)
}

async fn insert(store: &PostgresReservationStore, reservation: &Reservation) {
    let mut work = store.begin().await.unwrap();
    work.upsert(reservation).await.unwrap();
    work.commit().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn upsert_and_find_roundtrip() {
    let store = PostgresReservationStore::new(get_test_pool().await);
    let r = create_test_reservation("A", 4, ChronoDuration::minutes(15));
    insert(&store, &r).await;

    let found = store
        .find(ReservationQuery::active_for_order(OrderId::new("A")))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, r.id);
    assert_eq!(found[0].quantity, 4);
    assert_eq!(found[0].status, ReservationStatus::Reserved);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn rolled_back_unit_leaves_nothing() {
    let store = PostgresReservationStore::new(get_test_pool().await);
    let r = create_test_reservation("A", 4, ChronoDuration::minutes(15));

    let mut work = store.begin().await.unwrap();
    work.upsert(&r).await.unwrap();
    drop(work);

    let found = store.find(ReservationQuery::new()).await.unwrap();
    assert!(found.is_empty());
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn sum_skips_expired_and_excluded() {
    let store = PostgresReservationStore::new(get_test_pool().await);
    insert(&store, &create_test_reservation("A", 2, ChronoDuration::minutes(15))).await;
    insert(&store, &create_test_reservation("B", 3, ChronoDuration::minutes(15))).await;
    insert(&store, &create_test_reservation("C", 5, ChronoDuration::minutes(-1))).await;

    let now = Utc::now();
    assert_eq!(store.sum_active_quantity(&unit(), None, now).await.unwrap(), 5);
    assert_eq!(
        store
            .sum_active_quantity(&unit(), Some(&OrderId::new("B")), now)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn terminal_rows_cannot_be_overwritten() {
    let store = PostgresReservationStore::new(get_test_pool().await);
    let mut r = create_test_reservation("A", 2, ChronoDuration::minutes(15));
    insert(&store, &r).await;

    r.transition_to(ReservationStatus::Confirmed, Utc::now())
        .unwrap();
    insert(&store, &r).await;

    let mut stale = r.clone();
    stale.status = ReservationStatus::Released;
    let mut work = store.begin().await.unwrap();
    let err = work.upsert(&stale).await.unwrap_err();
    assert!(matches!(err, ReservationStoreError::Conflict { .. }));
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn one_active_reservation_per_line() {
    let store = PostgresReservationStore::new(get_test_pool().await);
    insert(&store, &create_test_reservation("A", 2, ChronoDuration::minutes(15))).await;

    let mut work = store.begin().await.unwrap();
    let err = work
        .upsert(&create_test_reservation("A", 1, ChronoDuration::minutes(15)))
        .await
        .unwrap_err();
    assert!(matches!(err, ReservationStoreError::ActiveLineExists { .. }));
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn advisory_lock_times_out_while_held() {
    let store = PostgresReservationStore::new(get_test_pool().await)
        .with_lock_timeout(Duration::from_millis(100));

    let mut holder = store.begin().await.unwrap();
    holder.lock_stock_unit(&unit()).await.unwrap();

    let mut waiter = store.begin().await.unwrap();
    let err = waiter.lock_stock_unit(&unit()).await.unwrap_err();
    assert!(matches!(err, ReservationStoreError::LockTimeout { .. }));
    assert!(err.is_transient());

    holder.commit().await.unwrap();
    let mut next = store.begin().await.unwrap();
    next.lock_stock_unit(&unit()).await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn plain_reads_do_not_wait_for_row_locks() {
    let store = PostgresReservationStore::new(get_test_pool().await)
        .with_lock_timeout(Duration::from_millis(100));
    let r = create_test_reservation("A", 2, ChronoDuration::minutes(15));
    insert(&store, &r).await;

    let mut holder = store.begin().await.unwrap();
    let locked = holder
        .find(&ReservationQuery::by_id(r.id).for_update())
        .await
        .unwrap();
    assert_eq!(locked.len(), 1);

    let plain = tokio::time::timeout(
        Duration::from_secs(2),
        store.find(ReservationQuery::active_for_order(OrderId::new("A"))),
    )
    .await
    .expect("plain read waited for a row lock")
    .unwrap();
    assert_eq!(plain.len(), 1);

    let mut writer = store.begin().await.unwrap();
    let err = writer
        .find(&ReservationQuery::by_id(r.id).for_update())
        .await
        .unwrap_err();
    assert!(err.is_transient());

    holder.commit().await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn stock_source_reads_stock_levels() {
    let pool = get_test_pool().await;
    sqlx::query(
        "INSERT INTO stock_levels (variant_id, location_id, stock_on_hand, stock_allocated) VALUES ('V1', 'L1', 10, 2)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let source = PostgresStockSource::new(pool);
    assert_eq!(
        source.stock_counters(&unit()).await.unwrap(),
        Some(StockCounters::new(10, 2))
    );
    assert!(
        source
            .stock_counters(&StockUnit::new("V2", "L1"))
            .await
            .unwrap()
            .is_none()
    );
}
