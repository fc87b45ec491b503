use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    ChannelId, LocationId, OrderId, Reservation, ReservationId, ReservationQuery,
    ReservationStoreError, Result, StockUnit, VariantId,
    memory::DEFAULT_LOCK_TIMEOUT,
    store::{ReservationStore, StockCounters, StockSource, UnitOfWork},
};

const RESERVATION_COLUMNS: &str = "id, order_id, variant_id, location_id, quantity, status, \
     expires_at, channel_id, created_at, updated_at";

/// PostgreSQL-backed reservation store.
///
/// Each unit of work is one database transaction. The stock-unit lock is a
/// transaction-scoped advisory lock, so it coordinates every process sharing
/// the database and is released by commit or rollback.
#[derive(Clone)]
pub struct PostgresReservationStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresReservationStore {
    /// Creates a new PostgreSQL reservation store.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Sets how long a transaction waits for row and advisory locks.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        let quantity: i64 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity).map_err(|_| {
            ReservationStoreError::InvalidRecord(format!("quantity {quantity} out of range"))
        })?;
        let status: String = row.try_get("status")?;

        Ok(Reservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::new(row.try_get::<String, _>("order_id")?),
            variant_id: VariantId::new(row.try_get::<String, _>("variant_id")?),
            location_id: LocationId::new(row.try_get::<String, _>("location_id")?),
            quantity,
            status: status.parse()?,
            expires_at: row.try_get("expires_at")?,
            channel_id: row
                .try_get::<Option<String>, _>("channel_id")?
                .map(ChannelId::new),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl ReservationStore for PostgresReservationStore {
    type Unit = PostgresUnitOfWork;

    async fn begin(&self) -> Result<PostgresUnitOfWork> {
        let mut tx = self.pool.begin().await?;

        // SET does not take bind parameters; the value is an integer we format.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        ))
        .execute(&mut *tx)
        .await?;

        Ok(PostgresUnitOfWork { tx })
    }
}

/// A unit of work over [`PostgresReservationStore`]: one open transaction.
///
/// Rows returned by a `find` whose query asks for [`ReservationQuery::for_update`]
/// are locked until the transaction ends, so concurrent units rewriting the
/// same reservation are serialized. Plain reads take no row locks.
pub struct PostgresUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

fn map_lock_error(err: sqlx::Error, unit: &StockUnit) -> ReservationStoreError {
    if let sqlx::Error::Database(ref db_err) = err
        && db_err.code().as_deref() == Some("55P03")
    {
        return ReservationStoreError::LockTimeout { unit: unit.clone() };
    }
    ReservationStoreError::Database(err)
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    async fn lock_stock_unit(&mut self, unit: &StockUnit) -> Result<()> {
        // Advisory locks are re-entrant within a session, so repeated calls are harmless.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1 || E'\\x1f' || $2, 0))")
            .bind(unit.variant_id.as_str())
            .bind(unit.location_id.as_str())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_lock_error(e, unit))?;
        Ok(())
    }

    async fn find(&mut self, query: &ReservationQuery) -> Result<Vec<Reservation>> {
        let mut sql = format!("SELECT {RESERVATION_COLUMNS} FROM stock_reservations WHERE 1=1");
        let mut param_count = 0;

        // Build dynamic query
        if query.reservation_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND id = ${param_count}"));
        }
        if query.order_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND order_id = ${param_count}"));
        }
        if query.variant_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND variant_id = ${param_count}"));
        }
        if query.location_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND location_id = ${param_count}"));
        }
        if query.status.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND status = ${param_count}"));
        }
        if query.channel_id.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND channel_id = ${param_count}"));
        }
        if query.expired_before.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND expires_at < ${param_count}"));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");
        if query.lock_rows {
            sql.push_str(" FOR UPDATE");
        }

        // Bind parameters in the same order
        let mut q = sqlx::query(&sql);
        if let Some(id) = query.reservation_id {
            q = q.bind(id.as_uuid());
        }
        if let Some(ref order_id) = query.order_id {
            q = q.bind(order_id.as_str());
        }
        if let Some(ref variant_id) = query.variant_id {
            q = q.bind(variant_id.as_str());
        }
        if let Some(ref location_id) = query.location_id {
            q = q.bind(location_id.as_str());
        }
        if let Some(status) = query.status {
            q = q.bind(status.as_str());
        }
        if let Some(ref channel_id) = query.channel_id {
            q = q.bind(channel_id.as_str());
        }
        if let Some(instant) = query.expired_before {
            q = q.bind(instant);
        }

        let rows = q.fetch_all(&mut *self.tx).await?;
        rows.into_iter()
            .map(PostgresReservationStore::row_to_reservation)
            .collect()
    }

    async fn upsert(&mut self, reservation: &Reservation) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO stock_reservations
                (id, order_id, variant_id, location_id, quantity, status, expires_at, channel_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                status = EXCLUDED.status,
                expires_at = EXCLUDED.expires_at,
                updated_at = EXCLUDED.updated_at
            WHERE stock_reservations.status = 'reserved'
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.order_id.as_str())
        .bind(reservation.variant_id.as_str())
        .bind(reservation.location_id.as_str())
        .bind(i64::from(reservation.quantity))
        .bind(reservation.status.as_str())
        .bind(reservation.expires_at)
        .bind(reservation.channel_id.as_ref().map(ChannelId::as_str))
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("uq_stock_reservations_active_line")
            {
                return ReservationStoreError::ActiveLineExists {
                    order_id: reservation.order_id.clone(),
                    unit: reservation.stock_unit(),
                };
            }
            ReservationStoreError::Database(e)
        })?;

        // The guarded update matched nothing: the stored row already left `reserved`.
        if result.rows_affected() == 0 {
            return Err(ReservationStoreError::Conflict {
                reservation_id: reservation.id,
            });
        }
        Ok(())
    }

    async fn sum_active_quantity(
        &mut self,
        unit: &StockUnit,
        exclude_order: Option<&OrderId>,
        as_of: DateTime<Utc>,
    ) -> Result<u64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::BIGINT
            FROM stock_reservations
            WHERE variant_id = $1
              AND location_id = $2
              AND status = 'reserved'
              AND expires_at > $3
              AND ($4::TEXT IS NULL OR order_id <> $4)
            "#,
        )
        .bind(unit.variant_id.as_str())
        .bind(unit.location_id.as_str())
        .bind(as_of)
        .bind(exclude_order.map(OrderId::as_str))
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

/// Stock counters read from the host's `stock_levels` table.
#[derive(Clone)]
pub struct PostgresStockSource {
    pool: PgPool,
}

impl PostgresStockSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StockSource for PostgresStockSource {
    async fn stock_counters(&self, unit: &StockUnit) -> Result<Option<StockCounters>> {
        let row = sqlx::query(
            r#"
            SELECT stock_on_hand, stock_allocated
            FROM stock_levels
            WHERE variant_id = $1 AND location_id = $2
            "#,
        )
        .bind(unit.variant_id.as_str())
        .bind(unit.location_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<StockCounters> {
            Ok(StockCounters::new(
                row.try_get("stock_on_hand")?,
                row.try_get("stock_allocated")?,
            ))
        })
        .transpose()
    }
}
