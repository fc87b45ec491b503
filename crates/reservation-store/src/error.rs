use thiserror::Error;

use crate::{OrderId, ReservationId, ReservationStatus, StockUnit};

/// Errors that can occur when interacting with the reservation store.
#[derive(Debug, Error)]
pub enum ReservationStoreError {
    /// The stored record changed after this unit of work read it, or it is no
    /// longer `Reserved`. Nothing was written; the whole operation may be retried.
    #[error("Reservation {reservation_id} was modified concurrently")]
    Conflict { reservation_id: ReservationId },

    /// A second `Reserved` record was about to be created for one order line.
    #[error("Order {order_id} already holds an active reservation on {unit}")]
    ActiveLineExists { order_id: OrderId, unit: StockUnit },

    /// The per-stock-unit lock could not be acquired in time.
    #[error("Timed out waiting for the reservation lock on {unit}")]
    LockTimeout { unit: StockUnit },

    /// A status change that would leave a terminal state.
    #[error("Reservation {reservation_id} cannot move from {from} to {to}")]
    InvalidTransition {
        reservation_id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
    },

    /// A persisted row could not be mapped back to a reservation.
    #[error("Invalid reservation record: {0}")]
    InvalidRecord(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl ReservationStoreError {
    /// Returns true when the failed operation left no partial state behind and
    /// can be retried as a whole.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Conflict { .. } | Self::ActiveLineExists { .. } | Self::LockTimeout { .. } => {
                true
            }
            Self::Database(err) => is_transient_database_error(err),
            Self::InvalidTransition { .. } | Self::InvalidRecord(_) | Self::Migration(_) => false,
        }
    }
}

fn is_transient_database_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::WorkerCrashed => true,
        // serialization_failure, deadlock_detected, lock_not_available
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            Some("40001") | Some("40P01") | Some("55P03")
        ),
        _ => false,
    }
}

/// Result type for reservation store operations.
pub type Result<T> = std::result::Result<T, ReservationStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_and_conflicts_are_transient() {
        let unit = StockUnit::new("V1", "L1");
        assert!(ReservationStoreError::LockTimeout { unit: unit.clone() }.is_transient());
        assert!(
            ReservationStoreError::Conflict {
                reservation_id: ReservationId::new()
            }
            .is_transient()
        );
        assert!(
            ReservationStoreError::ActiveLineExists {
                order_id: OrderId::new("A"),
                unit,
            }
            .is_transient()
        );
        assert!(ReservationStoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn invalid_records_are_not_transient() {
        assert!(!ReservationStoreError::InvalidRecord("bad".into()).is_transient());
        assert!(!ReservationStoreError::Database(sqlx::Error::RowNotFound).is_transient());
    }
}
