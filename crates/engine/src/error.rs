//! Reservation engine error types.

use std::time::Duration;

use common::{LocationId, StockUnit, VariantId};
use reservation_store::ReservationStoreError;
use thiserror::Error;

/// Errors that can occur during reservation operations.
#[derive(Debug, Error)]
pub enum ReservationError {
    /// The requested quantity exceeds what is currently available.
    #[error(
        "Insufficient stock for reservation of variant {variant_id} at {location_id}. Requested: {requested}, Available: {available}"
    )]
    InsufficientStock {
        variant_id: VariantId,
        location_id: LocationId,
        requested: u32,
        available: u64,
    },

    /// The stock source has no counters for the referenced unit.
    #[error("Stock unit not found: {0}")]
    StockUnitNotFound(StockUnit),

    /// Reservations must hold at least one unit.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// The TTL does not fit into a timestamp offset.
    #[error("Invalid reservation TTL: {0:?}")]
    InvalidTtl(Duration),

    /// An error occurred in the reservation store.
    #[error("Reservation store error: {0}")]
    Store(#[from] ReservationStoreError),
}

impl ReservationError {
    /// Returns true when retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReservationError::Store(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Returns the message shown to shoppers for this error.
    pub fn user_message(&self) -> &'static str {
        match self {
            ReservationError::InsufficientStock { .. } => "Not enough stock available.",
            ReservationError::StockUnitNotFound(_) => {
                "This item is not available at the selected location."
            }
            ReservationError::InvalidQuantity { .. } => "Quantity must be at least 1.",
            ReservationError::InvalidTtl(_) | ReservationError::Store(_) => {
                "We could not update your cart right now. Please try again."
            }
        }
    }
}

/// Convenience type alias for reservation results.
pub type Result<T> = std::result::Result<T, ReservationError>;
