//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use engine::ReservationError;
use serde_json::{Value, json};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// The order workflow refused the transition; carries the shopper message.
    TransitionBlocked(String),
    /// Reservation engine error.
    Reservation(ReservationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::TransitionBlocked(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            ApiError::Reservation(err) => reservation_error_to_response(err),
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Engine errors answer with the shopper-facing message; the internal
/// description only goes to the log.
fn reservation_error_to_response(err: ReservationError) -> (StatusCode, Value) {
    let message = err.user_message();
    match &err {
        ReservationError::InsufficientStock {
            requested,
            available,
            ..
        } => (
            StatusCode::CONFLICT,
            json!({ "error": message, "requested": requested, "available": available }),
        ),
        ReservationError::StockUnitNotFound(_) => {
            (StatusCode::NOT_FOUND, json!({ "error": message }))
        }
        ReservationError::InvalidQuantity { .. } | ReservationError::InvalidTtl(_) => {
            tracing::debug!(error = %err, "rejected reservation request");
            (StatusCode::BAD_REQUEST, json!({ "error": message }))
        }
        _ if err.is_retryable() => {
            tracing::warn!(error = %err, "transient reservation store error");
            (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": message }))
        }
        _ => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
        }
    }
}

impl From<ReservationError> for ApiError {
    fn from(err: ReservationError) -> Self {
        ApiError::Reservation(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::StockUnit;
    use reservation_store::ReservationStoreError;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_reservation_errors_map_to_status() {
        assert_eq!(
            status_of(ReservationError::StockUnitNotFound(StockUnit::new("V", "L")).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ReservationError::InvalidQuantity { quantity: 0 }.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                ReservationError::from(ReservationStoreError::LockTimeout {
                    unit: StockUnit::new("V", "L"),
                })
                .into()
            ),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(
                ReservationError::from(ReservationStoreError::InvalidRecord("bad".into())).into()
            ),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_bodies_carry_shopper_messages() {
        let (status, body) = reservation_error_to_response(ReservationError::InsufficientStock {
            variant_id: "V".into(),
            location_id: "L".into(),
            requested: 8,
            available: 3,
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "Not enough stock available.");
        assert_eq!(body["requested"], 8);
        assert_eq!(body["available"], 3);

        let (_, body) = reservation_error_to_response(ReservationError::from(
            ReservationStoreError::InvalidRecord("row 42 is corrupt".into()),
        ));
        assert_eq!(
            body["error"],
            "We could not update your cart right now. Please try again."
        );
        assert!(!body.to_string().contains("row 42"));
    }

    #[test]
    fn test_blocked_transition_is_conflict() {
        assert_eq!(
            status_of(ApiError::TransitionBlocked("no".into())),
            StatusCode::CONFLICT
        );
    }
}
