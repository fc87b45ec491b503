//! Order workflow transition endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use engine::{OrderProcessHooks, OrderRef, OrderState};
use reservation_store::{ReservationStore, StockSource};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::AppState;

#[derive(Deserialize)]
pub struct TransitionRequest {
    pub from: OrderState,
    pub to: OrderState,
    pub code: Option<String>,
}

#[derive(Serialize)]
pub struct TransitionResponse {
    pub order_id: String,
    pub from: OrderState,
    pub to: OrderState,
}

/// POST /orders/{order_id}/transitions: runs both lifecycle hooks.
///
/// A blocked transition answers 409 with the shopper-facing message and
/// runs no after-transition action.
#[tracing::instrument(skip(state, req), fields(from = %req.from, to = %req.to))]
pub async fn transition<S: ReservationStore + 'static, K: StockSource + 'static>(
    State(state): State<Arc<AppState<S, K>>>,
    Path(order_id): Path<String>,
    Json(req): Json<TransitionRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let mut order = OrderRef::new(order_id.as_str());
    if let Some(code) = req.code {
        order = order.with_code(code);
    }

    if let Some(message) = state
        .lifecycle
        .before_transition(req.from, req.to, &order)
        .await?
    {
        metrics::counter!("order_transitions_blocked_total").increment(1);
        return Err(ApiError::TransitionBlocked(message));
    }

    state
        .lifecycle
        .after_transition(req.from, req.to, &order)
        .await?;

    Ok(Json(TransitionResponse {
        order_id,
        from: req.from,
        to: req.to,
    }))
}
