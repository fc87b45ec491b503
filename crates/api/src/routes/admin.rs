//! Operational endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::StockUnit;
use reservation_store::{InMemoryStockSource, ReservationStore, StockCounters, StockSource};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::AppState;

#[derive(Serialize)]
pub struct SweepResponse {
    /// True when another sweep was still running and this one did nothing.
    pub skipped: bool,
    pub swept: usize,
    pub failed: usize,
}

/// POST /admin/sweep: runs one expiration sweep now.
#[tracing::instrument(skip(state))]
pub async fn sweep<S: ReservationStore + 'static, K: StockSource + 'static>(
    State(state): State<Arc<AppState<S, K>>>,
) -> Result<Json<SweepResponse>, ApiError> {
    let response = match state.sweeper.sweep_once().await? {
        Some(report) => SweepResponse {
            skipped: false,
            swept: report.swept,
            failed: report.failed,
        },
        None => SweepResponse {
            skipped: true,
            swept: 0,
            failed: 0,
        },
    };
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct SetStockRequest {
    pub on_hand: i64,
    pub allocated: i64,
}

/// PUT /admin/stock/{variant_id}/{location_id}: sets in-memory stock counters.
///
/// Only mounted when the service runs without a database; otherwise the
/// counters belong to the host's inventory tables.
#[tracing::instrument(skip(stock, req))]
pub async fn set_stock(
    State(stock): State<InMemoryStockSource>,
    Path((variant_id, location_id)): Path<(String, String)>,
    Json(req): Json<SetStockRequest>,
) -> Result<(StatusCode, Json<StockCounters>), ApiError> {
    if req.on_hand < 0 || req.allocated < 0 {
        return Err(ApiError::BadRequest(
            "on_hand and allocated must not be negative".to_string(),
        ));
    }

    let unit = StockUnit::new(variant_id, location_id);
    stock.set_counters(unit, req.on_hand, req.allocated).await;
    Ok((
        StatusCode::OK,
        Json(StockCounters::new(req.on_hand, req.allocated)),
    ))
}
