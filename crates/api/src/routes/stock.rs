//! Stock availability endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use common::{OrderId, StockUnit};
use reservation_store::{ReservationStore, StockSource};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::AppState;

#[derive(Deserialize)]
pub struct AvailabilityParams {
    /// Computes availability as if this order held nothing.
    pub exclude_order: Option<String>,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub variant_id: String,
    pub location_id: String,
    pub available: u64,
}

/// GET /stock/{variant_id}/{location_id}/available: sellable quantity.
#[tracing::instrument(skip(state, params))]
pub async fn available<S: ReservationStore + 'static, K: StockSource + 'static>(
    State(state): State<Arc<AppState<S, K>>>,
    Path((variant_id, location_id)): Path<(String, String)>,
    Query(params): Query<AvailabilityParams>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let unit = StockUnit::new(variant_id.as_str(), location_id.as_str());
    let exclude_order = params.exclude_order.map(OrderId::new);

    let available = state
        .engine
        .available_stock(&unit, exclude_order.as_ref())
        .await?;

    Ok(Json(AvailabilityResponse {
        variant_id,
        location_id,
        available,
    }))
}
