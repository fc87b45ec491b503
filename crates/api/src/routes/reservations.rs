//! Per-order reservation endpoints: hold, list, extend and release a line.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, StockUnit};
use engine::HoldRequest;
use reservation_store::{Reservation, ReservationStore, StockSource};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct HoldReservationRequest {
    pub variant_id: String,
    pub location_id: String,
    pub quantity: u32,
    /// Overrides the configured reservation TTL.
    pub ttl_ms: Option<u64>,
    pub channel_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ExtendReservationRequest {
    pub variant_id: String,
    pub location_id: String,
    pub ttl_ms: Option<u64>,
}

// -- Response types --

#[derive(Serialize)]
pub struct ExtendResponse {
    pub extended: bool,
}

#[derive(Serialize)]
pub struct ReleaseLineResponse {
    pub released: bool,
}

// -- Handlers --

/// POST /orders/{order_id}/reservations: create or resize a hold.
#[tracing::instrument(skip(state, req))]
pub async fn hold<S: ReservationStore + 'static, K: StockSource + 'static>(
    State(state): State<Arc<AppState<S, K>>>,
    Path(order_id): Path<String>,
    Json(req): Json<HoldReservationRequest>,
) -> Result<(StatusCode, Json<Reservation>), ApiError> {
    let unit = StockUnit::new(req.variant_id, req.location_id);
    let mut request = HoldRequest::new(order_id, unit, req.quantity);
    if let Some(ttl_ms) = req.ttl_ms {
        request = request.with_ttl(Duration::from_millis(ttl_ms));
    }
    if let Some(channel_id) = req.channel_id {
        request = request.in_channel(channel_id);
    }

    let reservation = state.engine.hold(request).await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// GET /orders/{order_id}/reservations: active holds of the order.
#[tracing::instrument(skip(state))]
pub async fn list<S: ReservationStore + 'static, K: StockSource + 'static>(
    State(state): State<Arc<AppState<S, K>>>,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<Reservation>>, ApiError> {
    let reservations = state.engine.list_active(&OrderId::new(order_id)).await?;
    Ok(Json(reservations))
}

/// POST /orders/{order_id}/reservations/extend: refresh a hold's expiry.
#[tracing::instrument(skip(state, req))]
pub async fn extend<S: ReservationStore + 'static, K: StockSource + 'static>(
    State(state): State<Arc<AppState<S, K>>>,
    Path(order_id): Path<String>,
    Json(req): Json<ExtendReservationRequest>,
) -> Result<Json<ExtendResponse>, ApiError> {
    let ttl = req
        .ttl_ms
        .map(Duration::from_millis)
        .unwrap_or(state.engine.config().reservation_ttl);
    let unit = StockUnit::new(req.variant_id, req.location_id);

    let extended = state
        .engine
        .extend(&OrderId::new(order_id), &unit, ttl)
        .await?;
    Ok(Json(ExtendResponse { extended }))
}

/// DELETE /orders/{order_id}/reservations/{variant_id}/{location_id}: release one line.
#[tracing::instrument(skip(state))]
pub async fn release_line<S: ReservationStore + 'static, K: StockSource + 'static>(
    State(state): State<Arc<AppState<S, K>>>,
    Path((order_id, variant_id, location_id)): Path<(String, String, String)>,
) -> Result<Json<ReleaseLineResponse>, ApiError> {
    let unit = StockUnit::new(variant_id, location_id);
    let released = state
        .engine
        .release_line(&OrderId::new(order_id), &unit)
        .await?;
    Ok(Json(ReleaseLineResponse { released }))
}
