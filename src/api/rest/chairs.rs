use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::api::rest::auth::AuthenticatedChair;
use crate::engine::ingest::submit_coordinate;
use crate::engine::lifecycle::{advance_ride_status, resolve_chair_notification, ChairNotification};
use crate::error::AppError;
use crate::geo::Coordinate;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/chair/coordinate", post(post_coordinate))
        .route("/api/chair/activity", post(post_activity))
        .route("/api/chair/notification", get(get_notification))
        .route("/api/chair/rides/:ride_id/status", post(post_ride_status))
}

#[derive(Serialize)]
pub struct CoordinateResponse {
    pub recorded_at: i64,
}

#[derive(Deserialize)]
pub struct ActivityRequest {
    pub is_active: bool,
}

#[derive(Serialize)]
pub struct NotificationResponse {
    pub data: Option<ChairNotification>,
    pub retry_after_ms: u64,
}

#[derive(Deserialize)]
pub struct RideStatusRequest {
    pub status: String,
}

async fn post_coordinate(
    State(state): State<Arc<AppState>>,
    AuthenticatedChair(chair): AuthenticatedChair,
    Json(payload): Json<Coordinate>,
) -> Result<Json<CoordinateResponse>, AppError> {
    let recorded_at = submit_coordinate(&state, chair.id, payload).await?;
    Ok(Json(CoordinateResponse { recorded_at }))
}

async fn post_activity(
    State(state): State<Arc<AppState>>,
    AuthenticatedChair(chair): AuthenticatedChair,
    Json(payload): Json<ActivityRequest>,
) -> Result<StatusCode, AppError> {
    state
        .store
        .transaction(|tx| tx.set_chair_active(&chair.id, payload.is_active))
        .await?;

    state.cache.invalidate_token(&chair.access_token);
    info!(chair_id = %chair.id, is_active = payload.is_active, "chair activity changed");

    Ok(StatusCode::NO_CONTENT)
}

async fn get_notification(
    State(state): State<Arc<AppState>>,
    AuthenticatedChair(chair): AuthenticatedChair,
) -> Result<Json<NotificationResponse>, AppError> {
    let data = resolve_chair_notification(&state, chair.id).await?;
    Ok(Json(NotificationResponse {
        data,
        retry_after_ms: state.notification_retry_ms,
    }))
}

async fn post_ride_status(
    State(state): State<Arc<AppState>>,
    AuthenticatedChair(chair): AuthenticatedChair,
    Path(ride_id): Path<Uuid>,
    Json(payload): Json<RideStatusRequest>,
) -> Result<StatusCode, AppError> {
    advance_ride_status(&state, chair.id, ride_id, &payload.status).await?;
    Ok(StatusCode::NO_CONTENT)
}
