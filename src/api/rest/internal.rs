use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Serialize;

use crate::engine::dispatch::run_dispatch_pass;
use crate::engine::reset::reinitialize;
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/initialize", post(post_initialize))
        .route("/api/internal/matching", get(run_matching).post(trigger_matching))
}

#[derive(Serialize)]
struct InitializeResponse {
    language: &'static str,
    chairs_replayed: usize,
    rides_cached: usize,
}

async fn post_initialize(
    State(state): State<Arc<AppState>>,
) -> Result<Json<InitializeResponse>, AppError> {
    let summary = reinitialize(&state).await?;
    Ok(Json(InitializeResponse {
        language: "rust",
        chairs_replayed: summary.chairs_replayed,
        rides_cached: summary.rides_cached,
    }))
}

/// Runs a dispatch pass and answers once it has committed.
async fn run_matching(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    run_dispatch_pass(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Wakes the background scheduler and answers immediately.
async fn trigger_matching(State(state): State<Arc<AppState>>) -> StatusCode {
    state.dispatch_trigger.notify_one();
    StatusCode::ACCEPTED
}
