pub mod auth;
pub mod chairs;
pub mod internal;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(chairs::router())
        .merge(internal::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    storage: &'static str,
    queued_coordinates: i64,
    cached_chairs: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let suspended = state.store.is_suspended();
    Json(HealthResponse {
        status: if suspended { "degraded" } else { "ok" },
        storage: if suspended { "suspended" } else { "available" },
        queued_coordinates: state.metrics.coordinate_queue_depth.get(),
        cached_chairs: state.cache.cached_chairs(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
