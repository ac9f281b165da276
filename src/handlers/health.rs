use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use std::time::Instant;
use tracing::warn;

use crate::handlers::AppState;

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(liveness))
        .route("/ready", get(readiness))
}

/// Liveness: the process is up and serving.
pub async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Readiness: the database answers a ping.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let started = Instant::now();
    match crate::db::check_connection(&state.db).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "database": "up",
                "latency_ms": started.elapsed().as_millis() as u64,
            })),
        ),
        Err(e) => {
            warn!("Readiness check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable", "database": "down" })),
            )
        }
    }
}
