//! Health and stats endpoints

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use crate::http::AppState;

pub fn create_health_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/stats", get(stats))
}

/// Always OK while the process is serving
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

/// Registry-wide snapshot: room, participant and relay counters
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.stats().await)
}
