//! HTTP surface: WebSocket signaling endpoints plus health and stats

mod health;
mod websocket;

use axum::{routing::get, Router};
use radio_sfu::RoomRegistry;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
}

pub fn create_router(registry: Arc<RoomRegistry>) -> Router {
    let state = AppState { registry };

    Router::new()
        .route("/ws/speaker", get(websocket::speaker_handler))
        .route("/ws/listener", get(websocket::listener_handler))
        // Paths used by the bundled web client
        .route("/api/speaker", get(websocket::speaker_handler))
        .route("/api/listener", get(websocket::listener_handler))
        .merge(health::create_health_router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
