pub mod cli;
pub mod config;
pub mod datastore;
pub mod forwarder;
pub mod gateway;
pub mod handlers;
pub mod protocol;
pub mod session;
pub mod validator;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{get_stream_status, health_check};
use crate::websocket::{websocket_handler, AppState};

/// Builds the HTTP/WebSocket router over the shared state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/streams/:id", get(get_stream_status))
        .route("/ws", get(websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
