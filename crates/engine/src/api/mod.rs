//! API layer - HTTP and WebSocket entry points.

use std::sync::Arc;

use axum::{routing::get, Router};

pub mod connections;
pub mod http;
pub mod websocket;

pub use connections::{BotConnection, BotSession, ConnectionManager};

use crate::app::App;

/// Every gateway route, with state applied.
pub fn router(app: Arc<App>) -> Router {
    http::routes()
        .route("/ws/bot", get(websocket::ws_handler))
        .with_state(app)
}
