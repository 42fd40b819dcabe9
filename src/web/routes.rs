use axum::{routing::get, Router};

use super::handlers;
use super::websocket::ws_handler;
use super::AppState;

pub fn create_routes(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/positions", get(handlers::get_positions))
        .route("/api/positions/open", get(handlers::get_open_positions))
        .route("/api/positions/closed", get(handlers::get_closed_positions))
        .route("/api/positions/:id", get(handlers::get_position))
        .route("/api/price/:mint", get(handlers::get_price))
        .route("/api/stats", get(handlers::get_stats))
        .route("/api/ledger", get(handlers::get_ledger))
        .route("/ws", get(ws_handler))
        .with_state(state)
}
