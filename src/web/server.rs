use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::routes::create_routes;
use super::AppState;

pub async fn start_server(state: AppState, bind_addr: &str) -> Result<()> {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = create_routes(state).layer(cors).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = bind_addr.parse().context("invalid dashboard bind address")?;
    info!("starting dashboard server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind dashboard address")?;
    axum::serve(listener, app).await.context("dashboard server error")?;
    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    create_routes(state).layer(cors).layer(TraceLayer::new_for_http())
}
