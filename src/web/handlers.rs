use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::models::{Position, PositionStatus};

use super::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn get_positions(State(state): State<AppState>) -> Json<Vec<Position>> {
    Json(state.position_store.query(Default::default()).await)
}

pub async fn get_open_positions(State(state): State<AppState>) -> Json<Vec<Position>> {
    Json(state.position_store.list_open(None).await)
}

pub async fn get_position(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Result<Json<Position>, StatusCode> {
    state
        .position_store
        .get(&id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Serialize)]
pub struct StatsResponse {
    total: usize,
    open: usize,
    closed: usize,
    failed: usize,
}

pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.position_store.stats().await;
    Json(StatsResponse {
        total: stats.total,
        open: stats.open,
        closed: stats.closed,
        failed: stats.failed,
    })
}

#[derive(Serialize)]
pub struct PriceResponse {
    mint: String,
    price: Option<f64>,
}

pub async fn get_price(
    State(state): State<AppState>,
    axum::extract::Path(mint): axum::extract::Path<String>,
) -> Json<PriceResponse> {
    let price = state.price_cache.get_price(&mint).await;
    Json(PriceResponse { mint, price })
}

pub async fn get_ledger(State(state): State<AppState>) -> Json<std::collections::HashMap<String, f64>> {
    Json(state.paper_ledger.get_all().await)
}

pub async fn get_closed_positions(State(state): State<AppState>) -> Json<Vec<Position>> {
    Json(
        state
            .position_store
            .query(crate::store::PositionQuery {
                status: Some(PositionStatus::Closed),
                ..Default::default()
            })
            .await,
    )
}
