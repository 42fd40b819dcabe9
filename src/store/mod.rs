pub mod position_store;
pub mod price_cache;

pub use position_store::{PositionQuery, PositionStore, StoreStats};
pub use price_cache::{PriceCache, RouteHint, RouteKind};

use crate::models::Position;
use serde::Serialize;

/// Events PositionStore publishes for the outward dashboard surface to subscribe to.
/// Kept as a plain broadcast payload so PositionStore never holds a reference back
/// to its subscribers (see the pub/sub design note).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEvent {
    PositionUpdate { position: Position },
    PriceUpdate { mint: String, price: f64 },
}
