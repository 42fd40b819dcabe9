//! Read-only dashboard surface: REST endpoints over position/price state plus
//! a WebSocket feed subscribed to PositionStore's broadcast channel.

pub mod handlers;
pub mod routes;
pub mod server;
pub mod websocket;

use std::sync::Arc;

use crate::config::Config;
use crate::engine::paper_ledger::PaperLedger;
use crate::store::{PositionStore, PriceCache};

/// Shared application state for all dashboard handlers. Holds only the
/// read-side collaborators; it never reaches back into TradeExecutor.
#[derive(Clone)]
pub struct AppState {
    pub position_store: Arc<PositionStore>,
    pub price_cache: Arc<PriceCache>,
    pub paper_ledger: Arc<PaperLedger>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(
        position_store: Arc<PositionStore>,
        price_cache: Arc<PriceCache>,
        paper_ledger: Arc<PaperLedger>,
        config: Arc<Config>,
    ) -> Self {
        Self { position_store, price_cache, paper_ledger, config }
    }
}
