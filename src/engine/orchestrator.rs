use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{ActorConnection, ActorTradeUpdate, MindmapSnapshot, MindmapUpdate, TradeKind};

use super::admission::{FilterEngine, PredictionClient};
use super::trade_executor::TradeExecutor;

const SNAPSHOT_TTL_MINUTES: i64 = 30;

struct SnapshotEntry {
    snapshot: MindmapSnapshot,
    expires_at: DateTime<Utc>,
}

/// Ingests the inbound mindmap/actor-trade event stream, updates cached
/// snapshots, and hands approved tokens to TradeExecutor. Snapshot mutation
/// is copy-on-write: `ActorTradeUpdate` clones the snapshot before mutating
/// so a concurrent admission evaluation sees a stable view.
pub struct Orchestrator {
    snapshots: Arc<RwLock<HashMap<String, SnapshotEntry>>>,
    processed: Arc<Mutex<HashSet<String>>>,
    filter_engine: FilterEngine,
    prediction_client: Arc<PredictionClient>,
    trade_executor: Arc<TradeExecutor>,
    config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(
        filter_engine: FilterEngine,
        prediction_client: Arc<PredictionClient>,
        trade_executor: Arc<TradeExecutor>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            processed: Arc::new(Mutex::new(HashSet::new())),
            filter_engine,
            prediction_client,
            trade_executor,
            config,
        }
    }

    pub async fn handle_mindmap_update(&self, update: MindmapUpdate) {
        if update.token_mint == self.config.native_quote_token {
            return;
        }

        {
            let mut snapshots = self.snapshots.write().await;
            snapshots.insert(
                update.token_mint.clone(),
                SnapshotEntry {
                    snapshot: update.data.clone(),
                    expires_at: Utc::now() + Duration::minutes(SNAPSHOT_TTL_MINUTES),
                },
            );
        }

        if self.processed.lock().await.contains(&update.token_mint) {
            return;
        }

        self.evaluate_and_maybe_buy(&update.token_mint, &update.data).await;
    }

    pub async fn handle_actor_trade_update(&self, update: ActorTradeUpdate) {
        let trade = &update.trade;
        let affected: HashSet<String> = [
            trade.trade_data.mint.clone(),
            trade.trade_data.token_in.clone(),
            trade.trade_data.token_out.clone(),
        ]
        .into_iter()
        .collect();

        for token_mint in affected {
            let mut snapshots = self.snapshots.write().await;
            let entry = match snapshots.get(&token_mint) {
                Some(e) => e,
                None => continue,
            };

            // copy-on-write: mutate a clone, then write it back.
            let mut snapshot = entry.snapshot.clone();
            let now = Utc::now();
            let connection = snapshot
                .actor_connections
                .entry(trade.actor_id.clone())
                .or_insert_with(|| ActorConnection::fresh(now));

            connection.trade_count += 1;
            let delta = match trade.trade_data.trade_kind {
                TradeKind::Buy => trade.trade_data.amount_out,
                TradeKind::Sell => trade.trade_data.amount_in,
            };
            connection.total_volume += delta;
            connection.last_trade_time = trade.timestamp;
            connection.trade_kinds.insert(trade.trade_data.trade_kind);
            connection.influence_score = (10.0 * connection.trade_count as f64 + connection.total_volume / 1000.0).min(100.0);

            snapshot.network_metrics.total_trades += 1;
            snapshot.last_update = now;

            snapshots.insert(
                token_mint,
                SnapshotEntry { snapshot, expires_at: now + Duration::minutes(SNAPSHOT_TTL_MINUTES) },
            );
        }
    }

    async fn evaluate_and_maybe_buy(&self, token_mint: &str, snapshot: &MindmapSnapshot) {
        let filter_result = self.filter_engine.evaluate(token_mint, snapshot).await;
        if !filter_result.passed {
            debug!("token {} rejected by filter: {:?}", token_mint, filter_result.reason);
            return;
        }

        let prediction = match self.prediction_client.evaluate(token_mint).await {
            Some(outcome) => outcome,
            None => {
                debug!("token {} not approved by prediction service", token_mint);
                return;
            }
        };

        let sell_conditions = self.trade_executor.default_sell_conditions();
        match self
            .trade_executor
            .buy(
                "orchestrator",
                token_mint,
                self.config.trading_buy_amount,
                sell_conditions,
                prediction.class_label.clone(),
                self.config.simulation_enabled,
            )
            .await
        {
            Ok(position) => {
                info!("opened position {} for {} after admission approval", position.id, token_mint);
                self.processed.lock().await.insert(token_mint.to_string());
                self.snapshots.write().await.remove(token_mint);
            }
            Err(e) => {
                warn!("buy failed for {}: {}", token_mint, e);
            }
        }
    }
}
