use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::external::{MarketDataProvider, PredictionService};
use crate::models::{FilterMetrics, FilterResult, FilterSignal, MindmapSnapshot, PredictionOutcome};

const MAX_PREDICTION_RETRIES: u32 = 3;
const RETRY_COUNTER_TTL_MINUTES: i64 = 60;
const PREDICTION_FAILED_TTL_MINUTES: i64 = 60;

/// Prediction-service call retry envelope: up to 3 attempts, exponential
/// backoff with jitter, capped at 10s between attempts.
const PREDICTION_CALL_MAX_ATTEMPTS: u32 = 3;
const PREDICTION_CALL_BASE_DELAY_MS: u64 = 250;
const PREDICTION_CALL_MAX_DELAY_MS: u64 = 10_000;

/// Pure metric computation and threshold gating over a mindmap snapshot.
/// Holds the configured thresholds plus the optional on-chain market-data
/// collaborator used for the market-cap/liquidity verification step.
pub struct FilterEngine {
    config: Arc<Config>,
    market_data: Option<Arc<dyn MarketDataProvider>>,
}

impl FilterEngine {
    pub fn new(config: Arc<Config>, market_data: Option<Arc<dyn MarketDataProvider>>) -> Self {
        Self { config, market_data }
    }

    pub async fn evaluate(&self, token_mint: &str, snapshot: &MindmapSnapshot) -> FilterResult {
        if token_mint == self.config.native_quote_token {
            return FilterResult {
                passed: false,
                reason: Some("native quote token is never tradeable".to_string()),
                metrics: FilterMetrics::default(),
                signals: Default::default(),
            };
        }

        let connections = &snapshot.actor_connections;
        let connected_actors = connections.len() as u32;
        let total_volume: f64 = connections.values().map(|c| c.total_volume).sum();
        let avg_influence = if connected_actors > 0 {
            connections.values().map(|c| c.influence_score).sum::<f64>() / connected_actors as f64
        } else {
            0.0
        };
        let total_trades = snapshot.network_metrics.total_trades;
        let now = Utc::now();
        let viral_velocity = connections
            .values()
            .filter(|c| now.signed_duration_since(c.last_trade_time) < Duration::seconds(60))
            .count() as u32;
        let weighted_volume: f64 = connections
            .values()
            .map(|c| c.total_volume * (c.influence_score / 100.0))
            .sum();
        let consensus_score = if connected_actors > 0 {
            let buyers = connections
                .values()
                .filter(|c| c.trade_kinds.contains(&crate::models::TradeKind::Buy))
                .count();
            100.0 * buyers as f64 / connected_actors as f64
        } else {
            0.0
        };

        let metrics = FilterMetrics {
            total_volume,
            connected_actors,
            avg_influence,
            total_trades,
            viral_velocity,
            weighted_volume,
            consensus_score,
        };

        let mut signals = std::collections::HashSet::new();
        if let Some(min_velocity) = self.config.filter_min_viral_velocity {
            if viral_velocity >= min_velocity {
                signals.insert(FilterSignal::ViralSpike);
            }
        }
        if self.config.filter_require_smart_money && total_volume > 0.0 && weighted_volume > 0.6 * total_volume {
            signals.insert(FilterSignal::SmartMoney);
        }
        if let Some(min_consensus) = self.config.filter_min_consensus_score {
            if consensus_score >= min_consensus && connected_actors >= 3 {
                signals.insert(FilterSignal::HighConsensus);
            }
        }

        if avg_influence < self.config.filter_min_influence_score {
            return FilterResult {
                passed: false,
                reason: Some("influence floor not met".to_string()),
                metrics,
                signals,
            };
        }

        if signals.is_empty() {
            if total_volume < self.config.filter_min_trade_volume {
                return FilterResult {
                    passed: false,
                    reason: Some("trade volume below threshold".to_string()),
                    metrics,
                    signals,
                };
            }
            if connected_actors < self.config.filter_min_connected_actors {
                return FilterResult {
                    passed: false,
                    reason: Some("connected actors below threshold".to_string()),
                    metrics,
                    signals,
                };
            }
            if total_trades < self.config.filter_min_total_trades as u64 {
                return FilterResult {
                    passed: false,
                    reason: Some("total trades below threshold".to_string()),
                    metrics,
                    signals,
                };
            }
        }

        if let Some(reason) = self.verify_on_chain(token_mint).await {
            return FilterResult { passed: false, reason: Some(reason), metrics, signals };
        }

        FilterResult { passed: true, reason: None, metrics, signals }
    }

    /// Optional market-cap/liquidity verification against the on-chain
    /// market-data provider. Returns `None` when the check is not
    /// configured or passes; `Some(reason)` otherwise.
    async fn verify_on_chain(&self, token_mint: &str) -> Option<String> {
        if self.config.filter_min_market_cap_usd.is_none() && self.config.filter_min_liquidity_usd.is_none() {
            return None;
        }
        let provider = match self.market_data.as_ref() {
            Some(provider) => provider,
            None => return Some("on-chain verification failed".to_string()),
        };

        let data = match provider.market_data(token_mint).await {
            Ok(data) => data,
            Err(e) => {
                warn!("on-chain verification failed for {}: {}", token_mint, e);
                return Some("on-chain verification failed".to_string());
            }
        };

        if let Some(min_mcap) = self.config.filter_min_market_cap_usd {
            if data.market_cap < min_mcap {
                return Some("market cap below threshold".to_string());
            }
        }
        if let Some(min_liquidity) = self.config.filter_min_liquidity_usd {
            if data.liquidity < min_liquidity {
                return Some("liquidity below threshold".to_string());
            }
        }
        None
    }
}

/// Confidence gate in front of the ML prediction service, with bounded
/// per-token retries. After `MAX_PREDICTION_RETRIES` consecutive non-approvals
/// the token is marked permanently failed for `PREDICTION_FAILED_TTL_MINUTES`
/// and short-circuits without calling the service again.
pub struct PredictionClient {
    service: Arc<dyn PredictionService>,
    retry_counts: Arc<RwLock<HashMap<String, (u32, DateTime<Utc>)>>>,
    failed: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl PredictionClient {
    pub fn new(service: Arc<dyn PredictionService>) -> Self {
        Self {
            service,
            retry_counts: Arc::new(RwLock::new(HashMap::new())),
            failed: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn evaluate(&self, token_mint: &str) -> Option<PredictionOutcome> {
        {
            let failed = self.failed.read().await;
            if let Some(expires_at) = failed.get(token_mint) {
                if Utc::now() < *expires_at {
                    debug!("token {} permanently failed prediction, short-circuiting", token_mint);
                    return None;
                }
            }
        }

        let outcome = match self.predict_with_retry(token_mint).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("prediction call failed for {} after retries: {}", token_mint, e);
                self.record_non_approval(token_mint).await;
                return None;
            }
        };

        if outcome.approved {
            self.clear(token_mint).await;
            Some(outcome)
        } else {
            self.record_non_approval(token_mint).await;
            None
        }
    }

    async fn record_non_approval(&self, token_mint: &str) {
        let mut counts = self.retry_counts.write().await;
        let now = Utc::now();
        let entry = counts.entry(token_mint.to_string()).or_insert((0, now));
        if now > entry.1 + Duration::minutes(RETRY_COUNTER_TTL_MINUTES) {
            *entry = (0, now);
        }
        entry.0 += 1;
        entry.1 = now;
        if entry.0 >= MAX_PREDICTION_RETRIES {
            info!("token {} permanently failed prediction after {} attempts", token_mint, entry.0);
            drop(counts);
            self.failed.write().await.insert(
                token_mint.to_string(),
                now + Duration::minutes(PREDICTION_FAILED_TTL_MINUTES),
            );
        }
    }

    async fn clear(&self, token_mint: &str) {
        self.retry_counts.write().await.remove(token_mint);
        self.failed.write().await.remove(token_mint);
    }

    /// Calls the prediction service with exponential backoff and jitter,
    /// retrying only retryable errors up to `PREDICTION_CALL_MAX_ATTEMPTS`
    /// times with the delay capped at `PREDICTION_CALL_MAX_DELAY_MS`.
    async fn predict_with_retry(&self, token_mint: &str) -> Result<PredictionOutcome, crate::error::EngineError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.service.predict(token_mint).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt < PREDICTION_CALL_MAX_ATTEMPTS && e.is_retryable() => {
                    let backoff_ms = (PREDICTION_CALL_BASE_DELAY_MS * 2u64.pow(attempt - 1))
                        .min(PREDICTION_CALL_MAX_DELAY_MS);
                    let jitter_ms = rand::thread_rng().gen_range(0..=backoff_ms / 4 + 1);
                    debug!(
                        "prediction call attempt {} failed for {}: {}, retrying in {}ms",
                        attempt, token_mint, e, backoff_ms + jitter_ms
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms + jitter_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActorConnection, TradeKind};

    fn make_config() -> Arc<Config> {
        Arc::new(Config {
            api_server_url: "http://localhost".to_string(),
            api_key: None,
            store_url: None,
            monitoring_mode: "all".to_string(),
            filter_min_trade_volume: 10000.0,
            filter_min_connected_actors: 5,
            filter_min_influence_score: 50.0,
            filter_min_total_trades: 10,
            filter_min_viral_velocity: Some(3),
            filter_require_smart_money: false,
            filter_min_consensus_score: Some(60.0),
            filter_min_market_cap_usd: None,
            filter_min_liquidity_usd: None,
            risk_take_profit_pct: 50.0,
            risk_stop_loss_pct: 20.0,
            risk_trailing_stop_pct: Some(10.0),
            risk_trailing_stop_enabled: true,
            risk_max_hold_minutes: Some(240),
            trading_buy_amount: 0.1,
            trading_allow_additional_entries: false,
            trading_max_entries_per_token: None,
            logging_level: "info".to_string(),
            simulation_enabled: true,
            simulation_initial_balance: 10.0,
            native_quote_token: "NATIVE".to_string(),
            dashboard_bind_addr: "0.0.0.0:3000".to_string(),
        })
    }

    #[tokio::test]
    async fn viral_spike_overrides_volume_threshold() {
        let config = make_config();
        let engine = FilterEngine::new(config.clone(), None);
        let mut snapshot = MindmapSnapshot::new("tokenX");
        for i in 0..5 {
            let mut conn = ActorConnection::fresh(Utc::now());
            conn.influence_score = 60.0;
            conn.total_volume = 100.0;
            conn.trade_kinds.insert(TradeKind::Buy);
            snapshot.actor_connections.insert(format!("actor{}", i), conn);
        }
        snapshot.network_metrics.total_trades = 5;

        let result = engine.evaluate("tokenX", &snapshot).await;
        assert!(result.passed);
        assert!(result.signals.contains(&FilterSignal::ViralSpike));
        assert!(result.metrics.total_volume < config.filter_min_trade_volume);
    }

    #[tokio::test]
    async fn zero_connections_rejects_on_influence_floor() {
        let config = make_config();
        let engine = FilterEngine::new(config, None);
        let snapshot = MindmapSnapshot::new("tokenX");
        let result = engine.evaluate("tokenX", &snapshot).await;
        assert!(!result.passed);
        assert_eq!(result.metrics.avg_influence, 0.0);
        assert_eq!(result.metrics.consensus_score, 0.0);
    }

    #[tokio::test]
    async fn native_quote_token_always_rejected() {
        let config = make_config();
        let engine = FilterEngine::new(config.clone(), None);
        let snapshot = MindmapSnapshot::new(&config.native_quote_token);
        let result = engine.evaluate(&config.native_quote_token, &snapshot).await;
        assert!(!result.passed);
    }

    struct AlwaysRejectsMarketCap;

    #[async_trait::async_trait]
    impl MarketDataProvider for AlwaysRejectsMarketCap {
        async fn market_data(&self, _token_mint: &str) -> Result<crate::external::MarketData, crate::error::EngineError> {
            Err(crate::error::EngineError::OracleError("unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn on_chain_check_rejects_when_provider_errors() {
        let mut config = (*make_config()).clone();
        config.filter_min_market_cap_usd = Some(50_000.0);
        let config = Arc::new(config);
        let engine = FilterEngine::new(config, Some(Arc::new(AlwaysRejectsMarketCap)));

        let mut snapshot = MindmapSnapshot::new("tokenX");
        for i in 0..5 {
            let mut conn = ActorConnection::fresh(Utc::now());
            conn.influence_score = 60.0;
            conn.total_volume = 3000.0;
            conn.trade_kinds.insert(TradeKind::Buy);
            snapshot.actor_connections.insert(format!("actor{}", i), conn);
        }
        snapshot.network_metrics.total_trades = 20;

        let result = engine.evaluate("tokenX", &snapshot).await;
        assert!(!result.passed);
        assert_eq!(result.reason.as_deref(), Some("on-chain verification failed"));
    }

    struct AlwaysRejects;

    #[async_trait::async_trait]
    impl PredictionService for AlwaysRejects {
        async fn predict(&self, _token_mint: &str) -> Result<PredictionOutcome, crate::error::EngineError> {
            Ok(PredictionOutcome {
                task_type: "buy".to_string(),
                class_label: Some("bad".to_string()),
                probability: Some(0.1),
                value: None,
                approved: false,
                confidence: 10.0,
            })
        }
    }

    #[tokio::test]
    async fn prediction_short_circuits_after_max_retries() {
        let client = PredictionClient::new(Arc::new(AlwaysRejects));
        for _ in 0..MAX_PREDICTION_RETRIES {
            assert!(client.evaluate("tokenX").await.is_none());
        }
        let before = client.retry_counts.read().await.get("tokenX").cloned();
        assert!(client.evaluate("tokenX").await.is_none());
        let after = client.retry_counts.read().await.get("tokenX").cloned();
        // Count should not have advanced past max once permanently failed.
        assert_eq!(before.map(|c| c.0), after.map(|c| c.0));
    }
}
