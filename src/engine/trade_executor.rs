use chrono::{DateTime, Duration, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::EngineError;
use crate::external::{SwapBackend, SwapOutcome};
use crate::models::{Position, SellConditions};
use crate::store::PositionStore;

const FEE_SAMPLE_WINDOW: usize = 20;
const FEE_PERCENTILE: f64 = 0.75;
const MIN_PRIORITY_FEE: f64 = 0.0001;
const MAX_PRIORITY_FEE: f64 = 0.01;
const FEE_CACHE_TTL_SECS: i64 = 5;
const LOCK_TTL_SECS: i64 = 60;

/// Recent priority-fee samples plus a short-lived cached percentile, so
/// repeated buys within the same few seconds don't recompute the percentile
/// from scratch every time.
struct FeeTracker {
    samples: VecDeque<f64>,
    cached: Option<(f64, DateTime<Utc>)>,
}

impl FeeTracker {
    fn new() -> Self {
        Self { samples: VecDeque::with_capacity(FEE_SAMPLE_WINDOW), cached: None }
    }

    fn record(&mut self, sample: f64) {
        if self.samples.len() == FEE_SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        self.cached = None;
    }

    fn priority_fee(&mut self) -> f64 {
        if let Some((fee, at)) = self.cached {
            if Utc::now() < at + Duration::seconds(FEE_CACHE_TTL_SECS) {
                return fee;
            }
        }
        let mut nonzero: Vec<f64> = self.samples.iter().copied().filter(|v| *v > 0.0).collect();
        nonzero.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let fee = if nonzero.is_empty() {
            MIN_PRIORITY_FEE
        } else {
            let idx = ((nonzero.len() as f64 - 1.0) * FEE_PERCENTILE).round() as usize;
            nonzero[idx.min(nonzero.len() - 1)]
        }
        .clamp(MIN_PRIORITY_FEE, MAX_PRIORITY_FEE);
        self.cached = Some((fee, Utc::now()));
        fee
    }
}

/// Single-buy operation with fingerprint-level duplicate prevention: an
/// in-process lock set stands in for the cross-process distributed lock the
/// design calls for (see the distributed-vs-in-process lock note).
pub struct TradeExecutor {
    swap_backend: Arc<dyn SwapBackend>,
    position_store: Arc<PositionStore>,
    config: Arc<Config>,
    locks: Arc<Mutex<HashSet<String>>>,
    lock_expiry: Arc<Mutex<std::collections::HashMap<String, DateTime<Utc>>>>,
    fee_tracker: Arc<RwLock<FeeTracker>>,
    processed: Arc<RwLock<HashSet<String>>>,
}

impl TradeExecutor {
    pub fn new(swap_backend: Arc<dyn SwapBackend>, position_store: Arc<PositionStore>, config: Arc<Config>) -> Self {
        Self {
            swap_backend,
            position_store,
            config,
            locks: Arc::new(Mutex::new(HashSet::new())),
            lock_expiry: Arc::new(Mutex::new(std::collections::HashMap::new())),
            fee_tracker: Arc::new(RwLock::new(FeeTracker::new())),
            processed: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub async fn has_processed(&self, token_mint: &str) -> bool {
        self.processed.read().await.contains(token_mint)
    }

    async fn acquire_lock(&self, token_mint: &str) -> bool {
        let mut locks = self.locks.lock().await;
        let mut expiry = self.lock_expiry.lock().await;
        let now = Utc::now();
        if let Some(expires_at) = expiry.get(token_mint) {
            if now < *expires_at {
                return false;
            }
        }
        locks.insert(token_mint.to_string());
        expiry.insert(token_mint.to_string(), now + Duration::seconds(LOCK_TTL_SECS));
        true
    }

    async fn release_lock(&self, token_mint: &str) {
        self.locks.lock().await.remove(token_mint);
        self.lock_expiry.lock().await.remove(token_mint);
    }

    pub async fn record_fee_sample(&self, sample: f64) {
        self.fee_tracker.write().await.record(sample);
    }

    async fn priority_fee(&self) -> f64 {
        self.fee_tracker.write().await.priority_fee()
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn buy(
        &self,
        agent_id: &str,
        token_mint: &str,
        amount: f64,
        sell_conditions: SellConditions,
        prediction: Option<String>,
        is_simulation: bool,
    ) -> Result<Position, EngineError> {
        if !self.acquire_lock(token_mint).await {
            return Err(EngineError::TradeExecutionError(format!(
                "duplicate buy suppressed for {}",
                token_mint
            )));
        }

        let result = self.buy_locked(agent_id, token_mint, amount, sell_conditions, prediction, is_simulation).await;
        self.release_lock(token_mint).await;
        result
    }

    async fn buy_locked(
        &self,
        agent_id: &str,
        token_mint: &str,
        amount: f64,
        sell_conditions: SellConditions,
        prediction: Option<String>,
        is_simulation: bool,
    ) -> Result<Position, EngineError> {
        if amount <= 0.0 {
            return Err(EngineError::ValidationError("buy amount must be positive".to_string()));
        }

        let priority_fee = self.priority_fee().await;
        let slippage_bps = 100;

        let outcome: SwapOutcome = self
            .swap_backend
            .buy(token_mint, amount, slippage_bps, priority_fee)
            .await?;

        if !outcome.success {
            return Err(EngineError::TradeExecutionError(format!(
                "swap backend rejected buy for {}: {}",
                token_mint, outcome.message
            )));
        }

        let position = Position::new_open(
            agent_id,
            token_mint,
            is_simulation,
            outcome.execution_price,
            outcome.amount_out,
            Some(outcome.tx_id.clone()),
            sell_conditions,
            prediction,
        );
        let stored = self
            .position_store
            .create_open(position)
            .await
            .map_err(|e| EngineError::StoreError(e.to_string()))?;

        self.processed.write().await.insert(token_mint.to_string());

        info!(
            "opened position {} for {} at {} (amount {})",
            stored.id, token_mint, stored.entry_price, stored.entry_amount
        );
        Ok(stored)
    }

    /// Default sell-condition template from configuration, applied to
    /// positions opened without an explicit per-trade override.
    pub fn default_sell_conditions(&self) -> SellConditions {
        SellConditions {
            take_profit_pct: Some(self.config.risk_take_profit_pct),
            stop_loss_pct: Some(self.config.risk_stop_loss_pct),
            trailing_stop_pct: if self.config.risk_trailing_stop_enabled {
                self.config.risk_trailing_stop_pct
            } else {
                None
            },
            trailing_stop_activated: false,
            max_hold_minutes: self.config.risk_max_hold_minutes,
            step_level: 0,
            next_target_price: None,
            curr_stop_price: None,
        }
    }

    pub async fn sell(
        &self,
        token_mint: &str,
        amount: f64,
        priority_fee: f64,
    ) -> Result<SwapOutcome, EngineError> {
        let slippage_bps = 100;
        let outcome = self.swap_backend.sell(token_mint, amount, slippage_bps, priority_fee).await?;
        if !outcome.success {
            warn!("swap backend rejected sell for {}: {}", token_mint, outcome.message);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Swap backend stub that counts invocations and sleeps briefly, widening
    /// the race window so a duplicate concurrent buy would be observable if
    /// the lock didn't serialize it.
    struct CountingSwapBackend {
        calls: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl SwapBackend for CountingSwapBackend {
        async fn buy(&self, _token_mint: &str, _amount: f64, _slippage_bps: u32, _priority_fee: f64) -> Result<SwapOutcome, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            Ok(SwapOutcome {
                success: true,
                execution_price: 1.0,
                amount_out: 100.0,
                tx_id: "tx1".to_string(),
                message: String::new(),
            })
        }

        async fn sell(&self, _token_mint: &str, _amount: f64, _slippage_bps: u32, _priority_fee: f64) -> Result<SwapOutcome, EngineError> {
            unreachable!("not exercised by this test")
        }
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            api_server_url: "http://localhost".to_string(),
            api_key: None,
            store_url: None,
            monitoring_mode: "all".to_string(),
            filter_min_trade_volume: 0.0,
            filter_min_connected_actors: 0,
            filter_min_influence_score: 0.0,
            filter_min_total_trades: 0,
            filter_min_viral_velocity: None,
            filter_require_smart_money: false,
            filter_min_consensus_score: None,
            filter_min_market_cap_usd: None,
            filter_min_liquidity_usd: None,
            risk_take_profit_pct: 50.0,
            risk_stop_loss_pct: 20.0,
            risk_trailing_stop_pct: Some(10.0),
            risk_trailing_stop_enabled: true,
            risk_max_hold_minutes: None,
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
    async fn concurrent_buys_for_the_same_token_only_execute_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let backend = Arc::new(CountingSwapBackend { calls: calls.clone() });
        let store = Arc::new(PositionStore::new());
        let executor = Arc::new(TradeExecutor::new(backend, store.clone(), test_config()));

        let e1 = executor.clone();
        let e2 = executor.clone();
        let (r1, r2) = tokio::join!(
            e1.buy("agent1", "tokenX", 1.0, e1.default_sell_conditions(), None, true),
            e2.buy("agent1", "tokenX", 1.0, e2.default_sell_conditions(), None, true),
        );

        let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        let duplicates = [&r1, &r2]
            .iter()
            .filter(|r| matches!(r, Err(EngineError::TradeExecutionError(msg)) if msg.contains("duplicate")))
            .count();

        assert_eq!(successes, 1, "exactly one concurrent buy should succeed");
        assert_eq!(duplicates, 1, "the other should be rejected as a duplicate");
        assert_eq!(calls.load(Ordering::SeqCst), 1, "the swap backend must be called exactly once");
        assert_eq!(store.list_open(None).await.len(), 1);
    }

    #[test]
    fn fee_tracker_defaults_to_minimum_when_empty() {
        let mut tracker = FeeTracker::new();
        assert_eq!(tracker.priority_fee(), MIN_PRIORITY_FEE);
    }

    #[test]
    fn fee_tracker_skips_zero_samples() {
        let mut tracker = FeeTracker::new();
        for _ in 0..5 {
            tracker.record(0.0);
        }
        tracker.record(0.005);
        assert_eq!(tracker.priority_fee(), 0.005);
    }

    #[test]
    fn fee_tracker_clamps_to_bounds() {
        let mut tracker = FeeTracker::new();
        tracker.record(10.0);
        assert_eq!(tracker.priority_fee(), MAX_PRIORITY_FEE);
    }
}
