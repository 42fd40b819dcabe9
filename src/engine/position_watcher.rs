use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::models::{Position, PositionStatus};
use crate::store::{PositionStore, PriceCache};

use super::trade_executor::TradeExecutor;

const TICK_PERIOD_MS: u64 = 100;
const HEARTBEAT_PERIOD_SECS: u64 = 60;
const CLOSE_PRIORITY_FEE: f64 = 0.0005;

enum ExitReason {
    StopLoss,
    TakeProfit,
    SteppedStop,
    TrailingStop,
    MaxHold,
}

impl ExitReason {
    fn label(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop loss",
            ExitReason::TakeProfit => "take profit",
            ExitReason::SteppedStop => "stepped stop",
            ExitReason::TrailingStop => "trailing stop",
            ExitReason::MaxHold => "max hold time reached",
        }
    }
}

/// Continuous loop over open positions: registers price-monitor interest,
/// applies the stepped trailing-stop state machine, evaluates exit
/// conditions in the fixed order the design calls for, and drives the swap
/// backend to close.
pub struct PositionWatcher {
    position_store: Arc<PositionStore>,
    price_cache: Arc<PriceCache>,
    trade_executor: Arc<TradeExecutor>,
    running: Arc<RwLock<bool>>,
    handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl PositionWatcher {
    pub fn new(position_store: Arc<PositionStore>, price_cache: Arc<PriceCache>, trade_executor: Arc<TradeExecutor>) -> Self {
        Self {
            position_store,
            price_cache,
            trade_executor,
            running: Arc::new(RwLock::new(false)),
            handle: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn start(self: Arc<Self>) {
        let mut running = self.running.write().await;
        if *running {
            warn!("position watcher start requested but already running");
            return;
        }
        *running = true;
        drop(running);

        let self_clone = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(tokio::time::Duration::from_millis(TICK_PERIOD_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_heartbeat = Utc::now();
            loop {
                if !*self_clone.running.read().await {
                    break;
                }
                ticker.tick().await;
                self_clone.tick().await;

                if Utc::now().signed_duration_since(last_heartbeat) >= Duration::seconds(HEARTBEAT_PERIOD_SECS as i64) {
                    let open = self_clone.position_store.list_open(None).await;
                    info!("position watcher heartbeat: {} open positions", open.len());
                    last_heartbeat = Utc::now();
                }
            }
        });
        *self.handle.lock().await = Some(handle);
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn tick(&self) {
        let open_positions = self.position_store.list_open(None).await;
        for position in &open_positions {
            self.price_cache.add_interest(&position.token_mint).await;
        }

        for position in open_positions {
            {
                let mut in_flight = self.in_flight.lock().await;
                if in_flight.contains(&position.id) {
                    continue;
                }
                in_flight.insert(position.id.clone());
            }
            self.process_position(position).await;
        }
    }

    async fn process_position(&self, mut position: Position) {
        let id = position.id.clone();

        // (a) max-hold short-circuit runs before price fetch.
        if let Some(max_minutes) = position.sell_conditions.max_hold_minutes {
            if position.hold_duration() >= Duration::minutes(max_minutes) {
                let price = self.price_cache.get_price(&position.token_mint).await.unwrap_or(0.0);
                self.execute_exit(position, ExitReason::MaxHold, price).await;
                self.in_flight.lock().await.remove(&id);
                return;
            }
        }

        // (b) price fetch.
        let price = match self.price_cache.get_price(&position.token_mint).await {
            Some(p) => p,
            None => {
                if self.price_cache.has_error(&position.token_mint).await {
                    if let Ok(Some(closed)) = self
                        .position_store
                        .force_close(&id, 0.0, "token pricing error", PositionStatus::Failed)
                        .await
                    {
                        warn!("force-closed position {} due to persistent pricing error", closed.id);
                    }
                }
                self.in_flight.lock().await.remove(&id);
                return;
            }
        };

        // (c) extend high/low, update current price.
        position.apply_price(price);

        // (d) stepped trailing-stop state machine.
        self.advance_trailing_stop(&mut position, price);

        // (e) persist.
        if let Err(e) = self.position_store.replace(position.clone()).await {
            error!("failed to persist position {}: {}", id, e);
        }

        // (f) exit evaluation, first match wins.
        if let Some(reason) = self.evaluate_exit(&position, price) {
            self.execute_exit(position, reason, price).await;
        }

        self.in_flight.lock().await.remove(&id);
    }

    fn advance_trailing_stop(&self, position: &mut Position, price: f64) {
        let (take_profit_pct, trailing_pct) = match (
            position.sell_conditions.take_profit_pct,
            position.sell_conditions.trailing_stop_pct,
        ) {
            (Some(tp), Some(ts)) => (tp, ts),
            _ => return,
        };

        if !position.sell_conditions.trailing_stop_activated {
            if position.pct_change() >= take_profit_pct {
                position.sell_conditions.trailing_stop_activated = true;
                position.sell_conditions.step_level = 1;
                position.sell_conditions.curr_stop_price = Some(price * (1.0 - trailing_pct / 100.0));
                position.sell_conditions.next_target_price = Some(price * (1.0 + take_profit_pct / 100.0));
            }
        } else if let Some(next_target) = position.sell_conditions.next_target_price {
            if price >= next_target {
                position.sell_conditions.step_level += 1;
                position.sell_conditions.curr_stop_price = Some(price * (1.0 - trailing_pct / 100.0));
                position.sell_conditions.next_target_price = Some(price * (1.0 + take_profit_pct / 100.0));
            }
        }
    }

    fn evaluate_exit(&self, position: &Position, price: f64) -> Option<ExitReason> {
        let pct_change = position.pct_change();
        let sc = &position.sell_conditions;

        if let Some(stop_loss) = sc.stop_loss_pct {
            if pct_change <= -stop_loss {
                return Some(ExitReason::StopLoss);
            }
        }

        if let Some(take_profit) = sc.take_profit_pct {
            if sc.trailing_stop_pct.is_none() && pct_change >= take_profit {
                return Some(ExitReason::TakeProfit);
            }
        }

        if sc.trailing_stop_activated {
            if let Some(curr_stop) = sc.curr_stop_price {
                if price <= curr_stop {
                    return Some(ExitReason::SteppedStop);
                }
            }
        }

        if let Some(trailing_pct) = sc.trailing_stop_pct {
            if sc.take_profit_pct.is_none() {
                let drawdown = (price - position.highest_price) / position.highest_price * 100.0;
                if drawdown <= -trailing_pct {
                    return Some(ExitReason::TrailingStop);
                }
            }
        }

        None
    }

    async fn execute_exit(&self, position: Position, reason: ExitReason, price: f64) {
        let reason_label = reason.label().to_string();
        info!("closing position {} for {} due to: {}", position.id, position.token_mint, reason_label);

        if position.is_simulation {
            if let Err(e) = self
                .position_store
                .close(&position.id, price, position.entry_amount, None, Some(reason_label))
                .await
            {
                error!("failed to close simulated position {}: {}", position.id, e);
            }
            return;
        }

        match self.trade_executor.sell(&position.token_mint, position.entry_amount, CLOSE_PRIORITY_FEE).await {
            Ok(outcome) if outcome.success => {
                if let Err(e) = self
                    .position_store
                    .close(
                        &position.id,
                        outcome.execution_price,
                        outcome.amount_out,
                        Some(outcome.tx_id),
                        Some(reason_label),
                    )
                    .await
                {
                    error!("failed to close position {}: {}", position.id, e);
                }
            }
            Ok(outcome) => {
                warn!("sell rejected for position {}: {}", position.id, outcome.message);
                if outcome.message.to_lowercase().contains("no balance")
                    || outcome.message.to_lowercase().contains("insufficient funds")
                {
                    let _ = self
                        .position_store
                        .force_close(&position.id, price, &outcome.message, PositionStatus::Failed)
                        .await;
                }
            }
            Err(e) => {
                warn!("sell call errored for position {}: {}, will retry next tick", position.id, e);
                if e.to_string().to_lowercase().contains("no balance")
                    || e.to_string().to_lowercase().contains("insufficient funds")
                {
                    let _ = self
                        .position_store
                        .force_close(&position.id, price, &e.to_string(), PositionStatus::Failed)
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SellConditions;

    fn watcher_stub() -> PositionWatcher {
        PositionWatcher {
            position_store: Arc::new(PositionStore::new()),
            price_cache: Arc::new(PriceCache::new()),
            trade_executor: Arc::new(TradeExecutor::new(
                Arc::new(crate::external::HttpSwapBackend::new("http://localhost".to_string())),
                Arc::new(PositionStore::new()),
                Arc::new(test_config()),
            )),
            running: Arc::new(RwLock::new(false)),
            handle: Arc::new(Mutex::new(None)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn test_config() -> crate::config::Config {
        crate::config::Config {
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
            risk_max_hold_minutes: Some(240),
            trading_buy_amount: 0.1,
            trading_allow_additional_entries: false,
            trading_max_entries_per_token: None,
            logging_level: "info".to_string(),
            simulation_enabled: true,
            simulation_initial_balance: 10.0,
            native_quote_token: "NATIVE".to_string(),
            dashboard_bind_addr: "0.0.0.0:3000".to_string(),
        }
    }

    fn make_position(take_profit: f64, trailing: f64) -> Position {
        Position::new_open(
            "agent1",
            "tokenX",
            true,
            100.0,
            100.0,
            None,
            SellConditions {
                take_profit_pct: Some(take_profit),
                stop_loss_pct: Some(20.0),
                trailing_stop_pct: Some(trailing),
                trailing_stop_activated: false,
                max_hold_minutes: None,
                step_level: 0,
                next_target_price: None,
                curr_stop_price: None,
            },
            None,
        )
    }

    #[test]
    fn stepped_trailing_matches_scenario_s1() {
        let watcher = watcher_stub();
        let mut position = make_position(50.0, 10.0);

        position.apply_price(140.0);
        watcher.advance_trailing_stop(&mut position, 140.0);
        assert!(!position.sell_conditions.trailing_stop_activated);

        position.apply_price(150.0);
        watcher.advance_trailing_stop(&mut position, 150.0);
        assert!(position.sell_conditions.trailing_stop_activated);
        assert_eq!(position.sell_conditions.step_level, 1);
        assert_eq!(position.sell_conditions.curr_stop_price, Some(135.0));
        assert_eq!(position.sell_conditions.next_target_price, Some(225.0));

        position.apply_price(200.0);
        watcher.advance_trailing_stop(&mut position, 200.0);
        assert_eq!(position.sell_conditions.step_level, 1);

        position.apply_price(230.0);
        watcher.advance_trailing_stop(&mut position, 230.0);
        assert_eq!(position.sell_conditions.step_level, 2);
        assert_eq!(position.sell_conditions.curr_stop_price, Some(207.0));
        assert_eq!(position.sell_conditions.next_target_price, Some(345.0));
    }

    #[test]
    fn stop_loss_triggers_before_other_exits() {
        let watcher = watcher_stub();
        let mut position = make_position(50.0, 10.0);
        position.apply_price(80.0);
        let reason = watcher.evaluate_exit(&position, 80.0);
        assert!(matches!(reason, Some(ExitReason::StopLoss)));
    }

    #[test]
    fn stepped_stop_triggers_after_activation() {
        let watcher = watcher_stub();
        let mut position = make_position(50.0, 10.0);
        position.apply_price(150.0);
        watcher.advance_trailing_stop(&mut position, 150.0);
        position.apply_price(134.0);
        let reason = watcher.evaluate_exit(&position, 134.0);
        assert!(matches!(reason, Some(ExitReason::SteppedStop)));
    }
}
