use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod error;
mod external;
mod models;
mod store;
mod web;

use crate::config::Config;
use crate::engine::{EventListener, FilterEngine, PaperLedger, PositionWatcher, PredictionClient, PriceMonitor, TradeExecutor};
use crate::engine::orchestrator::Orchestrator;
use crate::external::{HttpMarketDataProvider, HttpPredictionService, HttpPriceOracle, HttpSwapBackend};
use crate::store::{PositionStore, PriceCache};

/// Hard deadline for draining in-flight work on shutdown.
const SHUTDOWN_DRAIN_DEADLINE_SECS: u64 = 10;

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_logging();

    let command = std::env::args().nth(1).unwrap_or_else(|| "start".to_string());

    let exit_code = match command.as_str() {
        "start" => run_start().await,
        "stop" => run_stop(),
        "reset-paper-trading" => run_reset_paper_trading().await,
        "verify" => run_verify(),
        other => {
            error!("unrecognized command '{}'; expected start|stop|reset-paper-trading|verify", other);
            1
        }
    };

    std::process::exit(exit_code);
}

fn run_verify() -> i32 {
    match Config::verify() {
        Ok(()) => {
            info!("configuration valid");
            0
        }
        Err(e) => {
            error!("configuration invalid: {}", e);
            1
        }
    }
}

fn run_stop() -> i32 {
    warn!(
        "'stop' has no out-of-process control channel in this single-process engine; \
         send Ctrl-C to the running 'start' process instead"
    );
    0
}

async fn run_reset_paper_trading() -> i32 {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {}", e);
            return 1;
        }
    };

    let position_store = PositionStore::new();
    if let Err(e) = position_store.load().await {
        error!("failed to load positions: {}", e);
        return 1;
    }

    match position_store.delete_simulation_positions().await {
        Ok(count) => info!("cleared {} simulation-tagged positions", count),
        Err(e) => {
            error!("failed to clear simulation positions: {}", e);
            return 1;
        }
    }

    let ledger = PaperLedger::new(&config.native_quote_token, config.simulation_initial_balance);
    ledger.reset().await;
    info!(
        "paper trading reset: balance set to {} {}",
        config.simulation_initial_balance, config.native_quote_token
    );
    0
}

async fn run_start() -> i32 {
    let config = match Config::load() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("failed to load configuration: {}", e);
            return 1;
        }
    };
    info!("configuration loaded successfully");

    let position_store = Arc::new(PositionStore::new());
    if let Err(e) = position_store.load().await {
        error!("failed to load positions from disk: {}", e);
        return 1;
    }
    let price_cache = Arc::new(PriceCache::new());
    let paper_ledger = Arc::new(PaperLedger::new(&config.native_quote_token, config.simulation_initial_balance));

    let oracle = Arc::new(HttpPriceOracle::new(None));
    let prediction_service = Arc::new(HttpPredictionService::new(config.api_server_url.clone()));
    let swap_backend = Arc::new(HttpSwapBackend::new(config.api_server_url.clone()));
    let market_data_provider: Option<Arc<dyn external::MarketDataProvider>> =
        if config.filter_min_market_cap_usd.is_some() || config.filter_min_liquidity_usd.is_some() {
            Some(Arc::new(HttpMarketDataProvider::new(None)))
        } else {
            None
        };

    let filter_engine = FilterEngine::new(config.clone(), market_data_provider);
    let prediction_client = Arc::new(PredictionClient::new(prediction_service));
    let trade_executor = Arc::new(TradeExecutor::new(swap_backend, position_store.clone(), config.clone()));

    let orchestrator = Arc::new(Orchestrator::new(
        filter_engine,
        prediction_client,
        trade_executor.clone(),
        config.clone(),
    ));

    let event_listener = Arc::new(EventListener::new(config.clone(), orchestrator.clone()));
    let price_monitor = Arc::new(PriceMonitor::new(oracle, price_cache.clone()));
    let position_watcher = Arc::new(PositionWatcher::new(position_store.clone(), price_cache.clone(), trade_executor));

    price_monitor.clone().start().await;
    position_watcher.clone().start().await;

    let listener_handle = {
        let event_listener = event_listener.clone();
        tokio::spawn(async move { event_listener.start().await })
    };

    let app_state = web::AppState::new(position_store.clone(), price_cache.clone(), paper_ledger.clone(), config.clone());
    let dashboard_handle = {
        let bind_addr = config.dashboard_bind_addr.clone();
        tokio::spawn(async move {
            if let Err(e) = web::server::start_server(app_state, &bind_addr).await {
                error!("dashboard server exited: {}", e);
            }
        })
    };

    info!("engine started, awaiting shutdown signal");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
    }
    info!("shutdown signal received, draining in-flight operations");

    let drained = tokio::time::timeout(Duration::from_secs(SHUTDOWN_DRAIN_DEADLINE_SECS), async {
        event_listener.stop().await;
        position_watcher.stop().await;
        price_monitor.stop().await;
        listener_handle.abort();
    })
    .await;

    if drained.is_err() {
        warn!(
            "shutdown drain exceeded {}s deadline, forcing disconnect",
            SHUTDOWN_DRAIN_DEADLINE_SECS
        );
        listener_handle.abort();
    }
    dashboard_handle.abort();

    let stats = position_store.stats().await;
    info!(
        "engine stopped: {} open, {} closed, {} failed positions",
        stats.open, stats.closed, stats.failed
    );

    0
}
