use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    // Event/RPC connection
    pub api_server_url: String,
    pub api_key: Option<String>,

    // Store backend (in-process regardless; carried for parity with source)
    pub store_url: Option<String>,

    // Actor-list source
    pub monitoring_mode: String,

    // FilterEngine thresholds
    pub filter_min_trade_volume: f64,
    pub filter_min_connected_actors: u32,
    pub filter_min_influence_score: f64,
    pub filter_min_total_trades: u32,
    pub filter_min_viral_velocity: Option<u32>,
    pub filter_require_smart_money: bool,
    pub filter_min_consensus_score: Option<f64>,
    pub filter_min_market_cap_usd: Option<f64>,
    pub filter_min_liquidity_usd: Option<f64>,

    // Default sell-condition template
    pub risk_take_profit_pct: f64,
    pub risk_stop_loss_pct: f64,
    pub risk_trailing_stop_pct: Option<f64>,
    pub risk_trailing_stop_enabled: bool,
    pub risk_max_hold_minutes: Option<i64>,

    // Trading
    pub trading_buy_amount: f64,
    pub trading_allow_additional_entries: bool,
    pub trading_max_entries_per_token: Option<u32>,

    // Logging
    pub logging_level: String,

    // Simulation
    pub simulation_enabled: bool,
    pub simulation_initial_balance: f64,

    // The sentinel token the filter always rejects
    pub native_quote_token: String,

    // Dashboard bind address
    pub dashboard_bind_addr: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Self {
            api_server_url: env::var("API_SERVER_URL")
                .context("API_SERVER_URL not set in environment")?,
            api_key: env::var("API_KEY").ok(),

            store_url: env::var("STORE_URL").ok(),

            monitoring_mode: env::var("MONITORING_MODE").unwrap_or_else(|_| "all".to_string()),

            filter_min_trade_volume: parse_or("FILTER_MIN_TRADE_VOLUME", 1000.0),
            filter_min_connected_actors: parse_or("FILTER_MIN_CONNECTED_ACTORS", 3),
            filter_min_influence_score: parse_or("FILTER_MIN_INFLUENCE_SCORE", 20.0),
            filter_min_total_trades: parse_or("FILTER_MIN_TOTAL_TRADES", 5),
            filter_min_viral_velocity: env::var("FILTER_MIN_VIRAL_VELOCITY").ok().and_then(|v| v.parse().ok()),
            filter_require_smart_money: env::var("FILTER_REQUIRE_SMART_MONEY")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            filter_min_consensus_score: env::var("FILTER_MIN_CONSENSUS_SCORE").ok().and_then(|v| v.parse().ok()),
            filter_min_market_cap_usd: env::var("FILTER_MIN_MARKET_CAP_USD").ok().and_then(|v| v.parse().ok()),
            filter_min_liquidity_usd: env::var("FILTER_MIN_LIQUIDITY_USD").ok().and_then(|v| v.parse().ok()),

            risk_take_profit_pct: parse_or("RISK_TAKE_PROFIT_PCT", 50.0),
            risk_stop_loss_pct: parse_or("RISK_STOP_LOSS_PCT", 20.0),
            risk_trailing_stop_pct: env::var("RISK_TRAILING_STOP_PCT").ok().and_then(|v| v.parse().ok()),
            risk_trailing_stop_enabled: env::var("RISK_TRAILING_STOP_ENABLED")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            risk_max_hold_minutes: env::var("RISK_MAX_HOLD_MINUTES").ok().and_then(|v| v.parse().ok()),

            trading_buy_amount: parse_or("TRADING_BUY_AMOUNT", 0.1),
            trading_allow_additional_entries: env::var("TRADING_ALLOW_ADDITIONAL_ENTRIES")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            trading_max_entries_per_token: env::var("TRADING_MAX_ENTRIES_PER_TOKEN").ok().and_then(|v| v.parse().ok()),

            logging_level: env::var("RUST_LOG")
                .or_else(|_| env::var("LOGGING_LEVEL"))
                .unwrap_or_else(|_| "info".to_string()),

            simulation_enabled: env::var("SIMULATION_ENABLED")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(true),
            simulation_initial_balance: parse_or("SIMULATION_INITIAL_BALANCE", 10.0),

            native_quote_token: env::var("NATIVE_QUOTE_TOKEN")
                .unwrap_or_else(|_| "So11111111111111111111111111111111111111112".to_string()),

            dashboard_bind_addr: env::var("DASHBOARD_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
        })
    }

    /// Validates required fields and numeric parses without constructing a running engine.
    /// Backs the `verify` CLI subcommand.
    pub fn verify() -> Result<()> {
        let _ = Self::load()?;
        Ok(())
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
