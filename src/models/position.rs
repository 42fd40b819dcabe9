use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
    Failed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Stepped trailing-stop and static exit-condition parameters carried on a position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SellConditions {
    pub take_profit_pct: Option<f64>,
    pub stop_loss_pct: Option<f64>,
    pub trailing_stop_pct: Option<f64>,
    #[serde(default)]
    pub trailing_stop_activated: bool,
    pub max_hold_minutes: Option<i64>,
    #[serde(default)]
    pub step_level: u32,
    pub next_target_price: Option<f64>,
    pub curr_stop_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub agent_id: String,
    pub token_mint: String,
    pub is_simulation: bool,
    pub prediction: Option<String>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub entry_price: f64,
    pub entry_amount: f64,
    pub entry_value: f64,
    pub buy_tx_id: Option<String>,
    pub exit_price: Option<f64>,
    pub exit_amount: Option<f64>,
    pub exit_value: Option<f64>,
    pub sell_tx_id: Option<String>,
    pub sell_reason: Option<String>,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_pct: Option<f64>,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub current_price: f64,
    pub last_price_update: DateTime<Utc>,
    pub sell_conditions: SellConditions,
    pub ledger_id: Option<String>,
    pub original_trade_id: Option<String>,
    pub watch_job_id: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[allow(clippy::too_many_arguments)]
impl Position {
    pub fn new_open(
        agent_id: &str,
        token_mint: &str,
        is_simulation: bool,
        entry_price: f64,
        entry_amount: f64,
        buy_tx_id: Option<String>,
        sell_conditions: SellConditions,
        prediction: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.to_string(),
            token_mint: token_mint.to_string(),
            is_simulation,
            prediction,
            status: PositionStatus::Open,
            opened_at: now,
            closed_at: None,
            entry_price,
            entry_amount,
            entry_value: entry_price * entry_amount,
            buy_tx_id,
            exit_price: None,
            exit_amount: None,
            exit_value: None,
            sell_tx_id: None,
            sell_reason: None,
            realized_pnl: None,
            realized_pnl_pct: None,
            highest_price: entry_price,
            lowest_price: entry_price,
            current_price: entry_price,
            last_price_update: now,
            sell_conditions,
            ledger_id: None,
            original_trade_id: None,
            watch_job_id: None,
            tags: Vec::new(),
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a fresh price observation, extending high/low monotonically (I6).
    pub fn apply_price(&mut self, price: f64) {
        self.current_price = price;
        self.last_price_update = Utc::now();
        if price > self.highest_price {
            self.highest_price = price;
        }
        if price < self.lowest_price {
            self.lowest_price = price;
        }
        self.updated_at = Utc::now();
    }

    /// Percent change from entry; 0 when entry price is non-positive to avoid division by zero.
    pub fn pct_change(&self) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (self.current_price - self.entry_price) / self.entry_price * 100.0
    }

    pub fn hold_duration(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.opened_at)
    }

    pub fn close(
        &mut self,
        exit_price: f64,
        exit_amount: f64,
        sell_tx_id: Option<String>,
        sell_reason: Option<String>,
        status: PositionStatus,
    ) {
        let now = Utc::now();
        let exit_value = exit_price * exit_amount;
        self.status = status;
        self.closed_at = Some(now);
        self.exit_price = Some(exit_price);
        self.exit_amount = Some(exit_amount);
        self.exit_value = Some(exit_value);
        self.sell_tx_id = sell_tx_id;
        self.sell_reason = sell_reason;
        self.realized_pnl = Some(exit_value - self.entry_value);
        self.realized_pnl_pct = Some(if self.entry_value > 0.0 {
            (exit_value - self.entry_value) / self.entry_value * 100.0
        } else {
            0.0
        });
        self.updated_at = now;
    }
}
