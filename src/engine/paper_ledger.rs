use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::EngineError;

/// Simulation wallet balance keeper, used by TradeExecutor when the engine
/// is running in paper-trading mode. Balances are keyed by token mint, with
/// the native quote token's balance acting as the seed "cash" account.
pub struct PaperLedger {
    balances: Arc<RwLock<HashMap<String, f64>>>,
    initial_balance: f64,
    native_quote_token: String,
}

impl PaperLedger {
    pub fn new(native_quote_token: &str, initial_balance: f64) -> Self {
        let mut balances = HashMap::new();
        balances.insert(native_quote_token.to_string(), initial_balance);
        Self {
            balances: Arc::new(RwLock::new(balances)),
            initial_balance,
            native_quote_token: native_quote_token.to_string(),
        }
    }

    pub async fn deposit(&self, token_mint: &str, amount: f64) {
        let mut balances = self.balances.write().await;
        *balances.entry(token_mint.to_string()).or_insert(0.0) += amount;
    }

    pub async fn withdraw(&self, token_mint: &str, amount: f64) -> Result<(), EngineError> {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(token_mint.to_string()).or_insert(0.0);
        if *balance < amount {
            return Err(EngineError::TradeExecutionError(format!(
                "insufficient paper balance for {}: have {}, need {}",
                token_mint, balance, amount
            )));
        }
        *balance -= amount;
        Ok(())
    }

    pub async fn get_all(&self) -> HashMap<String, f64> {
        self.balances.read().await.clone()
    }

    pub async fn reset(&self) {
        let mut balances = self.balances.write().await;
        balances.clear();
        balances.insert(self.native_quote_token.clone(), self.initial_balance);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn withdraw_fails_on_insufficient_balance() {
        let ledger = PaperLedger::new("SOL", 1.0);
        assert!(ledger.withdraw("SOL", 2.0).await.is_err());
        assert!(ledger.withdraw("SOL", 0.5).await.is_ok());
    }

    #[tokio::test]
    async fn reset_restores_initial_balance() {
        let ledger = PaperLedger::new("SOL", 5.0);
        ledger.withdraw("SOL", 5.0).await.unwrap();
        ledger.reset().await;
        assert_eq!(ledger.get_all().await.get("SOL"), Some(&5.0));
    }
}
