use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub success: bool,
    pub execution_price: f64,
    pub amount_out: f64,
    pub tx_id: String,
    pub message: String,
}

/// Black-box swap execution. How transactions are built, signed, or confirmed
/// is not this engine's concern; the contract is purely "buy" and "sell" with
/// a reported execution price and filled amount.
#[async_trait]
pub trait SwapBackend: Send + Sync {
    async fn buy(
        &self,
        token_mint: &str,
        amount: f64,
        slippage_bps: u32,
        priority_fee: f64,
    ) -> Result<SwapOutcome, EngineError>;

    async fn sell(
        &self,
        token_mint: &str,
        amount: f64,
        slippage_bps: u32,
        priority_fee: f64,
    ) -> Result<SwapOutcome, EngineError>;
}

#[derive(Serialize)]
struct SwapRequest<'a> {
    mint: &'a str,
    amount: f64,
    slippage_bps: u32,
    priority_fee: f64,
    direction: &'a str,
}

#[derive(Deserialize)]
struct SwapResponse {
    success: bool,
    execution_price: f64,
    amount_out: f64,
    tx_id: Option<String>,
    message: Option<String>,
}

pub struct HttpSwapBackend {
    client: Client,
    base_url: String,
}

impl HttpSwapBackend {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
            base_url,
        }
    }

    async fn swap(
        &self,
        token_mint: &str,
        amount: f64,
        slippage_bps: u32,
        priority_fee: f64,
        direction: SwapDirection,
    ) -> Result<SwapOutcome, EngineError> {
        let direction_str = match direction {
            SwapDirection::Buy => "buy",
            SwapDirection::Sell => "sell",
        };
        let req = SwapRequest {
            mint: token_mint,
            amount,
            slippage_bps,
            priority_fee,
            direction: direction_str,
        };
        let resp = self
            .client
            .post(format!("{}/swap", self.base_url))
            .json(&req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(EngineError::ApiError {
                status: resp.status().as_u16(),
                message: format!("swap request failed for {}", token_mint),
            });
        }
        let parsed: SwapResponse = resp.json().await.map_err(EngineError::from)?;
        Ok(SwapOutcome {
            success: parsed.success,
            execution_price: parsed.execution_price,
            amount_out: parsed.amount_out,
            tx_id: parsed.tx_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            message: parsed.message.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl SwapBackend for HttpSwapBackend {
    async fn buy(
        &self,
        token_mint: &str,
        amount: f64,
        slippage_bps: u32,
        priority_fee: f64,
    ) -> Result<SwapOutcome, EngineError> {
        self.swap(token_mint, amount, slippage_bps, priority_fee, SwapDirection::Buy).await
    }

    async fn sell(
        &self,
        token_mint: &str,
        amount: f64,
        slippage_bps: u32,
        priority_fee: f64,
    ) -> Result<SwapOutcome, EngineError> {
        self.swap(token_mint, amount, slippage_bps, priority_fee, SwapDirection::Sell).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn buy_parses_successful_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/swap")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"execution_price":1.25,"amount_out":80.0,"tx_id":"sig123","message":"ok"}"#)
            .create_async()
            .await;

        let backend = HttpSwapBackend::new(server.url());
        let outcome = backend.buy("tokenX", 100.0, 100, 0.0005).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.execution_price, 1.25);
        assert_eq!(outcome.amount_out, 80.0);
        assert_eq!(outcome.tx_id, "sig123");
    }

    #[tokio::test]
    async fn sell_surfaces_rejection_message() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/swap")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":false,"execution_price":0.0,"amount_out":0.0,"tx_id":null,"message":"insufficient funds"}"#)
            .create_async()
            .await;

        let backend = HttpSwapBackend::new(server.url());
        let outcome = backend.sell("tokenX", 100.0, 100, 0.0005).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message, "insufficient funds");
    }

    #[tokio::test]
    async fn non_2xx_status_is_an_api_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server.mock("POST", "/swap").with_status(502).create_async().await;

        let backend = HttpSwapBackend::new(server.url());
        let err = backend.buy("tokenX", 100.0, 100, 0.0005).await.unwrap_err();
        match err {
            EngineError::ApiError { status, .. } => assert_eq!(status, 502),
            other => panic!("expected ApiError, got {:?}", other),
        }
    }
}
