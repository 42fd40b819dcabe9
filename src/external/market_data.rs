use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::EngineError;

/// On-chain market-cap/liquidity snapshot, quote-asset-denominated — the same
/// convention `PriceOracle` prices carry elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct MarketData {
    pub market_cap: f64,
    pub liquidity: f64,
}

/// Supply/liquidity side of the optional on-chain verification check in
/// `FilterEngine`. A black box like `PriceOracle`: how market cap and
/// liquidity are derived from on-chain accounts is not this engine's concern.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn market_data(&self, token_mint: &str) -> Result<MarketData, EngineError>;
}

const MARKET_DATA_BASE_URL_DEFAULT: &str = "https://public-api.birdeye.so";

pub struct HttpMarketDataProvider {
    client: Client,
    base_url: String,
}

impl HttpMarketDataProvider {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            base_url: base_url.unwrap_or_else(|| MARKET_DATA_BASE_URL_DEFAULT.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct MarketDataEnvelope {
    data: Option<MarketDataPayload>,
    success: bool,
}

#[derive(Deserialize)]
struct MarketDataPayload {
    market_cap: Option<f64>,
    liquidity: Option<f64>,
}

#[async_trait]
impl MarketDataProvider for HttpMarketDataProvider {
    async fn market_data(&self, token_mint: &str) -> Result<MarketData, EngineError> {
        let url = format!("{}/defi/v3/token/market-data?address={}", self.base_url, token_mint);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(EngineError::ApiError {
                status: resp.status().as_u16(),
                message: format!("market data lookup failed for {}", token_mint),
            });
        }
        let parsed: MarketDataEnvelope = resp.json().await.map_err(EngineError::from)?;
        if !parsed.success {
            return Err(EngineError::OracleError(format!("market data unavailable for {}", token_mint)));
        }
        let payload = parsed
            .data
            .ok_or_else(|| EngineError::OracleError(format!("market data unavailable for {}", token_mint)))?;
        Ok(MarketData {
            market_cap: payload.market_cap.unwrap_or(0.0),
            liquidity: payload.liquidity.unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_successful_market_data_response() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/defi/v3/token/market-data?address=tokenX")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":true,"data":{"market_cap":125000.5,"liquidity":43000.0}}"#)
            .create_async()
            .await;

        let provider = HttpMarketDataProvider::new(Some(server.url()));
        let result = provider.market_data("tokenX").await.unwrap();
        assert_eq!(result.market_cap, 125000.5);
        assert_eq!(result.liquidity, 43000.0);
    }

    #[tokio::test]
    async fn surfaces_oracle_error_when_unsuccessful() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/defi/v3/token/market-data?address=tokenY")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":false,"data":null}"#)
            .create_async()
            .await;

        let provider = HttpMarketDataProvider::new(Some(server.url()));
        let err = provider.market_data("tokenY").await.unwrap_err();
        assert!(matches!(err, EngineError::OracleError(_)));
    }

    #[tokio::test]
    async fn surfaces_api_error_on_non_2xx() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/defi/v3/token/market-data?address=tokenZ")
            .with_status(503)
            .create_async()
            .await;

        let provider = HttpMarketDataProvider::new(Some(server.url()));
        let err = provider.market_data("tokenZ").await.unwrap_err();
        match err {
            EngineError::ApiError { status, .. } => assert_eq!(status, 503),
            other => panic!("expected ApiError, got {:?}", other),
        }
    }
}
