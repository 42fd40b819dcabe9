use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::store::price_cache::RouteKind;

/// A token the fast batch call could not resolve; falls through to the slow
/// discovery loop.
#[derive(Debug, Clone)]
pub struct QuoteBatchMiss {
    pub token_mint: String,
}

#[derive(Debug, Clone)]
pub struct DiscoverResult {
    pub price: f64,
    pub source: RouteKind,
    pub route_blob: Option<Vec<u8>>,
}

/// Black-box price source. How prices are derived from on-chain accounts is not
/// this engine's concern; it only needs batched and single-token lookups with
/// a hint distinguishing pre/post-graduation pricing regimes.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Fast batched lookup for tokens with no cached route hint or a
    /// pre-graduation hint. Returns resolved prices plus the tokens that
    /// could not be resolved this way.
    async fn fast_batch_a(
        &self,
        tokens: &[String],
    ) -> Result<(HashMap<String, f64>, Vec<QuoteBatchMiss>), EngineError>;

    /// Fast batched lookup for tokens with a known post-graduation route,
    /// using the cached route vault blobs to avoid an extra round trip.
    async fn fast_batch_b(
        &self,
        tokens: &[(String, Vec<u8>)],
    ) -> Result<HashMap<String, f64>, EngineError>;

    /// Slow per-token discovery used when neither fast path resolves a price.
    async fn discover(&self, token_mint: &str) -> Result<Option<DiscoverResult>, EngineError>;
}

const ORACLE_BASE_URL_DEFAULT: &str = "https://quote-api.jup.ag/v6";

#[derive(Clone)]
pub struct HttpPriceOracle {
    client: Client,
    base_url: String,
}

impl HttpPriceOracle {
    pub fn new(base_url: Option<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client"),
            base_url: base_url.unwrap_or_else(|| ORACLE_BASE_URL_DEFAULT.to_string()),
        }
    }

    async fn fetch_price(&self, token_mint: &str) -> Result<Option<f64>, EngineError> {
        #[derive(Deserialize)]
        struct PriceResp {
            price: Option<f64>,
        }
        let url = format!("{}/price?mint={}", self.base_url, token_mint);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(EngineError::ApiError {
                status: resp.status().as_u16(),
                message: format!("price lookup failed for {}", token_mint),
            });
        }
        let parsed: PriceResp = resp.json().await.map_err(EngineError::from)?;
        Ok(parsed.price)
    }
}

#[async_trait]
impl PriceOracle for HttpPriceOracle {
    async fn fast_batch_a(
        &self,
        tokens: &[String],
    ) -> Result<(HashMap<String, f64>, Vec<QuoteBatchMiss>), EngineError> {
        let mut resolved = HashMap::new();
        let mut misses = Vec::new();
        for mint in tokens {
            match self.fetch_price(mint).await {
                Ok(Some(price)) => {
                    resolved.insert(mint.clone(), price);
                }
                Ok(None) => misses.push(QuoteBatchMiss { token_mint: mint.clone() }),
                Err(e) => {
                    debug!("fast_batch_a miss for {}: {}", mint, e);
                    misses.push(QuoteBatchMiss { token_mint: mint.clone() });
                }
            }
        }
        Ok((resolved, misses))
    }

    async fn fast_batch_b(
        &self,
        tokens: &[(String, Vec<u8>)],
    ) -> Result<HashMap<String, f64>, EngineError> {
        let mut resolved = HashMap::new();
        for (mint, _route_blob) in tokens {
            if let Ok(Some(price)) = self.fetch_price(mint).await {
                resolved.insert(mint.clone(), price);
            }
        }
        Ok(resolved)
    }

    async fn discover(&self, token_mint: &str) -> Result<Option<DiscoverResult>, EngineError> {
        match self.fetch_price(token_mint).await {
            Ok(Some(price)) => Ok(Some(DiscoverResult {
                price,
                source: RouteKind::PreGraduation,
                route_blob: None,
            })),
            Ok(None) => Ok(None),
            Err(e) => {
                warn!("discover failed for {}: {}", token_mint, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discover_maps_price_to_pre_graduation_route() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/price?mint=tokenA")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"price":0.0042}"#)
            .create_async()
            .await;

        let oracle = HttpPriceOracle::new(Some(server.url()));
        let result = oracle.discover("tokenA").await.unwrap().unwrap();
        assert_eq!(result.price, 0.0042);
        assert_eq!(result.source, RouteKind::PreGraduation);
    }

    #[tokio::test]
    async fn discover_returns_none_when_price_absent() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/price?mint=tokenB")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"price":null}"#)
            .create_async()
            .await;

        let oracle = HttpPriceOracle::new(Some(server.url()));
        assert!(oracle.discover("tokenB").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fast_batch_a_collects_misses_on_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/price?mint=tokenC")
            .with_status(500)
            .create_async()
            .await;

        let oracle = HttpPriceOracle::new(Some(server.url()));
        let (resolved, misses) = oracle.fast_batch_a(&["tokenC".to_string()]).await.unwrap();
        assert!(resolved.is_empty());
        assert_eq!(misses.len(), 1);
        assert_eq!(misses[0].token_mint, "tokenC");
    }
}
