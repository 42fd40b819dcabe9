use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::error::EngineError;
use crate::models::PredictionOutcome;

/// Black-box ML classification service. The engine only needs a label,
/// probability, and optional raw value out of it.
#[async_trait]
pub trait PredictionService: Send + Sync {
    async fn predict(&self, token_mint: &str) -> Result<PredictionOutcome, EngineError>;
}

pub struct HttpPredictionService {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct PredictResp {
    task_type: String,
    class_label: Option<String>,
    probability: Option<f64>,
    value: Option<f64>,
}

impl HttpPredictionService {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .expect("reqwest client"),
            base_url,
        }
    }
}

#[async_trait]
impl PredictionService for HttpPredictionService {
    async fn predict(&self, token_mint: &str) -> Result<PredictionOutcome, EngineError> {
        let url = format!("{}/predict/{}", self.base_url, token_mint);
        let resp = self.client.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(EngineError::ApiError {
                status: resp.status().as_u16(),
                message: format!("prediction request failed for {}", token_mint),
            });
        }
        let parsed: PredictResp = resp.json().await.map_err(EngineError::from)?;
        let confidence = parsed.probability.unwrap_or(0.0) * 100.0;
        let approved = parsed.class_label.as_deref() == Some("good") && confidence >= 65.0;
        Ok(PredictionOutcome {
            task_type: parsed.task_type,
            class_label: parsed.class_label,
            probability: parsed.probability,
            value: parsed.value,
            approved,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn approves_good_label_above_confidence_floor() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/predict/tokenX")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"task_type":"buy","class_label":"good","probability":0.72,"value":null}"#)
            .create_async()
            .await;

        let service = HttpPredictionService::new(server.url());
        let outcome = service.predict("tokenX").await.unwrap();
        assert!(outcome.approved);
        assert_eq!(outcome.confidence, 72.0);
    }

    #[tokio::test]
    async fn rejects_below_confidence_floor_even_with_good_label() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/predict/tokenY")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"task_type":"buy","class_label":"good","probability":0.64999,"value":null}"#)
            .create_async()
            .await;

        let service = HttpPredictionService::new(server.url());
        let outcome = service.predict("tokenY").await.unwrap();
        assert!(!outcome.approved);
    }

    #[tokio::test]
    async fn rejects_bad_label_regardless_of_confidence() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/predict/tokenZ")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"task_type":"buy","class_label":"bad","probability":0.99,"value":null}"#)
            .create_async()
            .await;

        let service = HttpPredictionService::new(server.url());
        let outcome = service.predict("tokenZ").await.unwrap();
        assert!(!outcome.approved);
    }
}
