use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorConnection {
    pub trade_count: u32,
    pub total_volume: f64,
    pub last_trade_time: DateTime<Utc>,
    pub influence_score: f64,
    pub trade_kinds: HashSet<TradeKind>,
}

impl ActorConnection {
    pub fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            trade_count: 0,
            total_volume: 0.0,
            last_trade_time: now,
            influence_score: 0.0,
            trade_kinds: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    pub total_trades: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindmapSnapshot {
    pub token_mint: String,
    pub actor_connections: HashMap<String, ActorConnection>,
    pub network_metrics: NetworkMetrics,
    pub last_update: DateTime<Utc>,
}

impl MindmapSnapshot {
    pub fn new(token_mint: &str) -> Self {
        Self {
            token_mint: token_mint.to_string(),
            actor_connections: HashMap::new(),
            network_metrics: NetworkMetrics::default(),
            last_update: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterSignal {
    ViralSpike,
    SmartMoney,
    HighConsensus,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FilterMetrics {
    pub total_volume: f64,
    pub connected_actors: u32,
    pub avg_influence: f64,
    pub total_trades: u64,
    pub viral_velocity: u32,
    pub weighted_volume: f64,
    pub consensus_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterResult {
    pub passed: bool,
    pub reason: Option<String>,
    pub metrics: FilterMetrics,
    pub signals: HashSet<FilterSignal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub task_type: String,
    pub class_label: Option<String>,
    pub probability: Option<f64>,
    pub value: Option<f64>,
    pub approved: bool,
    pub confidence: f64,
}
