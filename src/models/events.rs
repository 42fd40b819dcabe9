use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::mindmap::{MindmapSnapshot, TradeKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeData {
    pub token_in: String,
    pub token_out: String,
    pub mint: String,
    pub amount_in: f64,
    pub amount_out: f64,
    pub trade_kind: TradeKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorTrade {
    pub id: String,
    pub actor_id: String,
    pub signature: String,
    pub timestamp: DateTime<Utc>,
    pub trade_data: TradeData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorTradeUpdate {
    pub trade: ActorTrade,
}

/// Accepts either `data` or `mindmapData` as the snapshot field name, matching
/// both spellings the upstream event producer has been observed to send.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MindmapUpdate {
    pub token_mint: String,
    #[serde(alias = "mindmapData")]
    pub data: MindmapSnapshot,
    pub timestamp: DateTime<Utc>,
}
