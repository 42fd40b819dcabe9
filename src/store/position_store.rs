use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::models::{Position, PositionStatus};
use crate::store::StoreEvent;

const POSITIONS_FILE: &str = "data/positions.json";
const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub total: usize,
    pub open: usize,
    pub closed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PositionQuery {
    pub agent_id: Option<String>,
    pub token_mint: Option<String>,
    pub status: Option<PositionStatus>,
    pub opened_after: Option<DateTime<Utc>>,
    pub opened_before: Option<DateTime<Utc>>,
    pub min_pnl: Option<f64>,
    pub max_pnl: Option<f64>,
    pub tag: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

struct Indices {
    by_agent: HashMap<String, HashSet<String>>,
    by_token: HashMap<String, HashSet<String>>,
    open_set: HashSet<String>,
    closed_set: HashSet<String>,
}

impl Indices {
    fn new() -> Self {
        Self {
            by_agent: HashMap::new(),
            by_token: HashMap::new(),
            open_set: HashSet::new(),
            closed_set: HashSet::new(),
        }
    }

    fn insert(&mut self, position: &Position) {
        self.by_agent
            .entry(position.agent_id.clone())
            .or_default()
            .insert(position.id.clone());
        self.by_token
            .entry(position.token_mint.clone())
            .or_default()
            .insert(position.id.clone());
        self.reconcile_status(position);
    }

    fn reconcile_status(&mut self, position: &Position) {
        self.open_set.remove(&position.id);
        self.closed_set.remove(&position.id);
        match position.status {
            PositionStatus::Open => {
                self.open_set.insert(position.id.clone());
            }
            PositionStatus::Closed | PositionStatus::Failed => {
                self.closed_set.insert(position.id.clone());
            }
        }
    }

    fn remove(&mut self, position: &Position) {
        if let Some(set) = self.by_agent.get_mut(&position.agent_id) {
            set.remove(&position.id);
        }
        if let Some(set) = self.by_token.get_mut(&position.token_mint) {
            set.remove(&position.id);
        }
        self.open_set.remove(&position.id);
        self.closed_set.remove(&position.id);
    }

    fn clear(&mut self) {
        self.by_agent.clear();
        self.by_token.clear();
        self.open_set.clear();
        self.closed_set.clear();
    }
}

/// Durable map of positions with secondary indices, plus position_update/price_update
/// publication for the outward dashboard. All operations are individually atomic;
/// callers must not assume cross-operation atomicity.
pub struct PositionStore {
    positions: Arc<RwLock<HashMap<String, Position>>>,
    indices: Arc<RwLock<Indices>>,
    persistence_path: PathBuf,
    events_tx: broadcast::Sender<StoreEvent>,
}

impl PositionStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            positions: Arc::new(RwLock::new(HashMap::new())),
            indices: Arc::new(RwLock::new(Indices::new())),
            persistence_path: PathBuf::from(POSITIONS_FILE),
            events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }

    fn publish(&self, event: StoreEvent) {
        let _ = self.events_tx.send(event);
    }

    pub async fn load(&self) -> Result<()> {
        if !self.persistence_path.exists() {
            debug!("positions file not found, starting with empty store");
            return Ok(());
        }
        let data = fs::read_to_string(&self.persistence_path).await?;
        if data.trim().is_empty() {
            return Ok(());
        }
        let loaded: Vec<Position> = serde_json::from_str(&data)
            .context("failed to deserialize positions file")?;

        let mut positions = self.positions.write().await;
        let mut indices = self.indices.write().await;
        positions.clear();
        indices.clear();
        for position in loaded {
            indices.insert(&position);
            positions.insert(position.id.clone(), position);
        }
        info!("loaded {} positions from disk", positions.len());
        Ok(())
    }

    async fn persist(&self) -> Result<()> {
        let positions = self.positions.read().await;
        let snapshot: Vec<&Position> = positions.values().collect();
        let data = serde_json::to_string_pretty(&snapshot)
            .context("failed to serialize positions")?;
        drop(positions);

        if let Some(dir) = self.persistence_path.parent() {
            fs::create_dir_all(dir).await.context("failed to create data directory")?;
        }
        let tmp = self.persistence_path.with_extension("json.tmp");
        fs::write(&tmp, data).await.context("failed to write temp positions file")?;
        fs::rename(&tmp, &self.persistence_path)
            .await
            .context("failed to rename temp positions file")?;
        Ok(())
    }

    pub async fn create_open(&self, position: Position) -> Result<Position> {
        {
            let mut positions = self.positions.write().await;
            let mut indices = self.indices.write().await;
            indices.insert(&position);
            positions.insert(position.id.clone(), position.clone());
        }
        self.persist().await?;
        self.publish(StoreEvent::PositionUpdate { position: position.clone() });
        Ok(position)
    }

    pub async fn get(&self, id: &str) -> Option<Position> {
        self.positions.read().await.get(id).cloned()
    }

    pub async fn get_by_actor(&self, agent_id: &str, status: Option<PositionStatus>) -> Vec<Position> {
        let indices = self.indices.read().await;
        let ids = indices.by_agent.get(agent_id).cloned().unwrap_or_default();
        drop(indices);
        let positions = self.positions.read().await;
        let mut result: Vec<Position> = ids
            .iter()
            .filter_map(|id| positions.get(id))
            .filter(|p| status.map(|s| p.status == s).unwrap_or(true))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    pub async fn get_by_token(&self, token_mint: &str, status: Option<PositionStatus>) -> Vec<Position> {
        let indices = self.indices.read().await;
        let ids = indices.by_token.get(token_mint).cloned().unwrap_or_default();
        drop(indices);
        let positions = self.positions.read().await;
        let mut result: Vec<Position> = ids
            .iter()
            .filter_map(|id| positions.get(id))
            .filter(|p| status.map(|s| p.status == s).unwrap_or(true))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result
    }

    pub async fn list_open(&self, agent_filter: Option<&str>) -> Vec<Position> {
        let indices = self.indices.read().await;
        let ids: Vec<String> = indices.open_set.iter().cloned().collect();
        drop(indices);
        let positions = self.positions.read().await;
        ids.iter()
            .filter_map(|id| positions.get(id))
            .filter(|p| agent_filter.map(|a| p.agent_id == a).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// No-op when the position isn't open; extends highest/lowest monotonically (I6).
    pub async fn update_price(&self, id: &str, price: f64) -> Result<Option<Position>> {
        let updated = {
            let mut positions = self.positions.write().await;
            match positions.get_mut(id) {
                Some(position) if position.status == PositionStatus::Open => {
                    position.apply_price(price);
                    Some(position.clone())
                }
                _ => None,
            }
        };
        if let Some(ref position) = updated {
            self.publish(StoreEvent::PriceUpdate { mint: position.token_mint.clone(), price });
            self.publish(StoreEvent::PositionUpdate { position: position.clone() });
        }
        Ok(updated)
    }

    pub async fn replace(&self, position: Position) -> Result<()> {
        {
            let mut positions = self.positions.write().await;
            let mut indices = self.indices.write().await;
            indices.insert(&position);
            positions.insert(position.id.clone(), position.clone());
        }
        self.persist().await?;
        self.publish(StoreEvent::PositionUpdate { position });
        Ok(())
    }

    pub async fn close(
        &self,
        id: &str,
        exit_price: f64,
        exit_amount: f64,
        sell_tx_id: Option<String>,
        sell_reason: Option<String>,
    ) -> Result<Option<Position>> {
        let closed = {
            let mut positions = self.positions.write().await;
            let position = match positions.get_mut(id) {
                Some(p) => p,
                None => return Ok(None),
            };
            position.close(exit_price, exit_amount, sell_tx_id, sell_reason, crate::models::PositionStatus::Closed);
            let snapshot = position.clone();
            let mut indices = self.indices.write().await;
            indices.reconcile_status(&snapshot);
            snapshot
        };
        self.persist().await?;
        self.publish(StoreEvent::PositionUpdate { position: closed.clone() });
        Ok(Some(closed))
    }

    /// Force-closes a position regardless of current status (persistent pricing error path).
    pub async fn force_close(
        &self,
        id: &str,
        exit_price: f64,
        reason: &str,
        status: PositionStatus,
    ) -> Result<Option<Position>> {
        let closed = {
            let mut positions = self.positions.write().await;
            let position = match positions.get_mut(id) {
                Some(p) => p,
                None => return Ok(None),
            };
            position.close(exit_price, 0.0, None, Some(reason.to_string()), status);
            let snapshot = position.clone();
            let mut indices = self.indices.write().await;
            indices.reconcile_status(&snapshot);
            snapshot
        };
        self.persist().await?;
        self.publish(StoreEvent::PositionUpdate { position: closed.clone() });
        Ok(Some(closed))
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut positions = self.positions.write().await;
            match positions.remove(id) {
                Some(position) => {
                    let mut indices = self.indices.write().await;
                    indices.remove(&position);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Removes every simulation-tagged position, regardless of status. Backs
    /// the `reset-paper-trading` CLI subcommand.
    pub async fn delete_simulation_positions(&self) -> Result<usize> {
        let removed_ids: Vec<String> = {
            let positions = self.positions.read().await;
            positions.values().filter(|p| p.is_simulation).map(|p| p.id.clone()).collect()
        };
        let mut count = 0;
        {
            let mut positions = self.positions.write().await;
            let mut indices = self.indices.write().await;
            for id in &removed_ids {
                if let Some(position) = positions.remove(id) {
                    indices.remove(&position);
                    count += 1;
                }
            }
        }
        if count > 0 {
            self.persist().await?;
        }
        Ok(count)
    }

    pub async fn clear_all(&self) -> Result<()> {
        {
            let mut positions = self.positions.write().await;
            let mut indices = self.indices.write().await;
            positions.clear();
            indices.clear();
        }
        self.persist().await?;
        warn!("position store cleared");
        Ok(())
    }

    pub async fn stats(&self) -> StoreStats {
        let positions = self.positions.read().await;
        let mut stats = StoreStats::default();
        for p in positions.values() {
            stats.total += 1;
            match p.status {
                PositionStatus::Open => stats.open += 1,
                PositionStatus::Closed => stats.closed += 1,
                PositionStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub async fn query(&self, filter: PositionQuery) -> Vec<Position> {
        let positions = self.positions.read().await;
        let mut result: Vec<Position> = positions
            .values()
            .filter(|p| filter.agent_id.as_deref().map(|a| p.agent_id == a).unwrap_or(true))
            .filter(|p| filter.token_mint.as_deref().map(|t| p.token_mint == t).unwrap_or(true))
            .filter(|p| filter.status.map(|s| p.status == s).unwrap_or(true))
            .filter(|p| filter.opened_after.map(|t| p.opened_at >= t).unwrap_or(true))
            .filter(|p| filter.opened_before.map(|t| p.opened_at <= t).unwrap_or(true))
            .filter(|p| filter.min_pnl.map(|m| p.realized_pnl.unwrap_or(0.0) >= m).unwrap_or(true))
            .filter(|p| filter.max_pnl.map(|m| p.realized_pnl.unwrap_or(0.0) <= m).unwrap_or(true))
            .filter(|p| filter.tag.as_deref().map(|t| p.tags.iter().any(|x| x == t)).unwrap_or(true))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(offset) = filter.offset {
            result = result.into_iter().skip(offset).collect();
        }
        if let Some(limit) = filter.limit {
            result.truncate(limit);
        }
        result
    }
}

impl Default for PositionStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn not_found(id: &str) -> EngineError {
    EngineError::StoreError(format!("position {} not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SellConditions;

    fn make_position(agent: &str, token: &str, entry_price: f64) -> Position {
        Position::new_open(agent, token, true, entry_price, 10.0, None, SellConditions::default(), None)
    }

    #[tokio::test]
    async fn create_open_then_get_round_trips() {
        let store = PositionStore::new();
        let position = make_position("agent1", "tokenA", 1.0);
        let created = store.create_open(position.clone()).await.unwrap();
        let fetched = store.get(&created.id).await.unwrap();

        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.status, PositionStatus::Open);
        // I5: entry_value = entry_price * entry_amount.
        assert_eq!(fetched.entry_value, fetched.entry_price * fetched.entry_amount);
        // I6: highest >= current >= lowest at creation (all equal entry).
        assert_eq!(fetched.highest_price, fetched.entry_price);
        assert_eq!(fetched.lowest_price, fetched.entry_price);
        // I2: closedAt unset while open.
        assert!(fetched.closed_at.is_none());
    }

    #[tokio::test]
    async fn create_open_updates_all_four_indices() {
        let store = PositionStore::new();
        let position = make_position("agent1", "tokenA", 1.0);
        let created = store.create_open(position).await.unwrap();

        let by_agent = store.get_by_actor("agent1", None).await;
        assert_eq!(by_agent.len(), 1);
        assert_eq!(by_agent[0].id, created.id);

        let by_token = store.get_by_token("tokenA", None).await;
        assert_eq!(by_token.len(), 1);

        let open = store.list_open(None).await;
        assert_eq!(open.len(), 1);

        let stats = store.stats().await;
        assert_eq!(stats.open, 1);
        assert_eq!(stats.closed, 0);
    }

    #[tokio::test]
    async fn update_price_is_monotone_on_high_and_low() {
        let store = PositionStore::new();
        let created = store.create_open(make_position("agent1", "tokenA", 100.0)).await.unwrap();

        store.update_price(&created.id, 150.0).await.unwrap();
        store.update_price(&created.id, 90.0).await.unwrap();
        store.update_price(&created.id, 120.0).await.unwrap();

        let position = store.get(&created.id).await.unwrap();
        // I6: highestPrice >= currentPrice >= lowestPrice.
        assert_eq!(position.highest_price, 150.0);
        assert_eq!(position.lowest_price, 90.0);
        assert_eq!(position.current_price, 120.0);
        assert!(position.highest_price >= position.current_price);
        assert!(position.current_price >= position.lowest_price);
    }

    #[tokio::test]
    async fn update_price_is_noop_when_not_open() {
        let store = PositionStore::new();
        let created = store.create_open(make_position("agent1", "tokenA", 100.0)).await.unwrap();
        store.close(&created.id, 110.0, 10.0, None, None).await.unwrap();

        let result = store.update_price(&created.id, 999.0).await.unwrap();
        assert!(result.is_none());
        let position = store.get(&created.id).await.unwrap();
        assert_eq!(position.current_price, 110.0);
    }

    #[tokio::test]
    async fn close_sets_derived_fields_and_moves_index() {
        let store = PositionStore::new();
        let created = store.create_open(make_position("agent1", "tokenA", 100.0)).await.unwrap();

        let closed = store.close(&created.id, 150.0, 10.0, Some("tx1".to_string()), Some("take profit".to_string()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(closed.status, PositionStatus::Closed);
        assert!(closed.closed_at.is_some()); // I2
        assert_eq!(closed.exit_value, Some(1500.0)); // I3
        assert_eq!(closed.realized_pnl, Some(1500.0 - closed.entry_value)); // I4

        assert!(store.list_open(None).await.is_empty());
        let by_token = store.get_by_token("tokenA", Some(PositionStatus::Closed)).await;
        assert_eq!(by_token.len(), 1);
    }

    #[tokio::test]
    async fn close_never_reopens_an_already_closed_position() {
        let store = PositionStore::new();
        let created = store.create_open(make_position("agent1", "tokenA", 100.0)).await.unwrap();
        store.close(&created.id, 150.0, 10.0, None, Some("take profit".to_string())).await.unwrap();

        let reclosed = store.close(&created.id, 50.0, 10.0, None, Some("stop loss".to_string())).await.unwrap().unwrap();
        // Second close overwrites exit fields but the position never returns to open.
        assert_eq!(reclosed.status, PositionStatus::Closed);
        assert!(store.list_open(None).await.is_empty());
    }

    #[tokio::test]
    async fn close_on_unknown_position_returns_none() {
        let store = PositionStore::new();
        let result = store.close("does-not-exist", 1.0, 1.0, None, None).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn replace_is_idempotent() {
        let store = PositionStore::new();
        let created = store.create_open(make_position("agent1", "tokenA", 100.0)).await.unwrap();

        store.replace(created.clone()).await.unwrap();
        let first = store.get(&created.id).await.unwrap();
        store.replace(first.clone()).await.unwrap();
        let second = store.get(&created.id).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.status, second.status);
        assert_eq!(first.current_price, second.current_price);
        assert_eq!(store.list_open(None).await.len(), 1);
    }

    #[tokio::test]
    async fn at_most_one_open_position_is_observable_per_fingerprint() {
        // I8 is enforced by the caller (TradeExecutor's lock), not the store itself;
        // the store must still report accurate open-set membership either way.
        let store = PositionStore::new();
        let first = store.create_open(make_position("agent1", "tokenA", 100.0)).await.unwrap();
        store.close(&first.id, 110.0, 10.0, None, None).await.unwrap();
        let second = store.create_open(make_position("agent1", "tokenA", 105.0)).await.unwrap();

        let open = store.get_by_actor("agent1", Some(PositionStatus::Open)).await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, second.id);
    }

    #[tokio::test]
    async fn delete_removes_from_all_indices() {
        let store = PositionStore::new();
        let created = store.create_open(make_position("agent1", "tokenA", 100.0)).await.unwrap();
        assert!(store.delete(&created.id).await.unwrap());
        assert!(store.get(&created.id).await.is_none());
        assert!(store.get_by_actor("agent1", None).await.is_empty());
        assert!(store.get_by_token("tokenA", None).await.is_empty());
    }

    #[tokio::test]
    async fn query_filters_and_paginates() {
        let store = PositionStore::new();
        for i in 0..5 {
            store.create_open(make_position("agent1", &format!("token{}", i), 100.0)).await.unwrap();
        }
        let page = store.query(PositionQuery { agent_id: Some("agent1".to_string()), limit: Some(2), ..Default::default() }).await;
        assert_eq!(page.len(), 2);
    }
}
