use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const PRICE_TTL_SECS: i64 = 60;
const ERROR_TTL_SECS: i64 = 30;
const PRE_GRADUATION_ROUTE_TTL_SECS: i64 = 5 * 60;
const POST_GRADUATION_ROUTE_TTL_SECS: i64 = 24 * 60 * 60;
const INTEREST_TTL_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum RouteKind {
    PreGraduation,
    PostGraduation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteHint {
    pub kind: RouteKind,
    pub blob: Option<Vec<u8>>,
}

struct TtlEntry<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> TtlEntry<T> {
    fn fresh(value: T, ttl_secs: i64) -> Self {
        Self { value, expires_at: Utc::now() + Duration::seconds(ttl_secs) }
    }

    fn is_live(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Shared, TTL-governed cache of token prices, discovery errors, route hints, and
/// the "interest" set PriceMonitor polls against. Every operation is individually
/// atomic; no operation here ever awaits while holding a write lock.
pub struct PriceCache {
    price: Arc<RwLock<HashMap<String, TtlEntry<f64>>>>,
    error: Arc<RwLock<HashMap<String, TtlEntry<()>>>>,
    route: Arc<RwLock<HashMap<String, TtlEntry<RouteHint>>>>,
    interest: Arc<RwLock<HashMap<String, TtlEntry<()>>>>,
    route_vaults: Arc<RwLock<HashMap<(RouteKind, String), Vec<u8>>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self {
            price: Arc::new(RwLock::new(HashMap::new())),
            error: Arc::new(RwLock::new(HashMap::new())),
            route: Arc::new(RwLock::new(HashMap::new())),
            interest: Arc::new(RwLock::new(HashMap::new())),
            route_vaults: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn add_interest(&self, token_mint: &str) {
        self.interest
            .write()
            .await
            .insert(token_mint.to_string(), TtlEntry::fresh((), INTEREST_TTL_SECS));
    }

    pub async fn has_interest(&self, token_mint: &str) -> bool {
        self.interest.read().await.get(token_mint).map(|e| e.is_live()).unwrap_or(false)
    }

    pub async fn list_interest(&self) -> Vec<String> {
        self.interest
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.is_live())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub async fn get_price(&self, token_mint: &str) -> Option<f64> {
        self.price
            .read()
            .await
            .get(token_mint)
            .filter(|e| e.is_live())
            .map(|e| e.value)
    }

    pub async fn set_price(&self, token_mint: &str, price: f64) {
        self.price
            .write()
            .await
            .insert(token_mint.to_string(), TtlEntry::fresh(price, PRICE_TTL_SECS));
        self.error.write().await.remove(token_mint);
    }

    pub async fn mark_error(&self, token_mint: &str) {
        self.error
            .write()
            .await
            .insert(token_mint.to_string(), TtlEntry::fresh((), ERROR_TTL_SECS));
        self.price.write().await.remove(token_mint);
    }

    pub async fn has_error(&self, token_mint: &str) -> bool {
        self.error.read().await.get(token_mint).map(|e| e.is_live()).unwrap_or(false)
    }

    pub async fn get_route(&self, token_mint: &str) -> Option<RouteHint> {
        self.route
            .read()
            .await
            .get(token_mint)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone())
    }

    pub async fn set_route(&self, token_mint: &str, hint: RouteHint) {
        let ttl = match hint.kind {
            RouteKind::PreGraduation => PRE_GRADUATION_ROUTE_TTL_SECS,
            RouteKind::PostGraduation => POST_GRADUATION_ROUTE_TTL_SECS,
        };
        self.route.write().await.insert(token_mint.to_string(), TtlEntry::fresh(hint, ttl));
    }

    pub async fn clear_route(&self, token_mint: &str) {
        self.route.write().await.remove(token_mint);
    }

    pub async fn get_route_vaults(&self, kind: RouteKind, token_mint: &str) -> Option<Vec<u8>> {
        self.route_vaults.read().await.get(&(kind, token_mint.to_string())).cloned()
    }

    pub async fn set_route_vaults(&self, kind: RouteKind, token_mint: &str, blob: Vec<u8>) {
        self.route_vaults.write().await.insert((kind, token_mint.to_string()), blob);
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn price_round_trips_until_ttl() {
        let cache = PriceCache::new();
        cache.set_price("mintA", 1.5).await;
        assert_eq!(cache.get_price("mintA").await, Some(1.5));
        assert!(!cache.has_error("mintA").await);
    }

    #[tokio::test]
    async fn setting_price_clears_prior_error() {
        let cache = PriceCache::new();
        cache.mark_error("mintA").await;
        assert!(cache.has_error("mintA").await);
        cache.set_price("mintA", 2.0).await;
        assert!(!cache.has_error("mintA").await);
    }

    #[tokio::test]
    async fn interest_set_lists_only_live_entries() {
        let cache = PriceCache::new();
        cache.add_interest("mintA").await;
        assert!(cache.has_interest("mintA").await);
        assert_eq!(cache.list_interest().await, vec!["mintA".to_string()]);
    }

    #[tokio::test]
    async fn price_and_error_are_mutually_exclusive() {
        let cache = PriceCache::new();
        cache.set_price("mintA", 1.5).await;
        cache.mark_error("mintA").await;
        assert!(cache.has_error("mintA").await);
        assert_eq!(cache.get_price("mintA").await, None);
    }
}
