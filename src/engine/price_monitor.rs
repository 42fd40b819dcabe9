use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::external::PriceOracle;
use crate::store::price_cache::{RouteHint, RouteKind};
use crate::store::PriceCache;

const FAST_LOOP_PERIOD_MS: u64 = 100;
const SLOW_LOOP_PERIOD_MS: u64 = 1000;
const SLOW_LOOP_PACING_MS: u64 = 150;

/// Periodic fan-out that refreshes PriceCache for every token in the interest
/// set. Runs a 100ms fast loop (batched oracle lookups) and a >=1s slow loop
/// (per-token discovery for whatever the fast loop couldn't resolve).
pub struct PriceMonitor {
    oracle: Arc<dyn PriceOracle>,
    price_cache: Arc<PriceCache>,
    running: Arc<RwLock<bool>>,
    fast_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
    slow_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PriceMonitor {
    pub fn new(oracle: Arc<dyn PriceOracle>, price_cache: Arc<PriceCache>) -> Self {
        Self {
            oracle,
            price_cache,
            running: Arc::new(RwLock::new(false)),
            fast_handle: Arc::new(Mutex::new(None)),
            slow_handle: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn start(self: Arc<Self>) {
        let mut running = self.running.write().await;
        if *running {
            warn!("price monitor start requested but already running");
            return;
        }
        *running = true;
        drop(running);

        let fast_self = self.clone();
        let fast_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(FAST_LOOP_PERIOD_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                if !*fast_self.running.read().await {
                    break;
                }
                ticker.tick().await;
                fast_self.fast_tick().await;
            }
        });

        let slow_self = self.clone();
        let slow_handle = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_millis(SLOW_LOOP_PERIOD_MS));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                if !*slow_self.running.read().await {
                    break;
                }
                ticker.tick().await;
                slow_self.slow_tick().await;
            }
        });

        *self.fast_handle.lock().await = Some(fast_handle);
        *self.slow_handle.lock().await = Some(slow_handle);
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        if let Some(handle) = self.fast_handle.lock().await.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.slow_handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    async fn fast_tick(&self) {
        let interested = self.price_cache.list_interest().await;
        if interested.is_empty() {
            return;
        }

        let mut pre_or_unknown = Vec::new();
        let mut post_graduation = Vec::new();
        for mint in &interested {
            match self.price_cache.get_route(mint).await {
                Some(hint) if hint.kind == RouteKind::PostGraduation => {
                    if let Some(blob) = hint.blob.clone() {
                        post_graduation.push((mint.clone(), blob));
                    } else {
                        pre_or_unknown.push(mint.clone());
                    }
                }
                _ => pre_or_unknown.push(mint.clone()),
            }
        }

        if !pre_or_unknown.is_empty() {
            match self.oracle.fast_batch_a(&pre_or_unknown).await {
                Ok((resolved, _misses)) => {
                    for (mint, price) in resolved {
                        self.price_cache.set_price(&mint, price).await;
                    }
                }
                Err(e) => debug!("fast_batch_a failed: {}", e),
            }
        }

        if !post_graduation.is_empty() {
            match self.oracle.fast_batch_b(&post_graduation).await {
                Ok(resolved) => {
                    for (mint, price) in resolved {
                        self.price_cache.set_price(&mint, price).await;
                    }
                }
                Err(e) => debug!("fast_batch_b failed: {}", e),
            }
        }
    }

    async fn slow_tick(&self) {
        let interested = self.price_cache.list_interest().await;
        for mint in interested {
            if self.price_cache.get_price(&mint).await.is_some() {
                continue;
            }
            if self.price_cache.has_error(&mint).await {
                continue;
            }
            match self.oracle.discover(&mint).await {
                Ok(Some(result)) => {
                    self.price_cache.set_price(&mint, result.price).await;
                    self.price_cache
                        .set_route(
                            &mint,
                            RouteHint { kind: result.source, blob: result.route_blob.clone() },
                        )
                        .await;
                    if let Some(blob) = result.route_blob {
                        self.price_cache.set_route_vaults(result.source, &mint, blob).await;
                    }
                }
                Ok(None) => {
                    self.price_cache.mark_error(&mint).await;
                }
                Err(e) => {
                    debug!("discover failed for {}: {}", mint, e);
                    self.price_cache.mark_error(&mint).await;
                }
            }
            tokio::time::sleep(Duration::from_millis(SLOW_LOOP_PACING_MS)).await;
        }
    }
}
