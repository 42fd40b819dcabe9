use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::Deserialize;
use tokio::sync::{broadcast, RwLock};
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{ActorTradeUpdate, MindmapUpdate};

use super::orchestrator::Orchestrator;

const RECONNECT_DELAY_MS: u64 = 5_000;
const MAX_RECONNECT_DELAY_MS: u64 = 60_000;

/// The two event shapes the upstream stream sends, distinguished by which
/// fields are present: `trade` for an actor-trade update, `tokenMint`/`data`
/// for a mindmap update.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InboundEvent {
    ActorTrade(ActorTradeUpdate),
    Mindmap(MindmapUpdate),
}

/// Connects to the upstream social-signal event stream (`API_SERVER_URL`)
/// and forwards decoded events to the Orchestrator. Reconnects with
/// exponential backoff on a dropped connection: a `running` flag plus a
/// `shutdown_tx` broadcast interrupts an in-flight read on shutdown.
pub struct EventListener {
    config: Arc<Config>,
    orchestrator: Arc<Orchestrator>,
    running: Arc<RwLock<bool>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl EventListener {
    pub fn new(config: Arc<Config>, orchestrator: Arc<Orchestrator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { config, orchestrator, running: Arc::new(RwLock::new(false)), shutdown_tx }
    }

    pub async fn start(&self) {
        *self.running.write().await = true;
        let mut delay_ms = RECONNECT_DELAY_MS;

        while *self.running.read().await {
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            match self.connect_and_consume(&mut shutdown_rx).await {
                Ok(()) => {
                    info!("event stream closed, reconnecting");
                    delay_ms = RECONNECT_DELAY_MS;
                }
                Err(e) => {
                    warn!("event stream connection failed: {}, retrying in {}ms", e, delay_ms);
                }
            }

            if !*self.running.read().await {
                break;
            }
            // Exponential backoff with jitter: ConnectionError is retryable.
            let jitter_ms = rand::thread_rng().gen_range(0..=delay_ms / 4 + 1);
            sleep(Duration::from_millis(delay_ms + jitter_ms)).await;
            delay_ms = (delay_ms * 2).min(MAX_RECONNECT_DELAY_MS);
        }
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
        let _ = self.shutdown_tx.send(());
    }

    async fn connect_and_consume(&self, shutdown_rx: &mut broadcast::Receiver<()>) -> anyhow::Result<()> {
        let (ws_stream, _) = connect_async(&self.config.api_server_url).await?;
        info!("connected to event stream at {}", self.config.api_server_url);
        let (mut write, mut read) = ws_stream.split();

        let subscribe_msg = serde_json::json!({
            "type": "subscribe",
            "mode": self.config.monitoring_mode,
            "apiKey": self.config.api_key,
        });
        write.send(Message::Text(subscribe_msg.to_string())).await?;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.dispatch(&text).await,
                        Some(Ok(Message::Ping(payload))) => {
                            if write.send(Message::Pong(payload)).await.is_err() {
                                return Ok(());
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                    }
                }
            }
        }
    }

    async fn dispatch(&self, text: &str) {
        match serde_json::from_str::<InboundEvent>(text) {
            Ok(InboundEvent::ActorTrade(update)) => {
                debug!("actor trade update from {}", update.trade.actor_id);
                self.orchestrator.handle_actor_trade_update(update).await;
            }
            Ok(InboundEvent::Mindmap(update)) => {
                debug!("mindmap update for {}", update.token_mint);
                self.orchestrator.handle_mindmap_update(update).await;
            }
            Err(e) => warn!("failed to decode inbound event: {}", e),
        }
    }
}
