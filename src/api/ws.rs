//! Realtime state-delta WebSocket.
//!
//! Clients get a full snapshot on connect, then every state change the
//! broadcaster publishes. Slow clients lag and miss deltas; the next delta
//! always carries the full current state, so nothing stays stale.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use flotilla_state::StateStore;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ApiState;

/// Publish a state event whenever the store has persisted new writes.
pub fn spawn_state_broadcaster(
    store: Arc<StateStore>,
    updates: broadcast::Sender<serde_json::Value>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen = store.write_count();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
            }
            let current = store.write_count();
            if current == last_seen {
                continue;
            }
            last_seen = current;
            let snapshot = store.snapshot().await;
            let event = json!({ "event": "state", "data": snapshot });
            // No receivers is fine; the next client gets a snapshot on connect.
            let _ = updates.send(event);
        }
    })
}

pub async fn handle_connection(socket: WebSocket, state: Arc<ApiState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut updates_rx = state.updates.subscribe();

    // Full snapshot on connect.
    let snapshot = state.store.snapshot().await;
    let hello = json!({ "event": "state", "data": snapshot });
    if let Ok(text) = serde_json::to_string(&hello) {
        if ws_tx.send(WsMessage::Text(text)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = ws_tx.send(WsMessage::Pong(payload)).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        info!("ws client disconnected");
                        return;
                    }
                    Some(Err(e)) => {
                        warn!("ws error: {e}");
                        return;
                    }
                    _ => {} // Text, Binary, Pong — the channel is one-way
                }
            }
            event = updates_rx.recv() => {
                match event {
                    Ok(value) => {
                        if let Ok(text) = serde_json::to_string(&value) {
                            if ws_tx.send(WsMessage::Text(text)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("ws client lagged, skipped {n} deltas");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}
