use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use dashmap::DashMap;
use dr_engine::notify::{Notifier, PipelineEvent};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::state::AppState;

const BROADCAST_CAPACITY: usize = 256;
const MAX_QUEUE_PER_JOB: usize = 100;

#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub event_type: String,
    pub payload: Value,
    pub timestamp: i64,
}

impl QueuedMessage {
    fn to_text(&self) -> String {
        serde_json::json!({
            "type": self.event_type,
            "payload": self.payload,
        })
        .to_string()
    }
}

/// Fans pipeline events out to every connected UI socket and keeps a short
/// per-job backlog for clients that reconnect mid-run.
#[derive(Clone)]
pub struct UiBroadcaster {
    tx: broadcast::Sender<String>,
    queue: Arc<DashMap<String, VecDeque<QueuedMessage>>>,
}

impl UiBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            tx,
            queue: Arc::new(DashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn broadcast(&self, event_type: &str, payload: Value) {
        let message = QueuedMessage {
            event_type: event_type.to_string(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        if let Some(job_id) = message.payload.get("job_id").and_then(|v| v.as_str()) {
            let mut entry = self.queue.entry(job_id.to_string()).or_default();
            entry.push_back(message.clone());
            if entry.len() > MAX_QUEUE_PER_JOB {
                entry.pop_front();
            }
        }

        // No subscribers is fine
        let _ = self.tx.send(message.to_text());
    }

    pub fn get_queued_messages(&self, job_id: &str, since: i64) -> Vec<QueuedMessage> {
        self.queue
            .get(job_id)
            .map(|q| q.iter().filter(|m| m.timestamp > since).cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for UiBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for UiBroadcaster {
    async fn notify(&self, event: &PipelineEvent) -> dr_engine::Result<()> {
        self.broadcast(event.kind.as_str(), serde_json::to_value(event)?);
        Ok(())
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ui_socket(socket, state))
}

async fn handle_ui_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.ui.subscribe();
    let (replay_tx, mut replay_rx) = mpsc::channel::<String>(MAX_QUEUE_PER_JOB);

    // Forward broadcasts and replays to this client only
    let send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                msg = rx.recv() => match msg {
                    Ok(text) => text,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("UI socket lagged, {} event(s) dropped", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(text) = replay_rx.recv() => text,
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Incoming: {"type":"replay:request","payload":{"job_id":..,"since":..}}
    let ui = state.ui.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(parsed) = serde_json::from_str::<Value>(&text) else { continue };
            if parsed.get("type").and_then(|t| t.as_str()) != Some("replay:request") {
                continue;
            }
            let Some(payload) = parsed.get("payload") else { continue };
            let job_id = payload.get("job_id").and_then(|v| v.as_str()).unwrap_or("");
            let since = payload.get("since").and_then(|v| v.as_i64()).unwrap_or(0);
            for m in ui.get_queued_messages(job_id, since) {
                if replay_tx.send(m.to_text()).await.is_err() {
                    return;
                }
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_engine::notify::EventKind;

    #[tokio::test]
    async fn test_events_reach_subscribers_and_backlog() {
        let ui = UiBroadcaster::new();
        let mut rx = ui.subscribe();

        let mut event = PipelineEvent::new(EventKind::BackupCompleted, "shop-01", "backup_1");
        event.status = "completed".into();
        ui.notify(&event).await.unwrap();

        let text = rx.recv().await.unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["type"], "backup.completed");
        assert_eq!(parsed["payload"]["job_id"], "backup_1");

        assert_eq!(ui.get_queued_messages("backup_1", 0).len(), 1);
        assert!(ui.get_queued_messages("backup_2", 0).is_empty());
    }

    #[test]
    fn test_backlog_is_bounded() {
        let ui = UiBroadcaster::new();
        for i in 0..(MAX_QUEUE_PER_JOB + 20) {
            ui.broadcast("backup.started", serde_json::json!({ "job_id": "backup_1", "seq": i }));
        }
        let queued = ui.get_queued_messages("backup_1", 0);
        assert_eq!(queued.len(), MAX_QUEUE_PER_JOB);
        assert_eq!(queued[0].payload["seq"], 20);
    }
}
