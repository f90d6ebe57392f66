//! Notification collaborator.
//!
//! Orchestrators emit structured [`PipelineEvent`]s; what happens to them
//! (log line, webhook, WebSocket fan-out) is the notifier's business.
//! Delivery failures are logged and never affect the job that emitted them.

use crate::utils::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "backup.started")]
    BackupStarted,
    #[serde(rename = "backup.completed")]
    BackupCompleted,
    #[serde(rename = "backup.failed")]
    BackupFailed,
    #[serde(rename = "recovery.completed")]
    RecoveryCompleted,
    #[serde(rename = "recovery.failed")]
    RecoveryFailed,
    #[serde(rename = "drill.completed")]
    DrillCompleted,
    #[serde(rename = "drill.failed")]
    DrillFailed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::BackupStarted => "backup.started",
            EventKind::BackupCompleted => "backup.completed",
            EventKind::BackupFailed => "backup.failed",
            EventKind::RecoveryCompleted => "recovery.completed",
            EventKind::RecoveryFailed => "recovery.failed",
            EventKind::DrillCompleted => "drill.completed",
            EventKind::DrillFailed => "drill.failed",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            EventKind::BackupFailed | EventKind::RecoveryFailed | EventKind::DrillFailed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub kind: EventKind,
    pub node_id: String,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    pub status: String,
    pub duration_ms: u64,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-domain or per-stage detail for partial outcomes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(kind: EventKind, node_id: &str, job_id: &str) -> Self {
        Self {
            kind,
            node_id: node_id.to_string(),
            job_id: job_id.to_string(),
            backup_id: None,
            status: String::new(),
            duration_ms: 0,
            size_bytes: 0,
            error: None,
            warnings: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &PipelineEvent) -> Result<()>;
}

/// Deliver an event, logging instead of propagating delivery failures.
pub async fn deliver(notifier: &dyn Notifier, event: &PipelineEvent) {
    if let Err(e) = notifier.notify(event).await {
        warn!("Failed to deliver {} for {}: {}", event.kind, event.job_id, e);
    }
}

/// Writes every event to the log.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, event: &PipelineEvent) -> Result<()> {
        if event.kind.is_failure() {
            error!(
                event = %event.kind,
                job_id = %event.job_id,
                duration_ms = event.duration_ms,
                error = event.error.as_deref().unwrap_or(""),
                "Pipeline event"
            );
        } else {
            info!(
                event = %event.kind,
                job_id = %event.job_id,
                duration_ms = event.duration_ms,
                size_bytes = event.size_bytes,
                warnings = event.warnings.len(),
                "Pipeline event"
            );
        }
        Ok(())
    }
}

/// POSTs events as JSON to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &PipelineEvent) -> Result<()> {
        self.client
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Forwards each event to every inner notifier; one failing channel does
/// not starve the others.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(targets: Vec<Arc<dyn Notifier>>) -> Self {
        Self { targets }
    }

    pub fn with(mut self, target: Arc<dyn Notifier>) -> Self {
        self.targets.push(target);
        self
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, event: &PipelineEvent) -> Result<()> {
        for target in &self.targets {
            deliver(target.as_ref(), event).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingNotifier;

    #[test]
    fn test_event_serialization() {
        let mut event = PipelineEvent::new(EventKind::BackupCompleted, "shop-01", "backup_1");
        event.size_bytes = 2048;
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "backup.completed");
        assert_eq!(json["size_bytes"], 2048);
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_fanout_reaches_every_target() {
        let a = Arc::new(RecordingNotifier::default());
        let b = Arc::new(RecordingNotifier::failing());
        let c = Arc::new(RecordingNotifier::default());
        let fanout = FanoutNotifier::new(vec![a.clone(), b.clone(), c.clone()]);

        let event = PipelineEvent::new(EventKind::RecoveryFailed, "shop-01", "recovery_1");
        fanout.notify(&event).await.unwrap();

        assert_eq!(a.kinds(), vec![EventKind::RecoveryFailed]);
        assert_eq!(c.kinds(), vec![EventKind::RecoveryFailed]);
    }
}
