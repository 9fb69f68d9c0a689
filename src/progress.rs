//! Ingestion progress reporting.
//!
//! Progress is best-effort and fire-and-forget: the pipeline calls a
//! [`ProgressReporter`] at stage transitions and never blocks on, or fails
//! because of, delivery. [`ProgressHub`] routes events to connected clients
//! by session id; a client that is not connected simply misses events, and
//! the final outcome is always available from the ingestion call itself.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::info;

/// Pipeline stage a progress event refers to. Chunking and storage are
/// fast local steps and do not emit events of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Fetch,
    Embed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    InProgress,
    Completed,
    Error,
}

/// One progress update. Serialized as a single JSON object per message on
/// the wire: `{"type": "...", "status": "...", "progress": 0-100, "message": "..."}`.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub stage: ProgressStage,
    pub status: ProgressStatus,
    /// Percent complete, 0 through 100.
    pub progress: u8,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(
        stage: ProgressStage,
        status: ProgressStatus,
        progress: u8,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            status,
            progress: progress.min(100),
            message: message.into(),
        }
    }
}

/// Sink for progress events. Implementations must never block the pipeline.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Discards all events.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

/// Writes events to the log. Used by the CLI, where there is no client
/// session to route to.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: ProgressEvent) {
        info!(
            stage = ?event.stage,
            status = ?event.status,
            progress = event.progress,
            "{}",
            event.message
        );
    }
}

/// Routes progress events to connected client sessions.
///
/// Each client registers under its session id and receives events through
/// an unbounded channel. Publishing to an unknown or disconnected client
/// drops the event; a failed send also removes the stale registration.
#[derive(Default)]
pub struct ProgressHub {
    channels: RwLock<HashMap<String, mpsc::UnboundedSender<ProgressEvent>>>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client session. A second registration under the same id
    /// replaces the first; the old receiver stops getting events.
    pub fn register(&self, client_id: &str) -> mpsc::UnboundedReceiver<ProgressEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels
            .write()
            .expect("progress hub lock poisoned")
            .insert(client_id.to_string(), tx);
        rx
    }

    pub fn unregister(&self, client_id: &str) {
        self.channels
            .write()
            .expect("progress hub lock poisoned")
            .remove(client_id);
    }

    /// Deliver an event to one client, if connected. Never blocks.
    pub fn publish(&self, client_id: &str, event: ProgressEvent) {
        let mut channels = self.channels.write().expect("progress hub lock poisoned");
        if let Some(tx) = channels.get(client_id) {
            if tx.send(event).is_err() {
                channels.remove(client_id);
            }
        }
    }
}

/// Reporter bound to one client session on a hub.
pub struct ChannelReporter {
    hub: std::sync::Arc<ProgressHub>,
    client_id: String,
}

impl ChannelReporter {
    pub fn new(hub: std::sync::Arc<ProgressHub>, client_id: impl Into<String>) -> Self {
        Self {
            hub,
            client_id: client_id.into(),
        }
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: ProgressEvent) {
        self.hub.publish(&self.client_id, event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn event_serializes_with_wire_field_names() {
        let event = ProgressEvent::new(
            ProgressStage::Fetch,
            ProgressStatus::InProgress,
            40,
            "4/10 files",
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "fetch",
                "status": "in_progress",
                "progress": 40,
                "message": "4/10 files"
            })
        );
    }

    #[test]
    fn percent_is_clamped() {
        let event = ProgressEvent::new(ProgressStage::Embed, ProgressStatus::Completed, 250, "");
        assert_eq!(event.progress, 100);
    }

    #[tokio::test]
    async fn hub_routes_to_registered_client() {
        let hub = Arc::new(ProgressHub::new());
        let mut rx = hub.register("client-1");

        let reporter = ChannelReporter::new(hub.clone(), "client-1");
        reporter.report(ProgressEvent::new(
            ProgressStage::Embed,
            ProgressStatus::Completed,
            100,
            "done",
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.stage, ProgressStage::Embed);
        assert_eq!(event.progress, 100);
    }

    #[tokio::test]
    async fn publish_to_unknown_client_is_dropped() {
        let hub = ProgressHub::new();
        // No registration; must not panic or block.
        hub.publish(
            "nobody",
            ProgressEvent::new(ProgressStage::Fetch, ProgressStatus::Pending, 0, ""),
        );
    }

    #[tokio::test]
    async fn disconnected_client_is_pruned() {
        let hub = ProgressHub::new();
        let rx = hub.register("client-2");
        drop(rx);

        hub.publish(
            "client-2",
            ProgressEvent::new(ProgressStage::Fetch, ProgressStatus::Completed, 100, ""),
        );
        assert!(hub
            .channels
            .read()
            .unwrap()
            .get("client-2")
            .is_none());
    }
}
