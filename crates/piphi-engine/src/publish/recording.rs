//! In-memory publisher for tests

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use piphi_core::TelemetryPayload;
use tokio::sync::Notify;

use super::{PublishError, QoS, TelemetryPublisher};

/// A message captured by [`RecordingPublisher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

/// Records every publish; can be switched to fail
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    messages: RwLock<Vec<PublishedMessage>>,
    failing: AtomicBool,
    published: Notify,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<PublishedMessage> {
        self.messages.read().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }

    /// Recorded messages parsed as telemetry payloads; unparsable ones are skipped
    pub fn payloads(&self) -> Vec<TelemetryPayload> {
        self.messages
            .read()
            .iter()
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }

    pub fn clear(&self) {
        self.messages.write().clear();
    }

    /// Reject publishes (without recording them) while set
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Wait until at least `count` messages were recorded
    pub async fn wait_for(&self, count: usize) {
        loop {
            let notified = self.published.notified();
            if self.len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl TelemetryPublisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Client("recording publisher set to fail".into()));
        }
        self.messages.write().push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        self.published.notify_waiters();
        Ok(())
    }
}
