//! Telemetry publishing
//!
//! Pollers hand serialized payloads to a [`TelemetryPublisher`]. The MQTT
//! publisher is used in production, [`LogPublisher`] when no broker is
//! wanted, and [`RecordingPublisher`] in tests.

pub mod mqtt;
pub mod recording;

use async_trait::async_trait;
use piphi_core::EngineError;
use thiserror::Error;
use tracing::info;

pub use mqtt::MqttPublisher;
pub use recording::{PublishedMessage, RecordingPublisher};

/// Delivery guarantee requested for a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Errors raised by a publisher
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("Client error: {0}")]
    Client(String),

    #[error("Publisher is closed")]
    Closed,
}

impl From<PublishError> for EngineError {
    fn from(err: PublishError) -> Self {
        EngineError::Publish(err.to_string())
    }
}

/// Sink for telemetry payloads
///
/// Implementations own delivery retries; a returned error only means the
/// message could not be queued.
#[async_trait]
pub trait TelemetryPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError>;
}

/// Publisher that only logs payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl TelemetryPublisher for LogPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        info!(
            topic = %topic,
            ?qos,
            retain,
            payload = %String::from_utf8_lossy(&payload),
            "Telemetry"
        );
        Ok(())
    }
}
