//! MQTT publisher built on rumqttc

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{PublishError, QoS, TelemetryPublisher};
use crate::config::MqttConfig;

/// Capacity of the client request queue
const REQUEST_QUEUE: usize = 64;
/// Back-off after a connection error before the event loop reconnects
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Publishes to an MQTT broker
///
/// The rumqttc event loop runs on a background task that reconnects on
/// its own; it is aborted when the publisher is dropped.
pub struct MqttPublisher {
    client: AsyncClient,
    client_id: String,
    event_loop: JoinHandle<()>,
}

impl MqttPublisher {
    /// Create the client and start its event loop; must run inside a runtime
    pub fn connect(config: &MqttConfig) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        let client_id = format!("{}-{}", config.client_id, &suffix[..8]);

        let mut options = MqttOptions::new(client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs.max(5)));

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_QUEUE);
        let host = format!("{}:{}", config.host, config.port);
        info!(broker = %host, client_id = %client_id, "Starting MQTT client");

        let event_loop = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        info!(broker = %host, code = ?ack.code, "MQTT connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(ack))) => {
                        debug!(pkid = ack.pkid, "MQTT publish acknowledged");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(broker = %host, error = %e, "MQTT connection error");
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        Self {
            client,
            client_id,
            event_loop,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

#[async_trait]
impl TelemetryPublisher for MqttPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), PublishError> {
        if self.event_loop.is_finished() {
            return Err(PublishError::Closed);
        }
        self.client
            .publish(topic, qos.into(), retain, payload)
            .await
            .map_err(|e| PublishError::Client(e.to_string()))
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}
