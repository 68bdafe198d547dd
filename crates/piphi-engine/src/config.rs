//! Engine configuration
//!
//! Loaded from the daemon's TOML file; every section and field has a
//! default so an empty file is a valid configuration.

use std::path::Path;
use std::time::Duration;

use piphi_bridge::BridgeConfig;
use piphi_core::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Configuration for the telemetry engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

impl EngineConfig {
    pub fn from_toml(text: &str) -> EngineResult<Self> {
        toml::from_str(text).map_err(|e| EngineError::InvalidConfig(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }
}

/// MQTT broker connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Client id prefix; a random suffix is appended per connection
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Topic readings are published to
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "piphi-i2c".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_topic() -> String {
    "piphi/telemetry".to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive(),
            topic: default_topic(),
        }
    }
}

/// Bridge discovery and classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(flatten)]
    pub bridge: BridgeConfig,
    /// Report every classified kind instead of particulate sensors only
    #[serde(default)]
    pub report_all_kinds: bool,
    /// Run discovery when the daemon starts
    #[serde(default = "default_true")]
    pub discover_on_startup: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bridge: BridgeConfig::default(),
            report_all_kinds: false,
            discover_on_startup: true,
        }
    }
}

/// Poller cadence and frame policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between BME68x, BME280 and AHT20 cycles
    #[serde(default = "default_environmental_interval")]
    pub environmental_interval_secs: u64,
    /// Wait between the AHT20 measurement trigger and the read
    #[serde(default = "default_aht20_delay")]
    pub aht20_measurement_delay_secs: u64,
    /// Delay between PMSA003I cycles
    #[serde(default = "default_particulate_interval")]
    pub particulate_interval_secs: u64,
    /// Publish PMSA003I frames that fail the header or checksum check
    #[serde(default)]
    pub publish_invalid_frames: bool,
}

fn default_environmental_interval() -> u64 {
    10
}

fn default_aht20_delay() -> u64 {
    10
}

fn default_particulate_interval() -> u64 {
    60
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            environmental_interval_secs: default_environmental_interval(),
            aht20_measurement_delay_secs: default_aht20_delay(),
            particulate_interval_secs: default_particulate_interval(),
            publish_invalid_frames: false,
        }
    }
}

impl PollingConfig {
    pub fn environmental_interval(&self) -> Duration {
        Duration::from_secs(self.environmental_interval_secs)
    }

    pub fn aht20_measurement_delay(&self) -> Duration {
        Duration::from_secs(self.aht20_measurement_delay_secs)
    }

    pub fn particulate_interval(&self) -> Duration {
        Duration::from_secs(self.particulate_interval_secs)
    }
}
