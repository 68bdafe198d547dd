//! Telemetry payload models

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unit strings attached to published metrics
pub mod units {
    pub const CELSIUS: &str = "°C";
    pub const HECTOPASCAL: &str = "hPa";
    pub const PERCENT: &str = "%";
    pub const OHM: &str = "ohm";
    pub const MICROGRAMS_PER_M3: &str = "µg/m³";
    pub const PARTICLES_PER_DECILITRE: &str = "#/0.1L";
}

/// A single metric value
///
/// Rounded readings are published as integers, raw readings as floats.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Integer(i64),
    Float(f64),
}

impl MetricValue {
    /// Round to the nearest integer, ties to even
    pub fn rounded(value: f64) -> Self {
        MetricValue::Integer(value.round_ties_even() as i64)
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            MetricValue::Integer(v) => *v as f64,
            MetricValue::Float(v) => *v,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Float(value)
    }
}

impl From<u16> for MetricValue {
    fn from(value: u16) -> Self {
        MetricValue::Integer(value as i64)
    }
}

impl From<i64> for MetricValue {
    fn from(value: i64) -> Self {
        MetricValue::Integer(value)
    }
}

/// One telemetry reading handed to the publish capability
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    /// Container the reading is attributed to
    #[serde(rename = "x-container-id")]
    pub container_id: Option<String>,
    /// Signature of the configuration that started the poller
    #[serde(rename = "x-piphi-signature")]
    pub signature: String,
    pub device_id: String,
    /// Sampling instant
    pub timestamp: DateTime<Utc>,
    pub metrics: BTreeMap<String, MetricValue>,
    pub units: BTreeMap<String, String>,
}

impl TelemetryPayload {
    pub fn new(
        device_id: impl Into<String>,
        container_id: Option<String>,
        signature: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            container_id,
            signature: signature.into(),
            device_id: device_id.into(),
            timestamp,
            metrics: BTreeMap::new(),
            units: BTreeMap::new(),
        }
    }

    /// Add a metric together with its unit
    pub fn push_metric(
        &mut self,
        name: impl Into<String>,
        value: impl Into<MetricValue>,
        unit: &str,
    ) {
        let name = name.into();
        self.units.insert(name.clone(), unit.to_string());
        self.metrics.insert(name, value.into());
    }

    pub fn with_metric(
        mut self,
        name: impl Into<String>,
        value: impl Into<MetricValue>,
        unit: &str,
    ) -> Self {
        self.push_metric(name, value, unit);
        self
    }

    pub fn metric(&self, name: &str) -> Option<MetricValue> {
        self.metrics.get(name).copied()
    }

    pub fn to_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_payload_wire_shape() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let payload = TelemetryPayload::new("d1", Some("c1".into()), "abc", ts)
            .with_metric("temperature", MetricValue::rounded(21.6), units::CELSIUS)
            .with_metric("pressure", 1013.25, units::HECTOPASCAL);

        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({
                "x-container-id": "c1",
                "x-piphi-signature": "abc",
                "device_id": "d1",
                "timestamp": "2024-05-01T12:00:00Z",
                "metrics": {"temperature": 22, "pressure": 1013.25},
                "units": {"temperature": "°C", "pressure": "hPa"}
            })
        );
    }

    #[test]
    fn test_rounding_ties_to_even() {
        assert_eq!(MetricValue::rounded(2.5), MetricValue::Integer(2));
        assert_eq!(MetricValue::rounded(3.5), MetricValue::Integer(4));
        assert_eq!(MetricValue::rounded(22.5), MetricValue::Integer(22));
        assert_eq!(MetricValue::rounded(-0.5), MetricValue::Integer(0));
        assert_eq!(MetricValue::rounded(7.49), MetricValue::Integer(7));
        assert_eq!(MetricValue::rounded(7.51), MetricValue::Integer(8));
    }

    #[test]
    fn test_missing_container_serializes_as_null() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let payload = TelemetryPayload::new("d1", None, "sig", ts);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["x-container-id"], serde_json::Value::Null);
    }
}
