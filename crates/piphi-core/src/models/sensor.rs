//! Sensor classification models

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sensor family detected behind a bridge adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorKind {
    /// Bosch BME680/BME688 (temperature, pressure, humidity, gas)
    #[serde(rename = "BME68x")]
    Bme68x,
    /// Bosch BME280 (temperature, pressure, humidity)
    #[serde(rename = "BME280")]
    Bme280,
    /// Aosong AHT20 (temperature, humidity)
    #[serde(rename = "AHT20")]
    Aht20,
    /// Plantower PMSA003I particulate sensor
    #[serde(rename = "PMSA003I")]
    Pmsa003i,
    /// Nothing recognised on the bus
    #[serde(rename = "Unclassified")]
    Unclassified,
}

impl SensorKind {
    /// Label used in discovery results and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Bme68x => "BME68x",
            SensorKind::Bme280 => "BME280",
            SensorKind::Aht20 => "AHT20",
            SensorKind::Pmsa003i => "PMSA003I",
            SensorKind::Unclassified => "Unclassified",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw evidence that led to a classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ProbeEvidence {
    /// Chip identification register (0xD0) of a Bosch sensor
    ChipId(u8),
    /// Status register of an AHT20
    Status(u8),
    /// First block read from a PMSA003I
    Frame(Vec<u8>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_kind_labels() {
        assert_eq!(SensorKind::Bme68x.to_string(), "BME68x");
        assert_eq!(
            serde_json::to_value(SensorKind::Pmsa003i).unwrap(),
            serde_json::json!("PMSA003I")
        );
        let kind: SensorKind = serde_json::from_str("\"AHT20\"").unwrap();
        assert_eq!(kind, SensorKind::Aht20);
    }

    #[test]
    fn test_probe_evidence_serialization() {
        let evidence = ProbeEvidence::ChipId(0x61);
        assert_eq!(
            serde_json::to_value(&evidence).unwrap(),
            serde_json::json!({"type": "chip_id", "value": 97})
        );
    }
}
