//! Bridge adapter and discovery models

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::SensorKind;

/// A bridge adapter found on the host during enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Device node of the adapter's serial interface (e.g. "/dev/ttyACM0")
    pub bus_path: String,
    /// USB serial number, when the adapter reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    /// Human-readable name (USB product string)
    pub display_name: String,
    /// sysfs directory of the USB device backing this candidate
    #[serde(skip)]
    pub usb_device: Option<PathBuf>,
}

impl Candidate {
    pub fn new(bus_path: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            bus_path: bus_path.into(),
            serial_number: None,
            display_name: display_name.into(),
            usb_device: None,
        }
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn with_usb_device(mut self, path: impl Into<PathBuf>) -> Self {
        self.usb_device = Some(path.into());
        self
    }
}

/// A classified device as reported by the discovery capability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub bus_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    pub name: String,
    pub sensor_kind: SensorKind,
    /// Serial number reported by the bridge chip itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_serial: Option<String>,
}
