//! Bridge configuration
//!
//! Describes how bridge adapters are found on the host and how their I2C
//! bus is driven.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Microchip vendor id
pub const MCP2221_VENDOR_ID: u16 = 0x04D8;
/// MCP2221/MCP2221A product id
pub const MCP2221_PRODUCT_ID: u16 = 0x00DD;

/// Configuration for bridge enumeration and access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// USB vendor id of the bridge adapter
    #[serde(default = "default_vendor_id")]
    pub vendor_id: u16,
    /// USB product id of the bridge adapter
    #[serde(default = "default_product_id")]
    pub product_id: u16,
    /// Root of the sysfs tree
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    /// Directory holding the hidraw device nodes
    #[serde(default = "default_dev_root")]
    pub dev_root: PathBuf,
    /// I2C clock speed in Hz
    #[serde(default = "default_i2c_speed")]
    pub i2c_speed_hz: u32,
}

fn default_vendor_id() -> u16 {
    MCP2221_VENDOR_ID
}

fn default_product_id() -> u16 {
    MCP2221_PRODUCT_ID
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_dev_root() -> PathBuf {
    PathBuf::from("/dev")
}

fn default_i2c_speed() -> u32 {
    100_000
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            vendor_id: default_vendor_id(),
            product_id: default_product_id(),
            sysfs_root: default_sysfs_root(),
            dev_root: default_dev_root(),
            i2c_speed_hz: default_i2c_speed(),
        }
    }
}

impl BridgeConfig {
    /// `VID:PID` as found in host hardware ids (e.g. "04D8:00DD")
    pub fn hardware_id(&self) -> String {
        format!("{:04X}:{:04X}", self.vendor_id, self.product_id)
    }
}
