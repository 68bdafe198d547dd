//! piphi-bridge - USB-I2C bridge access for PiPhi
//!
//! This crate provides everything that touches the I2C bus: finding
//! MCP2221 bridge adapters, opening them, and the Bosch sensor drivers that
//! run on top of the bus capability.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  BridgeEnumerator          BridgeOpener                  │
//! │  (sysfs tty → USB dev)     (candidate → OpenedBridge)    │
//! │         │                        │                       │
//! │         ▼                        ▼                       │
//! │     Candidate ──────────►  Arc<dyn I2cBus>               │
//! │                           ┌──────┴───────┐               │
//! │                        Mcp2221        MockBus            │
//! │                        (hidraw)       (tests)            │
//! │                                 │                        │
//! │                        DriverFactory                     │
//! │                    ┌────────────┴───────────┐            │
//! │                  Bme280                   Bme68x         │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod drivers;
pub mod enumerate;
pub mod transport;

pub use config::BridgeConfig;
pub use drivers::{
    BoschDriverFactory, DriverFactory, EnvironmentalDriver, EnvironmentalReading, SensorSettings,
};
pub use enumerate::{BridgeEnumerator, SysfsEnumerator};
pub use transport::{create_opener, BridgeOpener, I2cBus, OpenedBridge, TransportError};

/// Mock bridge stack, re-exported for tests in dependent crates
pub use transport::mock;
