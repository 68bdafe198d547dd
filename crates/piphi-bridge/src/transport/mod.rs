//! Transport layer for I2C bridge adapters
//!
//! This module provides the bus capability the engine drives sensors
//! through:
//! - MCP2221 adapter over Linux hidraw
//! - Mock bus for testing
//!
//! Bus access is synchronous. A single transfer on an MCP2221 completes in
//! a few USB frames, so callers run it inline rather than awaiting it.

pub mod error;
#[cfg(all(target_os = "linux", feature = "hidraw"))]
pub mod mcp2221;
pub mod mock;

pub use error::TransportError;

use std::sync::Arc;

use piphi_core::Candidate;

/// SMBus/raw-I2C capability of a bridge adapter
pub trait I2cBus: Send + Sync {
    /// Read one register byte (SMBus read byte data)
    fn read_byte_data(&self, address: u8, register: u8) -> Result<u8, TransportError>;

    /// Read `len` bytes starting at `register` (write register, repeated start, read)
    fn read_block_data(
        &self,
        address: u8,
        register: u8,
        len: usize,
    ) -> Result<Vec<u8>, TransportError>;

    /// Raw write transaction
    fn write(&self, address: u8, data: &[u8]) -> Result<(), TransportError>;

    /// Raw read transaction
    fn read(&self, address: u8, len: usize) -> Result<Vec<u8>, TransportError>;

    /// Write one register byte
    fn write_byte_data(&self, address: u8, register: u8, value: u8) -> Result<(), TransportError> {
        self.write(address, &[register, value])
    }
}

/// A bridge adapter opened for I2C traffic
#[derive(Clone)]
pub struct OpenedBridge {
    /// I2C bus behind the adapter
    pub bus: Arc<dyn I2cBus>,
    /// Serial number reported by the bridge chip
    pub bridge_serial: Option<String>,
}

impl std::fmt::Debug for OpenedBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedBridge")
            .field("bridge_serial", &self.bridge_serial)
            .finish_non_exhaustive()
    }
}

/// Opens the bridge adapter behind an enumerated candidate
pub trait BridgeOpener: Send + Sync {
    fn open(&self, candidate: &Candidate, index: usize) -> Result<OpenedBridge, TransportError>;
}

/// Create the hardware bridge opener for this platform
pub fn create_opener(
    config: &crate::config::BridgeConfig,
) -> Result<Arc<dyn BridgeOpener>, TransportError> {
    #[cfg(all(target_os = "linux", feature = "hidraw"))]
    {
        Ok(Arc::new(mcp2221::Mcp2221Opener::new(config.clone())))
    }
    #[cfg(not(all(target_os = "linux", feature = "hidraw")))]
    {
        let _ = config;
        Err(TransportError::Unsupported(
            "MCP2221 access requires Linux and the 'hidraw' feature".to_string(),
        ))
    }
}
