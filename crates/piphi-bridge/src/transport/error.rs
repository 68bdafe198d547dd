//! Transport layer errors

use piphi_core::EngineError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Address 0x{address:02X} not acknowledged")]
    NotAcknowledged { address: u8 },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Bridge device not found: {0}")]
    DeviceNotFound(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport not supported: {0}")]
    Unsupported(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => TransportError::DeviceNotFound(e.to_string()),
            std::io::ErrorKind::TimedOut => TransportError::Timeout(e.to_string()),
            _ => TransportError::Io(e.to_string()),
        }
    }
}

impl From<TransportError> for EngineError {
    fn from(e: TransportError) -> Self {
        EngineError::Transport(e.to_string())
    }
}
