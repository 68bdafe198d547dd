//! Common error types for the telemetry engine

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while discovering, activating or polling sensors
#[derive(Debug, Error)]
pub enum EngineError {
    /// No registry entry exists for the bus path
    #[error("Sensor not found: {0}")]
    SensorNotFound(String),

    /// The registry entry has no driver this engine can run
    #[error("Sensor not supported: {0}")]
    SensorUnsupported(String),

    /// The registry entry is already claimed by a running poller
    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    /// Bus communication failure (not acknowledged, timeout, I/O)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid configuration payload
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The publish capability rejected a payload
    #[error("Publish error: {0}")]
    Publish(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Returns the HTTP status code for this error
    ///
    /// Every activation failure is reported to configuration callers as
    /// "sensor not supported" (404), whatever the underlying cause.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::SensorNotFound(_) => 404,
            EngineError::SensorUnsupported(_) => 404,
            EngineError::SensorUnavailable(_) => 404,
            EngineError::Transport(_) => 404,
            EngineError::InvalidConfig(_) => 400,
            EngineError::Publish(_) => 502,
            EngineError::Internal(_) => 500,
        }
    }

    /// Whether this error is one of the activation failures
    pub fn is_activation_failure(&self) -> bool {
        matches!(
            self,
            EngineError::SensorNotFound(_)
                | EngineError::SensorUnsupported(_)
                | EngineError::SensorUnavailable(_)
                | EngineError::Transport(_)
        )
    }
}
