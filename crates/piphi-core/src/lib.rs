//! piphi-core - Core types for the PiPhi I2C telemetry engine
//!
//! This crate provides the models shared by the bridge, engine and API
//! layers (candidates, sensor kinds, discovery results, configurations and
//! telemetry payloads) together with the engine error taxonomy.

pub mod error;
pub mod models;

pub use error::{EngineError, EngineResult};
pub use models::*;
