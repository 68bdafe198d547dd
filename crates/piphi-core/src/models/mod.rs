//! Shared data models for the telemetry engine

mod config;
mod device;
mod sensor;
mod telemetry;

pub use config::*;
pub use device::*;
pub use sensor::*;
pub use telemetry::*;
