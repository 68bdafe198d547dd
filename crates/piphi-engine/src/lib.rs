//! piphi-engine - Sensor discovery and telemetry polling
//!
//! This crate turns bridge adapters into a stream of signed telemetry:
//! it classifies what is attached to each bridge, keeps the result in a
//! registry, and runs one poller per configured device.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      TelemetryEngine                       │
//! │                                                            │
//! │  discover()                       apply(config)            │
//! │      │                                 │                   │
//! │      ▼                                 ▼                   │
//! │  SensorProbe ──► DeviceRegistry ◄── TaskSupervisor         │
//! │  (probe chain)   (bus path → entry)    │   │               │
//! │                        ▲               │   └─► signer      │
//! │                        │ claim         ▼                   │
//! │                  SensorActivator ◄─────┘                   │
//! │                        │                                   │
//! │                        ▼                                   │
//! │                 TelemetryPoller (one task per device)      │
//! │                        │                                   │
//! │                        ▼                                   │
//! │                 TelemetryPublisher (MQTT / log / memory)   │
//! └────────────────────────────────────────────────────────────┘
//! ```

pub mod activator;
pub mod config;
pub mod engine;
pub mod poller;
pub mod probe;
pub mod publish;
pub mod registry;
pub mod signer;
pub mod supervisor;

pub use activator::{ActiveSensor, SensorActivator, SensorHandle};
pub use config::{DiscoveryConfig, EngineConfig, MqttConfig, PollingConfig};
pub use engine::TelemetryEngine;
pub use poller::{PollerContext, PollerExit, TelemetryPoller};
pub use probe::{classify_bus, Classification, SensorProbe, PROBE_CHAIN};
pub use publish::{
    LogPublisher, MqttPublisher, PublishError, QoS, RecordingPublisher, TelemetryPublisher,
};
pub use registry::{Claim, DeviceRegistry, RegistryEntry};
pub use signer::{canonical_json, sign, sign_config};
pub use supervisor::TaskSupervisor;
