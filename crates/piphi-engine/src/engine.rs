//! Telemetry engine facade
//!
//! Wires the registry, probe, activator and supervisor together and exposes
//! the two operations the outside world drives: discovery and applying a
//! device configuration. The two never overlap: the probe opens bridges, and
//! a bridge must not be opened while an apply is claiming it.

use std::sync::Arc;

use parking_lot::RwLock;
use piphi_bridge::{BridgeEnumerator, BridgeOpener, DriverFactory};
use piphi_core::{AppliedConfig, DiscoveredDevice, EngineError, EngineResult, SensorKind};
use tracing::{info, warn};

use crate::activator::SensorActivator;
use crate::config::EngineConfig;
use crate::probe::SensorProbe;
use crate::publish::TelemetryPublisher;
use crate::registry::DeviceRegistry;
use crate::supervisor::TaskSupervisor;

/// The telemetry engine
pub struct TelemetryEngine {
    config: EngineConfig,
    registry: Arc<DeviceRegistry>,
    probe: Arc<SensorProbe>,
    supervisor: TaskSupervisor,
    applied: RwLock<Option<AppliedConfig>>,
    /// Held for the whole of a discovery or an apply
    operations: tokio::sync::Mutex<()>,
}

impl TelemetryEngine {
    pub fn new(
        config: EngineConfig,
        enumerator: Arc<dyn BridgeEnumerator>,
        opener: Arc<dyn BridgeOpener>,
        drivers: Arc<dyn DriverFactory>,
        publisher: Arc<dyn TelemetryPublisher>,
    ) -> Self {
        let registry = Arc::new(DeviceRegistry::new());
        let probe = Arc::new(SensorProbe::new(enumerator, opener, registry.clone()));
        let supervisor = TaskSupervisor::new(
            SensorActivator::new(registry.clone(), drivers),
            publisher,
            config.mqtt.topic.clone(),
            config.polling.clone(),
        );

        Self {
            config,
            registry,
            probe,
            supervisor,
            applied: RwLock::new(None),
            operations: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Enumerate, classify and report the discovered devices
    ///
    /// Only particulate sensors are reported unless
    /// `discovery.report_all_kinds` is set; every classified device is
    /// recorded in the registry either way.
    pub async fn discover(&self) -> EngineResult<Vec<DiscoveredDevice>> {
        let _serialized = self.operations.lock().await;
        let probe = self.probe.clone();
        let entries = tokio::task::spawn_blocking(move || probe.discover())
            .await
            .map_err(|e| EngineError::Internal(format!("discovery task failed: {e}")))?;

        let report_all = self.config.discovery.report_all_kinds;
        let devices: Vec<DiscoveredDevice> = entries
            .iter()
            .filter(|entry| report_all || entry.sensor_kind == SensorKind::Pmsa003i)
            .map(|entry| entry.to_discovered())
            .collect();

        info!(
            classified = entries.len(),
            reported = devices.len(),
            "Discovery complete"
        );
        Ok(devices)
    }

    /// Apply a device configuration and start its poller
    ///
    /// The configuration slot is only updated when the apply succeeds.
    pub async fn apply(&self, config: AppliedConfig) -> EngineResult<()> {
        let _serialized = self.operations.lock().await;
        match self.supervisor.apply(&config).await {
            Ok(()) => {
                info!(device_id = %config.id(), bus_path = %config.bus_path(), "Configuration applied");
                *self.applied.write() = Some(config);
                Ok(())
            }
            Err(e) => {
                warn!(device_id = %config.id(), bus_path = %config.bus_path(), error = %e, "Configuration rejected");
                Err(e)
            }
        }
    }

    /// Last successfully applied configuration
    pub fn applied_config(&self) -> Option<AppliedConfig> {
        self.applied.read().clone()
    }

    pub async fn is_running(&self, device_id: &str) -> bool {
        self.supervisor.is_running(device_id).await
    }

    pub async fn running_devices(&self) -> Vec<String> {
        self.supervisor.running_devices().await
    }

    /// Stop every poller
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
    }
}
