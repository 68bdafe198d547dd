//! Sensor activator
//!
//! Turns a registry entry into a live sensor handle. Bosch sensors get a
//! calibrated driver, tried at the family's primary address first and then
//! at the secondary one. AHT20 and PMSA003I are driven straight off the bus.

use std::sync::Arc;

use piphi_bridge::drivers::{bme280, bme68x};
use piphi_bridge::{DriverFactory, EnvironmentalDriver, I2cBus};
use piphi_core::{EngineError, EngineResult, SensorKind};
use tracing::{info, warn};

use crate::registry::{Claim, DeviceRegistry, RegistryEntry};

/// Live access to an activated sensor
pub enum SensorHandle {
    Environmental(Box<dyn EnvironmentalDriver>),
    Aht20(Arc<dyn I2cBus>),
    Pmsa003i(Arc<dyn I2cBus>),
}

impl SensorHandle {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorHandle::Environmental(driver) => driver.kind(),
            SensorHandle::Aht20(_) => SensorKind::Aht20,
            SensorHandle::Pmsa003i(_) => SensorKind::Pmsa003i,
        }
    }
}

impl std::fmt::Debug for SensorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SensorHandle::Environmental(driver) => f
                .debug_struct("Environmental")
                .field("kind", &driver.kind())
                .field("address", &format_args!("0x{:02X}", driver.address()))
                .finish(),
            SensorHandle::Aht20(_) => f.write_str("Aht20"),
            SensorHandle::Pmsa003i(_) => f.write_str("Pmsa003i"),
        }
    }
}

/// An activated sensor together with its registry claim
///
/// Dropping it releases the claim.
#[derive(Debug)]
pub struct ActiveSensor {
    pub entry: Arc<RegistryEntry>,
    pub handle: SensorHandle,
    claim: Claim,
}

impl ActiveSensor {
    pub fn bus_path(&self) -> &str {
        self.claim.bus_path()
    }

    /// Split into the handle and the claim that keeps the entry reserved
    pub fn into_parts(self) -> (SensorHandle, Claim) {
        (self.handle, self.claim)
    }
}

/// Primary and secondary address of a Bosch sensor family
pub fn bosch_addresses(kind: SensorKind) -> Option<(u8, u8)> {
    match kind {
        SensorKind::Bme68x => Some((bme68x::ADDRESS_PRIMARY, bme68x::ADDRESS_SECONDARY)),
        SensorKind::Bme280 => Some((bme280::ADDRESS_PRIMARY, bme280::ADDRESS_SECONDARY)),
        _ => None,
    }
}

/// Builds live sensor handles for registry entries
pub struct SensorActivator {
    registry: Arc<DeviceRegistry>,
    drivers: Arc<dyn DriverFactory>,
}

impl SensorActivator {
    pub fn new(registry: Arc<DeviceRegistry>, drivers: Arc<dyn DriverFactory>) -> Self {
        Self { registry, drivers }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Claim the entry at `bus_path` and build its sensor handle
    pub fn activate(&self, bus_path: &str) -> EngineResult<ActiveSensor> {
        let entry = self.registry.get(bus_path)?;
        if entry.sensor_kind == SensorKind::Unclassified {
            return Err(EngineError::SensorUnsupported(bus_path.to_string()));
        }

        // A failed build drops the claim again
        let claim = self.registry.claim(bus_path)?;

        let handle = match entry.sensor_kind {
            SensorKind::Aht20 => SensorHandle::Aht20(entry.bus.clone()),
            SensorKind::Pmsa003i => SensorHandle::Pmsa003i(entry.bus.clone()),
            kind => SensorHandle::Environmental(self.build_driver(&entry, kind)?),
        };

        info!(bus_path = %bus_path, handle = ?handle, "Sensor activated");
        Ok(ActiveSensor {
            entry,
            handle,
            claim,
        })
    }

    fn build_driver(
        &self,
        entry: &RegistryEntry,
        kind: SensorKind,
    ) -> EngineResult<Box<dyn EnvironmentalDriver>> {
        let (primary, secondary) = bosch_addresses(kind)
            .ok_or_else(|| EngineError::SensorUnsupported(entry.bus_path.clone()))?;

        match self.drivers.create(kind, entry.bus.clone(), primary) {
            Ok(driver) => Ok(driver),
            Err(e) => {
                warn!(
                    bus_path = %entry.bus_path,
                    kind = %kind,
                    address = format!("0x{:02X}", primary),
                    error = %e,
                    "Driver construction failed, trying secondary address"
                );
                Ok(self.drivers.create(kind, entry.bus.clone(), secondary)?)
            }
        }
    }
}
