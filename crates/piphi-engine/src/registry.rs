//! Device registry
//!
//! Process-wide table of classified devices keyed by bus path. Entries are
//! immutable `Arc` snapshots; every mutation, including a claim, swaps in a
//! whole new entry so readers never see a half-updated one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use piphi_bridge::I2cBus;
use piphi_core::{Candidate, DiscoveredDevice, EngineError, EngineResult, ProbeEvidence, SensorKind};
use tracing::debug;

/// A classified device
#[derive(Clone)]
pub struct RegistryEntry {
    pub bus_path: String,
    /// Bus capability of the opened bridge
    pub bus: Arc<dyn I2cBus>,
    pub sensor_kind: SensorKind,
    pub evidence: ProbeEvidence,
    /// Position of the bridge in the enumeration pass
    pub bridge_index: usize,
    pub bridge_serial: Option<String>,
    pub candidate: Candidate,
    /// Claimed by a running poller
    pub active: bool,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("bus_path", &self.bus_path)
            .field("sensor_kind", &self.sensor_kind)
            .field("evidence", &self.evidence)
            .field("bridge_index", &self.bridge_index)
            .field("bridge_serial", &self.bridge_serial)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl RegistryEntry {
    pub fn to_discovered(&self) -> DiscoveredDevice {
        DiscoveredDevice {
            bus_path: self.bus_path.clone(),
            serial: self.candidate.serial_number.clone(),
            name: self.candidate.display_name.clone(),
            sensor_kind: self.sensor_kind,
            bridge_serial: self.bridge_serial.clone(),
        }
    }

    fn with_active(&self, active: bool) -> Self {
        Self {
            active,
            ..self.clone()
        }
    }
}

/// Table of classified devices
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    entries: RwLock<HashMap<String, Arc<RegistryEntry>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, bus_path: &str) -> EngineResult<Arc<RegistryEntry>> {
        self.entries
            .read()
            .get(bus_path)
            .cloned()
            .ok_or_else(|| EngineError::SensorNotFound(bus_path.to_string()))
    }

    pub fn put(&self, entry: RegistryEntry) {
        self.entries
            .write()
            .insert(entry.bus_path.clone(), Arc::new(entry));
    }

    /// Snapshot of every entry, in bridge enumeration order
    pub fn all(&self) -> Vec<Arc<RegistryEntry>> {
        let mut entries: Vec<_> = self.entries.read().values().cloned().collect();
        entries.sort_by(|a, b| {
            a.bridge_index
                .cmp(&b.bridge_index)
                .then_with(|| a.bus_path.cmp(&b.bus_path))
        });
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn is_claimed(&self, bus_path: &str) -> bool {
        self.entries
            .read()
            .get(bus_path)
            .is_some_and(|entry| entry.active)
    }

    /// Swap in a freshly classified table
    ///
    /// Claimed entries survive the swap unchanged: their poller still owns
    /// the bus, and the claim must be releasable afterwards.
    pub fn replace_all(&self, entries: Vec<RegistryEntry>) {
        let mut table = self.entries.write();
        let mut next: HashMap<String, Arc<RegistryEntry>> = entries
            .into_iter()
            .map(|entry| (entry.bus_path.clone(), Arc::new(entry)))
            .collect();

        for (bus_path, entry) in table.iter() {
            if entry.active {
                debug!(bus_path = %bus_path, "Keeping claimed entry across re-enumeration");
                next.insert(bus_path.clone(), entry.clone());
            }
        }

        *table = next;
    }

    /// Atomically mark an entry active
    ///
    /// The returned [`Claim`] releases the entry when dropped.
    pub fn claim(self: &Arc<Self>, bus_path: &str) -> EngineResult<Claim> {
        let mut table = self.entries.write();
        let entry = table
            .get(bus_path)
            .ok_or_else(|| EngineError::SensorNotFound(bus_path.to_string()))?;
        if entry.active {
            return Err(EngineError::SensorUnavailable(format!(
                "{bus_path} is already claimed"
            )));
        }

        let claimed = Arc::new(entry.with_active(true));
        table.insert(bus_path.to_string(), claimed);
        debug!(bus_path = %bus_path, "Registry entry claimed");

        Ok(Claim {
            registry: Arc::clone(self),
            bus_path: bus_path.to_string(),
        })
    }

    /// Mark an entry inactive; unknown or idle entries are left alone
    pub fn release(&self, bus_path: &str) {
        let mut table = self.entries.write();
        if let Some(entry) = table.get(bus_path) {
            if entry.active {
                let released = Arc::new(entry.with_active(false));
                table.insert(bus_path.to_string(), released);
                debug!(bus_path = %bus_path, "Registry entry released");
            }
        }
    }
}

/// Exclusive hold on a registry entry
#[derive(Debug)]
pub struct Claim {
    registry: Arc<DeviceRegistry>,
    bus_path: String,
}

impl Claim {
    pub fn bus_path(&self) -> &str {
        &self.bus_path
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.registry.release(&self.bus_path);
    }
}
