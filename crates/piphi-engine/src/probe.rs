//! Sensor probe
//!
//! Classifies what sits behind each bridge adapter by running a fixed chain
//! of register probes against its bus. The first probe that matches wins.
//!
//! ```text
//! Candidate ──► open bridge ──► Bosch chip id (0x77/0xD0)
//!                                  │ no match
//!                                  ▼
//!                               AHT20 status (0x38/0x71)
//!                                  │ no match
//!                                  ▼
//!                               PMSA003I block (0x12/0x00, 32 bytes)
//!                                  │ no match
//!                                  ▼
//!                               no entry
//! ```

use std::sync::Arc;

use piphi_bridge::drivers::{bme280, bme68x};
use piphi_bridge::{BridgeEnumerator, BridgeOpener, I2cBus, TransportError};
use piphi_conv::pmsa003i;
use piphi_core::{Candidate, ProbeEvidence, SensorKind};
use tracing::{debug, info, warn};

use crate::registry::{DeviceRegistry, RegistryEntry};

/// Fixed I2C address of the AHT20
pub const AHT20_ADDRESS: u8 = 0x38;
/// Fixed I2C address of the PMSA003I
pub const PMSA003I_ADDRESS: u8 = 0x12;

const BOSCH_PROBE_ADDRESS: u8 = 0x77;
const REG_CHIP_ID: u8 = 0xD0;
const AHT20_REG_STATUS: u8 = 0x71;
const PMSA003I_REG_DATA: u8 = 0x00;

/// Outcome of a matching probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: SensorKind,
    pub evidence: ProbeEvidence,
}

type ProbeFn = fn(&dyn I2cBus) -> Result<Option<Classification>, TransportError>;

/// One step of the probe chain
pub struct ProbeStep {
    pub name: &'static str,
    pub probe: ProbeFn,
}

/// Probe order; a device answering several probes takes the first match
pub const PROBE_CHAIN: &[ProbeStep] = &[
    ProbeStep {
        name: "bosch_chip_id",
        probe: probe_bosch_chip_id,
    },
    ProbeStep {
        name: "aht20_status",
        probe: probe_aht20_status,
    },
    ProbeStep {
        name: "pmsa003i_frame",
        probe: probe_pmsa003i_frame,
    },
];

fn probe_bosch_chip_id(bus: &dyn I2cBus) -> Result<Option<Classification>, TransportError> {
    let chip_id = bus.read_byte_data(BOSCH_PROBE_ADDRESS, REG_CHIP_ID)?;
    let kind = match chip_id {
        bme68x::CHIP_ID => SensorKind::Bme68x,
        bme280::CHIP_ID => SensorKind::Bme280,
        _ => return Ok(None),
    };
    Ok(Some(Classification {
        kind,
        evidence: ProbeEvidence::ChipId(chip_id),
    }))
}

fn probe_aht20_status(bus: &dyn I2cBus) -> Result<Option<Classification>, TransportError> {
    let status = bus.read_byte_data(AHT20_ADDRESS, AHT20_REG_STATUS)?;
    Ok(Some(Classification {
        kind: SensorKind::Aht20,
        evidence: ProbeEvidence::Status(status),
    }))
}

fn probe_pmsa003i_frame(bus: &dyn I2cBus) -> Result<Option<Classification>, TransportError> {
    let block = bus.read_block_data(PMSA003I_ADDRESS, PMSA003I_REG_DATA, pmsa003i::FRAME_LEN)?;
    if !pmsa003i::looks_like_frame(&block) {
        return Ok(None);
    }
    Ok(Some(Classification {
        kind: SensorKind::Pmsa003i,
        evidence: ProbeEvidence::Frame(block),
    }))
}

/// Run the probe chain against one bus
///
/// Transport errors only mean "this probe did not match".
pub fn classify_bus(bus: &dyn I2cBus) -> Option<Classification> {
    for step in PROBE_CHAIN {
        match (step.probe)(bus) {
            Ok(Some(classification)) => {
                debug!(probe = step.name, kind = %classification.kind, "Probe matched");
                return Some(classification);
            }
            Ok(None) => debug!(probe = step.name, "Probe did not match"),
            Err(e) => debug!(probe = step.name, error = %e, "Probe failed, trying next"),
        }
    }
    None
}

/// Drives enumerated candidates through the probe chain into the registry
pub struct SensorProbe {
    enumerator: Arc<dyn BridgeEnumerator>,
    opener: Arc<dyn BridgeOpener>,
    registry: Arc<DeviceRegistry>,
}

impl SensorProbe {
    pub fn new(
        enumerator: Arc<dyn BridgeEnumerator>,
        opener: Arc<dyn BridgeOpener>,
        registry: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            enumerator,
            opener,
            registry,
        }
    }

    /// Enumerate the host and classify every candidate
    pub fn discover(&self) -> Vec<Arc<RegistryEntry>> {
        let candidates = self.enumerator.list_candidates();
        info!(count = candidates.len(), "Bridge candidates enumerated");
        self.classify(&candidates)
    }

    /// Classify `candidates` and replace the registry with the result
    ///
    /// Buses claimed by a running poller are not probed again; their entry
    /// is carried over by the registry.
    pub fn classify(&self, candidates: &[Candidate]) -> Vec<Arc<RegistryEntry>> {
        let mut entries = Vec::new();

        for (index, candidate) in candidates.iter().enumerate() {
            if self.registry.is_claimed(&candidate.bus_path) {
                debug!(bus_path = %candidate.bus_path, "Bus in use, skipping probe");
                continue;
            }

            let bridge = match self.opener.open(candidate, index) {
                Ok(bridge) => bridge,
                Err(e) => {
                    warn!(bus_path = %candidate.bus_path, error = %e, "Failed to open bridge");
                    continue;
                }
            };

            match classify_bus(bridge.bus.as_ref()) {
                Some(classification) => {
                    info!(
                        bus_path = %candidate.bus_path,
                        kind = %classification.kind,
                        bridge_serial = ?bridge.bridge_serial,
                        "Sensor classified"
                    );
                    entries.push(RegistryEntry {
                        bus_path: candidate.bus_path.clone(),
                        bus: bridge.bus,
                        sensor_kind: classification.kind,
                        evidence: classification.evidence,
                        bridge_index: index,
                        bridge_serial: bridge.bridge_serial,
                        candidate: candidate.clone(),
                        active: false,
                    });
                }
                None => debug!(bus_path = %candidate.bus_path, "No sensor recognised"),
            }
        }

        self.registry.replace_all(entries);
        self.registry.all()
    }
}
