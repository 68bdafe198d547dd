//! Mock bridge stack for testing
//!
//! [`MockBus`] models each I2C device as a 256-byte register file plus a
//! queue of raw read responses. Addresses without a device answer with
//! [`TransportError::NotAcknowledged`], like an empty bus.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use piphi_core::Candidate;

use super::{BridgeOpener, I2cBus, OpenedBridge, TransportError};
use crate::enumerate::BridgeEnumerator;

pub const AHT20_ADDRESS: u8 = 0x38;
pub const PMSA003I_ADDRESS: u8 = 0x12;

/// AHT20 measurement block for 22.5 °C / 45 %RH
pub const AHT20_SAMPLE: [u8; 7] = [0x1C, 0x73, 0x33, 0x35, 0xCC, 0xCD, 0x00];

#[derive(Debug, Clone)]
struct MockDevice {
    registers: [u8; 256],
    raw_reads: VecDeque<Vec<u8>>,
    last_raw: Option<Vec<u8>>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            registers: [0; 256],
            raw_reads: VecDeque::new(),
            last_raw: None,
        }
    }
}

/// In-memory I2C bus
#[derive(Debug, Default)]
pub struct MockBus {
    devices: RwLock<HashMap<u8, MockDevice>>,
    writes: RwLock<Vec<(u8, Vec<u8>)>>,
    failure: RwLock<Option<TransportError>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device with an all-zero register file
    pub fn add_device(&self, address: u8) {
        self.devices.write().entry(address).or_default();
    }

    /// Detach a device; later transfers to it are not acknowledged
    pub fn remove_device(&self, address: u8) {
        self.devices.write().remove(&address);
    }

    pub fn set_register(&self, address: u8, register: u8, value: u8) {
        self.set_registers(address, register, &[value]);
    }

    /// Write consecutive registers starting at `start`
    pub fn set_registers(&self, address: u8, start: u8, values: &[u8]) {
        let mut devices = self.devices.write();
        let device = devices.entry(address).or_default();
        for (offset, value) in values.iter().enumerate() {
            let index = start as usize + offset;
            if index < device.registers.len() {
                device.registers[index] = *value;
            }
        }
    }

    pub fn register(&self, address: u8, register: u8) -> Option<u8> {
        self.devices
            .read()
            .get(&address)
            .map(|device| device.registers[register as usize])
    }

    /// Queue a response for the next raw read; the last one keeps repeating
    pub fn queue_read(&self, address: u8, data: Vec<u8>) {
        self.devices
            .write()
            .entry(address)
            .or_default()
            .raw_reads
            .push_back(data);
    }

    /// Every raw write seen so far, in order
    pub fn writes(&self) -> Vec<(u8, Vec<u8>)> {
        self.writes.read().clone()
    }

    pub fn writes_to(&self, address: u8) -> Vec<Vec<u8>> {
        self.writes
            .read()
            .iter()
            .filter(|(addr, _)| *addr == address)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Make every transfer fail with `error` (or succeed again with `None`)
    pub fn fail_with(&self, error: Option<TransportError>) {
        *self.failure.write() = error;
    }

    /// BME280 carrying the datasheet calibration (25.08 °C, 1006.53 hPa)
    pub fn with_bme280(self, address: u8) -> Self {
        self.set_register(address, 0xD0, 0x60);
        let mut calib = Vec::with_capacity(26);
        for word in [27504u16, 26435, (-1000i16) as u16, 36477] {
            calib.extend_from_slice(&word.to_le_bytes());
        }
        for word in [-10685i16, 3024, 2855, 140, -7, 15500, -14600, 6000] {
            calib.extend_from_slice(&word.to_le_bytes());
        }
        calib.extend_from_slice(&[0x00, 75]);
        self.set_registers(address, 0x88, &calib);

        let mut humidity = 362i16.to_le_bytes().to_vec();
        humidity.extend_from_slice(&[0x00, 0x13, 0x29, 0x03, 30]);
        self.set_registers(address, 0xE1, &humidity);

        self.set_registers(address, 0xF7, &[0x65, 0x59, 0xC0, 0x7E, 0xED, 0x00, 0x75, 0x30]);
        self
    }

    /// BME680 with a fixed calibration and a ready forced-mode sample
    pub fn with_bme680(self, address: u8) -> Self {
        self.set_register(address, 0xD0, 0x61);
        self.set_register(address, 0xF0, 0x00);

        let mut c1 = vec![0u8; 23];
        c1[0..2].copy_from_slice(&26447i16.to_le_bytes());
        c1[2] = 3;
        c1[4..6].copy_from_slice(&36429u16.to_le_bytes());
        c1[6..8].copy_from_slice(&(-10420i16).to_le_bytes());
        c1[8] = 88;
        c1[10..12].copy_from_slice(&7014i16.to_le_bytes());
        c1[12..14].copy_from_slice(&(-113i16).to_le_bytes());
        c1[14] = 63;
        c1[15] = 30;
        c1[18..20].copy_from_slice(&(-2440i16).to_le_bytes());
        c1[20..22].copy_from_slice(&(-2584i16).to_le_bytes());
        c1[22] = 30;
        self.set_registers(address, 0x8A, &c1);

        let mut c2 = vec![0x3F, 0xD0, 0x2F, 0, 45, 20, 120, (-100i8) as u8];
        c2.extend_from_slice(&26110u16.to_le_bytes());
        c2.extend_from_slice(&(-13145i16).to_le_bytes());
        c2.extend_from_slice(&[(-37i8) as u8, 18]);
        self.set_registers(address, 0xE1, &c2);

        self.set_registers(address, 0x00, &[51, 0, 0x10, 0, 0]);

        let mut field = vec![0u8; 17];
        field[0] = 0x80;
        field[2..5].copy_from_slice(&[0x55, 0x73, 0x00]);
        field[5..8].copy_from_slice(&[0x7A, 0x12, 0x00]);
        field[8..10].copy_from_slice(&[0x55, 0xF0]);
        field[13] = 0x64;
        field[14] = 0x35;
        self.set_registers(address, 0x1D, &field);
        self
    }

    /// AHT20 that is calibrated and always returns [`AHT20_SAMPLE`]
    pub fn with_aht20(self) -> Self {
        self.set_register(AHT20_ADDRESS, 0x71, 0x18);
        self.queue_read(AHT20_ADDRESS, AHT20_SAMPLE.to_vec());
        self
    }

    /// PMSA003I exposing `frame` at register 0x00
    pub fn with_pmsa003i(self, frame: &[u8]) -> Self {
        self.set_registers(PMSA003I_ADDRESS, 0x00, frame);
        self
    }

    fn check(&self, address: u8) -> Result<(), TransportError> {
        if let Some(err) = self.failure.read().clone() {
            return Err(err);
        }
        if !self.devices.read().contains_key(&address) {
            return Err(TransportError::NotAcknowledged { address });
        }
        Ok(())
    }
}

impl I2cBus for MockBus {
    fn read_byte_data(&self, address: u8, register: u8) -> Result<u8, TransportError> {
        self.check(address)?;
        self.register(address, register)
            .ok_or(TransportError::NotAcknowledged { address })
    }

    fn read_block_data(
        &self,
        address: u8,
        register: u8,
        len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        self.check(address)?;
        let devices = self.devices.read();
        let device = devices
            .get(&address)
            .ok_or(TransportError::NotAcknowledged { address })?;
        let start = register as usize;
        let end = (start + len).min(device.registers.len());
        Ok(device.registers[start..end].to_vec())
    }

    fn write(&self, address: u8, data: &[u8]) -> Result<(), TransportError> {
        self.check(address)?;
        tracing::debug!(
            address = format!("0x{:02X}", address),
            data = %hex::encode(data),
            "Mock bus: write"
        );
        self.writes.write().push((address, data.to_vec()));
        if let Some((register, values)) = data.split_first() {
            self.set_registers(address, *register, values);
        }
        Ok(())
    }

    fn read(&self, address: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        self.check(address)?;
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(&address)
            .ok_or(TransportError::NotAcknowledged { address })?;

        if let Some(next) = device.raw_reads.pop_front() {
            device.last_raw = Some(next);
        }
        let mut data = match &device.last_raw {
            Some(raw) => raw.clone(),
            None => device.registers[..len.min(256)].to_vec(),
        };
        data.truncate(len);
        Ok(data)
    }
}

/// Build a valid PMSA003I frame from its twelve data words
///
/// Word order: pm10/pm25/pm100 standard, pm10/pm25/pm100 environmental,
/// then the six particle bins from 0.3 µm to 10 µm.
pub fn pmsa003i_frame(words: [u16; 12]) -> Vec<u8> {
    let mut frame = vec![0u8; 32];
    frame[0] = 0x42;
    frame[1] = 0x4D;
    frame[2..4].copy_from_slice(&28u16.to_be_bytes());
    for (i, word) in words.iter().enumerate() {
        let offset = 4 + i * 2;
        frame[offset..offset + 2].copy_from_slice(&word.to_be_bytes());
    }
    let sum = frame[..30]
        .iter()
        .fold(0u16, |acc, b| acc.wrapping_add(*b as u16));
    frame[30..32].copy_from_slice(&sum.to_be_bytes());
    frame
}

/// Enumerator returning a fixed candidate list
#[derive(Debug, Clone, Default)]
pub struct MockEnumerator {
    candidates: Arc<RwLock<Vec<Candidate>>>,
}

impl MockEnumerator {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self {
            candidates: Arc::new(RwLock::new(candidates)),
        }
    }

    pub fn set_candidates(&self, candidates: Vec<Candidate>) {
        *self.candidates.write() = candidates;
    }
}

impl BridgeEnumerator for MockEnumerator {
    fn list_candidates(&self) -> Vec<Candidate> {
        self.candidates.read().clone()
    }
}

/// Opener handing out mock buses by bus path
#[derive(Default)]
pub struct MockOpener {
    buses: RwLock<HashMap<String, Arc<MockBus>>>,
}

impl MockOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bus(&self, bus_path: impl Into<String>, bus: Arc<MockBus>) {
        self.buses.write().insert(bus_path.into(), bus);
    }

    pub fn bus(&self, bus_path: &str) -> Option<Arc<MockBus>> {
        self.buses.read().get(bus_path).cloned()
    }
}

impl BridgeOpener for MockOpener {
    fn open(&self, candidate: &Candidate, index: usize) -> Result<OpenedBridge, TransportError> {
        let bus = self.bus(&candidate.bus_path).ok_or_else(|| {
            TransportError::DeviceNotFound(format!("no mock bus at {}", candidate.bus_path))
        })?;
        Ok(OpenedBridge {
            bus,
            bridge_serial: Some(format!("MOCK{index:04}")),
        })
    }
}

/// Bus paths served by [`demo_bridges`]
pub const DEMO_BUS_PATHS: [&str; 4] = [
    "/dev/ttyACM0",
    "/dev/ttyACM1",
    "/dev/ttyACM2",
    "/dev/ttyACM3",
];

/// Four bridges with one sensor each: PMSA003I, BME680, AHT20 and BME280
pub fn demo_bridges() -> (MockEnumerator, MockOpener) {
    let buses = [
        MockBus::new().with_pmsa003i(&pmsa003i_frame([
            8, 12, 14, 8, 12, 14, 1200, 350, 60, 8, 2, 1,
        ])),
        MockBus::new().with_bme680(0x77),
        MockBus::new().with_aht20(),
        MockBus::new().with_bme280(0x77),
    ];

    let opener = MockOpener::new();
    let mut candidates = Vec::new();
    for (index, (path, bus)) in DEMO_BUS_PATHS.iter().zip(buses).enumerate() {
        opener.add_bus(*path, Arc::new(bus));
        candidates.push(
            Candidate::new(*path, "MCP2221 USB-I2C/UART Combo")
                .with_serial(format!("DEMO{index:04}")),
        );
    }
    (MockEnumerator::new(candidates), opener)
}
