//! Bosch environmental sensor drivers
//!
//! Both drivers read their factory calibration when constructed and apply
//! the datasheet floating point compensation on every read. They talk to
//! the sensor through any [`I2cBus`], so they run unchanged against the
//! mock bus.

pub mod bme280;
pub mod bme68x;

use std::sync::Arc;

use piphi_core::SensorKind;

use crate::transport::{I2cBus, TransportError};

pub use bme280::Bme280;
pub use bme68x::Bme68x;

/// Oversampling ratio of a measurement channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oversampling {
    Skip,
    X1,
    X2,
    X4,
    X8,
    X16,
}

impl Oversampling {
    /// Register encoding, shared by both sensor families
    pub fn code(self) -> u8 {
        match self {
            Oversampling::Skip => 0,
            Oversampling::X1 => 1,
            Oversampling::X2 => 2,
            Oversampling::X4 => 3,
            Oversampling::X8 => 4,
            Oversampling::X16 => 5,
        }
    }
}

/// IIR filter size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSize {
    Off,
    Size1,
    Size3,
    Size7,
    Size15,
    Size31,
    Size63,
    Size127,
}

impl FilterSize {
    pub fn code(self) -> u8 {
        match self {
            FilterSize::Off => 0,
            FilterSize::Size1 => 1,
            FilterSize::Size3 => 2,
            FilterSize::Size7 => 3,
            FilterSize::Size15 => 4,
            FilterSize::Size31 => 5,
            FilterSize::Size63 => 6,
            FilterSize::Size127 => 7,
        }
    }
}

/// Gas heater set-point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaterProfile {
    /// Heater profile slot (0..=9)
    pub profile: u8,
    /// Target plate temperature in °C
    pub target_celsius: u16,
    /// Heating duration in milliseconds
    pub duration_ms: u16,
}

/// Measurement settings applied before polling starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSettings {
    pub humidity_oversampling: Oversampling,
    pub pressure_oversampling: Oversampling,
    pub temperature_oversampling: Oversampling,
    pub filter: FilterSize,
    /// Gas measurement heater, `None` disables gas measurement
    pub heater: Option<HeaterProfile>,
}

impl Default for SensorSettings {
    fn default() -> Self {
        Self {
            humidity_oversampling: Oversampling::X2,
            pressure_oversampling: Oversampling::X4,
            temperature_oversampling: Oversampling::X8,
            filter: FilterSize::Size3,
            heater: Some(HeaterProfile {
                profile: 0,
                target_celsius: 320,
                duration_ms: 150,
            }),
        }
    }
}

/// Compensated reading of a Bosch environmental sensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentalReading {
    /// °C
    pub temperature: f64,
    /// hPa
    pub pressure: f64,
    /// %RH
    pub humidity: f64,
    /// ohm, only for sensors with a gas channel and a valid gas sample
    pub gas_resistance: Option<f64>,
}

/// A live, calibrated sensor driver
pub trait EnvironmentalDriver: Send {
    fn kind(&self) -> SensorKind;

    /// I2C address the driver was bound to
    fn address(&self) -> u8;

    /// Apply oversampling, filter and heater settings
    fn configure(&mut self, settings: &SensorSettings) -> Result<(), TransportError>;

    /// Take one compensated reading
    fn read(&mut self) -> Result<EnvironmentalReading, TransportError>;
}

/// Builds drivers for classified sensors
pub trait DriverFactory: Send + Sync {
    fn create(
        &self,
        kind: SensorKind,
        bus: Arc<dyn I2cBus>,
        address: u8,
    ) -> Result<Box<dyn EnvironmentalDriver>, TransportError>;
}

/// Factory for the Bosch BME280 and BME68x drivers
#[derive(Debug, Clone, Copy, Default)]
pub struct BoschDriverFactory;

impl DriverFactory for BoschDriverFactory {
    fn create(
        &self,
        kind: SensorKind,
        bus: Arc<dyn I2cBus>,
        address: u8,
    ) -> Result<Box<dyn EnvironmentalDriver>, TransportError> {
        match kind {
            SensorKind::Bme68x => Ok(Box::new(Bme68x::new(bus, address)?)),
            SensorKind::Bme280 => Ok(Box::new(Bme280::new(bus, address)?)),
            other => Err(TransportError::Unsupported(format!(
                "no environmental driver for {other}"
            ))),
        }
    }
}

pub(crate) fn u16_le(data: &[u8], index: usize) -> u16 {
    u16::from_le_bytes([data[index], data[index + 1]])
}

pub(crate) fn i16_le(data: &[u8], index: usize) -> i16 {
    i16::from_le_bytes([data[index], data[index + 1]])
}

pub(crate) fn expect_len(data: &[u8], expected: usize, what: &str) -> Result<(), TransportError> {
    if data.len() < expected {
        return Err(TransportError::Protocol(format!(
            "{what}: expected {expected} bytes, got {}",
            data.len()
        )));
    }
    Ok(())
}
