//! Bosch BME280 driver
//!
//! Runs the sensor in normal mode: after [`Bme280::configure`] the sensor
//! measures continuously and every read only fetches the latest sample.

use std::sync::Arc;

use piphi_core::SensorKind;
use tracing::debug;

use super::{expect_len, i16_le, u16_le, EnvironmentalDriver, EnvironmentalReading, SensorSettings};
use crate::transport::{I2cBus, TransportError};

pub const CHIP_ID: u8 = 0x60;
/// SDO tied to VCC
pub const ADDRESS_PRIMARY: u8 = 0x77;
/// SDO tied to GND
pub const ADDRESS_SECONDARY: u8 = 0x76;

const REG_CHIP_ID: u8 = 0xD0;
const REG_CALIB_00: u8 = 0x88;
const CALIB_00_LEN: usize = 26;
const REG_CALIB_26: u8 = 0xE1;
const CALIB_26_LEN: usize = 7;
const REG_CTRL_HUM: u8 = 0xF2;
const REG_CTRL_MEAS: u8 = 0xF4;
const REG_CONFIG: u8 = 0xF5;
const REG_DATA: u8 = 0xF7;
const DATA_LEN: usize = 8;

const MODE_SLEEP: u8 = 0b00;
const MODE_NORMAL: u8 = 0b11;
/// Normal mode standby of 1000 ms
const STANDBY_1000MS: u8 = 0b101;
/// Largest filter coefficient the BME280 supports
const MAX_FILTER_CODE: u8 = 4;

/// Factory trimming parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i16,
    pub p1: u16,
    pub p2: i16,
    pub p3: i16,
    pub p4: i16,
    pub p5: i16,
    pub p6: i16,
    pub p7: i16,
    pub p8: i16,
    pub p9: i16,
    pub h1: u8,
    pub h2: i16,
    pub h3: u8,
    pub h4: i16,
    pub h5: i16,
    pub h6: i8,
}

impl Calibration {
    /// Parse the 0x88..0xA1 and 0xE1..0xE7 register blocks
    pub fn parse(low: &[u8], high: &[u8]) -> Result<Self, TransportError> {
        expect_len(low, CALIB_00_LEN, "BME280 calibration 0x88")?;
        expect_len(high, CALIB_26_LEN, "BME280 calibration 0xE1")?;

        Ok(Self {
            t1: u16_le(low, 0),
            t2: i16_le(low, 2),
            t3: i16_le(low, 4),
            p1: u16_le(low, 6),
            p2: i16_le(low, 8),
            p3: i16_le(low, 10),
            p4: i16_le(low, 12),
            p5: i16_le(low, 14),
            p6: i16_le(low, 16),
            p7: i16_le(low, 18),
            p8: i16_le(low, 20),
            p9: i16_le(low, 22),
            h1: low[25],
            h2: i16_le(high, 0),
            h3: high[2],
            h4: ((high[3] as i8 as i16) << 4) | (high[4] & 0x0F) as i16,
            h5: ((high[5] as i8 as i16) << 4) | (high[4] >> 4) as i16,
            h6: high[6] as i8,
        })
    }

    /// Temperature in °C and the fine temperature carried into the other channels
    pub fn temperature(&self, adc_t: i32) -> (f64, f64) {
        let adc = adc_t as f64;
        let t1 = self.t1 as f64;
        let var1 = (adc / 16384.0 - t1 / 1024.0) * self.t2 as f64;
        let d = adc / 131072.0 - t1 / 8192.0;
        let var2 = d * d * self.t3 as f64;
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pressure in Pa
    pub fn pressure(&self, adc_p: i32, t_fine: f64) -> f64 {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * self.p6 as f64 / 32768.0;
        var2 += var1 * self.p5 as f64 * 2.0;
        var2 = var2 / 4.0 + self.p4 as f64 * 65536.0;
        var1 = (self.p3 as f64 * var1 * var1 / 524288.0 + self.p2 as f64 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * self.p1 as f64;
        if var1 == 0.0 {
            return 0.0;
        }
        let mut p = 1048576.0 - adc_p as f64;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = self.p9 as f64 * p * p / 2147483648.0;
        let var2 = p * self.p8 as f64 / 32768.0;
        p + (var1 + var2 + self.p7 as f64) / 16.0
    }

    /// Relative humidity in percent, clamped to 0..=100
    pub fn humidity(&self, adc_h: i32, t_fine: f64) -> f64 {
        let var = t_fine - 76800.0;
        let var = (adc_h as f64 - (self.h4 as f64 * 64.0 + self.h5 as f64 / 16384.0 * var))
            * (self.h2 as f64 / 65536.0
                * (1.0
                    + self.h6 as f64 / 67108864.0
                        * var
                        * (1.0 + self.h3 as f64 / 67108864.0 * var)));
        let var = var * (1.0 - self.h1 as f64 * var / 524288.0);
        var.clamp(0.0, 100.0)
    }
}

/// A BME280 bound to one bus address
pub struct Bme280 {
    bus: Arc<dyn I2cBus>,
    address: u8,
    calibration: Calibration,
    configured: bool,
}

impl Bme280 {
    /// Verify the chip id and load the calibration
    pub fn new(bus: Arc<dyn I2cBus>, address: u8) -> Result<Self, TransportError> {
        let chip_id = bus.read_byte_data(address, REG_CHIP_ID)?;
        if chip_id != CHIP_ID {
            return Err(TransportError::Protocol(format!(
                "unexpected BME280 chip id 0x{chip_id:02X} at 0x{address:02X}"
            )));
        }

        let low = bus.read_block_data(address, REG_CALIB_00, CALIB_00_LEN)?;
        let high = bus.read_block_data(address, REG_CALIB_26, CALIB_26_LEN)?;
        let calibration = Calibration::parse(&low, &high)?;
        debug!(address = format!("0x{:02X}", address), ?calibration, "BME280 calibration loaded");

        Ok(Self {
            bus,
            address,
            calibration,
            configured: false,
        })
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }
}

impl EnvironmentalDriver for Bme280 {
    fn kind(&self) -> SensorKind {
        SensorKind::Bme280
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn configure(&mut self, settings: &SensorSettings) -> Result<(), TransportError> {
        let osrs_t = settings.temperature_oversampling.code();
        let osrs_p = settings.pressure_oversampling.code();
        let filter = settings.filter.code().min(MAX_FILTER_CODE);

        // config is only writable in sleep mode; ctrl_hum latches on the ctrl_meas write
        self.bus.write_byte_data(
            self.address,
            REG_CTRL_MEAS,
            (osrs_t << 5) | (osrs_p << 2) | MODE_SLEEP,
        )?;
        self.bus
            .write_byte_data(self.address, REG_CONFIG, (STANDBY_1000MS << 5) | (filter << 2))?;
        self.bus.write_byte_data(
            self.address,
            REG_CTRL_HUM,
            settings.humidity_oversampling.code() & 0x07,
        )?;
        self.bus.write_byte_data(
            self.address,
            REG_CTRL_MEAS,
            (osrs_t << 5) | (osrs_p << 2) | MODE_NORMAL,
        )?;
        self.configured = true;
        Ok(())
    }

    fn read(&mut self) -> Result<EnvironmentalReading, TransportError> {
        if !self.configured {
            self.configure(&SensorSettings::default())?;
        }

        let data = self.bus.read_block_data(self.address, REG_DATA, DATA_LEN)?;
        expect_len(&data, DATA_LEN, "BME280 data")?;

        let adc_p = ((data[0] as i32) << 12) | ((data[1] as i32) << 4) | ((data[2] as i32) >> 4);
        let adc_t = ((data[3] as i32) << 12) | ((data[4] as i32) << 4) | ((data[5] as i32) >> 4);
        let adc_h = ((data[6] as i32) << 8) | data[7] as i32;

        let (temperature, t_fine) = self.calibration.temperature(adc_t);
        Ok(EnvironmentalReading {
            temperature,
            pressure: self.calibration.pressure(adc_p, t_fine) / 100.0,
            humidity: self.calibration.humidity(adc_h, t_fine),
            gas_resistance: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockBus;

    fn datasheet_calibration() -> Calibration {
        Calibration {
            t1: 27504,
            t2: 26435,
            t3: -1000,
            p1: 36477,
            p2: -10685,
            p3: 3024,
            p4: 2855,
            p5: 140,
            p6: -7,
            p7: 15500,
            p8: -14600,
            p9: 6000,
            ..Default::default()
        }
    }

    #[test]
    fn test_datasheet_temperature() {
        let (t, t_fine) = datasheet_calibration().temperature(519888);
        assert!((t - 25.08).abs() < 0.01, "temperature {t}");
        assert!((t_fine - 128422.29).abs() < 0.1);
    }

    #[test]
    fn test_datasheet_pressure() {
        let cal = datasheet_calibration();
        let (_, t_fine) = cal.temperature(519888);
        let p = cal.pressure(415148, t_fine);
        assert!((p - 100653.27).abs() < 0.1, "pressure {p}");
    }

    #[test]
    fn test_reads_fixture_sensor() {
        let bus = Arc::new(MockBus::new().with_bme280(0x77));
        let mut sensor = Bme280::new(bus.clone(), 0x77).unwrap();
        sensor.configure(&SensorSettings::default()).unwrap();

        assert_eq!(bus.register(0x77, REG_CTRL_HUM), Some(0x02));
        assert_eq!(bus.register(0x77, REG_CTRL_MEAS), Some((4 << 5) | (3 << 2) | 0b11));
        assert_eq!(bus.register(0x77, REG_CONFIG), Some((0b101 << 5) | (2 << 2)));

        let reading = sensor.read().unwrap();
        assert!((reading.temperature - 25.08).abs() < 0.01);
        assert!((reading.pressure - 1006.53).abs() < 0.01);
        assert!((reading.humidity - 55.0).abs() < 0.01, "humidity {}", reading.humidity);
        assert_eq!(reading.gas_resistance, None);
    }

    #[test]
    fn test_wrong_chip_id_is_rejected() {
        let bus = Arc::new(MockBus::new().with_bme680(0x77));
        assert!(matches!(
            Bme280::new(bus, 0x77),
            Err(TransportError::Protocol(_))
        ));
    }

    #[test]
    fn test_absent_sensor_is_not_acknowledged() {
        let bus = Arc::new(MockBus::new());
        assert!(matches!(
            Bme280::new(bus, 0x76),
            Err(TransportError::NotAcknowledged { address: 0x76 })
        ));
    }
}
