//! Bosch BME680/BME688 driver
//!
//! Each read triggers a forced-mode measurement (temperature, pressure,
//! humidity and, when a heater profile is set, gas) and polls the field
//! status until new data is flagged. The variant register selects the gas
//! resistance formula: BME680 uses the range lookup tables, BME688 the
//! linear high-range formula.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use piphi_core::SensorKind;
use tracing::debug;

use super::{
    expect_len, i16_le, u16_le, EnvironmentalDriver, EnvironmentalReading, HeaterProfile,
    SensorSettings,
};
use crate::transport::{I2cBus, TransportError};

pub const CHIP_ID: u8 = 0x61;
/// SDO tied to GND
pub const ADDRESS_PRIMARY: u8 = 0x76;
/// SDO tied to VCC
pub const ADDRESS_SECONDARY: u8 = 0x77;

const REG_CHIP_ID: u8 = 0xD0;
const REG_VARIANT: u8 = 0xF0;
const REG_COEFF1: u8 = 0x8A;
const COEFF1_LEN: usize = 23;
const REG_COEFF2: u8 = 0xE1;
const COEFF2_LEN: usize = 14;
const REG_COEFF3: u8 = 0x00;
const COEFF3_LEN: usize = 5;
const REG_FIELD0: u8 = 0x1D;
const FIELD_LEN: usize = 17;
const REG_RES_HEAT0: u8 = 0x5A;
const REG_GAS_WAIT0: u8 = 0x64;
const REG_CTRL_GAS0: u8 = 0x70;
const REG_CTRL_GAS1: u8 = 0x71;
const REG_CTRL_HUM: u8 = 0x72;
const REG_CTRL_MEAS: u8 = 0x74;
const REG_CONFIG: u8 = 0x75;

const MODE_SLEEP: u8 = 0b00;
const MODE_FORCED: u8 = 0b01;
const HEATER_OFF: u8 = 0x08;
const RUN_GAS_LOW: u8 = 0x10;
const RUN_GAS_HIGH: u8 = 0x20;
const NEW_DATA: u8 = 0x80;
const GAS_VALID: u8 = 0x20;
const HEAT_STABLE: u8 = 0x10;

const VARIANT_BME688: u8 = 0x01;
const MAX_HEATER_CELSIUS: u16 = 400;
const AMBIENT_CELSIUS: f64 = 25.0;
const POLL_ATTEMPTS: usize = 50;
const POLL_INTERVAL: Duration = Duration::from_millis(10);

const GAS_RANGE_K1: [f64; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, -0.8, 0.0, 0.0, -0.2, -0.5, 0.0, -1.0, 0.0, 0.0,
];
const GAS_RANGE_K2: [f64; 16] = [
    0.0, 0.0, 0.0, 0.0, 0.1, 0.7, 0.0, -0.8, -0.1, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
];

/// Factory trimming parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Calibration {
    pub t1: u16,
    pub t2: i16,
    pub t3: i8,
    pub p1: u16,
    pub p2: i16,
    pub p3: i8,
    pub p4: i16,
    pub p5: i16,
    pub p6: i8,
    pub p7: i8,
    pub p8: i16,
    pub p9: i16,
    pub p10: u8,
    pub h1: u16,
    pub h2: u16,
    pub h3: i8,
    pub h4: i8,
    pub h5: i8,
    pub h6: u8,
    pub h7: i8,
    pub gh1: i8,
    pub gh2: i16,
    pub gh3: i8,
    pub res_heat_range: u8,
    pub res_heat_val: i8,
    pub range_sw_err: i8,
}

impl Calibration {
    /// Parse the 0x8A, 0xE1 and 0x00 coefficient blocks
    pub fn parse(c1: &[u8], c2: &[u8], c3: &[u8]) -> Result<Self, TransportError> {
        expect_len(c1, COEFF1_LEN, "BME68x coefficients 0x8A")?;
        expect_len(c2, COEFF2_LEN, "BME68x coefficients 0xE1")?;
        expect_len(c3, COEFF3_LEN, "BME68x coefficients 0x00")?;

        Ok(Self {
            t2: i16_le(c1, 0),
            t3: c1[2] as i8,
            p1: u16_le(c1, 4),
            p2: i16_le(c1, 6),
            p3: c1[8] as i8,
            p4: i16_le(c1, 10),
            p5: i16_le(c1, 12),
            p7: c1[14] as i8,
            p6: c1[15] as i8,
            p8: i16_le(c1, 18),
            p9: i16_le(c1, 20),
            p10: c1[22],
            h2: ((c2[0] as u16) << 4) | (c2[1] >> 4) as u16,
            h1: ((c2[2] as u16) << 4) | (c2[1] & 0x0F) as u16,
            h3: c2[3] as i8,
            h4: c2[4] as i8,
            h5: c2[5] as i8,
            h6: c2[6],
            h7: c2[7] as i8,
            t1: u16_le(c2, 8),
            gh2: i16_le(c2, 10),
            gh1: c2[12] as i8,
            gh3: c2[13] as i8,
            res_heat_val: c3[0] as i8,
            res_heat_range: (c3[2] & 0x30) >> 4,
            range_sw_err: (c3[4] as i8 & -16) / 16,
        })
    }

    /// Temperature in °C and the fine temperature carried into the other channels
    pub fn temperature(&self, adc_t: u32) -> (f64, f64) {
        let adc = adc_t as f64;
        let t1 = self.t1 as f64;
        let var1 = (adc / 16384.0 - t1 / 1024.0) * self.t2 as f64;
        let d = adc / 131072.0 - t1 / 8192.0;
        let var2 = d * d * (self.t3 as f64 * 16.0);
        let t_fine = var1 + var2;
        (t_fine / 5120.0, t_fine)
    }

    /// Pressure in Pa
    pub fn pressure(&self, adc_p: u32, t_fine: f64) -> f64 {
        let mut var1 = t_fine / 2.0 - 64000.0;
        let mut var2 = var1 * var1 * (self.p6 as f64 / 131072.0);
        var2 += var1 * self.p5 as f64 * 2.0;
        var2 = var2 / 4.0 + self.p4 as f64 * 65536.0;
        var1 = (self.p3 as f64 * var1 * var1 / 16384.0 + self.p2 as f64 * var1) / 524288.0;
        var1 = (1.0 + var1 / 32768.0) * self.p1 as f64;
        if var1 as i64 == 0 {
            return 0.0;
        }
        let mut p = 1048576.0 - adc_p as f64;
        p = (p - var2 / 4096.0) * 6250.0 / var1;
        let var1 = self.p9 as f64 * p * p / 2147483648.0;
        let var2 = p * (self.p8 as f64 / 32768.0);
        let var3 = (p / 256.0).powi(3) * (self.p10 as f64 / 131072.0);
        p + (var1 + var2 + var3 + self.p7 as f64 * 128.0) / 16.0
    }

    /// Relative humidity in percent, clamped to 0..=100
    pub fn humidity(&self, adc_h: u16, t_fine: f64) -> f64 {
        let temp = t_fine / 5120.0;
        let var1 = adc_h as f64 - (self.h1 as f64 * 16.0 + self.h3 as f64 / 2.0 * temp);
        let var2 = var1
            * (self.h2 as f64 / 262144.0
                * (1.0 + self.h4 as f64 / 16384.0 * temp + self.h5 as f64 / 1048576.0 * temp * temp));
        let var3 = self.h6 as f64 / 16384.0;
        let var4 = self.h7 as f64 / 2097152.0;
        let hum = var2 + (var3 + var4 * temp) * var2 * var2;
        hum.clamp(0.0, 100.0)
    }

    /// Gas resistance in ohm using the BME680 range tables
    pub fn gas_resistance_low(&self, adc_gas: u16, range: u8) -> f64 {
        let range = (range & 0x0F) as usize;
        let var1 = 1340.0 + 5.0 * self.range_sw_err as f64;
        let var2 = var1 * (1.0 + GAS_RANGE_K1[range] / 100.0);
        let var3 = 1.0 + GAS_RANGE_K2[range] / 100.0;
        1.0 / (var3 * 0.000000125 * (1u32 << range) as f64 * ((adc_gas as f64 - 512.0) / var2 + 1.0))
    }

    /// Gas resistance in ohm for the BME688
    pub fn gas_resistance_high(adc_gas: u16, range: u8) -> f64 {
        let var1 = (262144u32 >> (range & 0x0F)) as f64;
        let var2 = 4096.0 + (adc_gas as f64 - 512.0) * 3.0;
        1_000_000.0 * var1 / var2
    }

    /// Heater resistance register value for a target temperature
    pub fn heater_resistance(&self, target_celsius: u16, ambient_celsius: f64) -> u8 {
        let target = target_celsius.min(MAX_HEATER_CELSIUS) as f64;
        let var1 = self.gh1 as f64 / 16.0 + 49.0;
        let var2 = self.gh2 as f64 / 32768.0 * 0.0005 + 0.00235;
        let var3 = self.gh3 as f64 / 1024.0;
        let var4 = var1 * (1.0 + var2 * target);
        let var5 = var4 + var3 * ambient_celsius;
        let res = 3.4
            * (var5
                * (4.0 / (4.0 + self.res_heat_range as f64))
                * (1.0 / (1.0 + self.res_heat_val as f64 * 0.002))
                - 25.0);
        res.clamp(0.0, u8::MAX as f64) as u8
    }
}

/// Encode a heater duration into the gas_wait register format
pub fn gas_wait(duration_ms: u16) -> u8 {
    if duration_ms >= 0x0FC0 {
        return 0xFF;
    }
    let mut duration = duration_ms;
    let mut factor = 0u8;
    while duration > 0x3F {
        duration /= 4;
        factor += 1;
    }
    duration as u8 + factor * 64
}

/// A BME680 or BME688 bound to one bus address
pub struct Bme68x {
    bus: Arc<dyn I2cBus>,
    address: u8,
    variant: u8,
    calibration: Calibration,
    settings: Option<SensorSettings>,
}

impl Bme68x {
    /// Verify the chip id, read the variant and load the calibration
    pub fn new(bus: Arc<dyn I2cBus>, address: u8) -> Result<Self, TransportError> {
        let chip_id = bus.read_byte_data(address, REG_CHIP_ID)?;
        if chip_id != CHIP_ID {
            return Err(TransportError::Protocol(format!(
                "unexpected BME68x chip id 0x{chip_id:02X} at 0x{address:02X}"
            )));
        }
        let variant = bus.read_byte_data(address, REG_VARIANT)?;

        let c1 = bus.read_block_data(address, REG_COEFF1, COEFF1_LEN)?;
        let c2 = bus.read_block_data(address, REG_COEFF2, COEFF2_LEN)?;
        let c3 = bus.read_block_data(address, REG_COEFF3, COEFF3_LEN)?;
        let calibration = Calibration::parse(&c1, &c2, &c3)?;
        debug!(
            address = format!("0x{:02X}", address),
            variant,
            "BME68x calibration loaded"
        );

        Ok(Self {
            bus,
            address,
            variant,
            calibration,
            settings: None,
        })
    }

    pub fn is_bme688(&self) -> bool {
        self.variant == VARIANT_BME688
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    fn ctrl_meas(settings: &SensorSettings, mode: u8) -> u8 {
        (settings.temperature_oversampling.code() << 5)
            | (settings.pressure_oversampling.code() << 2)
            | mode
    }

    fn write_heater(&self, heater: &HeaterProfile) -> Result<(), TransportError> {
        let profile = heater.profile.min(9);
        let res_heat = self
            .calibration
            .heater_resistance(heater.target_celsius, AMBIENT_CELSIUS);
        self.bus
            .write_byte_data(self.address, REG_RES_HEAT0 + profile, res_heat)?;
        self.bus.write_byte_data(
            self.address,
            REG_GAS_WAIT0 + profile,
            gas_wait(heater.duration_ms),
        )?;
        let run_gas = if self.is_bme688() {
            RUN_GAS_HIGH
        } else {
            RUN_GAS_LOW
        };
        self.bus
            .write_byte_data(self.address, REG_CTRL_GAS1, run_gas | profile)?;
        self.bus.write_byte_data(self.address, REG_CTRL_GAS0, 0x00)
    }

    fn read_field(&self) -> Result<Vec<u8>, TransportError> {
        for _ in 0..POLL_ATTEMPTS {
            let field = self
                .bus
                .read_block_data(self.address, REG_FIELD0, FIELD_LEN)?;
            expect_len(&field, FIELD_LEN, "BME68x field")?;
            if field[0] & NEW_DATA != 0 {
                return Ok(field);
            }
            thread::sleep(POLL_INTERVAL);
        }
        Err(TransportError::Timeout(format!(
            "BME68x at 0x{:02X} produced no new data",
            self.address
        )))
    }
}

impl EnvironmentalDriver for Bme68x {
    fn kind(&self) -> SensorKind {
        SensorKind::Bme68x
    }

    fn address(&self) -> u8 {
        self.address
    }

    fn configure(&mut self, settings: &SensorSettings) -> Result<(), TransportError> {
        self.bus.write_byte_data(
            self.address,
            REG_CTRL_MEAS,
            Self::ctrl_meas(settings, MODE_SLEEP),
        )?;
        self.bus.write_byte_data(
            self.address,
            REG_CTRL_HUM,
            settings.humidity_oversampling.code() & 0x07,
        )?;
        self.bus
            .write_byte_data(self.address, REG_CONFIG, settings.filter.code() << 2)?;

        match &settings.heater {
            Some(heater) => self.write_heater(heater)?,
            None => {
                self.bus.write_byte_data(self.address, REG_CTRL_GAS1, 0x00)?;
                self.bus
                    .write_byte_data(self.address, REG_CTRL_GAS0, HEATER_OFF)?;
            }
        }

        self.settings = Some(*settings);
        Ok(())
    }

    fn read(&mut self) -> Result<EnvironmentalReading, TransportError> {
        let settings = match self.settings {
            Some(settings) => settings,
            None => {
                let settings = SensorSettings::default();
                self.configure(&settings)?;
                settings
            }
        };

        self.bus.write_byte_data(
            self.address,
            REG_CTRL_MEAS,
            Self::ctrl_meas(&settings, MODE_FORCED),
        )?;
        let f = self.read_field()?;

        let adc_p = ((f[2] as u32) << 12) | ((f[3] as u32) << 4) | ((f[4] as u32) >> 4);
        let adc_t = ((f[5] as u32) << 12) | ((f[6] as u32) << 4) | ((f[7] as u32) >> 4);
        let adc_h = ((f[8] as u16) << 8) | f[9] as u16;

        let (temperature, t_fine) = self.calibration.temperature(adc_t);
        let pressure = self.calibration.pressure(adc_p, t_fine) / 100.0;
        let humidity = self.calibration.humidity(adc_h, t_fine);

        let gas_resistance = if settings.heater.is_none() {
            None
        } else if self.is_bme688() {
            let adc_gas = ((f[15] as u16) << 2) | (f[16] >> 6) as u16;
            let valid = f[16] & (GAS_VALID | HEAT_STABLE) == GAS_VALID | HEAT_STABLE;
            valid.then(|| Calibration::gas_resistance_high(adc_gas, f[16] & 0x0F))
        } else {
            let adc_gas = ((f[13] as u16) << 2) | (f[14] >> 6) as u16;
            let valid = f[14] & (GAS_VALID | HEAT_STABLE) == GAS_VALID | HEAT_STABLE;
            valid.then(|| self.calibration.gas_resistance_low(adc_gas, f[14] & 0x0F))
        };

        Ok(EnvironmentalReading {
            temperature,
            pressure,
            humidity,
            gas_resistance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockBus;

    #[test]
    fn test_gas_wait_encoding() {
        assert_eq!(gas_wait(150), 0x65);
        assert_eq!(gas_wait(63), 63);
        assert_eq!(gas_wait(5000), 0xFF);
    }

    #[test]
    fn test_configure_writes_heater_profile() {
        let bus = Arc::new(MockBus::new().with_bme680(0x76));
        let mut sensor = Bme68x::new(bus.clone(), 0x76).unwrap();
        sensor.configure(&SensorSettings::default()).unwrap();

        assert_eq!(bus.register(0x76, REG_CTRL_HUM), Some(0x02));
        assert_eq!(bus.register(0x76, REG_CONFIG), Some(0x02 << 2));
        assert_eq!(bus.register(0x76, REG_GAS_WAIT0), Some(0x65));
        assert_eq!(bus.register(0x76, REG_CTRL_GAS1), Some(RUN_GAS_LOW));
        assert_eq!(bus.register(0x76, REG_CTRL_GAS0), Some(0x00));
        let res_heat = bus.register(0x76, REG_RES_HEAT0).unwrap();
        assert!(res_heat > 0);
    }

    #[test]
    fn test_reads_fixture_sensor() {
        let bus = Arc::new(MockBus::new().with_bme680(0x76));
        let mut sensor = Bme68x::new(bus.clone(), 0x76).unwrap();
        sensor.configure(&SensorSettings::default()).unwrap();

        let reading = sensor.read().unwrap();
        assert!((reading.temperature - 25.93).abs() < 0.01, "temperature {}", reading.temperature);
        assert!((reading.pressure - 1008.93).abs() < 0.01, "pressure {}", reading.pressure);
        assert!((reading.humidity - 52.87).abs() < 0.01, "humidity {}", reading.humidity);
        let gas = reading.gas_resistance.unwrap();
        assert!((gas - 271154.77).abs() < 1.0, "gas {gas}");

        // forced mode was requested for the measurement
        assert_eq!(bus.register(0x76, REG_CTRL_MEAS), Some((4 << 5) | (3 << 2) | MODE_FORCED));
    }

    #[test]
    fn test_gas_disabled_without_heater() {
        let bus = Arc::new(MockBus::new().with_bme680(0x76));
        let mut sensor = Bme68x::new(bus, 0x76).unwrap();
        sensor
            .configure(&SensorSettings {
                heater: None,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(sensor.read().unwrap().gas_resistance, None);
    }

    #[test]
    fn test_bme688_high_range_formula() {
        let r = Calibration::gas_resistance_high(512, 0);
        assert!((r - 1_000_000.0 * 262144.0 / 4096.0).abs() < 1e-6);
    }
}
