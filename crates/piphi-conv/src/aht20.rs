//! AHT20 measurement decoding
//!
//! The sensor answers a measurement trigger with a 7-byte block:
//!
//! ```text
//! byte 0   status (bit 7 = busy)
//! byte 1   humidity[19:12]
//! byte 2   humidity[11:4]
//! byte 3   humidity[3:0] | temperature[19:16]
//! byte 4   temperature[15:8]
//! byte 5   temperature[7:0]
//! byte 6   CRC-8 (not checked)
//! ```

use crate::error::{require_len, DecodeError, DecodeResult};

/// Bytes requested from the sensor after a trigger
pub const MEASUREMENT_LEN: usize = 7;

const STATUS_BUSY: u8 = 0x80;
const FULL_SCALE: f64 = (1u32 << 20) as f64;

/// A decoded AHT20 measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aht20Reading {
    /// Temperature in °C
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
}

/// Decode a status+data block read after a measurement trigger
pub fn decode(data: &[u8]) -> DecodeResult<Aht20Reading> {
    require_len(data, 6)?;

    let status = data[0];
    if status & STATUS_BUSY != 0 {
        return Err(DecodeError::NotReady { status });
    }

    let humidity_raw =
        ((data[1] as u32) << 12) | ((data[2] as u32) << 4) | ((data[3] as u32) >> 4);
    let temperature_raw =
        (((data[3] & 0x0F) as u32) << 16) | ((data[4] as u32) << 8) | data[5] as u32;

    Ok(Aht20Reading {
        temperature: temperature_raw as f64 / FULL_SCALE * 200.0 - 50.0,
        humidity: humidity_raw as f64 / FULL_SCALE * 100.0,
    })
}
