//! PMSA003I frame decoding
//!
//! The sensor exposes a fixed 32-byte frame over I2C:
//!
//! ```text
//! 0..2    header 0x42 0x4D
//! 2..4    frame length
//! 4..16   PM1.0 / PM2.5 / PM10 concentrations, standard then environmental (µg/m³)
//! 16..28  particle counts per 0.1 L for 0.3 / 0.5 / 1.0 / 2.5 / 5.0 / 10 µm
//! 28..30  reserved
//! 30..32  checksum: 16-bit sum of bytes 0..30
//! ```
//!
//! All multi-byte fields are big-endian.

use crate::error::{require_len, DecodeError, DecodeResult};

/// Length of a complete frame
pub const FRAME_LEN: usize = 32;

/// Frame start bytes
pub const HEADER: [u8; 2] = [0x42, 0x4D];

/// A decoded particulate reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticulateReading {
    pub pm10_standard: u16,
    pub pm25_standard: u16,
    pub pm100_standard: u16,
    pub pm10_env: u16,
    pub pm25_env: u16,
    pub pm100_env: u16,
    pub particles_03um: u16,
    pub particles_05um: u16,
    pub particles_10um: u16,
    pub particles_25um: u16,
    pub particles_50um: u16,
    pub particles_100um: u16,
}

impl ParticulateReading {
    /// Mass concentrations (µg/m³) by metric name
    pub fn concentrations(&self) -> [(&'static str, u16); 6] {
        [
            ("pm10_standard", self.pm10_standard),
            ("pm25_standard", self.pm25_standard),
            ("pm100_standard", self.pm100_standard),
            ("pm10_env", self.pm10_env),
            ("pm25_env", self.pm25_env),
            ("pm100_env", self.pm100_env),
        ]
    }

    /// Particle counts (per 0.1 L) by metric name
    pub fn particle_counts(&self) -> [(&'static str, u16); 6] {
        [
            ("particles_03um", self.particles_03um),
            ("particles_05um", self.particles_05um),
            ("particles_10um", self.particles_10um),
            ("particles_25um", self.particles_25um),
            ("particles_50um", self.particles_50um),
            ("particles_100um", self.particles_100um),
        ]
    }
}

/// Fields of a frame together with its validity
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInspection {
    pub reading: ParticulateReading,
    /// First validation failure, `None` for a clean frame
    pub issue: Option<DecodeError>,
}

impl FrameInspection {
    pub fn is_valid(&self) -> bool {
        self.issue.is_none()
    }
}

/// Checksum over the first 30 bytes of a frame
pub fn checksum(frame: &[u8]) -> u16 {
    frame
        .iter()
        .take(FRAME_LEN - 2)
        .fold(0u16, |acc, b| acc.wrapping_add(*b as u16))
}

/// Decode a frame, enforcing header and checksum
pub fn decode(data: &[u8]) -> DecodeResult<ParticulateReading> {
    let inspection = inspect(data)?;
    match inspection.issue {
        Some(err) => Err(err),
        None => Ok(inspection.reading),
    }
}

/// Extract the fields of a frame and report header/checksum problems separately
///
/// Only a block shorter than a full frame is rejected outright.
pub fn inspect(data: &[u8]) -> DecodeResult<FrameInspection> {
    require_len(data, FRAME_LEN)?;
    let frame = &data[..FRAME_LEN];

    let word = |offset: usize| u16::from_be_bytes([frame[offset], frame[offset + 1]]);

    let reading = ParticulateReading {
        pm10_standard: word(4),
        pm25_standard: word(6),
        pm100_standard: word(8),
        pm10_env: word(10),
        pm25_env: word(12),
        pm100_env: word(14),
        particles_03um: word(16),
        particles_05um: word(18),
        particles_10um: word(20),
        particles_25um: word(22),
        particles_50um: word(24),
        particles_100um: word(26),
    };

    let issue = if data.len() != FRAME_LEN {
        Some(DecodeError::FrameError(format!(
            "expected {FRAME_LEN} bytes, got {}",
            data.len()
        )))
    } else if frame[..2] != HEADER {
        Some(DecodeError::FrameError(format!(
            "bad header {:02X} {:02X}",
            frame[0], frame[1]
        )))
    } else {
        let calculated = checksum(frame);
        let received = word(30);
        (calculated != received).then_some(DecodeError::ChecksumError {
            calculated,
            received,
        })
    };

    Ok(FrameInspection { reading, issue })
}

/// Whether `data` starts like a PMSA003I frame (length and header only)
pub fn looks_like_frame(data: &[u8]) -> bool {
    data.len() == FRAME_LEN && data[..2] == HEADER
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame_with(fields: &[(usize, u16)]) -> Vec<u8> {
        let mut frame = vec![0u8; FRAME_LEN];
        frame[..2].copy_from_slice(&HEADER);
        frame[2..4].copy_from_slice(&28u16.to_be_bytes());
        for (offset, value) in fields {
            frame[*offset..offset + 2].copy_from_slice(&value.to_be_bytes());
        }
        let sum = checksum(&frame);
        frame[30..32].copy_from_slice(&sum.to_be_bytes());
        frame
    }

    #[test]
    fn test_pm25_field_offset() {
        let mut data = vec![0u8; FRAME_LEN];
        data[0] = 0x42;
        data[1] = 0x4D;
        data[6] = 0x01;
        data[7] = 0x2C;

        let inspection = inspect(&data).unwrap();
        assert_eq!(inspection.reading.pm25_standard, 300);
        assert_eq!(inspection.reading.pm10_standard, 0);
    }

    #[test]
    fn test_clean_frame_decodes() {
        let frame = frame_with(&[(4, 12), (6, 18), (8, 21), (16, 1500), (26, 3)]);
        let reading = decode(&frame).unwrap();

        assert_eq!(
            reading,
            ParticulateReading {
                pm10_standard: 12,
                pm25_standard: 18,
                pm100_standard: 21,
                particles_03um: 1500,
                particles_100um: 3,
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_corrupted_byte_is_checksum_error() {
        let mut frame = frame_with(&[(6, 300)]);
        frame[12] ^= 0x10;

        match decode(&frame) {
            Err(DecodeError::ChecksumError {
                calculated,
                received,
            }) => assert_ne!(calculated, received),
            other => panic!("expected checksum error, got {other:?}"),
        }

        let inspection = inspect(&frame).unwrap();
        assert!(!inspection.is_valid());
        assert_eq!(inspection.reading.pm25_standard, 300);
    }

    #[test]
    fn test_bad_header_is_frame_error() {
        let mut frame = frame_with(&[]);
        frame[0] = 0x00;
        assert!(matches!(decode(&frame), Err(DecodeError::FrameError(_))));
        assert!(!looks_like_frame(&frame));
    }

    #[test]
    fn test_short_block_is_rejected() {
        assert!(matches!(
            inspect(&[0x42, 0x4D, 0x00]),
            Err(DecodeError::DataTooShort {
                expected: 32,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_metric_names() {
        let reading = ParticulateReading::default();
        let names: Vec<_> = reading
            .concentrations()
            .iter()
            .chain(reading.particle_counts().iter())
            .map(|(name, _)| *name)
            .collect();
        assert_eq!(names.len(), 12);
        assert_eq!(names[1], "pm25_standard");
        assert_eq!(names[11], "particles_100um");
    }
}
