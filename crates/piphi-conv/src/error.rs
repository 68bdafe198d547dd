//! Error types for sensor frame decoding

use thiserror::Error;

/// Errors that can occur while decoding a sensor frame
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The sensor reported that no measurement is available yet
    #[error("sensor not ready (status 0x{status:02X})")]
    NotReady { status: u8 },

    /// The frame does not start with the expected header
    #[error("frame error: {0}")]
    FrameError(String),

    /// Frame checksum mismatch
    #[error("checksum mismatch: calculated 0x{calculated:04X}, received 0x{received:04X}")]
    ChecksumError { calculated: u16, received: u16 },

    /// Input outside the domain of a derived quantity
    #[error("domain error: {0}")]
    DomainError(String),

    /// Data too short for the expected frame
    #[error("data too short: expected {expected} bytes, got {actual}")]
    DataTooShort { expected: usize, actual: usize },
}

/// Result type for decode operations
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Ensure `data` holds at least `expected` bytes
pub(crate) fn require_len(data: &[u8], expected: usize) -> DecodeResult<()> {
    if data.len() < expected {
        return Err(DecodeError::DataTooShort {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_len() {
        assert!(require_len(&[0; 6], 6).is_ok());
        assert_eq!(
            require_len(&[0; 3], 6),
            Err(DecodeError::DataTooShort {
                expected: 6,
                actual: 3
            })
        );
    }

    #[test]
    fn test_checksum_message() {
        let err = DecodeError::ChecksumError {
            calculated: 0x00AB,
            received: 0x00AC,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: calculated 0x00AB, received 0x00AC"
        );
    }
}
