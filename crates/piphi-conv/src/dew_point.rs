//! Dew point approximation (Magnus formula)

use crate::error::{DecodeError, DecodeResult};

const A: f64 = 17.625;
const B: f64 = 243.04;

/// Dew point in °C for temperature `t` (°C) and relative humidity `h` (0..=1)
pub fn dew_point(t: f64, h: f64) -> DecodeResult<f64> {
    if !t.is_finite() || !h.is_finite() {
        return Err(DecodeError::DomainError(format!(
            "non-finite input (t={t}, h={h})"
        )));
    }
    if h <= 0.0 {
        return Err(DecodeError::DomainError(format!(
            "relative humidity must be positive, got {h}"
        )));
    }

    let gamma = h.ln() + A * t / (B + t);
    Ok(B * gamma / (A - gamma))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_twenty_degrees_half_humidity() {
        let dp = dew_point(20.0, 0.5).unwrap();
        assert!(dp > 8.0 && dp < 10.0, "dew point {dp}");
        assert!((dp - 9.26).abs() < 0.01);
    }

    #[test]
    fn test_saturated_air_equals_temperature() {
        let dp = dew_point(15.0, 1.0).unwrap();
        assert!((dp - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_domain_errors() {
        assert!(matches!(dew_point(20.0, 0.0), Err(DecodeError::DomainError(_))));
        assert!(matches!(dew_point(20.0, -0.1), Err(DecodeError::DomainError(_))));
        assert!(matches!(
            dew_point(f64::NAN, 0.5),
            Err(DecodeError::DomainError(_))
        ));
    }
}
