//! piphi-conv - Binary decoders for PiPhi I2C sensors
//!
//! Pure functions turning raw bytes read from the bus into physical
//! readings. Nothing in here touches hardware; the Bosch sensors are
//! compensated inside their drivers in `piphi-bridge`.
//!
//! | Module | Input | Output |
//! |--------|-------|--------|
//! | [`aht20`] | 7-byte status+data block | temperature, humidity |
//! | [`pmsa003i`] | 32-byte frame | 12 particulate metrics |
//! | [`dew_point`] | temperature, relative humidity | dew point |
//!
//! # Quick Start
//!
//! ```rust
//! use piphi_conv::{aht20, dew_point};
//!
//! let reading = aht20::decode(&[0x1C, 0x80, 0x00, 0x08, 0x00, 0x00, 0x00]).unwrap();
//! assert_eq!(reading.humidity, 50.0);
//!
//! let dp = dew_point(20.0, 0.5).unwrap();
//! assert!(dp > 8.0 && dp < 10.0);
//! ```

pub mod aht20;
pub mod dew_point;
pub mod error;
pub mod pmsa003i;

pub use aht20::Aht20Reading;
pub use dew_point::dew_point;
pub use error::{DecodeError, DecodeResult};
pub use pmsa003i::{FrameInspection, ParticulateReading};
