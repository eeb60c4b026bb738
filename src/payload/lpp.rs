//! # Cayenne LPP Encoder
//!
//! Encodes measurements as Cayenne LPP records.
//!
//! Each record is `channel(1) + type(1) + value(N)`, value big-endian:
//!
//! | Measurement | Type | Size | Resolution |
//! |-------------|------|------|------------|
//! | Temperature | 103 (0x67) | 2, signed | 0.1 °C |
//! | Relative humidity | 104 (0x68) | 1, unsigned | 0.5 % |
//! | Barometric pressure | 115 (0x73) | 2, unsigned | 0.1 hPa |

use crate::error::{Result, UplinkError};

/// Temperature sensor type
pub const LPP_TEMPERATURE: u8 = 103;

/// Relative humidity sensor type
pub const LPP_RELATIVE_HUMIDITY: u8 = 104;

/// Barometric pressure sensor type
pub const LPP_BAROMETRIC_PRESSURE: u8 = 115;

/// Value sizes in bytes
pub const LPP_TEMPERATURE_SIZE: usize = 2;
pub const LPP_RELATIVE_HUMIDITY_SIZE: usize = 1;
pub const LPP_BAROMETRIC_PRESSURE_SIZE: usize = 2;

/// Record header size (channel + type)
pub const LPP_HEADER_SIZE: usize = 2;

/// Default buffer bound
pub const LPP_DEFAULT_MAX_SIZE: usize = 50;

/// Growing Cayenne LPP buffer bounded by `max_size`
///
/// # Examples
///
/// ```
/// use lora_uplink::payload::CayenneLpp;
///
/// let mut lpp = CayenneLpp::new(50);
/// lpp.add_temperature(1, 21.5)?;
/// assert_eq!(lpp.buffer(), &[0x01, 0x67, 0x00, 0xD7]);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CayenneLpp {
    buffer: Vec<u8>,
    max_size: usize,
}

impl CayenneLpp {
    pub fn new(max_size: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(max_size),
            max_size,
        }
    }

    /// Drop all records, keeping the bound
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Current encoded length in bytes
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Append a temperature in degrees Celsius
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Buffer length after the append
    ///
    /// # Errors
    ///
    /// Returns error if the value is not finite or the record does not fit
    pub fn add_temperature(&mut self, channel: u8, celsius: f32) -> Result<usize> {
        let raw = scale(celsius, 10.0, i16::MIN as f32, i16::MAX as f32)? as i16;
        self.push_record(channel, LPP_TEMPERATURE, &raw.to_be_bytes())
    }

    /// Append a relative humidity in percent
    ///
    /// # Errors
    ///
    /// Returns error if the value is not finite or the record does not fit
    pub fn add_relative_humidity(&mut self, channel: u8, percent: f32) -> Result<usize> {
        let raw = scale(percent, 2.0, 0.0, u8::MAX as f32)? as u8;
        self.push_record(channel, LPP_RELATIVE_HUMIDITY, &[raw])
    }

    /// Append a barometric pressure in hectopascal
    ///
    /// # Errors
    ///
    /// Returns error if the value is not finite or the record does not fit
    pub fn add_barometric_pressure(&mut self, channel: u8, hpa: f32) -> Result<usize> {
        let raw = scale(hpa, 10.0, 0.0, u16::MAX as f32)? as u16;
        self.push_record(channel, LPP_BAROMETRIC_PRESSURE, &raw.to_be_bytes())
    }

    fn push_record(&mut self, channel: u8, kind: u8, value: &[u8]) -> Result<usize> {
        let needed = LPP_HEADER_SIZE + value.len();
        if self.buffer.len() + needed > self.max_size {
            return Err(UplinkError::Payload(format!(
                "LPP buffer full: {} + {} bytes exceeds maximum {}",
                self.buffer.len(),
                needed,
                self.max_size
            )));
        }

        self.buffer.push(channel);
        self.buffer.push(kind);
        self.buffer.extend_from_slice(value);
        Ok(self.buffer.len())
    }
}

impl Default for CayenneLpp {
    fn default() -> Self {
        Self::new(LPP_DEFAULT_MAX_SIZE)
    }
}

/// Scale to the fixed-point resolution, rounding to nearest and saturating
fn scale(value: f32, factor: f32, min: f32, max: f32) -> Result<f32> {
    if !value.is_finite() {
        return Err(UplinkError::Payload(format!("Cannot encode non-finite value {}", value)));
    }
    Ok((value * factor).round().clamp(min, max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_constants() {
        assert_eq!(LPP_TEMPERATURE, 0x67);
        assert_eq!(LPP_RELATIVE_HUMIDITY, 0x68);
        assert_eq!(LPP_BAROMETRIC_PRESSURE, 0x73);
    }

    #[test]
    fn test_temperature_encoding() {
        let mut lpp = CayenneLpp::new(50);
        assert_eq!(lpp.add_temperature(1, 21.5).unwrap(), 4);
        // 21.5 °C = 215 = 0x00D7
        assert_eq!(lpp.buffer(), &[0x01, 0x67, 0x00, 0xD7]);
    }

    #[test]
    fn test_negative_temperature_encoding() {
        let mut lpp = CayenneLpp::new(50);
        lpp.add_temperature(3, -4.1).unwrap();
        // -41 = 0xFFD7 two's complement
        assert_eq!(lpp.buffer(), &[0x03, 0x67, 0xFF, 0xD7]);
    }

    #[test]
    fn test_temperature_rounds_to_resolution() {
        let mut lpp = CayenneLpp::new(50);
        lpp.add_temperature(1, 21.46).unwrap();
        assert_eq!(&lpp.buffer()[2..], &[0x00, 0xD7]);
    }

    #[test]
    fn test_temperature_saturates() {
        let mut lpp = CayenneLpp::new(50);
        lpp.add_temperature(1, 1.0e6).unwrap();
        assert_eq!(&lpp.buffer()[2..], &i16::MAX.to_be_bytes());
    }

    #[test]
    fn test_non_finite_is_rejected() {
        let mut lpp = CayenneLpp::new(50);
        assert!(lpp.add_temperature(1, f32::NAN).is_err());
        assert!(lpp.add_temperature(1, f32::INFINITY).is_err());
        assert_eq!(lpp.size(), 0);
    }

    #[test]
    fn test_humidity_and_pressure_encoding() {
        let mut lpp = CayenneLpp::new(50);
        lpp.add_relative_humidity(2, 45.5).unwrap();
        lpp.add_barometric_pressure(4, 1013.2).unwrap();
        assert_eq!(
            lpp.buffer(),
            &[0x02, 0x68, 0x5B, 0x04, 0x73, 0x27, 0x94]
        );
    }

    #[test]
    fn test_buffer_bound_is_enforced() {
        let mut lpp = CayenneLpp::new(6);
        assert_eq!(lpp.add_temperature(1, 20.0).unwrap(), 4);

        // A second temperature needs 4 more bytes: 8 > 6
        let result = lpp.add_temperature(2, 20.0);
        assert!(result.is_err());
        assert_eq!(lpp.size(), 4, "Failed append must not modify the buffer");

        // Humidity needs 3 bytes: 7 > 6
        assert!(lpp.add_relative_humidity(2, 50.0).is_err());
    }

    #[test]
    fn test_default_bound_fits_twelve_temperatures() {
        let mut lpp = CayenneLpp::default();
        for channel in 0..12 {
            lpp.add_temperature(channel, 20.0).unwrap();
        }
        assert_eq!(lpp.size(), 48);
        assert!(lpp.add_temperature(12, 20.0).is_err());
    }

    #[test]
    fn test_reset_clears_records() {
        let mut lpp = CayenneLpp::new(50);
        lpp.add_temperature(1, 21.5).unwrap();
        lpp.reset();
        assert_eq!(lpp.size(), 0);
        assert_eq!(lpp.max_size(), 50);
    }
}
