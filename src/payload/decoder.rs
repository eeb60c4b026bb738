//! # Cayenne LPP Decoder
//!
//! Decodes Cayenne LPP buffers into typed records, mirroring what a network
//! server integration does with our uplinks.

use super::lpp::*;
use crate::error::{Result, UplinkError};

/// One decoded measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LppValue {
    /// Degrees Celsius
    Temperature(f32),
    /// Percent
    RelativeHumidity(f32),
    /// Hectopascal
    BarometricPressure(f32),
}

/// Measurement plus the channel it was tagged with
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LppRecord {
    pub channel: u8,
    pub value: LppValue,
}

/// Decode every record in an LPP buffer
///
/// # Errors
///
/// Returns error if:
/// - A record header or value is truncated
/// - A record carries an unsupported type
pub fn decode(bytes: &[u8]) -> Result<Vec<LppRecord>> {
    let mut records = Vec::new();
    let mut rest = bytes;

    while !rest.is_empty() {
        if rest.len() < LPP_HEADER_SIZE {
            return Err(UplinkError::Payload(format!(
                "Truncated LPP header: {} byte(s) left",
                rest.len()
            )));
        }

        let channel = rest[0];
        let kind = rest[1];
        let size = value_size(kind)?;
        let data = rest
            .get(LPP_HEADER_SIZE..LPP_HEADER_SIZE + size)
            .ok_or_else(|| {
                UplinkError::Payload(format!(
                    "Truncated LPP value for type {} on channel {}",
                    kind, channel
                ))
            })?;

        let value = match kind {
            LPP_TEMPERATURE => {
                LppValue::Temperature(i16::from_be_bytes([data[0], data[1]]) as f32 / 10.0)
            }
            LPP_RELATIVE_HUMIDITY => LppValue::RelativeHumidity(data[0] as f32 / 2.0),
            _ => LppValue::BarometricPressure(u16::from_be_bytes([data[0], data[1]]) as f32 / 10.0),
        };
        records.push(LppRecord { channel, value });

        rest = &rest[LPP_HEADER_SIZE + size..];
    }

    Ok(records)
}

fn value_size(kind: u8) -> Result<usize> {
    match kind {
        LPP_TEMPERATURE => Ok(LPP_TEMPERATURE_SIZE),
        LPP_RELATIVE_HUMIDITY => Ok(LPP_RELATIVE_HUMIDITY_SIZE),
        LPP_BAROMETRIC_PRESSURE => Ok(LPP_BAROMETRIC_PRESSURE_SIZE),
        other => Err(UplinkError::Payload(format!("Unsupported LPP type: 0x{:02X}", other))),
    }
}
