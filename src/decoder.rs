//! Tyremate notification frame decoder.
//!
//! Frames carry no checksum. Anything at least [`MIN_FRAME_LEN`] bytes long
//! is decoded, even when the resulting values are physically implausible.
//!
//! Frame layout (offsets in bytes):
//! - 1..=2: sensor id
//! - 5..=6: pressure, big-endian u16, `raw / 6.895 - 15` PSI
//! - 7: temperature, `raw - 52` °C
//! - 8: battery voltage, `(raw + 150) / 100` V

use crate::reading::Reading;
use thiserror::Error;

/// Shortest notification payload that holds a full reading.
pub const MIN_FRAME_LEN: usize = 10;

const PRESSURE_DIVISOR: f64 = 6.895;
const PRESSURE_OFFSET_PSI: f64 = 15.0;
const TEMPERATURE_OFFSET_C: i16 = 52;
const VOLTAGE_OFFSET: f64 = 150.0;
const VOLTAGE_DIVISOR: f64 = 100.0;

/// Reasons a notification cannot be turned into a [`Reading`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short: {len} bytes, need at least {min}", min = MIN_FRAME_LEN)]
    TooShort { len: usize },
}

/// Decode one notification payload.
///
/// # Errors
/// Returns [`DecodeError::TooShort`] when `payload` has fewer than
/// [`MIN_FRAME_LEN`] bytes.
pub fn decode(payload: &[u8]) -> Result<Reading, DecodeError> {
    if payload.len() < MIN_FRAME_LEN {
        return Err(DecodeError::TooShort { len: payload.len() });
    }

    let sensor_id = format!("{:02X}{:02X}", payload[1], payload[2]);
    let pressure_raw = u16::from_be_bytes([payload[5], payload[6]]);
    let temperature_raw = payload[7];
    let voltage_raw = payload[8];

    let pressure_psi = round_to(
        f64::from(pressure_raw) / PRESSURE_DIVISOR - PRESSURE_OFFSET_PSI,
        2,
    );
    let temperature_celsius = i16::from(temperature_raw) - TEMPERATURE_OFFSET_C;
    let voltage_volts = round_to(
        (f64::from(voltage_raw) + VOLTAGE_OFFSET) / VOLTAGE_DIVISOR,
        3,
    );
    let raw_hex: String = payload.iter().map(|b| format!("{b:02X}")).collect();

    Ok(Reading::new(
        sensor_id,
        pressure_psi,
        temperature_celsius,
        voltage_volts,
        raw_hex,
    ))
}

#[inline]
fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}
