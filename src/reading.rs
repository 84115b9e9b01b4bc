//! Decoded Tyremate sensor reading.

use chrono::{DateTime, Local};
use serde::Serialize;

/// Wall-clock format used by the log and code sinks.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One decoded tyre sensor measurement.
///
/// Readings only come out of [`crate::decoder::decode`], which refuses
/// frames shorter than [`crate::decoder::MIN_FRAME_LEN`]. Units:
/// - Pressure in PSI (gauge), rounded to 2 decimals
/// - Temperature in whole degrees Celsius
/// - Battery voltage in Volts, rounded to 3 decimals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    sensor_id: String,
    pressure_psi: f64,
    temperature_celsius: i16,
    voltage_volts: f64,
    raw_hex: String,
    captured_at: DateTime<Local>,
}

impl Reading {
    pub(crate) fn new(
        sensor_id: String,
        pressure_psi: f64,
        temperature_celsius: i16,
        voltage_volts: f64,
        raw_hex: String,
    ) -> Self {
        Self {
            sensor_id,
            pressure_psi,
            temperature_celsius,
            voltage_volts,
            raw_hex,
            captured_at: Local::now(),
        }
    }

    /// Four uppercase hex digits taken from frame bytes 1 and 2.
    pub fn sensor_id(&self) -> &str {
        &self.sensor_id
    }

    pub fn pressure_psi(&self) -> f64 {
        self.pressure_psi
    }

    pub fn temperature_celsius(&self) -> i16 {
        self.temperature_celsius
    }

    pub fn voltage_volts(&self) -> f64 {
        self.voltage_volts
    }

    /// The whole notification payload as uppercase hex.
    pub fn raw_hex(&self) -> &str {
        &self.raw_hex
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    /// `captured_at` rendered with [`TIMESTAMP_FORMAT`].
    pub fn timestamp(&self) -> String {
        self.captured_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Compare every decoded value, ignoring when the reading was captured.
    pub fn same_measurement(&self, other: &Reading) -> bool {
        self.sensor_id == other.sensor_id
            && self.pressure_psi.to_bits() == other.pressure_psi.to_bits()
            && self.temperature_celsius == other.temperature_celsius
            && self.voltage_volts.to_bits() == other.voltage_volts.to_bits()
            && self.raw_hex == other.raw_hex
    }
}
