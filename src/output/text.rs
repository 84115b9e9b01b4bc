//! One-line human-readable reading summary.

use crate::output::{OutputFormatter, decimal};
use crate::reading::Reading;

/// `Sensor ID: 1234, Pressure: 188.05 PSI, Temp: 48°C, Volt: 3.0V`
#[derive(Debug, Default, Clone, Copy)]
pub struct TextFormatter;

impl TextFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl OutputFormatter for TextFormatter {
    fn format(&self, reading: &Reading) -> String {
        format!(
            "Sensor ID: {}, Pressure: {} PSI, Temp: {}°C, Volt: {}V",
            reading.sensor_id(),
            decimal(reading.pressure_psi()),
            reading.temperature_celsius(),
            decimal(reading.voltage_volts()),
        )
    }
}
