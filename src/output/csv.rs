//! CSV lines for the append-only reading log.

use crate::output::{OutputFormatter, decimal};
use crate::reading::Reading;

/// First line of every log file.
pub const CSV_HEADER: &str =
    "Timestamp,Sensor ID,Pressure (PSI),Temperature (°C),Voltage (V),Raw Data";

/// `Timestamp,Sensor ID,Pressure (PSI),Temperature (°C),Voltage (V),Raw Data`
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvFormatter;

impl CsvFormatter {
    pub fn new() -> Self {
        Self
    }

    pub fn header(&self) -> &'static str {
        CSV_HEADER
    }
}

impl OutputFormatter for CsvFormatter {
    fn format(&self, reading: &Reading) -> String {
        // Every field is numeric, hex or a fixed-format timestamp, so no
        // quoting is needed.
        format!(
            "{},{},{},{},{},{}",
            reading.timestamp(),
            reading.sensor_id(),
            decimal(reading.pressure_psi()),
            reading.temperature_celsius(),
            decimal(reading.voltage_volts()),
            reading.raw_hex(),
        )
    }
}
