//! Visual-code sink.
//!
//! The code payload is the sensor id followed by the enabled fields, joined
//! with the configured separator. [`CodePayloadWriter`] stores it as a text
//! artifact that any code generator or label printer can pick up; one file
//! per sensor per day, overwritten by each new reading.

use crate::config::{Field, SinkConfig};
use crate::output::decimal;
use crate::reading::Reading;
use crate::sink::{SinkError, VisualCodeSink};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CODES_DIR: &str = "qr_codes";

/// Build the code payload for `reading`.
pub fn compose_payload(reading: &Reading, config: &SinkConfig) -> String {
    let mut values = vec![reading.sensor_id().to_string()];
    values.extend(config.fields.iter().map(|field| match field {
        Field::Pressure => decimal(reading.pressure_psi()),
        Field::Temperature => reading.temperature_celsius().to_string(),
        Field::Battery => decimal(reading.voltage_volts()),
        Field::Datetime => reading.timestamp(),
        Field::Raw => reading.raw_hex().to_string(),
    }));
    values.join(&config.separator)
}

/// Writes code payloads to `<dir>/sensor_<ID>_<DDMMYYYY>.txt`.
#[derive(Debug, Clone)]
pub struct CodePayloadWriter {
    dir: PathBuf,
}

impl CodePayloadWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn artifact_path(&self, reading: &Reading) -> PathBuf {
        let day = reading.captured_at().format("%d%m%Y");
        self.dir
            .join(format!("sensor_{}_{day}.txt", reading.sensor_id()))
    }
}

impl VisualCodeSink for CodePayloadWriter {
    fn render(&self, reading: &Reading, config: &SinkConfig) -> Result<PathBuf, SinkError> {
        let payload = compose_payload(reading, config);
        std::fs::create_dir_all(&self.dir)?;

        let path = self.artifact_path(reading);
        std::fs::write(&path, &payload)?;
        debug!(path = %path.display(), %payload, "code payload written");
        Ok(path)
    }
}
