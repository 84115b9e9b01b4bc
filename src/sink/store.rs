//! Persistence sink backed by a JSON-lines file.
//!
//! Each stored reading becomes one JSON object per line, carrying the
//! decoded values, the capture time and the visual-code artifact path.

use crate::reading::Reading;
use crate::sink::{PersistenceSink, SinkError};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::info;

pub const DEFAULT_STORE_PATH: &str = "sensor_readings.jsonl";

#[derive(Serialize)]
struct StoredReading<'a> {
    #[serde(flatten)]
    reading: &'a Reading,
    code_path: Option<&'a Path>,
}

/// Appends readings to a JSON-lines file.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesStore {
    /// Open (or create) the store at `path`. Parent directories are created
    /// as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), "reading store ready");

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceSink for JsonLinesStore {
    fn store(&self, reading: &Reading, code_path: Option<&Path>) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&StoredReading { reading, code_path })?;
        line.push(b'\n');

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}
