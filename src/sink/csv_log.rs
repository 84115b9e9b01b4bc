//! Append-only CSV log of every reading.

use crate::output::{CsvFormatter, OutputFormatter};
use crate::reading::Reading;
use crate::sink::{LogSink, SinkError};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::info;

pub const DEFAULT_LOG_PATH: &str = "tyremate_log.txt";

/// CSV log file. The header is written once, when the file is created.
#[derive(Debug)]
pub struct CsvLog {
    path: PathBuf,
    formatter: CsvFormatter,
    file: Mutex<File>,
}

impl CsvLog {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        let formatter = CsvFormatter::new();

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", formatter.header())?;
            info!(path = %path.display(), "created reading log");
        } else {
            info!(path = %path.display(), "appending to existing reading log");
        }

        Ok(Self {
            path,
            formatter,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for CsvLog {
    fn append(&self, reading: &Reading) -> Result<(), SinkError> {
        let line = self.formatter.format(reading);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(file, "{line}")?;
        Ok(())
    }
}
