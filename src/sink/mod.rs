//! Sinks that consume readings on behalf of the acquisition controller.
//!
//! Sinks are injected into the controller once and stay registered for its
//! lifetime. The dispatcher hands every reading to them in a fixed order:
//! visual code, persistence, log, status. A failing sink is reported as a
//! [`StatusEvent::SinkFailed`] and never stops acquisition.

pub mod csv_log;
pub mod status;
pub mod store;
pub mod visual;

use crate::channel::StatusEvent;
use crate::config::SinkConfig;
use crate::reading::Reading;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

pub use csv_log::CsvLog;
pub use status::TracingStatus;
pub use store::JsonLinesStore;
pub use visual::CodePayloadWriter;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Durable storage for readings.
pub trait PersistenceSink: Send + Sync {
    /// Store `reading` together with the artifact produced for it, if any.
    fn store(&self, reading: &Reading, code_path: Option<&Path>) -> Result<(), SinkError>;
}

/// Produces a scannable artifact for a reading and returns where it lives.
pub trait VisualCodeSink: Send + Sync {
    fn render(&self, reading: &Reading, config: &SinkConfig) -> Result<PathBuf, SinkError>;
}

/// Append-only human-readable log.
pub trait LogSink: Send + Sync {
    fn append(&self, reading: &Reading) -> Result<(), SinkError>;
}

/// Presentation of lifecycle notices and reading summaries. Infallible.
pub trait StatusSink: Send + Sync {
    fn status(&self, event: &StatusEvent);

    fn reading(&self, reading: &Reading, code_path: Option<&Path>);
}

/// The fixed set of sinks a controller dispatches to.
#[derive(Clone)]
pub struct Sinks {
    visual: Option<Arc<dyn VisualCodeSink>>,
    persistence: Option<Arc<dyn PersistenceSink>>,
    log: Option<Arc<dyn LogSink>>,
    status: Arc<dyn StatusSink>,
}

impl Default for Sinks {
    fn default() -> Self {
        Self::new(Arc::new(TracingStatus))
    }
}

impl Sinks {
    pub fn new(status: Arc<dyn StatusSink>) -> Self {
        Self {
            visual: None,
            persistence: None,
            log: None,
            status,
        }
    }

    pub fn with_visual(mut self, sink: Arc<dyn VisualCodeSink>) -> Self {
        self.visual = Some(sink);
        self
    }

    pub fn with_persistence(mut self, sink: Arc<dyn PersistenceSink>) -> Self {
        self.persistence = Some(sink);
        self
    }

    pub fn with_log(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.log = Some(sink);
        self
    }

    pub fn status(&self, event: &StatusEvent) {
        self.status.status(event);
    }

    /// Hand one reading to every applicable sink and return the artifact
    /// produced for it.
    pub fn deliver(&self, reading: &Reading, config: &SinkConfig) -> Option<PathBuf> {
        let code_path = self.visual.as_ref().and_then(|visual| {
            visual
                .render(reading, config)
                .map_err(|e| self.sink_failed("visual code", &e))
                .ok()
        });

        if config.persistence_enabled
            && let Some(persistence) = &self.persistence
            && let Err(e) = persistence.store(reading, code_path.as_deref())
        {
            self.sink_failed("persistence", &e);
        }

        if config.log_enabled
            && let Some(log) = &self.log
            && let Err(e) = log.append(reading)
        {
            self.sink_failed("log", &e);
        }

        self.status.reading(reading, code_path.as_deref());
        code_path
    }

    fn sink_failed(&self, sink: &'static str, error: &SinkError) {
        warn!(sink, %error, "sink failed");
        self.status.status(&StatusEvent::SinkFailed {
            sink,
            reason: error.to_string(),
        });
    }
}
