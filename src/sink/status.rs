//! Status sink that reports through `tracing`.

use crate::channel::StatusEvent;
use crate::output::{OutputFormatter, TextFormatter};
use crate::reading::Reading;
use crate::sink::StatusSink;
use std::path::Path;
use tracing::{info, warn};

/// Logs status events and reading summaries. Failures go out at `warn`,
/// everything else at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatus;

impl StatusSink for TracingStatus {
    fn status(&self, event: &StatusEvent) {
        if event.is_failure() {
            warn!("{event}");
        } else {
            info!("{event}");
        }
    }

    fn reading(&self, reading: &Reading, code_path: Option<&Path>) {
        let summary = TextFormatter::new().format(reading);
        match code_path {
            Some(path) => info!(code = %path.display(), "{summary}"),
            None => info!("{summary}"),
        }
    }
}
