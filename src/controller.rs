//! Acquisition controller: owns one pipeline run at a time.
//!
//! A run is two tasks. The link task drives the connection state machine and
//! publishes onto the reading channel; the dispatcher task consumes the
//! channel and feeds the sinks. `start` and `stop` are idempotent.

use crate::channel::{PipelineEvent, ReadingChannel, StatusEvent};
use crate::config::SinkConfig;
use crate::link::{ConnectionStateMachine, LinkConfig, LinkState, RetryPolicy};
use crate::sink::Sinks;
use crate::transport::Transport;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Extra time the link task gets beyond its own teardown bound before it is
/// aborted.
pub const STOP_GRACE: Duration = Duration::from_secs(1);

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct StopReport {
    pub final_state: LinkState,
    /// Readings dispatched to the sinks during the run
    pub readings: u64,
    /// Artifact produced for the most recent reading
    pub last_artifact: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct DispatchSummary {
    readings: u64,
    last_artifact: Option<PathBuf>,
}

/// Handles of one live run. Dropping it ends the run: the link is told to
/// stop and the dispatcher gets its `ScanStopped` marker, even when `stop`
/// never got that far.
struct ActiveRun {
    id: u64,
    stop: watch::Sender<bool>,
    link: JoinHandle<LinkState>,
    dispatcher: JoinHandle<DispatchSummary>,
    channel: ReadingChannel,
    finished: bool,
}

impl ActiveRun {
    fn request_stop(&self) {
        // The link task may already have exited, in which case nobody listens.
        let _ = self.stop.send(true);
    }

    /// Publish this run's closing marker, once.
    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.channel
                .publish_status(StatusEvent::ScanStopped { run: self.id });
        }
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.request_stop();
        if !self.finished {
            warn!(run = self.id, "run abandoned before stop completed");
            self.finish();
        }
    }
}

/// Starts and stops acquisition runs against one transport and one set of
/// sinks.
pub struct AcquisitionController {
    sink_config: Arc<SinkConfig>,
    link_config: LinkConfig,
    retry: RetryPolicy,
    transport: Arc<dyn Transport>,
    sinks: Arc<Sinks>,
    channel: ReadingChannel,
    runs: u64,
    run: Option<ActiveRun>,
}

impl AcquisitionController {
    pub fn new(
        sink_config: SinkConfig,
        link_config: LinkConfig,
        retry: RetryPolicy,
        transport: Arc<dyn Transport>,
        sinks: Sinks,
    ) -> Self {
        Self {
            sink_config: Arc::new(sink_config),
            link_config,
            retry,
            transport,
            sinks: Arc::new(sinks),
            channel: ReadingChannel::new(),
            runs: 0,
            run: None,
        }
    }

    /// Register an external consumer of readings and status events.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PipelineEvent> {
        self.channel.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.run.is_some()
    }

    /// Start a run. Returns `false` and does nothing if one is active.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) -> bool {
        if self.run.is_some() {
            debug!("start ignored, already running");
            return false;
        }
        self.runs += 1;
        let id = self.runs;

        // Subscribe before publishing so the dispatcher sees ScanStarted.
        let events = self.channel.subscribe();
        self.channel
            .publish_status(StatusEvent::ScanStarted { run: id });
        info!(run = id, target = %self.link_config.target_name, "acquisition started");

        let dispatcher = tokio::spawn(dispatch(
            id,
            events,
            Arc::clone(&self.sinks),
            Arc::clone(&self.sink_config),
        ));

        let (stop, stop_rx) = watch::channel(false);
        let machine = ConnectionStateMachine::new(
            Arc::clone(&self.transport),
            self.link_config.clone(),
            self.retry,
            self.channel.clone(),
        );
        let link = tokio::spawn(machine.run(stop_rx));

        self.run = Some(ActiveRun {
            id,
            stop,
            link,
            dispatcher,
            channel: self.channel.clone(),
            finished: false,
        });
        true
    }

    /// Stop the active run and wait for it to wind down. Returns `None` if
    /// nothing was running.
    ///
    /// The link task gets the teardown timeout plus [`STOP_GRACE`] to reach
    /// Stopped; after that it is aborted. Every event published during the
    /// run is dispatched before this returns. If the returned future is
    /// dropped early the run still ends; only the report is lost.
    pub async fn stop(&mut self) -> Option<StopReport> {
        let mut run = self.run.take()?;
        run.request_stop();

        let bound = self.link_config.teardown_timeout + STOP_GRACE;
        let final_state = match tokio::time::timeout(bound, &mut run.link).await {
            Ok(Ok(state)) => state,
            Ok(Err(e)) => {
                warn!(error = %e, panicked = e.is_panic(), "link task failed");
                LinkState::stopped()
            }
            Err(_) => {
                warn!(?bound, "link task did not stop in time, aborting");
                run.link.abort();
                LinkState::stopped()
            }
        };

        run.finish();

        let summary = (&mut run.dispatcher).await.unwrap_or_else(|e| {
            warn!(error = %e, panicked = e.is_panic(), "dispatcher task failed");
            DispatchSummary::default()
        });
        info!(run = run.id, readings = summary.readings, "acquisition stopped");

        Some(StopReport {
            final_state,
            readings: summary.readings,
            last_artifact: summary.last_artifact,
        })
    }
}

/// Run `f`, turning a panic into `None` so one faulty sink cannot end
/// delivery for the rest of the run.
fn guarded<T>(what: &str, f: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            error!(what, "sink panicked");
            None
        }
    }
}

/// Feed sinks with the events of run `run`, from its `ScanStarted` up to its
/// `ScanStopped`. Anything queued before `ScanStarted` belongs to an earlier
/// run and is skipped.
async fn dispatch(
    run: u64,
    mut events: mpsc::UnboundedReceiver<PipelineEvent>,
    sinks: Arc<Sinks>,
    config: Arc<SinkConfig>,
) -> DispatchSummary {
    let mut summary = DispatchSummary::default();
    let mut started = false;
    let mut stale = 0usize;

    while let Some(event) = events.recv().await {
        if !started {
            started = matches!(
                event,
                PipelineEvent::Status(StatusEvent::ScanStarted { run: id }) if id == run
            );
            if !started {
                stale += 1;
                continue;
            }
            if stale > 0 {
                debug!(run, stale, "skipped events left over from earlier runs");
            }
        }

        match event {
            PipelineEvent::Reading(reading) => {
                summary.readings += 1;
                summary.last_artifact =
                    guarded("reading", || sinks.deliver(&reading, &config)).flatten();
            }
            PipelineEvent::Status(status) => {
                guarded("status", || sinks.status(&status));
                if status == (StatusEvent::ScanStopped { run }) {
                    break;
                }
            }
        }
    }
    summary
}
