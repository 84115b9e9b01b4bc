//! Core application runner for `tyremate-listener`.
//!
//! Kept apart from process setup (logging, signals, exit codes) so a whole
//! run can be driven in tests with a scripted transport and an in-memory
//! output stream.

use crate::channel::PipelineEvent;
use crate::config::{ConfigError, DEFAULT_CONFIG_PATH, SinkConfig, parse_duration};
use crate::controller::{AcquisitionController, StopReport};
use crate::link::{DEFAULT_TARGET_NAME, LinkConfig, RetryPolicy};
use crate::output::{OutputFormatter, TextFormatter};
use crate::sink::csv_log::DEFAULT_LOG_PATH;
use crate::sink::store::DEFAULT_STORE_PATH;
use crate::sink::visual::DEFAULT_CODES_DIR;
use crate::sink::{CodePayloadWriter, CsvLog, JsonLinesStore, SinkError, Sinks, TracingStatus};
use crate::transport::{Transport, TransportError};
use clap::Parser;
use std::future::Future;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Command-line options.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Sink configuration file (JSON). Defaults apply when it is missing.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Advertised name of the sensor to connect to
    #[arg(long, default_value = DEFAULT_TARGET_NAME)]
    pub target_name: String,

    /// How long each discovery round listens.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub discovery_timeout: Duration,

    /// Wait between attempts after a miss, failure or drop
    #[arg(long, default_value = "2s", value_parser = parse_duration)]
    pub retry_delay: Duration,

    /// Double the retry delay on consecutive failures, up to this value
    #[arg(long, value_parser = parse_duration)]
    pub max_retry_delay: Option<Duration>,

    /// Upper bound on the disconnect when stopping
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub teardown_timeout: Duration,

    /// JSON-lines file readings are persisted to
    #[arg(long, default_value = DEFAULT_STORE_PATH)]
    pub store: PathBuf,

    /// CSV log file, used when logging is enabled in the configuration
    #[arg(long, default_value = DEFAULT_LOG_PATH)]
    pub log_file: PathBuf,

    /// Directory for visual-code payload files
    #[arg(long, default_value = DEFAULT_CODES_DIR)]
    pub codes_dir: PathBuf,

    /// Verbose output, log every notification and link step
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Options {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            target_name: self.target_name.clone(),
            discovery_timeout: self.discovery_timeout,
            teardown_timeout: self.teardown_timeout,
            ..LinkConfig::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        match self.max_retry_delay {
            Some(max) => RetryPolicy::Backoff {
                initial: self.retry_delay,
                max: max.max(self.retry_delay),
            },
            None if self.retry_delay.is_zero() => RetryPolicy::Immediate,
            None => RetryPolicy::Fixed(self.retry_delay),
        }
    }
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to open sink: {0}")]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Build the sink set for `config`. Persistence and log files are only
/// opened when enabled.
pub fn build_sinks(options: &Options, config: &SinkConfig) -> Result<Sinks, SinkError> {
    let mut sinks = Sinks::new(Arc::new(TracingStatus))
        .with_visual(Arc::new(CodePayloadWriter::new(&options.codes_dir)));

    if config.persistence_enabled {
        sinks = sinks.with_persistence(Arc::new(JsonLinesStore::open(&options.store)?));
    }
    if config.log_enabled {
        sinks = sinks.with_log(Arc::new(CsvLog::open(&options.log_file)?));
    }
    Ok(sinks)
}

fn write_reading(
    formatter: &dyn OutputFormatter,
    event: &PipelineEvent,
    out: &mut dyn Write,
) -> io::Result<()> {
    match event {
        PipelineEvent::Reading(reading) => writeln!(out, "{}", formatter.format(reading)),
        PipelineEvent::Status(_) => Ok(()),
    }
}

async fn print_until_shutdown(
    events: &mut mpsc::UnboundedReceiver<PipelineEvent>,
    shutdown: impl Future<Output = ()>,
    formatter: &dyn OutputFormatter,
    out: &mut dyn Write,
) -> io::Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => return Ok(()),
            Some(event) = events.recv() => write_reading(formatter, &event, out)?,
        }
    }
}

/// Run acquisition until `shutdown` resolves, writing one summary line per
/// reading to `out`.
///
/// Status and diagnostics go through `tracing`, never to `out`. Returns the
/// report of the finished run.
pub async fn run_with_io(
    options: Options,
    transport: Arc<dyn Transport>,
    shutdown: impl Future<Output = ()>,
    out: &mut dyn Write,
) -> Result<Option<StopReport>, RunError> {
    let config = SinkConfig::load(&options.config)?;
    let sinks = build_sinks(&options, &config)?;
    let formatter = TextFormatter::new();

    let mut controller = AcquisitionController::new(
        config,
        options.link_config(),
        options.retry_policy(),
        transport,
        sinks,
    );
    let mut events = controller.subscribe();
    controller.start();

    let printed = print_until_shutdown(&mut events, shutdown, &formatter, out).await;
    let report = controller.stop().await;
    printed?;

    // Readings decoded while the run was winding down.
    while let Ok(event) = events.try_recv() {
        write_reading(&formatter, &event, out)?;
    }
    out.flush()?;

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkPhase;
    use crate::test_utils::{FakeTransport, payload_with_sensor, target_device};
    use std::path::Path;
    use tokio::sync::oneshot;

    fn options(dir: &Path, extra: &[&str]) -> Options {
        let dir = dir.to_str().unwrap();
        let mut args = vec![
            "tyremate-listener".to_string(),
            format!("--config={dir}/config.json"),
            format!("--store={dir}/readings.jsonl"),
            format!("--log-file={dir}/log.txt"),
            format!("--codes-dir={dir}/codes"),
            "--retry-delay=0".to_string(),
        ];
        args.extend(extra.iter().map(|s| s.to_string()));
        Options::parse_from(args)
    }

    /// Wait for the link to subscribe, send `payloads`, then request shutdown.
    async fn drive(fake: Arc<FakeTransport>, payloads: Vec<Vec<u8>>, shutdown: oneshot::Sender<()>) {
        while fake.subscriptions().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        for payload in payloads {
            fake.notify(payload);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = shutdown.send(());
    }

    async fn run_session(
        options: Options,
        payloads: Vec<Vec<u8>>,
    ) -> (Result<Option<StopReport>, RunError>, String) {
        let fake = Arc::new(FakeTransport::new());
        fake.script_discoveries([Some(target_device())]);
        let (tx, rx) = oneshot::channel();
        let shutdown = async {
            let _ = rx.await;
        };

        let mut out = Vec::<u8>::new();
        let (result, ()) = tokio::join!(
            run_with_io(options, fake.clone() as Arc<dyn Transport>, shutdown, &mut out),
            drive(fake.clone(), payloads, tx),
        );
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn cli_defaults() {
        let options = Options::parse_from(["tyremate-listener"]);
        assert_eq!(options.config, PathBuf::from("config.json"));
        assert_eq!(options.link_config(), LinkConfig::default());
        assert_eq!(
            options.retry_policy(),
            RetryPolicy::Fixed(Duration::from_secs(2))
        );
        assert!(!options.verbose);
    }

    #[test]
    fn max_retry_delay_enables_backoff() {
        let options = Options::parse_from([
            "tyremate-listener",
            "--retry-delay",
            "500ms",
            "--max-retry-delay",
            "1m",
            "--target-name",
            "TPMS-7",
            "--discovery-timeout",
            "10",
        ]);
        assert_eq!(
            options.retry_policy(),
            RetryPolicy::Backoff {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(60),
            }
        );
        let link = options.link_config();
        assert_eq!(link.target_name, "TPMS-7");
        assert_eq!(link.discovery_timeout, Duration::from_secs(10));
    }

    #[test]
    fn bad_duration_is_rejected() {
        let result = Options::try_parse_from(["tyremate-listener", "--retry-delay", "soon"]);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn run_prints_readings_and_persists_them() {
        let dir = tempfile::tempdir().unwrap();
        let (result, out) = run_session(
            options(dir.path(), &[]),
            vec![payload_with_sensor(0x0001), payload_with_sensor(0x0002)],
        )
        .await;

        let report = result.unwrap().unwrap();
        assert_eq!(report.readings, 2);
        assert_eq!(report.final_state.phase, LinkPhase::Stopped);

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            [
                "Sensor ID: 0001, Pressure: 188.05 PSI, Temp: 48°C, Volt: 3.0V",
                "Sensor ID: 0002, Pressure: 188.05 PSI, Temp: 48°C, Volt: 3.0V",
            ]
        );

        let stored = std::fs::read_to_string(dir.path().join("readings.jsonl")).unwrap();
        assert_eq!(stored.lines().count(), 2);

        let artifact = report.last_artifact.unwrap();
        assert!(artifact.starts_with(dir.path().join("codes")));
        assert_eq!(std::fs::read_to_string(artifact).unwrap(), "0002");

        // Logging is off by default.
        assert!(!dir.path().join("log.txt").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn config_file_switches_sinks() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "persistence_enabled": false, "log_enabled": true, "fields": { "pressure": true } }"#,
        )
        .unwrap();

        let (result, _) = run_session(options(dir.path(), &[]), vec![payload_with_sensor(0x00AA)]).await;
        let report = result.unwrap().unwrap();

        assert!(!dir.path().join("readings.jsonl").exists());
        let log = std::fs::read_to_string(dir.path().join("log.txt")).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.lines().nth(1).unwrap().contains(",00AA,188.05,48,3.0,"));
        assert_eq!(
            std::fs::read_to_string(report.last_artifact.unwrap()).unwrap(),
            "00AA|188.05"
        );
    }

    #[tokio::test]
    async fn invalid_config_fails_before_scanning() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "not json").unwrap();
        let fake = Arc::new(FakeTransport::new());

        let mut out = Vec::<u8>::new();
        let result = run_with_io(
            options(dir.path(), &[]),
            fake.clone() as Arc<dyn Transport>,
            std::future::ready(()),
            &mut out,
        )
        .await;

        assert!(matches!(result, Err(RunError::Config(ConfigError::Parse { .. }))));
        assert_eq!(fake.discoveries(), 0);
        assert!(out.is_empty());
    }
}
