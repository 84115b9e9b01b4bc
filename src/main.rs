use clap::Parser;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tyremate_listener::app::{Options, RunError, run_with_io};
use tyremate_listener::transport::Transport;
use tyremate_listener::transport::bluer::BluerTransport;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Send diagnostics to stderr; stdout carries reading lines only.
///
/// `RUST_LOG` wins when set, otherwise `info` (or `debug` with `-v`).
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
        // Without a signal handler there is nothing to wait for.
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn run(options: Options) -> Result<(), RunError> {
    let transport: Arc<dyn Transport> = Arc::new(BluerTransport::new().await?);
    let mut stdout = std::io::stdout();

    if let Some(report) = run_with_io(options, transport, shutdown_signal(), &mut stdout).await? {
        info!(
            readings = report.readings,
            phase = %report.final_state.phase,
            last_code = ?report.last_artifact,
            "run finished"
        );
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
