//! Field syncer binary.
//!
//! Invoked by the device supervisor when a flight controller enumerates on
//! USB. Runs exactly one sync and exits: `0` for a completed sync or an
//! empty flash, a distinct non-zero code per failure kind otherwise.
//!
//! ```bash
//! # One sync against an explicit port, leaving the FC flash intact
//! fieldsync-agent --port /dev/ttyACM0 --dry-run
//!
//! # Normal service invocation
//! fieldsync-agent --config /etc/fieldsync/agent.toml
//! ```

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use fieldsync_agent::{NullLed, Orchestrator, SyncError, backend_for, run_signal_task};
use fieldsync_client::SerialTransport;
use fieldsync_core::{AgentConfig, SessionStore};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Exit code for configuration problems, before a sync even starts.
const EXIT_CONFIG: u8 = 2;

/// Blackbox flash syncer for Betaflight flight controllers
#[derive(Parser, Debug)]
#[command(name = "fieldsync-agent")]
#[command(about = "Download, verify, and erase FC blackbox flash")]
#[command(version)]
struct Args {
    /// Serial port of the attached FC (overrides the config file)
    #[arg(short, long)]
    port: Option<String>,

    /// Path to the agent configuration file
    #[arg(short, long, default_value = "/etc/fieldsync/agent.toml")]
    config: PathBuf,

    /// Copy and verify but do not erase the FC flash
    #[arg(long)]
    dry_run: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(message) => {
            tracing::error!(%message, "configuration error");
            return ExitCode::from(EXIT_CONFIG);
        },
    };

    let Some(port) = args.port.clone().or_else(|| config.serial.port.clone()) else {
        tracing::error!("no serial port: pass --port or set serial.port in the config");
        return ExitCode::from(EXIT_CONFIG);
    };

    let transport = match SerialTransport::open(&port, config.serial.baud) {
        Ok(transport) => transport,
        Err(error) => {
            let error = SyncError::from(error);
            tracing::error!(%error, "cannot open flight controller link");
            return ExitCode::from(error.exit_code());
        },
    };

    let backend = match backend_for(&config.led) {
        Ok(backend) => backend,
        Err(error) => {
            tracing::warn!(%error, "indicator unavailable, continuing dark");
            Box::new(NullLed)
        },
    };

    let store = SessionStore::new(&config.storage_path);
    let (orchestrator, events, cancel) =
        Orchestrator::new(transport, store, config, args.dry_run);

    let signal_task = tokio::spawn(run_signal_task(events, backend));

    // A supervisor stop (or an operator ^C) becomes a clean cancel: the file
    // on disk is retained and the manifest records what happened.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling sync");
            cancel.cancel();
        }
    });

    let result = orchestrator.run().await;
    // The orchestrator dropped its event sender; let the light finish.
    let _ = signal_task.await;

    match result {
        Ok(outcome) => {
            tracing::debug!(?outcome, "exiting clean");
            ExitCode::SUCCESS
        },
        Err(error) => ExitCode::from(error.exit_code()),
    }
}

/// Load the TOML config; a missing file yields the defaults.
fn load_config(args: &Args) -> Result<AgentConfig, String> {
    match std::fs::read_to_string(&args.config) {
        Ok(text) => toml::from_str(&text)
            .map_err(|e| format!("parsing {}: {e}", args.config.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %args.config.display(), "no config file, using defaults");
            Ok(AgentConfig::default())
        },
        Err(e) => Err(format!("reading {}: {e}", args.config.display())),
    }
}
