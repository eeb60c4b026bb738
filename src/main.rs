//! # LoRa Uplink
//!
//! Periodic temperature telemetry over LoRaWAN.
//!
//! Samples a temperature sensor, encodes the reading as Cayenne LPP and
//! sends it through a LoRaWAN stack every uplink interval, backing off when
//! the stack reports a duty-cycle restriction.

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use lora_uplink::config::{Config, LoggingConfig};
use lora_uplink::dispatch::EventQueue;
use lora_uplink::telemetry::{spawn_writer, EventJournal};
use lora_uplink::uplink::{UplinkScheduler, UplinkSettings};
use lora_uplink::{link, sensor};

/// Configuration file used when no path is given on the command line
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// How long to wait for the stack to confirm a disconnect after Ctrl+C
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// File name prefix for the daily-rolling log file
const LOG_FILE_PREFIX: &str = "lora-uplink.log";

/// Main entry point for LoRa Uplink
///
/// # Control Flow
///
/// 1. **Initialization**
///    - Load configuration (first argument, or `config/default.toml`)
///    - Set up logging with tracing subscriber
///    - Open the configured LoRaWAN stack and temperature sensor
///    - Initialize the stack and start joining the network
///
/// 2. **Main Loop**
///    - Dispatch stack events and send timers until the stack disconnects
///
/// 3. **Graceful Shutdown**
///    - On Ctrl+C, ask the stack to disconnect and keep dispatching until it
///      confirms (or the shutdown timeout passes)
///    - Flush the status journal
///
/// # Errors
///
/// Returns error if:
/// - The configuration cannot be loaded or is invalid
/// - The stack cannot be opened (e.g. no modem found)
/// - Any stack setup step or the connect request is rejected
///
/// # Examples
///
/// Run the application:
/// ```bash
/// cargo run --release -- config/default.toml
/// ```
///
/// Expected output:
/// ```text
/// INFO lora_uplink: LoRa Uplink v0.1.0 starting...
/// INFO lora_uplink::uplink::scheduler: LoRaWAN stack initialized
/// INFO lora_uplink::uplink::scheduler: Connection - In Progress ...
/// INFO lora_uplink::uplink::scheduler: Connection - Successful
/// INFO lora_uplink::uplink::scheduler: 4 bytes scheduled for transmission
/// ```
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    let _log_guard = init_logging(&config.logging);

    info!("LoRa Uplink v{} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Device identity: {:?}", config.device);

    let stack = link::open_stack(&config.stack).context("Failed to open LoRaWAN stack")?;
    let sensor = sensor::from_config(&config.sensor);
    let mut scheduler = UplinkScheduler::new(stack, sensor, UplinkSettings::from_config(&config));

    let journal_thread = if config.journal.enabled {
        let journal = EventJournal::open(
            &config.journal.dir,
            config.journal.max_records_per_file,
            config.journal.max_files_to_keep,
        )
        .context("Failed to open status journal")?;

        let (tx, rx) = mpsc::unbounded_channel();
        scheduler = scheduler.with_observer(tx);
        Some(spawn_writer(journal, rx))
    } else {
        None
    };

    let mut queue = EventQueue::new();
    scheduler
        .start(&mut queue)
        .context("LoRaWAN startup failed")?;

    info!("Press Ctrl+C to exit");

    let interrupted = tokio::select! {
        _ = queue.dispatch_forever(&mut scheduler) => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        info!("Received Ctrl+C, shutting down...");
        match scheduler.disconnect() {
            Ok(()) => {
                let drained =
                    time::timeout(SHUTDOWN_TIMEOUT, queue.dispatch_forever(&mut scheduler)).await;
                if drained.is_err() {
                    warn!("No disconnect confirmation within {:?}", SHUTDOWN_TIMEOUT);
                }
            }
            Err(status) => warn!("Disconnect request failed: {}", status),
        }
    }

    info!("Stopped in state {:?}", scheduler.state());

    // Dropping the scheduler closes the observer channel
    drop(scheduler);
    if let Some(handle) = journal_thread {
        if handle.join().is_err() {
            warn!("Status journal writer panicked");
        }
    }

    Ok(())
}

/// Install the tracing subscriber
///
/// `RUST_LOG` directives are combined with the configured level. When a log
/// directory is configured, a daily-rolling file receives a copy of the
/// output; the returned guard must live until exit to flush it.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let level: tracing::Level = config.level.parse().unwrap_or(tracing::Level::INFO);
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let stdout = tracing_subscriber::fmt::layer();

    if config.file_dir.is_empty() {
        tracing_subscriber::registry().with(filter).with(stdout).init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.file_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .init();
    Some(guard)
}
