//! # Sensor Bridge
//!
//! Reads telemetry blocks from a sensor board over serial and uploads each
//! parsed snapshot to an object store, queueing uploads on disk while the
//! uplink is down.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Load configuration and set up logging
//!    - Restore the offline queue from disk
//!
//! 2. **Tasks**
//!    - Ingestion: serial lines → blocks → snapshots → cache + fast-path upload
//!    - Retry loop: drain the offline queue in small batches
//!    - Periodic save of the offline queue
//!    - Periodic status report
//!    - HTTP endpoint serving status and the latest snapshot
//!
//! 3. **Graceful Shutdown**
//!    - Ctrl+C aborts the tasks
//!    - The offline queue is saved on the way out
//!
//! # Examples
//!
//! ```bash
//! sensor-bridge --config config/default.toml route_42
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sensor_bridge::cache::LatestState;
use sensor_bridge::config::{Config, LoggingConfig};
use sensor_bridge::dispatch::{Dispatcher, RetryPolicy};
use sensor_bridge::http::{run_http_server, ApiState};
use sensor_bridge::ingest::Ingestor;
use sensor_bridge::queue::{run_periodic_save, OfflineQueue};
use sensor_bridge::serial::SensorSerial;
use sensor_bridge::status::run_status_reporter;
use sensor_bridge::upload::{DeadLetterLog, DirectoryStore, Uploader};

/// Base name of the rolling log files
const LOG_FILE_PREFIX: &str = "sensor-bridge.log";

#[derive(Parser, Debug)]
#[command(name = "sensor-bridge")]
#[command(about = "Serial sensor telemetry to object store bridge", long_about = None)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "config/default.toml")]
    config: String,

    /// Bus type or trip identifier used in object keys
    #[arg(value_name = "BUS_TYPE")]
    bus_type: Option<String>,
}

/// Load the configuration file, falling back to defaults when it is missing
fn load_config(args: &Args) -> Result<Config> {
    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::load(&args.config).with_context(|| format!("Failed to load {}", args.config))?
    } else {
        eprintln!("Config file {} not found, using defaults", args.config);
        Config::default()
    };

    if let Some(bus_type) = &args.bus_type {
        config.upload.bus_type = bus_type.clone();
    }
    config.validate().context("Invalid configuration")?;

    Ok(config)
}

/// Install the tracing subscriber
///
/// `RUST_LOG` overrides the configured level. The returned guard must be kept
/// alive for file logging to flush.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let console_layer = fmt::layer().with_target(true);

    let (file_layer, guard) = match &logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).with_context(|| format!("Failed to create log dir {}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    let _log_guard = init_logging(&config.logging)?;

    info!("Sensor Bridge v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("Bus type: {}", config.upload.bus_type);

    // Shared state
    let cache = Arc::new(LatestState::new());
    let queue = Arc::new(OfflineQueue::new(config.queue.file_path(), config.queue.max_size));
    let restored = queue.restore();
    info!("Offline queue {} holds {} items", queue.path().display(), restored);
    let _flush_guard = queue.flush_guard();

    // Delivery
    let store = Arc::new(DirectoryStore::new(&config.upload.store_dir));
    info!("Delivering objects under {}", store.root().display());
    let uploader = Uploader::new(store, config.upload.bus_type.clone(), config.upload.date_partitioned);
    let policy = RetryPolicy {
        batch_size: config.queue.retry_batch,
        persist_threshold: config.queue.persist_threshold,
    };
    let dispatcher = Arc::new(Dispatcher::new(
        uploader,
        Arc::clone(&queue),
        DeadLetterLog::new(&config.queue.dead_letter_file),
        policy,
    ));
    info!("Permanent failures go to {}", config.queue.dead_letter_file);

    let mut ingestor = Ingestor::new(&config.assembler, Arc::clone(&cache), Arc::clone(&dispatcher))?;

    let mut tasks = vec![
        tokio::spawn(Arc::clone(&dispatcher).run_retry_loop(config.queue.retry_interval())),
        tokio::spawn(run_periodic_save(Arc::clone(&queue), config.queue.save_interval())),
        tokio::spawn(run_status_reporter(
            Arc::clone(&cache),
            Arc::clone(&queue),
            config.upload.bus_type.clone(),
            config.logging.status_interval(),
        )),
        {
            let port = config.serial.port.clone();
            let baud_rate = config.serial.baud_rate;
            let max_line_bytes = config.assembler.max_line_bytes;
            let backoff = config.serial.reconnect_interval();
            tokio::spawn(async move {
                ingestor
                    .run(
                        move || SensorSerial::open(&port, baud_rate).map(|s| s.with_max_line_bytes(max_line_bytes)),
                        backoff,
                    )
                    .await
            })
        },
    ];

    if config.http.enabled {
        let addr = config.http.bind_addr()?;
        let state = ApiState {
            cache: Arc::clone(&cache),
            queue: Arc::clone(&queue),
            bus_type: Arc::from(config.upload.bus_type.as_str()),
        };
        tasks.push(tokio::spawn(async move {
            if let Err(e) = run_http_server(addr, state).await {
                error!("HTTP endpoint on {} stopped: {}", addr, e);
            }
        }));
    }

    info!("Press Ctrl+C to exit");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
    }

    info!("Received Ctrl+C, shutting down...");
    for task in tasks {
        task.abort();
        let _ = task.await;
    }
    info!("Offline queue holds {} items at shutdown", queue.len());

    Ok(())
}
