//! swingscope - headless pattern detection
//!
//! Runs the detection engine over historical CSV bars or a live JSON-lines
//! tick stream on stdin. Detected events are logged and optionally printed
//! as JSON lines or exported as candle CSV files.
//!
//! # Usage
//! ```sh
//! cargo run --bin swingscope -- backfill --folder data/bars --symbols INFY,TCS
//! tail -f ticks.jsonl | cargo run --bin swingscope -- stream --json
//! ```
//!
//! Configuration comes from the environment (see `.env`); `RUST_LOG`
//! controls verbosity.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use swingscope::application::pipeline::DetectionEngine;
use swingscope::config::Config;
use swingscope::domain::events::{DetectionEvent, EventListener, LoggingListener};
use swingscope::domain::market::tick::RawTick;
use swingscope::domain::market::timeframe::Timeframe;
use swingscope::domain::repositories::EntityStore;
use swingscope::infrastructure::observability::Metrics;
use swingscope::infrastructure::{
    CsvBarReader, CsvCandleStorage, EventEmitter, InMemoryEntityStore, SqliteEntityStore,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Keep dedup state in memory instead of DATABASE_URL
    #[arg(long, global = true)]
    memory: bool,

    /// Print every emitted event as a JSON line on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Write closed candles as CSV files into this folder on exit
    #[arg(long, global = true)]
    export: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay `{folder}/{symbol}.csv` bar files through the engine
    Backfill {
        /// Folder holding one CSV file per symbol
        #[arg(short, long)]
        folder: PathBuf,

        /// Comma-separated symbols
        #[arg(short, long)]
        symbols: String,

        /// Timeframe of the bars in the files (defaults to BASE_TIMEFRAME)
        #[arg(short, long)]
        timeframe: Option<String>,

        /// chrono format of the date column (epoch millis or RFC 3339 if unset)
        #[arg(long)]
        date_format: Option<String>,
    },
    /// Read JSON-lines ticks from stdin until EOF or Ctrl+C
    Stream,
}

/// Writes events to stdout as JSON lines.
struct JsonLinesListener;

impl EventListener for JsonLinesListener {
    fn on_event(&self, event: &DetectionEvent) {
        match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to serialize event: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays clean for --json
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .pretty();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stderr_layer)
        .init();

    let cli = Cli::parse();

    info!("swingscope {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(
        "Configuration loaded: base={}, timeframes={:?}, pivot L/R={}/{}",
        config.aggregation.base_timeframe,
        config
            .aggregation
            .analysed_timeframes()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
        config.detection.pivot.left_bars,
        config.detection.pivot.right_bars
    );

    let store: Arc<dyn EntityStore> = if cli.memory {
        info!("Dedup state: in-memory");
        Arc::new(InMemoryEntityStore::new())
    } else {
        Arc::new(
            SqliteEntityStore::connect(&config.storage.database_url)
                .await
                .context("Failed to open dedup store")?,
        )
    };

    let emitter = EventEmitter::new();
    emitter.subscribe(Arc::new(LoggingListener)).await;
    if cli.json {
        emitter.subscribe(Arc::new(JsonLinesListener)).await;
    }
    let csv_storage = cli.export.as_ref().map(|dir| Arc::new(CsvCandleStorage::new(dir)));
    if let Some(storage) = &csv_storage {
        emitter.subscribe(storage.clone()).await;
    }

    let metrics = Metrics::new()?;
    let timestamp_unit = config.aggregation.timestamp_unit;
    let base = config.aggregation.base_timeframe;
    let engine = DetectionEngine::new(config, store, emitter, metrics.clone());

    match cli.command {
        Commands::Backfill {
            folder,
            symbols,
            timeframe,
            date_format,
        } => {
            let timeframe = match timeframe {
                Some(tf) => Timeframe::from_str(&tf)?,
                None => base,
            };
            let mut reader = CsvBarReader::new(folder, timeframe);
            if let Some(format) = date_format {
                reader = reader.with_date_format(format);
            }

            for symbol in symbols.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let bars = match reader.read(symbol) {
                    Ok(bars) => bars,
                    Err(e) => {
                        error!("Backfill: {:#}", e);
                        continue;
                    }
                };
                if let Err(e) = engine.submit_bars(bars).await {
                    error!("Backfill: {} rejected: {}", symbol, e);
                }
            }
        }
        Commands::Stream => {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            info!("Stream: reading JSON-lines ticks from stdin. Press Ctrl+C to stop.");

            loop {
                tokio::select! {
                    line = lines.next_line() => {
                        let Some(line) = line? else {
                            info!("Stream: end of input");
                            break;
                        };
                        if line.trim().is_empty() {
                            continue;
                        }
                        let raw: RawTick = match serde_json::from_str(&line) {
                            Ok(raw) => raw,
                            Err(e) => {
                                warn!("Stream: malformed tick '{}': {}", line, e);
                                metrics.inc_rejected("malformed");
                                continue;
                            }
                        };
                        match raw.into_tick(timestamp_unit) {
                            Ok(tick) => {
                                if let Err(e) = engine.submit_tick(tick).await {
                                    debug!("Stream: tick dropped: {}", e);
                                }
                            }
                            Err(e) => {
                                warn!("Stream: invalid tick: {}", e);
                                metrics.inc_rejected("invalid_input");
                            }
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutdown signal received.");
                        break;
                    }
                }
            }
        }
    }

    for (symbol, status) in engine.shutdown().await {
        info!("Pipeline {}: {:?}", symbol, status);
    }

    if let Some(storage) = csv_storage {
        storage.save()?;
    }

    debug!("Final metrics:\n{}", metrics.render());
    info!("swingscope finished.");
    Ok(())
}
