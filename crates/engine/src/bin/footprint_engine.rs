//! Footprint engine CLI
//!
//! Feeds newline-delimited JSON trade records into the engine and prints
//! finalization messages to stdout, one JSON object per line.
//!
//! Usage:
//!   # Live: stream records from stdin
//!   tail -f trades.jsonl | footprint-engine --data-dir ./data run
//!
//!   # Warmup: load a historical file, stage it, then promote it
//!   footprint-engine --data-dir ./data warmup --input history.jsonl
//!
//!   # Inspect a stored partition
//!   footprint-engine --data-dir ./data inspect --instrument BBCA --date 2024-03-05 --hour 2

use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use clap::{Parser, Subcommand};
use footprint_core::{Config, MinuteFinalized};
use footprint_engine::{spawn, ChannelSink, EngineHandle, FootprintEngine};
use footprint_storage::FsStore;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Workspace crates whose logs are shown at `info` unless `RUST_LOG` says otherwise.
const LOG_TARGETS: [&str; 4] = [
    "footprint_engine",
    "footprint_storage",
    "footprint_ingestion",
    "footprint_core",
];

#[derive(Parser, Debug)]
#[command(name = "footprint-engine")]
#[command(about = "Aggregate trade records into per-minute footprint candles")]
struct Args {
    /// JSON config file; defaults apply when omitted
    #[arg(long, env = "FOOTPRINT_CONFIG")]
    config: Option<PathBuf>,

    /// Object store root, overrides storage.root from the config
    #[arg(long, env = "FOOTPRINT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Stream live records from stdin
    Run {
        /// Records per ingest call
        #[arg(long, default_value = "500")]
        batch_size: usize,

        /// Send a partial batch after this many idle milliseconds
        #[arg(long, default_value = "250")]
        linger_ms: u64,
    },

    /// Load historical records from a file through the staged warmup path
    Warmup {
        #[arg(long)]
        input: PathBuf,

        /// Records staged per flush
        #[arg(long, default_value = "5000")]
        chunk_size: usize,
    },

    /// Summarize a stored hour partition
    Inspect {
        #[arg(long)]
        instrument: String,

        /// UTC date, YYYY-MM-DD
        #[arg(long)]
        date: NaiveDate,

        /// UTC hour, 0-23
        #[arg(long)]
        hour: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(log_filter()?)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = &args.data_dir {
        config.storage.root = dir.clone();
    }

    let store = Arc::new(FsStore::new(config.storage.root.clone()));
    info!(root = %store.root().display(), "store opened");

    let (notify_tx, notify_rx) = mpsc::channel(1024);
    let printer = tokio::spawn(print_notifications(notify_rx));

    let engine = FootprintEngine::new(config, store, Arc::new(ChannelSink::new(notify_tx)));
    let (handle, task) = spawn(engine);

    match args.command {
        Commands::Run {
            batch_size,
            linger_ms,
        } => stream_stdin(&handle, batch_size.max(1), Duration::from_millis(linger_ms)).await?,
        Commands::Warmup { input, chunk_size } => {
            run_warmup(&handle, &input, chunk_size.max(1)).await?
        }
        Commands::Inspect {
            instrument,
            date,
            hour,
        } => {
            let report = handle
                .debug_partition(instrument, date.year(), date.month(), date.day(), hour)
                .await?;
            match report {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => println!("partition not found"),
            }
        }
    }

    let status = handle.status().await?;
    drop(handle);
    let engine = task.await.context("engine task panicked")?;
    info!(
        remaining_dirty = engine.dirty_partitions().len(),
        candles = status.candles_count_total,
        last_error = ?status.last_error,
        "shutdown complete"
    );

    // Dropping the engine closes the notification channel.
    drop(engine);
    printer.await.context("notification printer panicked")?;
    Ok(())
}

fn log_filter() -> Result<EnvFilter> {
    let mut filter = EnvFilter::from_default_env();
    for target in LOG_TARGETS {
        filter = filter.add_directive(format!("{target}=info").parse()?);
    }
    Ok(filter)
}

async fn stream_stdin(handle: &EngineHandle, batch_size: usize, linger: Duration) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batch: Vec<Value> = Vec::with_capacity(batch_size);
    let mut bad_lines = 0usize;

    loop {
        let next = match tokio::time::timeout(linger, lines.next_line()).await {
            Ok(line) => line.context("Failed to read stdin")?,
            Err(_) => {
                send_live(handle, &mut batch).await?;
                continue;
            }
        };

        let Some(line) = next else { break };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(record) => batch.push(record),
            Err(e) => {
                bad_lines += 1;
                warn!(error = %e, "skipping non-JSON input line");
            }
        }
        if batch.len() >= batch_size {
            send_live(handle, &mut batch).await?;
        }
    }

    send_live(handle, &mut batch).await?;
    info!(bad_lines, "stdin closed");
    Ok(())
}

async fn send_live(handle: &EngineHandle, batch: &mut Vec<Value>) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let summary = handle.trade_batch(std::mem::take(batch)).await?;
    tracing::debug!(?summary, "batch sent");
    Ok(())
}

async fn run_warmup(handle: &EngineHandle, input: &Path, chunk_size: usize) -> Result<()> {
    let file = tokio::fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open warmup input: {}", input.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut chunk: Vec<Value> = Vec::with_capacity(chunk_size);
    let mut accepted = 0usize;
    let mut staged = 0usize;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(record) => chunk.push(record),
            Err(e) => warn!(error = %e, "skipping non-JSON warmup line"),
        }
        if chunk.len() >= chunk_size {
            accepted += handle.warmup_batch(std::mem::take(&mut chunk)).await?.accepted;
            staged += handle.flush_warmup().await?.flushed_count;
        }
    }
    if !chunk.is_empty() {
        accepted += handle.warmup_batch(chunk).await?.accepted;
        staged += handle.flush_warmup().await?.flushed_count;
    }

    let summary = handle.finalize_warmup().await?;
    info!(
        accepted,
        staged,
        promoted = summary.promoted_count,
        "warmup complete"
    );
    Ok(())
}

async fn print_notifications(mut rx: mpsc::Receiver<MinuteFinalized>) {
    while let Some(message) = rx.recv().await {
        match serde_json::to_string(&message) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(error = %e, "failed to encode notification"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_covers_library_crates() {
        let filter = log_filter().unwrap().to_string();
        for target in LOG_TARGETS {
            assert!(filter.contains(&format!("{target}=info")), "{target} missing from {filter}");
        }
    }
}
