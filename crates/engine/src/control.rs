//! Control surface.
//!
//! One task owns the [`FootprintEngine`] and serializes every request with the
//! wake-up timer. Callers talk to it through a cloneable [`EngineHandle`].

use crate::backfill::{WarmupFinalizeSummary, WarmupFlushSummary};
use crate::engine::{EngineStatus, FootprintEngine, IngestSummary};
use footprint_core::{Error, FootprintCandle, Result, TimestampMs};
use footprint_storage::PartitionReport;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const COMMAND_QUEUE_DEPTH: usize = 256;

/// Wall clock in epoch milliseconds.
pub fn now_ms() -> TimestampMs {
    chrono::Utc::now().timestamp_millis()
}

/// Requests accepted by the engine task.
#[derive(Debug)]
pub enum Command {
    TradeBatch {
        records: Vec<Value>,
        reply: oneshot::Sender<IngestSummary>,
    },
    WarmupBatch {
        records: Vec<Value>,
        reply: oneshot::Sender<IngestSummary>,
    },
    WarmupFlush {
        reply: oneshot::Sender<WarmupFlushSummary>,
    },
    WarmupFinalize {
        reply: oneshot::Sender<Result<WarmupFinalizeSummary>>,
    },
    Update {
        record: Value,
        reply: oneshot::Sender<IngestSummary>,
    },
    BatchUpdate {
        records: Vec<Value>,
        reply: oneshot::Sender<IngestSummary>,
    },
    Snapshot {
        instrument: String,
        reply: oneshot::Sender<Vec<FootprintCandle>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    DebugPartition {
        instrument: String,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        reply: oneshot::Sender<Result<Option<PartitionReport>>>,
    },
}

/// Cloneable client of the engine task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| Error::EngineClosed)?;
        rx.await.map_err(|_| Error::EngineClosed)
    }

    pub async fn trade_batch(&self, records: Vec<Value>) -> Result<IngestSummary> {
        self.request(|reply| Command::TradeBatch { records, reply }).await
    }

    pub async fn warmup_batch(&self, records: Vec<Value>) -> Result<IngestSummary> {
        self.request(|reply| Command::WarmupBatch { records, reply }).await
    }

    pub async fn flush_warmup(&self) -> Result<WarmupFlushSummary> {
        self.request(|reply| Command::WarmupFlush { reply }).await
    }

    pub async fn finalize_warmup(&self) -> Result<WarmupFinalizeSummary> {
        self.request(|reply| Command::WarmupFinalize { reply }).await?
    }

    pub async fn update(&self, record: Value) -> Result<IngestSummary> {
        self.request(|reply| Command::Update { record, reply }).await
    }

    pub async fn batch_update(&self, records: Vec<Value>) -> Result<IngestSummary> {
        self.request(|reply| Command::BatchUpdate { records, reply }).await
    }

    pub async fn snapshot(&self, instrument: impl Into<String>) -> Result<Vec<FootprintCandle>> {
        let instrument = instrument.into();
        self.request(|reply| Command::Snapshot { instrument, reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn debug_partition(
        &self,
        instrument: impl Into<String>,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
    ) -> Result<Option<PartitionReport>> {
        let instrument = instrument.into();
        self.request(|reply| Command::DebugPartition {
            instrument,
            year,
            month,
            day,
            hour,
            reply,
        })
        .await?
    }
}

/// Start the engine task. It runs until every handle is dropped, then
/// performs a last wake-up and returns the engine.
pub fn spawn(engine: FootprintEngine) -> (EngineHandle, JoinHandle<FootprintEngine>) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let task = tokio::spawn(run(engine, rx));
    (EngineHandle { tx }, task)
}

async fn run(mut engine: FootprintEngine, mut commands: mpsc::Receiver<Command>) -> FootprintEngine {
    let flush = engine.config().flush.clone();
    let first = Instant::now() + Duration::from_millis(flush.initial_arm_ms);
    let mut ticker = tokio::time::interval_at(first, Duration::from_millis(flush.interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    engine.arm();
    tracing::info!(
        initial_arm_ms = flush.initial_arm_ms,
        interval_ms = flush.interval_ms,
        "engine task started"
    );

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(command) => handle(&mut engine, command).await,
                None => break,
            },
            _ = ticker.tick() => {
                engine.wake(now_ms()).await;
            }
        }
    }

    let summary = engine.wake(now_ms()).await;
    tracing::info!(
        written = summary.partitions_written,
        remaining = engine.dirty_partitions().len(),
        "engine task stopped"
    );
    engine
}

async fn handle(engine: &mut FootprintEngine, command: Command) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::TradeBatch { records, reply } => {
            let _ = reply.send(engine.ingest_batch(&records, now_ms()));
        }
        Command::WarmupBatch { records, reply } => {
            let _ = reply.send(engine.warmup_ingest(&records, now_ms()));
        }
        Command::WarmupFlush { reply } => {
            let _ = reply.send(engine.warmup_flush(now_ms()).await);
        }
        Command::WarmupFinalize { reply } => {
            let _ = reply.send(engine.warmup_finalize(now_ms()).await);
        }
        Command::Update { record, reply } => {
            let _ = reply.send(engine.legacy_update(&record, now_ms()));
        }
        Command::BatchUpdate { records, reply } => {
            let _ = reply.send(engine.legacy_batch_update(&records, now_ms()));
        }
        Command::Snapshot { instrument, reply } => {
            let _ = reply.send(engine.snapshot(&instrument));
        }
        Command::Status { reply } => {
            let _ = reply.send(engine.status(now_ms()).await);
        }
        Command::DebugPartition {
            instrument,
            year,
            month,
            day,
            hour,
            reply,
        } => {
            let _ = reply.send(engine.debug_partition(&instrument, year, month, day, hour).await);
        }
    }
}
