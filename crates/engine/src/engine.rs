//! Single-writer engine state.
//!
//! Every mutation goes through `&mut FootprintEngine`; the actor in
//! [`crate::control`] owns the one instance. Methods take the current time
//! explicitly so the engine can be driven deterministically.

use crate::backfill::WarmupSession;
use crate::notifier::{FinalizationNotifier, NotificationSink};
use footprint_core::{
    ts_to_rfc3339, Config, FootprintCandle, PartitionKey, Result, TimestampMs,
};
use footprint_ingestion::{Canonicalizer, Deduplicator, FootprintAggregator};
use footprint_storage::{DirtySet, ObjectStore, PartitionReport, PartitionWriter, RawLogBuffer};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Longest error text kept for status reporting.
const MAX_ERROR_LEN: usize = 200;

/// Lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineMode {
    /// Constructed, no wake-up scheduled yet.
    Uninitialized,
    /// Wake-ups write live partitions.
    LiveArmed,
    /// A historical load is in progress; writes go to staged objects.
    WarmupActive,
}

/// Outcome of an ingest call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Records normalized and absorbed.
    pub accepted: usize,
    /// Records dropped as redeliveries.
    pub deduped: usize,
    /// Records rejected as malformed.
    pub errors: usize,
}

/// Operational counters.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub mode: EngineMode,
    pub tickers_count: usize,
    pub candles_count_total: usize,
    pub raw_buffer_len: usize,
    pub dedupe_size: usize,
    pub dirty_hours_count: usize,
    pub locks_count: usize,
    pub notified_count: usize,
    /// Written buckets waiting for their minute to close.
    pub awaiting_count: usize,
    pub warmup_partitions_count: usize,
    /// Share of absorbed trades the tick rule left neutral.
    pub neutral_frac: f64,
    pub last_raw_flush: Option<String>,
    pub last_footprint_flush: Option<String>,
    pub last_notification_send: Option<String>,
    pub last_error: Option<String>,
    pub now: String,
}

/// The ingestion and aggregation engine.
pub struct FootprintEngine {
    pub(crate) config: Config,
    pub(crate) mode: EngineMode,
    pub(crate) canonicalizer: Canonicalizer,
    pub(crate) dedup: Deduplicator,
    pub(crate) aggregator: FootprintAggregator,
    pub(crate) dirty: DirtySet,
    pub(crate) raw_log: RawLogBuffer,
    pub(crate) writer: PartitionWriter,
    pub(crate) notifier: FinalizationNotifier,
    pub(crate) warmup: WarmupSession,
    pub(crate) last_raw_flush: Option<TimestampMs>,
    pub(crate) last_footprint_flush: Option<TimestampMs>,
    pub(crate) last_error: Option<String>,
}

impl FootprintEngine {
    /// Create an engine over a store and a notification sink.
    pub fn new(config: Config, store: Arc<dyn ObjectStore>, sink: Arc<dyn NotificationSink>) -> Self {
        tracing::info!(
            store = store.backend_type(),
            sink = sink.sink_type(),
            "footprint engine created"
        );
        Self {
            canonicalizer: Canonicalizer::new(&config.ingest),
            dedup: Deduplicator::new(config.ingest.dedup_ttl_ms),
            aggregator: FootprintAggregator::new(),
            dirty: DirtySet::new(),
            raw_log: RawLogBuffer::new(),
            writer: PartitionWriter::new(store),
            notifier: FinalizationNotifier::new(sink, &config.notify),
            warmup: WarmupSession::default(),
            mode: EngineMode::Uninitialized,
            last_raw_flush: None,
            last_footprint_flush: None,
            last_error: None,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Leave `Uninitialized`. Returns `true` if this call armed the engine.
    pub fn arm(&mut self) -> bool {
        if self.mode == EngineMode::Uninitialized {
            self.mode = EngineMode::LiveArmed;
            tracing::info!("engine armed");
            true
        } else {
            false
        }
    }

    /// Ingest a batch of live trade records.
    ///
    /// Accepted events are queued for raw archival and folded into candles.
    pub fn ingest_batch(&mut self, records: &[Value], now_ms: TimestampMs) -> IngestSummary {
        self.arm();
        let summary = self.ingest(records, now_ms, true);
        tracing::debug!(
            accepted = summary.accepted,
            deduped = summary.deduped,
            errors = summary.errors,
            "trade batch ingested"
        );
        summary
    }

    /// Ingest a single legacy record. Not archived.
    pub fn legacy_update(&mut self, record: &Value, now_ms: TimestampMs) -> IngestSummary {
        self.ingest(std::slice::from_ref(record), now_ms, false)
    }

    /// Ingest a legacy batch. Not archived.
    pub fn legacy_batch_update(&mut self, records: &[Value], now_ms: TimestampMs) -> IngestSummary {
        self.ingest(records, now_ms, false)
    }

    pub(crate) fn ingest(&mut self, records: &[Value], now_ms: TimestampMs, archive: bool) -> IngestSummary {
        let mut summary = IngestSummary::default();

        for record in records {
            let Some(trade) = self.canonicalizer.normalize(record, now_ms) else {
                summary.errors += 1;
                continue;
            };
            if !self.dedup.admit(&trade.hash_id, now_ms) {
                summary.deduped += 1;
                continue;
            }

            let Some(key) = self.aggregator.absorb(&trade) else {
                summary.errors += 1;
                continue;
            };
            if self.mode == EngineMode::WarmupActive {
                self.warmup.touch(key.clone());
            }
            self.dirty.mark(key);

            if archive {
                self.raw_log.push(trade);
            }
            summary.accepted += 1;
        }

        summary
    }

    /// In-memory candles of an instrument, ascending by bucket.
    pub fn snapshot(&self, instrument: &str) -> Vec<FootprintCandle> {
        self.aggregator.snapshot(instrument)
    }

    /// Operational counters at `now_ms`.
    pub async fn status(&self, now_ms: TimestampMs) -> EngineStatus {
        EngineStatus {
            mode: self.mode,
            tickers_count: self.aggregator.instrument_count(),
            candles_count_total: self.aggregator.candle_count(),
            raw_buffer_len: self.raw_log.len(),
            dedupe_size: self.dedup.len(),
            dirty_hours_count: self.dirty.len(),
            locks_count: self.writer.lock_count().await,
            notified_count: self.notifier.len(),
            awaiting_count: self.notifier.awaiting_count(),
            warmup_partitions_count: self.warmup.touched_count(),
            neutral_frac: self.aggregator.stats().neutral_frac(),
            last_raw_flush: self.last_raw_flush.map(ts_to_rfc3339),
            last_footprint_flush: self.last_footprint_flush.map(ts_to_rfc3339),
            last_notification_send: self.notifier.last_send().map(ts_to_rfc3339),
            last_error: self.last_error.clone(),
            now: ts_to_rfc3339(now_ms),
        }
    }

    /// Shape summary of one stored live partition.
    pub async fn debug_partition(
        &self,
        instrument: &str,
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
    ) -> Result<Option<PartitionReport>> {
        let key = PartitionKey::from_parts(instrument, year, month, day, hour).ok_or_else(|| {
            footprint_core::Error::data(format!(
                "invalid partition {instrument} {year:04}-{month:02}-{day:02} {hour:02}"
            ))
        })?;
        self.writer.inspect(&key).await
    }

    pub(crate) fn record_error(&mut self, context: &str, error: impl std::fmt::Display) {
        let text = format!("{context}: {error}");
        let start = text
            .char_indices()
            .rev()
            .nth(MAX_ERROR_LEN - 1)
            .map(|(i, _)| i)
            .unwrap_or(0);
        self.last_error = Some(text[start..].to_string());
    }

    /// Partitions awaiting a write.
    pub fn dirty_partitions(&self) -> Vec<PartitionKey> {
        self.dirty.snapshot()
    }
}
