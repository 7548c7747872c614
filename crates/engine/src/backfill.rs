//! Historical warmup.
//!
//! A warmup loads older trades without touching live partitions: candles are
//! staged next to the live objects under a suffix and merged in by
//! `warmup_finalize`. Live partitions stay unchanged until then.

use crate::engine::{EngineMode, FootprintEngine, IngestSummary};
use footprint_core::{Error, FootprintCandle, PartitionKey, Result, TimestampMs};
use futures_util::future::join_all;
use footprint_storage::StageMode;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Bookkeeping of one warmup session.
#[derive(Debug, Default)]
pub struct WarmupSession {
    /// Partitions to promote: dirty when the session began or touched since.
    touched: BTreeSet<PartitionKey>,
    /// Partitions with a staged object written in this session.
    staged: BTreeSet<PartitionKey>,
}

impl WarmupSession {
    pub fn touch(&mut self, key: PartitionKey) {
        self.touched.insert(key);
    }

    pub fn touched_count(&self) -> usize {
        self.touched.len()
    }

    fn clear(&mut self) {
        self.touched.clear();
        self.staged.clear();
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmupFlushSummary {
    /// Partitions staged by this call.
    pub flushed_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WarmupFinalizeSummary {
    /// Partitions promoted into live storage by this call.
    pub promoted_count: usize,
}

impl FootprintEngine {
    /// Ingest historical records, entering warmup if not already in it.
    ///
    /// Warmup records are not archived.
    pub fn warmup_ingest(&mut self, records: &[Value], now_ms: TimestampMs) -> IngestSummary {
        if self.mode != EngineMode::WarmupActive {
            // Unflushed live partitions are staged and promoted with the session.
            let carried = self.dirty.snapshot();
            tracing::info!(previous = ?self.mode, carried = carried.len(), "warmup started");
            for key in carried {
                self.warmup.touch(key);
            }
            self.mode = EngineMode::WarmupActive;
        }
        let summary = self.ingest(records, now_ms, false);
        tracing::debug!(
            accepted = summary.accepted,
            deduped = summary.deduped,
            errors = summary.errors,
            "warmup batch ingested"
        );
        summary
    }

    /// Stage every dirty partition, then drop in-memory candles and dedup.
    pub async fn warmup_flush(&mut self, _now_ms: TimestampMs) -> WarmupFlushSummary {
        if self.mode != EngineMode::WarmupActive {
            tracing::warn!(mode = ?self.mode, "warmup flush outside warmup ignored");
            return WarmupFlushSummary::default();
        }

        let flushed_count = self.stage_all().await;
        if !self.dirty.is_empty() {
            tracing::warn!(
                remaining = self.dirty.len(),
                "some partitions failed to stage, keeping their candles"
            );
            return WarmupFlushSummary { flushed_count };
        }

        self.aggregator.clear();
        self.dedup.clear();
        tracing::info!(flushed_count, "warmup chunk staged");
        WarmupFlushSummary { flushed_count }
    }

    /// Promote every staged partition of the session into live storage.
    ///
    /// On failure the engine stays in warmup with its session intact, so the
    /// call can be retried. Partitions already promoted are not repeated.
    pub async fn warmup_finalize(&mut self, now_ms: TimestampMs) -> Result<WarmupFinalizeSummary> {
        if self.mode != EngineMode::WarmupActive {
            tracing::warn!(mode = ?self.mode, "warmup finalize outside warmup ignored");
            return Ok(WarmupFinalizeSummary::default());
        }

        self.stage_all().await;
        if !self.dirty.is_empty() {
            let msg = format!("{} partitions could not be staged", self.dirty.len());
            self.record_error("warmup finalize", &msg);
            return Err(Error::storage(msg));
        }

        let suffix = self.config.flush.staged_suffix.clone();
        let current_minute = footprint_core::ts_to_minute(now_ms);
        let keys: Vec<PartitionKey> = self
            .warmup
            .touched
            .union(&self.warmup.staged)
            .cloned()
            .collect();
        let mut promoted_count = 0;
        let mut failed = 0;
        let mut messages = Vec::new();

        for key in keys {
            match self.writer.promote(&key, &suffix).await {
                Ok(promoted) => {
                    if let Some(candles) = promoted {
                        promoted_count += 1;
                        messages.extend(self.notifier.collect(&key, &candles, current_minute, now_ms));
                    }
                    self.warmup.touched.remove(&key);
                    self.warmup.staged.remove(&key);
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "promotion failed");
                    self.record_error("promote", &e);
                    failed += 1;
                }
            }
        }

        let outcome = self.notifier.dispatch(messages, now_ms).await;
        if let Some(e) = outcome.last_error {
            self.record_error("notify", e);
        }

        if failed > 0 {
            return Err(Error::storage(format!("{failed} partitions failed to promote")));
        }

        self.aggregator.clear();
        self.dedup.clear();
        self.dirty.clear();
        self.warmup.clear();
        self.mode = EngineMode::LiveArmed;
        self.last_footprint_flush = Some(now_ms);
        tracing::info!(promoted_count, notified = outcome.sent, "warmup finalized");
        Ok(WarmupFinalizeSummary { promoted_count })
    }

    /// Write dirty partitions to their staged objects until none remain or a
    /// pass makes no progress. Returns the number of partitions staged.
    ///
    /// Candles of a staged partition leave memory; later stagings of the same
    /// partition add to the staged object.
    async fn stage_all(&mut self) -> usize {
        let limit = self.config.flush.max_partitions_per_wake;
        let suffix = self.config.flush.staged_suffix.clone();
        let mut staged = 0;

        while !self.dirty.is_empty() {
            let jobs: Vec<(PartitionKey, Vec<FootprintCandle>, StageMode)> = self
                .dirty
                .batch(limit)
                .into_iter()
                .map(|key| {
                    let candles = self.aggregator.candles_in(&key);
                    let mode = if self.warmup.staged.contains(&key) {
                        StageMode::Merge
                    } else {
                        StageMode::Overwrite
                    };
                    (key, candles, mode)
                })
                .collect();

            let writer = &self.writer;
            let results = join_all(
                jobs.iter()
                    .map(|(key, candles, mode)| writer.write_staged(key, candles, &suffix, *mode)),
            )
            .await;

            let mut progressed = 0;
            for ((key, _, _), result) in jobs.into_iter().zip(results) {
                match result {
                    Ok(_) => {
                        self.dirty.clear_key(&key);
                        self.aggregator.remove_partition(&key);
                        self.warmup.staged.insert(key);
                        progressed += 1;
                    }
                    Err(e) => {
                        tracing::error!(key = %key, error = %e, "staging failed");
                        self.record_error("stage", &e);
                    }
                }
            }

            staged += progressed;
            if progressed == 0 {
                break;
            }
        }

        self.writer.prune_idle_locks().await;
        staged
    }
}
