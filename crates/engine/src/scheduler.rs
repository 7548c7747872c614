//! Periodic wake-up.
//!
//! Each wake-up in live mode archives raw events, writes up to the per-wake
//! cap of dirty partitions, and announces newly closed buckets before trimming
//! memory. In warmup only the dedup table is pruned.

use crate::engine::{EngineMode, FootprintEngine};
use footprint_core::{ts_to_minute, FootprintCandle, MinuteFinalized, PartitionKey, TimestampMs};
use futures_util::future::join_all;
use serde::Serialize;

/// Outcome of one wake-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WakeSummary {
    pub raw_objects_written: usize,
    pub partitions_written: usize,
    pub partitions_failed: usize,
    /// Dirty partitions left for a later wake-up by the cap.
    pub partitions_deferred: usize,
    pub notifications_sent: usize,
    pub candles_evicted: usize,
    pub dedup_pruned: usize,
}

impl FootprintEngine {
    /// Run one wake-up at `now_ms`.
    pub async fn wake(&mut self, now_ms: TimestampMs) -> WakeSummary {
        let mut summary = WakeSummary::default();

        if self.mode == EngineMode::LiveArmed {
            self.flush_raw(now_ms, &mut summary).await;
            let mut messages = self.flush_partitions(now_ms, &mut summary).await;

            let dirty = &self.dirty;
            messages.extend(self.notifier.release_closed(
                ts_to_minute(now_ms),
                now_ms,
                |instrument, bucket| {
                    PartitionKey::for_timestamp(instrument, bucket)
                        .map(|key| dirty.contains(&key))
                        .unwrap_or(false)
                },
            ));

            let outcome = self.notifier.dispatch(messages, now_ms).await;
            summary.notifications_sent = outcome.sent;
            if let Some(e) = outcome.last_error {
                self.record_error("notify", e);
            }

            summary.candles_evicted = self.evict_candles(now_ms);
            self.writer.prune_idle_locks().await;
            self.notifier.prune(now_ms);
        }

        summary.dedup_pruned = self.dedup.prune(now_ms);

        if summary.partitions_written > 0 || summary.partitions_failed > 0 {
            tracing::info!(
                written = summary.partitions_written,
                failed = summary.partitions_failed,
                deferred = summary.partitions_deferred,
                notified = summary.notifications_sent,
                "partitions flushed"
            );
        }
        summary
    }

    async fn flush_raw(&mut self, now_ms: TimestampMs, summary: &mut WakeSummary) {
        if self.raw_log.is_empty() {
            return;
        }
        let store = self.writer.store().clone();
        let report = self.raw_log.flush(store.as_ref(), now_ms).await;
        summary.raw_objects_written = report.objects_written;
        if report.objects_written > 0 {
            self.last_raw_flush = Some(now_ms);
        }
        if let Some(e) = report.last_error {
            self.record_error("raw archive", e);
        }
    }

    /// Write capped dirty partitions. Returns announcements for closed buckets.
    async fn flush_partitions(&mut self, now_ms: TimestampMs, summary: &mut WakeSummary) -> Vec<MinuteFinalized> {
        if self.dirty.is_empty() {
            return Vec::new();
        }

        let keys = self.dirty.batch(self.config.flush.max_partitions_per_wake);
        summary.partitions_deferred = self.dirty.len() - keys.len();

        let jobs: Vec<(PartitionKey, Vec<FootprintCandle>)> = keys
            .into_iter()
            .map(|key| {
                let candles = self.aggregator.candles_in(&key);
                (key, candles)
            })
            .collect();

        let writer = &self.writer;
        let results = join_all(jobs.iter().map(|(key, candles)| async move {
            if candles.is_empty() {
                Ok(0)
            } else {
                writer.write_merged(key, candles).await
            }
        }))
        .await;

        let current_minute = ts_to_minute(now_ms);
        let mut messages = Vec::new();
        for ((key, candles), result) in jobs.into_iter().zip(results) {
            match result {
                Ok(_) => {
                    self.dirty.clear_key(&key);
                    summary.partitions_written += 1;
                    messages.extend(self.notifier.collect(&key, &candles, current_minute, now_ms));
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "partition write failed, keeping dirty");
                    self.record_error("partition write", &e);
                    self.dirty.requeue(&key);
                    summary.partitions_failed += 1;
                }
            }
        }

        if summary.partitions_written > 0 {
            self.last_footprint_flush = Some(now_ms);
        }
        messages
    }

    /// Drop clean candles past the retention window.
    fn evict_candles(&mut self, now_ms: TimestampMs) -> usize {
        let cutoff = now_ms - self.config.flush.candle_retention_ms;
        let dirty = &self.dirty;
        let evicted = self.aggregator.evict_before(cutoff, |key| dirty.contains(key));
        if evicted > 0 {
            tracing::debug!(evicted, "old candles evicted");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::TracingSink;
    use footprint_core::Config;
    use footprint_storage::{MemoryStore, ObjectStore};
    use serde_json::{json, Value};
    use std::sync::Arc;

    // 2024-03-05 02:30:15 UTC
    const T: i64 = 1709605815000;
    const MINUTE: i64 = 60_000;

    fn setup() -> (Arc<MemoryStore>, FootprintEngine) {
        let store = Arc::new(MemoryStore::new());
        let engine = FootprintEngine::new(Config::default(), store.clone(), Arc::new(TracingSink));
        (store, engine)
    }

    fn record(code: &str, price: f64, ts: i64) -> Value {
        json!({"code": code, "board": "RG", "price": price, "volume": 1.0, "ts": ts})
    }

    #[tokio::test]
    async fn test_uninitialized_wake_writes_nothing() {
        let (store, mut e) = setup();
        e.legacy_update(&record("BBCA", 9000.0, T), T);
        let summary = e.wake(T + 120_000).await;
        assert_eq!(summary.partitions_written, 0);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_live_wake_archives_writes_and_announces() {
        let (store, mut e) = setup();
        e.ingest_batch(&[record("BBCA", 9000.0, T)], T);

        let summary = e.wake(T + 60_000).await;
        assert_eq!(summary.raw_objects_written, 1);
        assert_eq!(summary.partitions_written, 1);
        assert_eq!(summary.notifications_sent, 1);
        assert!(e.dirty.is_empty());
        assert_eq!(store.list("raw_trades/").await.unwrap().len(), 1);

        let again = e.wake(T + 65_000).await;
        assert_eq!(again.partitions_written, 0);
        assert_eq!(again.notifications_sent, 0);
    }

    #[tokio::test]
    async fn test_open_bucket_is_announced_once_closed() {
        let (_store, mut e) = setup();
        e.ingest_batch(&[record("BBCA", 9000.0, T)], T);
        let summary = e.wake(T + 1_000).await;
        assert_eq!(summary.partitions_written, 1);
        assert_eq!(summary.notifications_sent, 0);

        // No new trades; the minute closes and the written bucket is released.
        let closed = e.wake(T + MINUTE).await;
        assert_eq!(closed.partitions_written, 0);
        assert_eq!(closed.notifications_sent, 1);
        assert_eq!(e.wake(T + MINUTE + 5_000).await.notifications_sent, 0);
    }

    #[tokio::test]
    async fn test_hour_rollover_releases_last_minute() {
        let (_store, mut e) = setup();
        let last_minute = 1709607540000; // 02:59:00
        e.ingest_batch(&[record("BBCA", 9000.0, last_minute + 30_000)], last_minute + 30_000);
        e.wake(last_minute + 31_000).await;

        // Next trade lands in the 03 partition; the 02:59 bucket is still announced.
        e.ingest_batch(&[record("BBCA", 9010.0, last_minute + MINUTE + 1_000)], last_minute + MINUTE + 1_000);
        let summary = e.wake(last_minute + MINUTE + 2_000).await;
        assert_eq!(summary.partitions_written, 1);
        assert_eq!(summary.notifications_sent, 1);
    }

    #[tokio::test]
    async fn test_eviction_keeps_recent_candles() {
        let (_store, mut e) = setup();
        e.ingest_batch(&[record("BBCA", 9000.0, T)], T);
        e.wake(T + 60_000).await;
        assert_eq!(e.snapshot("BBCA").len(), 1);

        let later = T + 2 * 60 * 60 * 1000 + 60_000;
        let summary = e.wake(later).await;
        assert_eq!(summary.candles_evicted, 1);
        assert!(e.snapshot("BBCA").is_empty());
    }

    #[tokio::test]
    async fn test_dirty_candles_survive_eviction() {
        let (_store, mut e) = setup();
        e.ingest_batch(&[record("BBCA", 9000.0, T)], T);
        assert_eq!(e.evict_candles(T + 3 * 60 * 60 * 1000), 0);
        assert_eq!(e.snapshot("BBCA").len(), 1);
    }
}
