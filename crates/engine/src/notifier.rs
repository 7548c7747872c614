//! Finalization fan-out.
//!
//! Once a partition write succeeds, every bucket in it that closed before the
//! current minute is announced once. Buckets still open at write time wait
//! until they close and are released then. The notified table lives in memory
//! only, so announcements are exactly-once per process and at-least-once
//! across restarts.

use async_trait::async_trait;
use footprint_core::config::NotifyConfig;
use footprint_core::{Error, FootprintCandle, MinuteFinalized, PartitionKey, Result, TimestampMs};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;

/// Destination for finalization messages.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one batch of messages.
    async fn send_batch(&self, messages: &[MinuteFinalized]) -> Result<()>;

    /// Get sink type for logging
    fn sink_type(&self) -> &'static str;
}

/// Sink that forwards messages into a channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<MinuteFinalized>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<MinuteFinalized>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl NotificationSink for ChannelSink {
    async fn send_batch(&self, messages: &[MinuteFinalized]) -> Result<()> {
        for message in messages {
            self.tx
                .send(message.clone())
                .await
                .map_err(|_| Error::notify("notification channel closed"))?;
        }
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "channel"
    }
}

/// Sink that only logs messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl NotificationSink for TracingSink {
    async fn send_batch(&self, messages: &[MinuteFinalized]) -> Result<()> {
        for m in messages {
            tracing::info!(
                instrument = %m.instrument,
                bucket = m.bucket_timestamp,
                locator = %m.partition_locator,
                "minute finalized"
            );
        }
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "tracing"
    }
}

/// Result of dispatching a set of messages.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub sent: usize,
    pub failed: usize,
    pub last_error: Option<String>,
}

/// Decides which buckets to announce and dispatches the announcements.
pub struct FinalizationNotifier {
    sink: std::sync::Arc<dyn NotificationSink>,
    /// (instrument, bucket) -> time notified.
    notified: HashMap<(String, TimestampMs), TimestampMs>,
    /// Durably written buckets that were still open: (instrument, bucket) -> locator.
    awaiting: BTreeMap<(String, TimestampMs), String>,
    ttl_ms: i64,
    prune_interval_ms: i64,
    last_prune: TimestampMs,
    batch_size: usize,
    last_send: Option<TimestampMs>,
}

impl FinalizationNotifier {
    pub fn new(sink: std::sync::Arc<dyn NotificationSink>, config: &NotifyConfig) -> Self {
        Self {
            sink,
            notified: HashMap::new(),
            awaiting: BTreeMap::new(),
            ttl_ms: config.ttl_ms,
            prune_interval_ms: config.prune_interval_ms,
            last_prune: 0,
            batch_size: config.batch_size.max(1),
            last_send: None,
        }
    }

    /// Messages for the closed, not yet announced buckets of a durable partition.
    ///
    /// Buckets returned are marked notified. Open buckets are held for
    /// [`release_closed`](Self::release_closed).
    pub fn collect(
        &mut self,
        key: &PartitionKey,
        candles: &[FootprintCandle],
        current_minute: TimestampMs,
        now_ms: TimestampMs,
    ) -> Vec<MinuteFinalized> {
        let locator = key.hour_prefix();
        let mut messages = Vec::new();

        for candle in candles {
            let id = (key.instrument.clone(), candle.bucket_start);
            if candle.bucket_start >= current_minute {
                self.awaiting.insert(id, locator.clone());
                continue;
            }
            self.awaiting.remove(&id);
            if let Some(message) = self.announce(id, &locator, now_ms) {
                messages.push(message);
            }
        }

        messages
    }

    /// Messages for awaiting buckets that have since closed.
    ///
    /// Buckets whose partition `is_dirty` reports as unwritten keep waiting for
    /// that write.
    pub fn release_closed<F>(
        &mut self,
        current_minute: TimestampMs,
        now_ms: TimestampMs,
        is_dirty: F,
    ) -> Vec<MinuteFinalized>
    where
        F: Fn(&str, TimestampMs) -> bool,
    {
        let ready: Vec<(String, TimestampMs)> = self
            .awaiting
            .keys()
            .filter(|(instrument, bucket)| *bucket < current_minute && !is_dirty(instrument, *bucket))
            .cloned()
            .collect();

        let mut messages = Vec::new();
        for id in ready {
            if let Some(locator) = self.awaiting.remove(&id) {
                if let Some(message) = self.announce(id, &locator, now_ms) {
                    messages.push(message);
                }
            }
        }
        messages
    }

    fn announce(
        &mut self,
        id: (String, TimestampMs),
        locator: &str,
        now_ms: TimestampMs,
    ) -> Option<MinuteFinalized> {
        let fresh = self
            .notified
            .get(&id)
            .map(|&at| now_ms - at <= self.ttl_ms)
            .unwrap_or(false);
        if fresh {
            return None;
        }
        let message = MinuteFinalized::new(id.0.as_str(), id.1, locator, now_ms);
        self.notified.insert(id, now_ms);
        Some(message)
    }

    /// Number of written buckets waiting to close.
    pub fn awaiting_count(&self) -> usize {
        self.awaiting.len()
    }

    /// Deliver messages in chunks. Failures are logged and do not retry.
    pub async fn dispatch(&mut self, messages: Vec<MinuteFinalized>, now_ms: TimestampMs) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if messages.is_empty() {
            return outcome;
        }

        for chunk in messages.chunks(self.batch_size) {
            match self.sink.send_batch(chunk).await {
                Ok(()) => outcome.sent += chunk.len(),
                Err(e) => {
                    tracing::error!(
                        sink = self.sink.sink_type(),
                        count = chunk.len(),
                        error = %e,
                        "notification dispatch failed"
                    );
                    outcome.failed += chunk.len();
                    outcome.last_error = Some(e.to_string());
                }
            }
        }

        self.last_send = Some(now_ms);
        outcome
    }

    /// Evict entries older than the TTL, at most once per prune interval.
    pub fn prune(&mut self, now_ms: TimestampMs) -> usize {
        if now_ms - self.last_prune < self.prune_interval_ms {
            return 0;
        }
        self.last_prune = now_ms;

        let before = self.notified.len();
        let cutoff = now_ms - self.ttl_ms;
        self.notified.retain(|_, &mut at| at >= cutoff);
        before - self.notified.len()
    }

    /// Number of remembered announcements.
    pub fn len(&self) -> usize {
        self.notified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notified.is_empty()
    }

    /// Time of the last dispatch attempt.
    pub fn last_send(&self) -> Option<TimestampMs> {
        self.last_send
    }
}
