//! Archive of accepted trade events.
//!
//! Accepted events wait here until the next wake-up, which writes one object
//! per UTC date/hour group at `raw_trades/{date}/{hh}/{now}_{id}.jsonl`.

use crate::store::ObjectStore;
use footprint_core::{CanonicalTrade, TimestampMs};
use std::collections::BTreeMap;

/// Outcome of one archive flush.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFlushReport {
    /// Objects written.
    pub objects_written: usize,
    /// Events written.
    pub trades_written: usize,
    /// Events returned to the buffer after a failed write.
    pub trades_requeued: usize,
    /// Last write error, if any group failed.
    pub last_error: Option<String>,
}

/// Buffer of accepted events awaiting archival.
#[derive(Debug, Default)]
pub struct RawLogBuffer {
    pending: Vec<CanonicalTrade>,
}

impl RawLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an accepted event.
    pub fn push(&mut self, trade: CanonicalTrade) {
        self.pending.push(trade);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Write every buffered event. Groups that fail stay buffered.
    pub async fn flush(&mut self, store: &dyn ObjectStore, now_ms: TimestampMs) -> RawFlushReport {
        let mut report = RawFlushReport::default();
        if self.pending.is_empty() {
            return report;
        }

        let mut groups: BTreeMap<(String, String), Vec<CanonicalTrade>> = BTreeMap::new();
        for trade in self.pending.drain(..) {
            let group = (trade.date_utc.clone(), trade.hour_utc().to_string());
            groups.entry(group).or_default().push(trade);
        }

        for ((date, hour), trades) in groups {
            let key = format!(
                "raw_trades/{}/{}/{}_{}.jsonl",
                date,
                hour,
                now_ms,
                uuid::Uuid::new_v4()
            );

            let result = match render_lines(&trades) {
                Ok(body) => store.put(&key, body).await,
                Err(e) => Err(e.into()),
            };

            match result {
                Ok(()) => {
                    report.objects_written += 1;
                    report.trades_written += trades.len();
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "raw archive write failed, requeueing");
                    report.trades_requeued += trades.len();
                    report.last_error = Some(e.to_string());
                    self.pending.extend(trades);
                }
            }
        }

        report
    }
}

fn render_lines(trades: &[CanonicalTrade]) -> serde_json::Result<String> {
    let lines = trades
        .iter()
        .map(serde_json::to_string)
        .collect::<serde_json::Result<Vec<_>>>()?;
    Ok(lines.join("\n"))
}
