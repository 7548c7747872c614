//! Line format of hour partitions.
//!
//! One candle JSON per line, ascending by bucket, trailing newline.

use footprint_core::{FootprintCandle, PartitionKey, TimestampMs};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Candles of one partition keyed by bucket start.
pub type CandleMap = BTreeMap<TimestampMs, FootprintCandle>;

/// Parse a partition body. Blank and malformed lines are skipped.
pub fn parse_partition(text: &str) -> CandleMap {
    let mut candles = CandleMap::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<FootprintCandle>(line) {
            Ok(candle) => {
                candles.insert(candle.bucket_start, candle);
            }
            Err(e) => tracing::debug!(error = %e, "skipping malformed partition line"),
        }
    }
    candles
}

/// Overlay candles onto a map; incoming values replace same-bucket entries.
pub fn overlay<'a, I>(candles: &mut CandleMap, incoming: I)
where
    I: IntoIterator<Item = &'a FootprintCandle>,
{
    for candle in incoming {
        candles.insert(candle.bucket_start, candle.clone());
    }
}

/// Combine candles into a map; same-bucket entries accumulate, `incoming`
/// being the later data.
pub fn combine<'a, I>(candles: &mut CandleMap, incoming: I)
where
    I: IntoIterator<Item = &'a FootprintCandle>,
{
    for candle in incoming {
        match candles.get_mut(&candle.bucket_start) {
            Some(existing) => existing.accumulate(candle),
            None => {
                candles.insert(candle.bucket_start, candle.clone());
            }
        }
    }
}

/// Serialize a partition body.
pub fn render_partition(candles: &CandleMap) -> serde_json::Result<String> {
    let mut body = String::new();
    for candle in candles.values() {
        body.push_str(&serde_json::to_string(candle)?);
        body.push('\n');
    }
    Ok(body)
}

/// Shape summary of a stored partition, for debugging bucketing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartitionReport {
    pub key: String,
    pub line_count: usize,
    pub distinct_bucket_count: usize,
    pub min_bucket: Option<TimestampMs>,
    pub max_bucket: Option<TimestampMs>,
    /// Buckets whose UTC hour differs from the partition's hour.
    pub out_of_range_count: usize,
}

/// Summarize a partition body without requiring full candle validity.
pub fn inspect_partition(key: &PartitionKey, text: &str) -> PartitionReport {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let buckets: Vec<TimestampMs> = lines
        .iter()
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter_map(|v| v.get("t0").and_then(Value::as_i64))
        .collect();

    let mut distinct = buckets.clone();
    distinct.sort_unstable();
    distinct.dedup();

    PartitionReport {
        key: key.object_path(),
        line_count: lines.len(),
        distinct_bucket_count: distinct.len(),
        min_bucket: distinct.first().copied(),
        max_bucket: distinct.last().copied(),
        out_of_range_count: buckets.iter().filter(|&&t0| !key.contains(t0)).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use footprint_core::Ohlc;

    fn candle(bucket_start: i64, close: f64) -> FootprintCandle {
        FootprintCandle {
            bucket_start,
            ohlc: Ohlc::flat(close),
            volume: 1.0,
            delta: 0.0,
            levels: Vec::new(),
        }
    }

    #[test]
    fn test_render_sorted_with_trailing_newline() {
        let mut map = CandleMap::new();
        overlay(&mut map, &[candle(120_000, 2.0), candle(60_000, 1.0)]);
        let body = render_partition(&map).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(r#"{"t0":60000"#));
        assert!(lines[1].starts_with(r#"{"t0":120000"#));
        assert!(body.ends_with('\n'));
    }

    #[test]
    fn test_parse_skips_garbage() {
        let text = "{\"t0\":60000,\"ohlc\":{\"o\":1,\"h\":1,\"l\":1,\"c\":1},\"vol\":1,\"delta\":0}\nnot json\n\n{\"no_t0\":1}\n";
        let map = parse_partition(text);
        assert_eq!(map.len(), 1);
        assert!(map[&60_000].levels.is_empty());
    }

    #[test]
    fn test_overlay_new_values_win() {
        let mut map = CandleMap::new();
        overlay(&mut map, &[candle(60_000, 1.0)]);
        overlay(&mut map, &[candle(60_000, 9.0)]);
        assert_eq!(map.len(), 1);
        assert_eq!(map[&60_000].ohlc.close, 9.0);
    }

    #[test]
    fn test_combine_accumulates_same_bucket() {
        let mut map = CandleMap::new();
        combine(&mut map, &[candle(60_000, 1.0)]);
        combine(&mut map, &[candle(60_000, 9.0), candle(120_000, 2.0)]);
        assert_eq!(map.len(), 2);
        assert_eq!(map[&60_000].volume, 2.0);
        assert_eq!(map[&60_000].ohlc.open, 1.0);
        assert_eq!(map[&60_000].ohlc.close, 9.0);
        assert_eq!(map[&120_000].volume, 1.0);
    }

    #[test]
    fn test_inspect_counts_out_of_range() {
        let key = PartitionKey::for_timestamp("BBCA", 0).unwrap();
        let text = "{\"t0\":60000}\n{\"t0\":60000}\n{\"t0\":3600000}\nbad\n";
        let report = inspect_partition(&key, text);
        assert_eq!(report.line_count, 4);
        assert_eq!(report.distinct_bucket_count, 2);
        assert_eq!(report.min_bucket, Some(60_000));
        assert_eq!(report.max_bucket, Some(3_600_000));
        assert_eq!(report.out_of_range_count, 1);
    }
}
