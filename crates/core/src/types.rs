//! Core data types for the footprint engine.

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Timestamp in milliseconds since Unix epoch (UTC).
pub type TimestampMs = i64;

/// Price type with ordering support.
pub type Price = OrderedFloat<f64>;

/// Size/quantity type.
pub type Size = f64;

/// One minute in milliseconds.
pub const MINUTE_MS: i64 = 60_000;

/// One hour in milliseconds.
pub const HOUR_MS: i64 = 3_600_000;

/// Convert a timestamp to minute boundary.
#[inline]
pub fn ts_to_minute(ts_ms: TimestampMs) -> TimestampMs {
    ts_ms.div_euclid(MINUTE_MS) * MINUTE_MS
}

/// Convert a millisecond timestamp to a UTC datetime, if representable.
#[inline]
pub fn ts_to_datetime(ts_ms: TimestampMs) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ts_ms)
}

/// Format a timestamp as RFC 3339, or an empty string if it is out of range.
pub fn ts_to_rfc3339(ts_ms: TimestampMs) -> String {
    ts_to_datetime(ts_ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}

/// Trade side inferred by the tick rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i8)]
pub enum TradeSide {
    /// Uptick (buyer-initiated).
    Buy = 1,
    /// Downtick (seller-initiated).
    Sell = -1,
    /// Zero tick, or the first trade of a bucket.
    Neutral = 0,
}

impl TradeSide {
    /// Get the sign as i8.
    #[inline]
    pub fn sign(self) -> i8 {
        self as i8
    }

    /// Get the sign as f64.
    #[inline]
    pub fn sign_f64(self) -> f64 {
        self.sign() as f64
    }
}

/// Canonical trade event: the normalized form of every accepted wire record.
///
/// Serialized as one line of the raw trade archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalTrade {
    /// Event time (exchange time when the wire record carries it).
    pub ts_ms: TimestampMs,
    /// UTC calendar date, `YYYY-MM-DD`.
    pub date_utc: String,
    /// UTC time of day, `HHMMSS`.
    #[serde(rename = "hhmmss_utc")]
    pub time_utc: String,
    #[serde(rename = "ticker")]
    pub instrument: String,
    pub board: String,
    pub price: f64,
    pub qty: Size,
    /// Feed tag of the producer.
    pub src: String,
    /// Hex SHA-256 used for redelivery detection.
    pub hash_id: String,
}

impl CanonicalTrade {
    /// Build an event, deriving the UTC date and time labels from `ts_ms`.
    ///
    /// Returns `None` if the timestamp cannot be represented as a calendar date.
    pub fn new(
        ts_ms: TimestampMs,
        instrument: impl Into<String>,
        board: impl Into<String>,
        price: f64,
        qty: Size,
        src: impl Into<String>,
        hash_id: impl Into<String>,
    ) -> Option<Self> {
        let dt = ts_to_datetime(ts_ms)?;
        Some(Self {
            ts_ms,
            date_utc: dt.format("%Y-%m-%d").to_string(),
            time_utc: dt.format("%H%M%S").to_string(),
            instrument: instrument.into(),
            board: board.into(),
            price,
            qty,
            src: src.into(),
            hash_id: hash_id.into(),
        })
    }

    /// Minute bucket this event belongs to.
    #[inline]
    pub fn bucket(&self) -> TimestampMs {
        ts_to_minute(self.ts_ms)
    }

    /// UTC hour label, `HH`.
    pub fn hour_utc(&self) -> &str {
        self.time_utc.get(..2).unwrap_or("00")
    }
}

/// Open/high/low/close of a candle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    #[serde(rename = "o")]
    pub open: f64,
    #[serde(rename = "h")]
    pub high: f64,
    #[serde(rename = "l")]
    pub low: f64,
    #[serde(rename = "c")]
    pub close: f64,
}

impl Ohlc {
    /// A flat bar where every field equals `price`.
    pub fn flat(price: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }
}

/// Inferred buy/sell volume traded at one price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    #[serde(rename = "p")]
    pub price: f64,
    #[serde(rename = "bv")]
    pub buy_volume: Size,
    #[serde(rename = "av")]
    pub sell_volume: Size,
}

/// Per-minute footprint candle as persisted and as returned by snapshots.
///
/// The field names match the line format downstream readers consume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FootprintCandle {
    /// Minute boundary timestamp (ms).
    #[serde(rename = "t0")]
    pub bucket_start: TimestampMs,
    pub ohlc: Ohlc,
    /// Total accepted quantity in the bucket.
    #[serde(rename = "vol")]
    pub volume: Size,
    /// Signed order flow per the tick rule.
    pub delta: f64,
    /// Price ladder, ascending by price.
    #[serde(default)]
    pub levels: Vec<PriceLevel>,
}

impl FootprintCandle {
    /// Look up the ladder entry for a price.
    pub fn level(&self, price: f64) -> Option<&PriceLevel> {
        self.levels.iter().find(|l| l.price == price)
    }

    /// Fold a later candle of the same bucket into this one.
    ///
    /// Open is kept, close is taken from `later`, and volume, delta and the
    /// ladder add up.
    pub fn accumulate(&mut self, later: &FootprintCandle) {
        self.ohlc.high = self.ohlc.high.max(later.ohlc.high);
        self.ohlc.low = self.ohlc.low.min(later.ohlc.low);
        self.ohlc.close = later.ohlc.close;
        self.volume += later.volume;
        self.delta += later.delta;

        let mut ladder: BTreeMap<Price, (Size, Size)> = BTreeMap::new();
        for level in self.levels.iter().chain(later.levels.iter()) {
            let cell = ladder.entry(OrderedFloat(level.price)).or_default();
            cell.0 += level.buy_volume;
            cell.1 += level.sell_volume;
        }
        self.levels = ladder
            .into_iter()
            .map(|(price, (buy_volume, sell_volume))| PriceLevel {
                price: price.into_inner(),
                buy_volume,
                sell_volume,
            })
            .collect();
    }
}

/// Fan-out message emitted once a minute bucket is certainly closed and durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteFinalized {
    #[serde(rename = "type")]
    pub kind: String,
    pub instrument: String,
    pub bucket_timestamp: TimestampMs,
    /// `YYYY/MM/DD/HH` of the partition holding the bucket.
    pub partition_locator: String,
    pub source: String,
    pub emitted_at: TimestampMs,
}

impl MinuteFinalized {
    pub const KIND: &'static str = "minute_finalized";
    pub const SOURCE: &'static str = "footprint";

    pub fn new(
        instrument: impl Into<String>,
        bucket_timestamp: TimestampMs,
        partition_locator: impl Into<String>,
        emitted_at: TimestampMs,
    ) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            instrument: instrument.into(),
            bucket_timestamp,
            partition_locator: partition_locator.into(),
            source: Self::SOURCE.to_string(),
            emitted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_to_minute() {
        // 2024-01-01 00:01:30.500 -> 2024-01-01 00:01:00.000
        let ts = 1704067290500i64;
        let minute = ts_to_minute(ts);
        assert_eq!(minute, 1704067260000);
    }

    #[test]
    fn test_trade_side_sign() {
        assert_eq!(TradeSide::Buy.sign(), 1);
        assert_eq!(TradeSide::Sell.sign(), -1);
        assert_eq!(TradeSide::Neutral.sign(), 0);
    }

    #[test]
    fn test_canonical_trade_labels() {
        // 2024-01-01 02:03:04.005 UTC
        let cte = CanonicalTrade::new(1704074584005, "BBCA", "RG", 9000.0, 100.0, "feed", "h")
            .unwrap();
        assert_eq!(cte.date_utc, "2024-01-01");
        assert_eq!(cte.time_utc, "020304");
        assert_eq!(cte.hour_utc(), "02");
        assert_eq!(cte.bucket(), 1704074580000);
    }

    #[test]
    fn test_candle_line_format() {
        let candle = FootprintCandle {
            bucket_start: 60_000,
            ohlc: Ohlc::flat(100.0),
            volume: 5.0,
            delta: 0.0,
            levels: vec![PriceLevel {
                price: 100.0,
                buy_volume: 0.0,
                sell_volume: 4.0,
            }],
        };
        let line = serde_json::to_string(&candle).unwrap();
        assert!(line.starts_with(r#"{"t0":60000,"ohlc":{"o":100.0"#));
        assert!(line.contains(r#""levels":[{"p":100.0,"bv":0.0,"av":4.0}]"#));

        let back: FootprintCandle = serde_json::from_str(&line).unwrap();
        assert_eq!(back, candle);
    }

    #[test]
    fn test_accumulate_same_bucket() {
        let level = |price: f64, bv: f64, av: f64| PriceLevel {
            price,
            buy_volume: bv,
            sell_volume: av,
        };
        let mut first = FootprintCandle {
            bucket_start: 60_000,
            ohlc: Ohlc { open: 101.0, high: 102.0, low: 100.0, close: 100.0 },
            volume: 5.0,
            delta: -2.0,
            levels: vec![level(100.0, 0.0, 2.0), level(102.0, 1.0, 0.0)],
        };
        let later = FootprintCandle {
            bucket_start: 60_000,
            ohlc: Ohlc { open: 99.0, high: 101.0, low: 99.0, close: 101.0 },
            volume: 3.0,
            delta: 1.0,
            levels: vec![level(101.0, 1.0, 0.0), level(100.0, 0.0, 1.0)],
        };

        first.accumulate(&later);
        assert_eq!(
            first.ohlc,
            Ohlc { open: 101.0, high: 102.0, low: 99.0, close: 101.0 }
        );
        assert_eq!(first.volume, 8.0);
        assert_eq!(first.delta, -1.0);
        assert_eq!(
            first.levels,
            vec![level(100.0, 0.0, 3.0), level(101.0, 1.0, 0.0), level(102.0, 1.0, 0.0)]
        );
    }

    #[test]
    fn test_minute_finalized_shape() {
        let msg = MinuteFinalized::new("BBCA", 60_000, "1970/01/01/00", 120_000);
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "minute_finalized");
        assert_eq!(value["source"], "footprint");
        assert_eq!(value["partition_locator"], "1970/01/01/00");
    }
}
