//! Per-minute footprint candles built from canonical trades.
//!
//! Candles are held per instrument, keyed by minute bucket. Every absorbed
//! trade reports the hour partition it touched so the caller can mark it dirty.

use crate::classifier::{ClassificationStats, TickRule};
use footprint_core::{
    CanonicalTrade, FootprintCandle, Ohlc, PartitionKey, Price, PriceLevel, Size,
    TimestampMs, TradeSide,
};
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, HashMap};

/// Inferred volume at one price.
#[derive(Debug, Clone, Copy, Default)]
struct LadderCell {
    buy: Size,
    sell: Size,
}

/// A candle that's currently being built.
#[derive(Debug, Clone)]
struct CandleInProgress {
    bucket_start: TimestampMs,
    ohlc: Ohlc,
    volume: Size,
    delta: f64,
    ladder: BTreeMap<Price, LadderCell>,
    tick: TickRule,
}

impl CandleInProgress {
    fn new(bucket_start: TimestampMs, first_price: f64) -> Self {
        Self {
            bucket_start,
            ohlc: Ohlc::flat(first_price),
            volume: 0.0,
            delta: 0.0,
            ladder: BTreeMap::new(),
            tick: TickRule::new(),
        }
    }

    fn add_trade(&mut self, price: f64, qty: Size) -> TradeSide {
        self.ohlc.high = self.ohlc.high.max(price);
        self.ohlc.low = self.ohlc.low.min(price);
        self.ohlc.close = price;
        self.volume += qty;

        let side = self.tick.classify(price);
        self.delta += side.sign_f64() * qty;
        match side {
            TradeSide::Buy => self.ladder.entry(OrderedFloat(price)).or_default().buy += qty,
            TradeSide::Sell => self.ladder.entry(OrderedFloat(price)).or_default().sell += qty,
            TradeSide::Neutral => {}
        }
        side
    }

    fn to_candle(&self) -> FootprintCandle {
        FootprintCandle {
            bucket_start: self.bucket_start,
            ohlc: self.ohlc,
            volume: self.volume,
            delta: self.delta,
            levels: self
                .ladder
                .iter()
                .map(|(price, cell)| PriceLevel {
                    price: price.into_inner(),
                    buy_volume: cell.buy,
                    sell_volume: cell.sell,
                })
                .collect(),
        }
    }
}

/// In-memory candle state for every instrument.
#[derive(Debug, Default)]
pub struct FootprintAggregator {
    /// instrument -> bucket start -> candle.
    instruments: HashMap<String, BTreeMap<TimestampMs, CandleInProgress>>,
    /// Side inference statistics.
    stats: ClassificationStats,
}

impl FootprintAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a trade into its minute candle.
    ///
    /// Returns the hour partition owning the candle, which is now dirty.
    pub fn absorb(&mut self, trade: &CanonicalTrade) -> Option<PartitionKey> {
        let bucket = trade.bucket();
        let key = PartitionKey::for_timestamp(trade.instrument.as_str(), bucket)?;

        let candle = self
            .instruments
            .entry(trade.instrument.clone())
            .or_default()
            .entry(bucket)
            .or_insert_with(|| CandleInProgress::new(bucket, trade.price));
        let side = candle.add_trade(trade.price, trade.qty);
        self.stats.record(side, trade.qty);

        Some(key)
    }

    /// Candles of one hour partition, ascending by bucket.
    pub fn candles_in(&self, key: &PartitionKey) -> Vec<FootprintCandle> {
        self.instruments
            .get(&key.instrument)
            .map(|candles| {
                candles
                    .range(key.hour_start_ms()..key.hour_end_ms())
                    .map(|(_, c)| c.to_candle())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All candles of an instrument, ascending by bucket.
    pub fn snapshot(&self, instrument: &str) -> Vec<FootprintCandle> {
        self.instruments
            .get(instrument)
            .map(|candles| candles.values().map(CandleInProgress::to_candle).collect())
            .unwrap_or_default()
    }

    /// Drop candles with buckets before `cutoff_ms` whose partition `keep`
    /// does not claim. Returns the number dropped.
    pub fn evict_before<F>(&mut self, cutoff_ms: TimestampMs, keep: F) -> usize
    where
        F: Fn(&PartitionKey) -> bool,
    {
        let mut evicted = 0;
        for (instrument, candles) in self.instruments.iter_mut() {
            let before = candles.len();
            candles.retain(|&bucket, _| {
                bucket >= cutoff_ms
                    || PartitionKey::for_timestamp(instrument.as_str(), bucket)
                        .map(|key| keep(&key))
                        .unwrap_or(false)
            });
            evicted += before - candles.len();
        }
        self.instruments.retain(|_, candles| !candles.is_empty());
        evicted
    }

    /// Drop the candles of one hour partition. Returns the number dropped.
    pub fn remove_partition(&mut self, key: &PartitionKey) -> usize {
        let Some(candles) = self.instruments.get_mut(&key.instrument) else {
            return 0;
        };
        let before = candles.len();
        candles.retain(|&bucket, _| !key.contains(bucket));
        let removed = before - candles.len();
        if candles.is_empty() {
            self.instruments.remove(&key.instrument);
        }
        removed
    }

    /// Number of instruments with candles in memory.
    pub fn instrument_count(&self) -> usize {
        self.instruments.len()
    }

    /// Total candles in memory.
    pub fn candle_count(&self) -> usize {
        self.instruments.values().map(BTreeMap::len).sum()
    }

    /// Side inference statistics.
    pub fn stats(&self) -> &ClassificationStats {
        &self.stats
    }

    /// Clear all candles. Statistics are kept.
    pub fn clear(&mut self) {
        self.instruments.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // 2024-03-05 02:30:00 UTC
    const BUCKET: i64 = 1709605800000;

    fn make_trade(instrument: &str, ts_ms: i64, price: f64, qty: f64) -> CanonicalTrade {
        CanonicalTrade::new(ts_ms, instrument, "RG", price, qty, "test", format!("{ts_ms}-{price}"))
            .unwrap()
    }

    #[test]
    fn test_tick_rule_bucket() {
        let mut agg = FootprintAggregator::new();
        let prices = [100.0, 101.0, 101.0, 100.0];
        let qtys = [5.0, 3.0, 2.0, 4.0];
        for (i, (price, qty)) in prices.iter().zip(qtys.iter()).enumerate() {
            agg.absorb(&make_trade("BBCA", BUCKET + i as i64 * 1000, *price, *qty));
        }

        let candles = agg.snapshot("BBCA");
        assert_eq!(candles.len(), 1);
        let c = &candles[0];
        assert_eq!(c.bucket_start, BUCKET);
        assert_eq!(c.ohlc, Ohlc { open: 100.0, high: 101.0, low: 100.0, close: 100.0 });
        assert_relative_eq!(c.volume, 14.0);
        assert_relative_eq!(c.delta, -1.0);
        assert_eq!(c.levels.len(), 2);
        assert_eq!(
            c.level(101.0),
            Some(&PriceLevel { price: 101.0, buy_volume: 3.0, sell_volume: 0.0 })
        );
        assert_eq!(
            c.level(100.0),
            Some(&PriceLevel { price: 100.0, buy_volume: 0.0, sell_volume: 4.0 })
        );
    }

    #[test]
    fn test_first_trade_leaves_ladder_empty() {
        let mut agg = FootprintAggregator::new();
        agg.absorb(&make_trade("BBCA", BUCKET, 100.0, 5.0));

        let c = &agg.snapshot("BBCA")[0];
        assert_relative_eq!(c.volume, 5.0);
        assert_relative_eq!(c.delta, 0.0);
        assert!(c.levels.is_empty());
    }

    #[test]
    fn test_tick_rule_reseeds_per_bucket() {
        let mut agg = FootprintAggregator::new();
        agg.absorb(&make_trade("BBCA", BUCKET + 59_000, 100.0, 1.0));
        // Higher than the previous bucket's last price, but first in its own bucket.
        agg.absorb(&make_trade("BBCA", BUCKET + 60_000, 105.0, 2.0));

        let candles = agg.snapshot("BBCA");
        assert_eq!(candles.len(), 2);
        assert_relative_eq!(candles[1].delta, 0.0);
        assert_eq!(agg.stats().neutral_trades, 2);
    }

    #[test]
    fn test_absorb_reports_utc_hour_partition() {
        let mut agg = FootprintAggregator::new();
        // 02:59:59.999 belongs to the 02 partition, 03:00:00 to the 03 partition.
        let k1 = agg.absorb(&make_trade("BBCA", BUCKET + 29 * 60_000 + 59_999, 100.0, 1.0)).unwrap();
        let k2 = agg.absorb(&make_trade("BBCA", BUCKET + 30 * 60_000, 100.0, 1.0)).unwrap();
        assert_eq!(k1.object_path(), "footprint/BBCA/1m/2024/03/05/02.jsonl");
        assert_eq!(k2.object_path(), "footprint/BBCA/1m/2024/03/05/03.jsonl");

        assert_eq!(agg.candles_in(&k1).len(), 1);
        assert_eq!(agg.candles_in(&k2).len(), 1);
    }

    #[test]
    fn test_high_low_bounds() {
        let mut agg = FootprintAggregator::new();
        for (i, price) in [50.0, 52.0, 48.0, 51.0].iter().enumerate() {
            agg.absorb(&make_trade("TLKM", BUCKET + i as i64, *price, 1.0));
        }
        let c = &agg.snapshot("TLKM")[0];
        assert_eq!(c.ohlc.high, 52.0);
        assert_eq!(c.ohlc.low, 48.0);
        assert_eq!(c.ohlc.close, 51.0);
    }

    #[test]
    fn test_evict_keeps_claimed_partitions() {
        let mut agg = FootprintAggregator::new();
        agg.absorb(&make_trade("BBCA", BUCKET, 100.0, 1.0));
        agg.absorb(&make_trade("TLKM", BUCKET, 50.0, 1.0));
        agg.absorb(&make_trade("TLKM", BUCKET + 3_600_000, 50.0, 1.0));

        let evicted = agg.evict_before(BUCKET + 60_000, |key| key.instrument == "BBCA");
        assert_eq!(evicted, 1);
        assert_eq!(agg.snapshot("BBCA").len(), 1);
        assert_eq!(agg.snapshot("TLKM").len(), 1);
        assert_eq!(agg.candle_count(), 2);
        assert_eq!(agg.instrument_count(), 2);
    }

    #[test]
    fn test_remove_partition_keeps_other_hours() {
        let mut agg = FootprintAggregator::new();
        let key = agg.absorb(&make_trade("BBCA", BUCKET, 100.0, 1.0)).unwrap();
        agg.absorb(&make_trade("BBCA", BUCKET + 60_000, 101.0, 1.0));
        agg.absorb(&make_trade("BBCA", BUCKET + 3_600_000, 102.0, 1.0));

        assert_eq!(agg.remove_partition(&key), 2);
        assert_eq!(agg.snapshot("BBCA").len(), 1);
        assert_eq!(agg.remove_partition(&key), 0);
    }
}
