//! Hour partitions of the footprint store.
//!
//! A partition holds every candle of one instrument within one UTC hour and
//! lives at `footprint/{instrument}/1m/{yyyy}/{mm}/{dd}/{hh}.jsonl`.

use crate::types::{ts_to_datetime, TimestampMs, HOUR_MS};
use chrono::{Datelike, NaiveDate, Timelike};
use std::fmt;

const ROOT: &str = "footprint";
const TIMEFRAME: &str = "1m";
const EXTENSION: &str = ".jsonl";

/// Identity of one hour partition: (instrument, UTC date, UTC hour).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionKey {
    pub instrument: String,
    pub date: NaiveDate,
    pub hour: u32,
}

impl PartitionKey {
    /// Partition holding the given timestamp.
    pub fn for_timestamp(instrument: impl Into<String>, ts_ms: TimestampMs) -> Option<Self> {
        let dt = ts_to_datetime(ts_ms)?;
        Some(Self {
            instrument: instrument.into(),
            date: dt.date_naive(),
            hour: dt.hour(),
        })
    }

    /// Build a key from explicit calendar fields.
    pub fn from_parts(instrument: impl Into<String>, year: i32, month: u32, day: u32, hour: u32) -> Option<Self> {
        if hour > 23 {
            return None;
        }
        Some(Self {
            instrument: instrument.into(),
            date: NaiveDate::from_ymd_opt(year, month, day)?,
            hour,
        })
    }

    /// First millisecond of the hour.
    pub fn hour_start_ms(&self) -> TimestampMs {
        self.date
            .and_hms_opt(self.hour, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .unwrap_or_default()
    }

    /// First millisecond after the hour.
    pub fn hour_end_ms(&self) -> TimestampMs {
        self.hour_start_ms() + HOUR_MS
    }

    /// Whether a timestamp falls inside this partition's hour.
    pub fn contains(&self, ts_ms: TimestampMs) -> bool {
        (self.hour_start_ms()..self.hour_end_ms()).contains(&ts_ms)
    }

    /// `YYYY/MM/DD/HH`, the locator carried by fan-out messages.
    pub fn hour_prefix(&self) -> String {
        format!(
            "{:04}/{:02}/{:02}/{:02}",
            self.date.year(),
            self.date.month(),
            self.date.day(),
            self.hour
        )
    }

    /// Object path of the live partition.
    pub fn object_path(&self) -> String {
        format!("{}/{}/{}/{}{}", ROOT, self.instrument, TIMEFRAME, self.hour_prefix(), EXTENSION)
    }

    /// Object path of the staged (warmup) partition, e.g. `.../07_TEMP.jsonl`.
    pub fn staged_path(&self, suffix: &str) -> String {
        format!(
            "{}/{}/{}/{}{}{}",
            ROOT,
            self.instrument,
            TIMEFRAME,
            self.hour_prefix(),
            suffix,
            EXTENSION
        )
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object_path())
    }
}
