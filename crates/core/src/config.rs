//! Configuration structures for the footprint engine.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Wire normalization and dedup configuration.
    pub ingest: IngestConfig,
    /// Wake-up and partition flush configuration.
    pub flush: FlushConfig,
    /// Finalization fan-out configuration.
    pub notify: NotifyConfig,
    /// Durable store configuration.
    pub storage: StorageConfig,
}

impl Config {
    /// Load a JSON config file. Missing sections and fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.ingest.regular_board.is_empty() {
            return Err(Error::config("ingest.regular_board must not be empty"));
        }
        if self.ingest.dedup_ttl_ms <= 0 {
            return Err(Error::config("ingest.dedup_ttl_ms must be positive"));
        }
        if self.flush.interval_ms == 0 {
            return Err(Error::config("flush.interval_ms must be positive"));
        }
        if self.flush.max_partitions_per_wake == 0 {
            return Err(Error::config("flush.max_partitions_per_wake must be positive"));
        }
        if self.flush.staged_suffix.is_empty() {
            return Err(Error::config("flush.staged_suffix must not be empty"));
        }
        if self.notify.batch_size == 0 {
            return Err(Error::config("notify.batch_size must be positive"));
        }
        Ok(())
    }
}

/// Wire normalization and dedup configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Board code of the regular market; other boards are rejected.
    pub regular_board: String,
    /// Offset of exchange local time from UTC, applied to delimited records.
    pub exchange_utc_offset_secs: i32,
    /// How long a content hash blocks redeliveries (ms).
    pub dedup_ttl_ms: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            regular_board: "RG".to_string(),
            exchange_utc_offset_secs: 7 * 3600,
            dedup_ttl_ms: 300_000,
        }
    }
}

/// Wake-up and partition flush configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlushConfig {
    /// Delay before the first wake-up after start (ms).
    pub initial_arm_ms: u64,
    /// Delay between wake-ups (ms).
    pub interval_ms: u64,
    /// Maximum partitions written per wake-up; the rest wait for the next one.
    pub max_partitions_per_wake: usize,
    /// Clean candles older than this are dropped from memory after a flush (ms).
    pub candle_retention_ms: i64,
    /// Suffix that marks staged warmup partitions.
    pub staged_suffix: String,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            initial_arm_ms: 2_000,
            interval_ms: 5_000,
            max_partitions_per_wake: 50,
            candle_retention_ms: 2 * 60 * 60 * 1000,
            staged_suffix: "_TEMP".to_string(),
        }
    }
}

/// Finalization fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// How long a notified bucket stays suppressed (ms).
    pub ttl_ms: i64,
    /// Minimum spacing between prunes of the notified table (ms).
    pub prune_interval_ms: i64,
    /// Messages per dispatch call.
    pub batch_size: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 3 * 60 * 60 * 1000,
            prune_interval_ms: 30_000,
            batch_size: 100,
        }
    }
}

/// Durable store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the filesystem object store.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./data"),
        }
    }
}
