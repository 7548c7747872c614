//! Merge-on-write of hour partitions.
//!
//! At most one write is in flight per partition key. Live and staged objects
//! of the same key share the lock. Different keys write independently.

use crate::codec::{self, CandleMap, PartitionReport};
use crate::store::ObjectStore;
use footprint_core::{FootprintCandle, PartitionKey, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// How a staged write treats an existing staged object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMode {
    /// Start from empty; whatever is staged is replaced.
    Overwrite,
    /// Add onto the staged object; same-bucket candles accumulate.
    Merge,
}

/// Serialized writer for footprint partitions.
pub struct PartitionWriter {
    store: Arc<dyn ObjectStore>,
    /// object path -> write lock.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl PartitionWriter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    async fn key_lock(&self, key: &PartitionKey) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .await
            .entry(key.object_path())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Merge candles into the live partition. New buckets win over stored ones.
    ///
    /// Returns the number of buckets in the written partition.
    pub async fn write_merged(&self, key: &PartitionKey, candles: &[FootprintCandle]) -> Result<usize> {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        let path = key.object_path();
        let mut merged = self.read(&path).await?;
        codec::overlay(&mut merged, candles);
        self.store.put(&path, codec::render_partition(&merged)?).await?;

        tracing::debug!(key = %path, buckets = merged.len(), "partition merged");
        Ok(merged.len())
    }

    /// Write candles to the staged object of a partition.
    pub async fn write_staged(
        &self,
        key: &PartitionKey,
        candles: &[FootprintCandle],
        suffix: &str,
        mode: StageMode,
    ) -> Result<usize> {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        let path = key.staged_path(suffix);
        let mut staged = match mode {
            StageMode::Overwrite => CandleMap::new(),
            StageMode::Merge => self.read(&path).await?,
        };
        codec::combine(&mut staged, candles);
        self.store.put(&path, codec::render_partition(&staged)?).await?;

        tracing::debug!(key = %path, buckets = staged.len(), ?mode, "partition staged");
        Ok(staged.len())
    }

    /// Merge the staged object into the live partition, then delete it.
    ///
    /// Returns the promoted candles, or `None` if nothing was staged.
    pub async fn promote(&self, key: &PartitionKey, suffix: &str) -> Result<Option<Vec<FootprintCandle>>> {
        let lock = self.key_lock(key).await;
        let _guard = lock.lock().await;

        let staged_path = key.staged_path(suffix);
        let staged = match self.store.get(&staged_path).await? {
            Some(text) => codec::parse_partition(&text),
            None => return Ok(None),
        };

        let live_path = key.object_path();
        let mut live = self.read(&live_path).await?;
        codec::overlay(&mut live, staged.values());
        self.store.put(&live_path, codec::render_partition(&live)?).await?;
        self.store.delete(&staged_path).await?;

        tracing::debug!(key = %live_path, promoted = staged.len(), "partition promoted");
        Ok(Some(staged.into_values().collect()))
    }

    /// Summarize the stored live partition, `None` if it does not exist.
    pub async fn inspect(&self, key: &PartitionKey) -> Result<Option<PartitionReport>> {
        let text = self.store.get(&key.object_path()).await?;
        Ok(text.map(|t| codec::inspect_partition(key, &t)))
    }

    /// Number of keys with a lock entry.
    pub async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// Drop lock entries nobody holds or waits on.
    pub async fn prune_idle_locks(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    async fn read(&self, path: &str) -> Result<CandleMap> {
        Ok(self
            .store
            .get(path)
            .await?
            .map(|text| codec::parse_partition(&text))
            .unwrap_or_default())
    }
}
