//! Partitions with unflushed in-memory changes.

use footprint_core::PartitionKey;
use std::collections::{HashSet, VecDeque};

/// Set of dirty partition keys. A key leaves only once its write succeeded.
///
/// Keys are kept in the order they became dirty, so a key written and then
/// re-marked queues behind the keys still waiting.
#[derive(Debug, Default, Clone)]
pub struct DirtySet {
    order: VecDeque<PartitionKey>,
    members: HashSet<PartitionKey>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a partition dirty. Returns `true` if it was clean.
    pub fn mark(&mut self, key: PartitionKey) -> bool {
        if !self.members.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        true
    }

    /// Mark a partition clean after a successful write.
    pub fn clear_key(&mut self, key: &PartitionKey) -> bool {
        if !self.members.remove(key) {
            return false;
        }
        self.order.retain(|k| k != key);
        true
    }

    /// Move a still-dirty key behind the others, e.g. after a failed write.
    pub fn requeue(&mut self, key: &PartitionKey) {
        if self.members.contains(key) {
            self.order.retain(|k| k != key);
            self.order.push_back(key.clone());
        }
    }

    pub fn contains(&self, key: &PartitionKey) -> bool {
        self.members.contains(key)
    }

    /// Up to `limit` dirty keys, longest waiting first. Keys stay dirty.
    pub fn batch(&self, limit: usize) -> Vec<PartitionKey> {
        self.order.iter().take(limit).cloned().collect()
    }

    /// Every dirty key.
    pub fn snapshot(&self) -> Vec<PartitionKey> {
        self.order.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(instrument: &str, hour: u32) -> PartitionKey {
        PartitionKey::from_parts(instrument, 2024, 3, 5, hour).unwrap()
    }

    #[test]
    fn test_mark_and_batch() {
        let mut dirty = DirtySet::new();
        assert!(dirty.mark(key("BBCA", 2)));
        assert!(!dirty.mark(key("BBCA", 2)));
        dirty.mark(key("AALI", 3));
        dirty.mark(key("TLKM", 1));

        let batch = dirty.batch(2);
        assert_eq!(batch, vec![key("BBCA", 2), key("AALI", 3)]);
        assert_eq!(dirty.len(), 3);

        assert!(dirty.clear_key(&key("AALI", 3)));
        assert!(!dirty.contains(&key("AALI", 3)));
        assert_eq!(dirty.snapshot().len(), 2);
    }

    #[test]
    fn test_rewritten_key_queues_behind_waiting_ones() {
        let mut dirty = DirtySet::new();
        for code in ["AAAA", "BBBB", "ZZZZ"] {
            dirty.mark(key(code, 2));
        }

        for written in dirty.batch(2) {
            dirty.clear_key(&written);
        }
        // Remarking an already dirty key keeps its place.
        for code in ["AAAA", "BBBB", "ZZZZ"] {
            dirty.mark(key(code, 2));
        }
        assert_eq!(dirty.batch(2), vec![key("ZZZZ", 2), key("AAAA", 2)]);

        dirty.requeue(&key("ZZZZ", 2));
        assert_eq!(dirty.batch(3), vec![key("AAAA", 2), key("BBBB", 2), key("ZZZZ", 2)]);
    }
}
