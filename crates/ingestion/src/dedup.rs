//! Redelivery filter keyed by content hash.
//!
//! The tap delivers at least once. This table drops exact redeliveries seen
//! within the TTL; idempotent partition merges cover anything it misses.

use footprint_core::TimestampMs;
use std::collections::HashMap;

/// Hash table of recently admitted events.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    ttl_ms: i64,
    /// hash -> first-seen time.
    seen: HashMap<String, TimestampMs>,
}

impl Deduplicator {
    /// Create a deduplicator with the given TTL.
    pub fn new(ttl_ms: i64) -> Self {
        Self {
            ttl_ms,
            seen: HashMap::new(),
        }
    }

    /// Admit an event hash. Returns `false` for a duplicate within the TTL.
    pub fn admit(&mut self, hash: &str, now_ms: TimestampMs) -> bool {
        match self.seen.get_mut(hash) {
            Some(first_seen) if now_ms - *first_seen <= self.ttl_ms => false,
            Some(first_seen) => {
                *first_seen = now_ms;
                true
            }
            None => {
                self.seen.insert(hash.to_string(), now_ms);
                true
            }
        }
    }

    /// Evict entries older than the TTL. Returns the number evicted.
    pub fn prune(&mut self, now_ms: TimestampMs) -> usize {
        let before = self.seen.len();
        let ttl_ms = self.ttl_ms;
        self.seen.retain(|_, first_seen| now_ms - *first_seen <= ttl_ms);
        before - self.seen.len()
    }

    /// Number of tracked hashes.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forget every hash.
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: i64 = 300_000;

    #[test]
    fn test_duplicate_within_ttl() {
        let mut dedup = Deduplicator::new(TTL);
        assert!(dedup.admit("a", 1_000));
        assert!(!dedup.admit("a", 2_000));
        assert!(dedup.admit("b", 2_000));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_readmitted_after_prune() {
        let mut dedup = Deduplicator::new(TTL);
        assert!(dedup.admit("a", 0));
        assert!(!dedup.admit("a", TTL));

        assert_eq!(dedup.prune(TTL + 1), 1);
        assert!(dedup.is_empty());
        assert!(dedup.admit("a", TTL + 2));
    }

    #[test]
    fn test_expired_entry_readmitted_before_prune() {
        let mut dedup = Deduplicator::new(TTL);
        assert!(dedup.admit("a", 0));
        assert!(dedup.admit("a", TTL + 1));
        // Refreshed first-seen time blocks the next redelivery.
        assert!(!dedup.admit("a", TTL + 2));
    }

    #[test]
    fn test_prune_keeps_fresh_entries() {
        let mut dedup = Deduplicator::new(TTL);
        dedup.admit("old", 0);
        dedup.admit("new", 200_000);
        assert_eq!(dedup.prune(400_000), 1);
        assert!(!dedup.admit("new", 400_000));
    }
}
