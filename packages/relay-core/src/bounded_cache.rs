//! Bounded set of processed event keys.
//!
//! The relay remembers every `(tx_hash, log_index)` it has acted on so that a
//! re-scan of the same window does not submit twice. The set is capped so a
//! long-running process cannot grow without bound.
//!
//! ## Sizing
//!
//! - Each entry is ~56 bytes (32-byte hash + 8-byte index + 16-byte Instant),
//!   so the default 200k entries stay under 12 MB.
//! - Keys older than the TTL are dropped before evicting by age.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use crate::types::ProcessedEventKey;

pub const DEFAULT_PROCESSED_CACHE_SIZE: usize = 200_000;
pub const DEFAULT_PROCESSED_CACHE_TTL_SECS: u64 = 7 * 86_400;

/// Set with TTL and capacity limits.
///
/// - **Max capacity:** when full, the oldest entry is evicted on insert.
/// - **TTL:** entries older than TTL read as absent and are purged on insert.
#[derive(Debug, Clone)]
pub struct BoundedKeyCache<K> {
    map: HashMap<K, Instant>,
    max_size: usize,
    ttl: Duration,
}

pub type ProcessedKeyCache = BoundedKeyCache<ProcessedEventKey>;

impl<K: Hash + Eq + Copy> BoundedKeyCache<K> {
    pub fn new(max_size: usize, ttl_secs: u64) -> Self {
        Self {
            map: HashMap::new(),
            max_size: max_size.max(1),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.get(key).is_some_and(|&t| t.elapsed() < self.ttl)
    }

    /// Insert a key; returns false if it was already present
    pub fn insert(&mut self, key: K) -> bool {
        if self.contains(&key) {
            return false;
        }

        let now = Instant::now();
        self.map.retain(|_, &mut t| now.duration_since(t) < self.ttl);
        while self.map.len() >= self.max_size {
            let oldest = self.map.iter().min_by_key(|(_, t)| **t).map(|(k, _)| *k);
            match oldest {
                Some(k) => {
                    self.map.remove(&k);
                }
                None => break,
            }
        }
        self.map.insert(key, now);
        true
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<K: Hash + Eq + Copy> Default for BoundedKeyCache<K> {
    fn default() -> Self {
        Self::new(DEFAULT_PROCESSED_CACHE_SIZE, DEFAULT_PROCESSED_CACHE_TTL_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;

    fn key(n: u8) -> ProcessedEventKey {
        ProcessedEventKey::new(B256::repeat_byte(n), n as u64)
    }

    #[test]
    fn test_insert_and_contains() {
        let mut cache = ProcessedKeyCache::new(10, 3600);
        assert!(cache.insert(key(1)));
        assert!(cache.contains(&key(1)));
        assert!(!cache.contains(&key(2)));
        assert!(!cache.insert(key(1)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_same_tx_different_log_index() {
        let mut cache = ProcessedKeyCache::new(10, 3600);
        let tx = B256::repeat_byte(7);
        cache.insert(ProcessedEventKey::new(tx, 0));
        assert!(!cache.contains(&ProcessedEventKey::new(tx, 1)));
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut cache = ProcessedKeyCache::new(3, 3600);
        cache.insert(key(1));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(key(2));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(key(3));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(key(4));

        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(4)));
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = ProcessedKeyCache::new(10, 0);
        cache.insert(key(1));
        assert!(!cache.contains(&key(1)));
    }
}
