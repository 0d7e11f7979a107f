//! Bounded, TTL-expiring cache of `serialize(envelope, key) → string`.
//!
//! Amortizes broadcast cost: when the same envelope is delivered to many
//! peers, serialize (and encrypt, if configured) runs once and every
//! other recipient reuses the cached string.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// One cached serialized envelope.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached serialized (and possibly encrypted) payload.
    pub serialized: String,
    /// When this entry was inserted.
    pub inserted_at: Instant,
    /// Number of times this entry has been returned on a hit.
    pub use_count: u64,
}

/// Bounded, TTL-expiring memoization of serialized envelopes.
///
/// Insertion order doubles as the LRU proxy: a hit moves the entry to the
/// tail, and inserting into a full cache evicts the head.
pub struct MessageCache {
    entries: HashMap<String, CacheEntry>,
    order: Vec<String>,
    max_size: usize,
    ttl: Duration,
}

impl MessageCache {
    /// Create a cache with the given capacity and entry lifetime.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            max_size,
            ttl,
        }
    }

    /// Look up `key`. Expired entries are treated as absent and removed.
    /// A hit moves the entry to the LRU tail and increments `use_count`.
    pub fn get(&mut self, key: &str) -> Option<String> {
        let expired = match self.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            self.remove(key);
            return None;
        }

        self.touch(key);
        let entry = self.entries.get_mut(key).expect("checked above");
        entry.use_count += 1;
        Some(entry.serialized.clone())
    }

    /// Insert or overwrite `key`, evicting the LRU head if the cache is
    /// at capacity.
    pub fn insert(&mut self, key: String, serialized: String) {
        if self.entries.contains_key(&key) {
            self.entries.insert(
                key.clone(),
                CacheEntry {
                    serialized,
                    inserted_at: Instant::now(),
                    use_count: 0,
                },
            );
            self.touch(&key);
            return;
        }

        if self.max_size > 0 && self.entries.len() >= self.max_size {
            if let Some(oldest) = self.order.first().cloned() {
                self.remove(&oldest);
            }
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                serialized,
                inserted_at: Instant::now(),
                use_count: 0,
            },
        );
        self.order.push(key);
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }
}
