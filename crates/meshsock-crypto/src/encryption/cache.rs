//! LRU-on-insert, TTL-expiring cache of `(algorithm, plaintext) → ciphertext`.
//!
//! The cache key is a cheap digest of `(algorithm, length, prefix)` rather
//! than a full hash of the plaintext — it's a speed cache, not a
//! correctness mechanism. A colliding key can only return a stale
//! ciphertext for a different plaintext of the same length and prefix;
//! this is an accepted trade documented at the call site.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::hash::fnv1a_hex;
use crate::symmetric::Algorithm;

/// Number of leading characters of the plaintext folded into the cache key.
const KEY_PREFIX_LEN: usize = 32;

/// One cached ciphertext.
#[derive(Debug, Clone)]
pub struct EncryptionCacheEntry {
    /// The cached, base64-encoded ciphertext.
    pub ciphertext: String,
    /// When this entry was inserted.
    pub inserted_at: Instant,
    /// Number of times this entry has been returned on a hit.
    pub use_count: u64,
}

/// Build the cache key for a `(algorithm, plaintext)` pair.
pub fn cache_key(algorithm: Algorithm, plaintext: &str) -> String {
    let prefix_end = plaintext
        .char_indices()
        .nth(KEY_PREFIX_LEN)
        .map(|(idx, _)| idx)
        .unwrap_or(plaintext.len());
    let material = format!("{}:{}:{}", algorithm.name(), plaintext.len(), &plaintext[..prefix_end]);
    fnv1a_hex(&material)
}

/// Bounded, TTL-expiring encryption cache.
///
/// Insertion order doubles as the LRU proxy: a hit moves the entry to the
/// tail, and inserting into a full cache evicts the head.
pub struct EncryptionCache {
    entries: HashMap<String, EncryptionCacheEntry>,
    order: Vec<String>,
    max_size: usize,
    ttl: Duration,
}

impl EncryptionCache {
    /// Create a new cache with the given capacity and entry lifetime.
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
        Some(entry.ciphertext.clone())
    }

    /// Insert or overwrite `key`, evicting the LRU head if the cache is
    /// at capacity.
    pub fn insert(&mut self, key: String, ciphertext: String) {
        if self.entries.contains_key(&key) {
            self.entries.insert(
                key.clone(),
                EncryptionCacheEntry {
                    ciphertext,
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
            EncryptionCacheEntry {
                ciphertext,
                inserted_at: Instant::now(),
                use_count: 0,
            },
        );
        self.order.push(key);
    }

    /// Number of live entries (expired entries are not proactively swept,
    /// so this may include entries that would expire on next access).
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
