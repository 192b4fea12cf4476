//! Bounded memoization cache with time-to-live and LRU eviction.
//!
//! The cache is a pure optimization layer: callers key it by a canonical tuple
//! of every input the cached computation reads, so a changed input is simply a
//! different key and nothing ever needs explicit invalidation.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
    last_used: u64,
}

/// Hit/miss counters, mostly useful in tests and debug logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

/// A size-bounded map whose entries expire after a fixed TTL.
///
/// Time is passed in explicitly so expiry is testable without sleeping.
#[derive(Debug)]
pub struct BoundedCache<K, V> {
    entries: HashMap<K, Entry<V>>,
    capacity: usize,
    ttl: Duration,
    tick: u64,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: HashMap::with_capacity(capacity),
            capacity,
            ttl,
            tick: 0,
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Look up a live entry, marking it most recently used. Expired entries are dropped.
    pub fn get(&mut self, key: &K, now: Instant) -> Option<V> {
        self.tick += 1;
        let expired = match self.entries.get_mut(key) {
            Some(entry) if now.saturating_duration_since(entry.inserted_at) < self.ttl => {
                entry.last_used = self.tick;
                self.stats.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        self.stats.misses += 1;
        None
    }

    pub fn insert(&mut self, key: K, value: V, now: Instant) {
        self.tick += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.purge_expired(now);
            if self.entries.len() >= self.capacity {
                self.evict_least_recent();
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                last_used: self.tick,
            },
        );
    }

    /// Return the cached value or compute, store and return it.
    pub fn get_or_insert_with(&mut self, key: K, now: Instant, compute: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key, now) {
            return value;
        }
        let value = compute();
        self.insert(key, value.clone(), now);
        value
    }

    fn purge_expired(&mut self, now: Instant) {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < ttl);
        self.stats.evictions += (before - self.entries.len()) as u64;
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(key, _)| key.clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            self.stats.evictions += 1;
        }
    }
}
