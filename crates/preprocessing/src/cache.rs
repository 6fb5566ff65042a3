//! Content-addressed preprocessing cache
//!
//! Keyed by `(source artifact, operator)`. Bounded three ways:
//!
//! 1. entry count: inserting past `max_entries` evicts the least recently
//!    used entry
//! 2. memory: while the approximate payload size exceeds the budget, the
//!    least recently used entry is evicted
//! 3. age: entries older than the TTL are dropped on access and by
//!    `perform_maintenance`, regardless of use
//!
//! Recency is tracked with a monotonically increasing access tick so LRU
//! order stays strict even when two accesses share a timestamp.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::CacheConfig;
use crate::types::PreprocessedImageData;

/// Deterministic cache key for a source artifact and operator
pub fn cache_key(source_artifact: &str, operator: &str) -> String {
    format!("{}::{}", operator, source_artifact)
}

/// Observability counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, zero before the first lookup
    pub hit_rate: f64,
    pub entries: usize,
    pub memory_bytes: usize,
    pub evictions: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: PreprocessedImageData,
    size_bytes: usize,
    access_count: u64,
    last_accessed_at: Instant,
    created_at: Instant,
    tick: u64,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    memory_bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    tick: u64,
}

impl CacheInner {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.memory_bytes = self.memory_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.tick)
            .map(|(k, _)| k.clone());
        match oldest {
            Some(key) => {
                self.remove(&key);
                self.evictions += 1;
                log::debug!("Evicted preprocessing cache entry '{}'", key);
                true
            }
            None => false,
        }
    }
}

/// LRU + TTL + memory-bounded cache of preprocessing results
pub struct PreprocessingCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl PreprocessingCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a key, counting a hit or a miss
    ///
    /// Expired entries are removed and reported as misses.
    pub fn get(&self, key: &str) -> Option<PreprocessedImageData> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        let expired = inner
            .entries
            .get(key)
            .map(|e| now.duration_since(e.created_at) >= self.config.ttl());
        match expired {
            Some(false) => {
                let tick = inner.next_tick();
                inner.hits += 1;
                let entry = inner.entries.get_mut(key)?;
                entry.access_count += 1;
                entry.last_accessed_at = now;
                entry.tick = tick;
                log::debug!("Preprocessing cache hit for '{}'", key);
                Some(entry.value.clone())
            }
            Some(true) => {
                inner.remove(key);
                inner.misses += 1;
                log::debug!("Preprocessing cache entry '{}' expired", key);
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Look up the result of `operator` applied to `source_artifact`
    pub fn get_for(&self, source_artifact: &str, operator: &str) -> Option<PreprocessedImageData> {
        self.get(&cache_key(source_artifact, operator))
    }

    /// Insert or overwrite, then enforce the count and memory bounds
    pub fn set(&self, key: impl Into<String>, value: PreprocessedImageData) {
        let key = key.into();
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let size_bytes = value.size_bytes();

        inner.remove(&key);
        let tick = inner.next_tick();
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                size_bytes,
                access_count: 0,
                last_accessed_at: now,
                created_at: now,
                tick,
            },
        );
        inner.memory_bytes += size_bytes;

        while inner.entries.len() > self.config.max_entries {
            if !inner.evict_lru() {
                break;
            }
        }

        let budget = self.config.max_memory_bytes();
        while inner.memory_bytes > budget {
            if !inner.evict_lru() {
                break;
            }
        }
    }

    /// Store the result of `operator` applied to `source_artifact`
    pub fn set_for(&self, source_artifact: &str, operator: &str, value: PreprocessedImageData) {
        self.set(cache_key(source_artifact, operator), value);
    }

    /// Whether a live entry exists; does not touch recency or counters
    pub fn contains(&self, key: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .is_some_and(|e| Instant::now().duration_since(e.created_at) < self.config.ttl())
    }

    /// How many times an entry has been read
    pub fn access_count(&self, key: &str) -> Option<u64> {
        self.inner.lock().entries.get(key).map(|e| e.access_count)
    }

    /// When an entry was last read or written
    pub fn last_accessed_at(&self, key: &str) -> Option<Instant> {
        self.inner.lock().entries.get(key).map(|e| e.last_accessed_at)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Drop every entry; counters are kept
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.memory_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Remove every entry older than the TTL, returning how many went
    pub fn perform_maintenance(&self) -> usize {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let ttl = self.config.ttl();

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.created_at) >= ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }

        if !expired.is_empty() {
            log::debug!("Removed {} expired preprocessing cache entries", expired.len());
        }
        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
            entries: inner.entries.len(),
            memory_bytes: inner.memory_bytes,
            evictions: inner.evictions,
        }
    }
}

impl Default for PreprocessingCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
