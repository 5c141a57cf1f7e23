//! Cache storage.
//!
//! [`CacheBackend`] is the seam for external caches. [`MemoryCache`] is the
//! in-process implementation: an LRU map with optional expiry and a tag
//! index for grouped invalidation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use schemata_core::{Error, Result, Value};
use serde::Serialize;

/// Storage behind the cache plugin.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value`, replacing any entry under `key`.
    fn set(&self, key: &str, value: Value, tags: &[String]) -> Result<()>;

    fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every entry whose key starts with `prefix`; returns how many.
    fn evict_prefix(&self, prefix: &str) -> Result<usize>;

    /// Remove every entry carrying one of `tags`; returns how many.
    fn evict_tags(&self, tags: &[String]) -> Result<usize>;

    fn clear(&self) -> Result<()>;

    fn stats(&self) -> Result<CacheStats>;
}

/// Counters of a cache backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed by capacity, expiry or invalidation.
    pub evictions: u64,
    pub entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Replacement and expiry policy of a [`MemoryCache`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheStrategy {
    /// Least recently used entries go first; nothing expires.
    Lru { capacity: usize },
    /// Entries expire `ttl` after being stored.
    Ttl { ttl: Duration, capacity: usize },
    /// TTL scaled by popularity: entries read at least `hot_threshold`
    /// times live `hot_factor` times longer, the others `cold_factor` times.
    Smart {
        base_ttl: Duration,
        capacity: usize,
        hot_threshold: u64,
        hot_factor: f64,
        cold_factor: f64,
    },
}

impl Default for CacheStrategy {
    fn default() -> Self {
        CacheStrategy::Lru { capacity: 1000 }
    }
}

impl CacheStrategy {
    pub fn smart(base_ttl: Duration, capacity: usize) -> Self {
        CacheStrategy::Smart {
            base_ttl,
            capacity,
            hot_threshold: 5,
            hot_factor: 2.0,
            cold_factor: 0.5,
        }
    }

    fn capacity(&self) -> usize {
        match self {
            CacheStrategy::Lru { capacity }
            | CacheStrategy::Ttl { capacity, .. }
            | CacheStrategy::Smart { capacity, .. } => *capacity,
        }
    }

    /// Lifetime of an entry read `hits` times, `None` for no expiry.
    fn ttl(&self, hits: u64) -> Option<Duration> {
        match self {
            CacheStrategy::Lru { .. } => None,
            CacheStrategy::Ttl { ttl, .. } => Some(*ttl),
            CacheStrategy::Smart {
                base_ttl,
                hot_threshold,
                hot_factor,
                cold_factor,
                ..
            } => {
                let factor = if hits >= *hot_threshold {
                    *hot_factor
                } else {
                    *cold_factor
                };
                Some(base_ttl.mul_f64(factor))
            }
        }
    }
}

struct Entry {
    value: Value,
    inserted: Instant,
    hits: u64,
    tags: Vec<String>,
}

struct Inner {
    entries: LruCache<String, Entry>,
    /// tag -> keys carrying it
    tags: BTreeMap<String, BTreeSet<String>>,
    stats: CacheStats,
}

impl Inner {
    fn unlink(&mut self, key: &str, entry: &Entry) {
        for tag in &entry.tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.pop(key) {
            Some(entry) => {
                self.unlink(key, &entry);
                self.stats.evictions += 1;
                true
            }
            None => false,
        }
    }
}

/// In-process [`CacheBackend`].
pub struct MemoryCache {
    strategy: CacheStrategy,
    inner: Mutex<Inner>,
}

impl fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(CacheStrategy::default())
    }
}

impl MemoryCache {
    pub fn new(strategy: CacheStrategy) -> Self {
        let capacity = NonZeroUsize::new(strategy.capacity()).unwrap_or(NonZeroUsize::MIN);
        Self {
            strategy,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                tags: BTreeMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn strategy(&self) -> &CacheStrategy {
        &self.strategy
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Cache("cache lock poisoned".to_string()))
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Result<Option<Value>> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let expired = match inner.entries.get_mut(key) {
            None => {
                inner.stats.misses += 1;
                return Ok(None);
            }
            Some(entry) => self
                .strategy
                .ttl(entry.hits)
                .is_some_and(|ttl| now.duration_since(entry.inserted) >= ttl),
        };
        if expired {
            inner.remove(key);
            inner.stats.misses += 1;
            return Ok(None);
        }
        let value = inner.entries.get_mut(key).map(|entry| {
            entry.hits += 1;
            entry.value.clone()
        });
        inner.stats.hits += 1;
        Ok(value)
    }

    pub(crate) fn set_at(&self, key: &str, value: Value, tags: &[String], now: Instant) -> Result<()> {
        let mut guard = self.lock()?;
        let inner = &mut *guard;
        let entry = Entry {
            value,
            inserted: now,
            hits: 0,
            tags: tags.to_vec(),
        };
        if let Some(old) = inner.entries.pop(key) {
            inner.unlink(key, &old);
        }
        for tag in tags {
            inner
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        if let Some((evicted_key, evicted)) = inner.entries.push(key.to_string(), entry) {
            inner.unlink(&evicted_key, &evicted);
            inner.stats.evictions += 1;
            tracing::trace!(key = %evicted_key, "cache entry evicted for capacity");
        }
        Ok(())
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        self.get_at(key, Instant::now())
    }

    fn set(&self, key: &str, value: Value, tags: &[String]) -> Result<()> {
        self.set_at(key, value, tags, Instant::now())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.remove(key))
    }

    fn evict_prefix(&self, prefix: &str) -> Result<usize> {
        let mut inner = self.lock()?;
        let keys: Vec<String> = inner
            .entries
            .iter()
            .map(|(k, _)| k)
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            inner.remove(key);
        }
        Ok(keys.len())
    }

    fn evict_tags(&self, tags: &[String]) -> Result<usize> {
        let mut inner = self.lock()?;
        let keys: BTreeSet<String> = tags
            .iter()
            .filter_map(|tag| inner.tags.get(tag))
            .flatten()
            .cloned()
            .collect();
        let mut removed = 0;
        for key in &keys {
            if inner.remove(key) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn clear(&self) -> Result<()> {
        let mut inner = self.lock()?;
        let count = inner.entries.len() as u64;
        inner.entries.clear();
        inner.tags.clear();
        inner.stats.evictions += count;
        Ok(())
    }

    fn stats(&self) -> Result<CacheStats> {
        let inner = self.lock()?;
        Ok(CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        })
    }
}
