//! Local Frequency Cache
//!
//! In-process tier with least-frequently-used eviction and no TTL.
//!
//! # Design
//!
//! ```text
//!   values:  key ─► (value, freq)
//!   buckets: freq ─► {keys}          min_freq ─► lowest non-empty bucket
//!
//!   access:  move key from bucket f to f+1; if bucket f empties and was
//!            the minimum, min_freq = f+1
//!   insert:  at capacity evict any key of bucket min_freq, then min_freq = 1
//! ```
//!
//! Get and put are O(1). Which key of the minimum bucket is evicted is
//! unspecified.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;

use super::pattern::glob_match;

/// Single-threaded LFU map
#[derive(Debug)]
pub struct LfuCache<V> {
    capacity: usize,
    values: HashMap<String, (V, u64)>,
    buckets: HashMap<u64, HashSet<String>>,
    min_freq: u64,
}

impl<V> LfuCache<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: HashMap::with_capacity(capacity.min(1 << 16)),
            buckets: HashMap::new(),
            min_freq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Access count of a resident key
    pub fn frequency(&self, key: &str) -> Option<u64> {
        self.values.get(key).map(|(_, f)| *f)
    }

    /// Look up a key and count the access.
    pub fn get(&mut self, key: &str) -> Option<&V> {
        if !self.values.contains_key(key) {
            return None;
        }
        self.touch(key);
        self.values.get(key).map(|(v, _)| v)
    }

    /// Insert or replace a value. Returns the evicted key, if any.
    ///
    /// Replacing a resident key counts as an access.
    pub fn put(&mut self, key: String, value: V) -> Option<String> {
        if self.capacity == 0 {
            return None;
        }
        if let Some(slot) = self.values.get_mut(&key) {
            slot.0 = value;
            self.touch(&key);
            return None;
        }

        let evicted = if self.values.len() >= self.capacity {
            self.evict()
        } else {
            None
        };

        self.values.insert(key.clone(), (value, 1));
        self.buckets.entry(1).or_default().insert(key);
        self.min_freq = 1;
        evicted
    }

    /// Remove a key from the cache.
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let (value, freq) = self.values.remove(key)?;
        self.detach(key, freq);
        if self.min_freq == freq && !self.buckets.contains_key(&freq) {
            // Rare path: rescan the remaining frequency classes
            self.min_freq = self.buckets.keys().copied().min().unwrap_or(0);
        }
        Some(value)
    }

    /// Remove every key matching the predicate. Returns the number removed.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&str) -> bool) -> usize {
        let doomed: Vec<String> = self.values.keys().filter(|k| pred(k)).cloned().collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.buckets.clear();
        self.min_freq = 0;
    }

    fn touch(&mut self, key: &str) {
        let Some(slot) = self.values.get_mut(key) else {
            return;
        };
        let freq = slot.1;
        slot.1 = freq + 1;

        self.detach(key, freq);
        if self.min_freq == freq && !self.buckets.contains_key(&freq) {
            self.min_freq = freq + 1;
        }
        self.buckets
            .entry(freq + 1)
            .or_default()
            .insert(key.to_string());
    }

    /// Drop a key from its bucket, removing the bucket once empty.
    fn detach(&mut self, key: &str, freq: u64) {
        if let Some(bucket) = self.buckets.get_mut(&freq) {
            bucket.remove(key);
            if bucket.is_empty() {
                self.buckets.remove(&freq);
            }
        }
    }

    fn evict(&mut self) -> Option<String> {
        let victim = self
            .buckets
            .get(&self.min_freq)
            .and_then(|bucket| bucket.iter().next().cloned())?;
        let freq = self.min_freq;
        self.values.remove(&victim);
        self.detach(&victim, freq);
        Some(victim)
    }
}

// =============================================================================
// Thread-safe Local Tier
// =============================================================================

/// Local tier statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct LocalCacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_ratio: f64,
}

/// LFU cache of byte values behind one mutex, with hit/miss counters.
pub struct LocalCache {
    inner: Mutex<LfuCache<Bytes>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LocalCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LfuCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Look up a key; a hit increments its frequency.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let value = self.inner.lock().get(key).cloned();
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        value
    }

    /// Insert or replace a value, evicting by frequency at capacity.
    pub fn put(&self, key: impl Into<String>, value: Bytes) {
        if self.inner.lock().put(key.into(), value).is_some() {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Remove keys matching a glob pattern
    pub fn remove_matching(&self, pattern: &str) -> usize {
        self.inner.lock().remove_where(|k| glob_match(pattern, k))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> LocalCacheStats {
        let (entries, capacity) = {
            let inner = self.inner.lock();
            (inner.len(), inner.capacity())
        };
        let hits = self.hits();
        let misses = self.misses();
        let total = hits + misses;
        LocalCacheStats {
            entries,
            capacity,
            hits,
            misses,
            evictions: self.evictions(),
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessed_key_survives_eviction() {
        let mut cache = LfuCache::new(2);
        cache.put("A".into(), 1);
        cache.put("B".into(), 2);
        assert_eq!(cache.get("A"), Some(&1));
        assert_eq!(cache.frequency("A"), Some(2));

        let evicted = cache.put("C".into(), 3);
        assert_eq!(evicted.as_deref(), Some("B"));
        assert!(cache.contains("A"));
        assert!(cache.contains("C"));
        assert!(!cache.contains("B"));
    }

    #[test]
    fn test_overflow_evicts_frequency_one() {
        let capacity = 5;
        let mut cache = LfuCache::new(capacity);
        for i in 0..capacity {
            cache.put(format!("k{i}"), i);
        }
        // Promote everything except k3
        for i in [0, 1, 2, 4] {
            cache.get(&format!("k{i}"));
        }
        let evicted = cache.put("new".into(), 99).unwrap();
        assert_eq!(evicted, "k3");
        assert_eq!(cache.len(), capacity);
    }

    #[test]
    fn test_no_repeat_access_evicts_a_first_class_key() {
        let mut cache = LfuCache::new(3);
        for key in ["a", "b", "c"] {
            cache.put(key.into(), ());
        }
        let evicted = cache.put("d".into(), ()).unwrap();
        assert!(["a", "b", "c"].contains(&evicted.as_str()));
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.frequency("d"), Some(1));
    }

    #[test]
    fn test_min_freq_advances() {
        let mut cache = LfuCache::new(2);
        cache.put("a".into(), ());
        cache.get("a");
        assert_eq!(cache.min_freq, 2);
        cache.put("b".into(), ());
        assert_eq!(cache.min_freq, 1);
    }

    #[test]
    fn test_replace_counts_as_access() {
        let mut cache = LfuCache::new(2);
        cache.put("a".into(), 1);
        cache.put("a".into(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.frequency("a"), Some(2));
        assert_eq!(cache.get("a"), Some(&2));
    }

    #[test]
    fn test_remove_recomputes_minimum() {
        let mut cache = LfuCache::new(3);
        cache.put("a".into(), ());
        cache.put("b".into(), ());
        cache.get("b");
        assert_eq!(cache.remove("a"), Some(()));
        assert_eq!(cache.min_freq, 2);
        assert!(cache.remove("missing").is_none());

        cache.put("c".into(), ());
        cache.put("d".into(), ());
        let evicted = cache.put("e".into(), ()).unwrap();
        assert_ne!(evicted, "b");
    }

    #[test]
    fn test_zero_capacity() {
        let mut cache = LfuCache::new(0);
        assert!(cache.put("a".into(), ()).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_local_cache_counters() {
        let cache = LocalCache::new(1);
        cache.put("a", Bytes::from_static(b"1"));
        assert_eq!(cache.get("a"), Some(Bytes::from_static(b"1")));
        assert!(cache.get("b").is_none());
        cache.put("b", Bytes::from_static(b"2"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_local_cache_remove_matching() {
        let cache = LocalCache::new(10);
        cache.put("search:1", Bytes::new());
        cache.put("search:2", Bytes::new());
        cache.put("meta:1", Bytes::new());
        assert_eq!(cache.remove_matching("search:*"), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("meta:1"));
    }
}
