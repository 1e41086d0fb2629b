//! In-Memory Remote Cache
//!
//! Reference [`RemoteCache`] with per-key expiry, a priority ranking and
//! glob scans. Expired entries are dropped lazily on access.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::cache::pattern::glob_match;
use crate::domain::ports::{Probe, RemoteCache};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// Shared key-value cache kept in process memory
pub struct InMemoryRemoteCache {
    entries: DashMap<String, Entry>,
    priorities: DashMap<String, i64>,
    available: AtomicBool,
}

impl InMemoryRemoteCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            priorities: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Make every call fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::upstream("remote-cache", "connection refused"))
        }
    }

    fn live(&self, key: &str) -> Option<Entry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.clone();
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.entries.remove(key);
            self.priorities.remove(key);
            None
        }
    }

    /// Live keys matching a pattern, sorted for stable scan cursors.
    fn matching_keys(&self, pattern: &str) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.is_live(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }
}

impl Default for InMemoryRemoteCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for InMemoryRemoteCache {
    async fn probe(&self) -> Result<()> {
        self.check()
    }
}

#[async_trait]
impl RemoteCache for InMemoryRemoteCache {
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Bytes, Option<Duration>)>> {
        self.check()?;
        Ok(self.live(key).map(|entry| {
            let ttl = entry
                .expires_at
                .map(|at| at.saturating_duration_since(Instant::now()));
            (entry.value, ttl)
        }))
    }

    async fn set_with_priority(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
        priority: i64,
    ) -> Result<()> {
        self.check()?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        self.priorities.insert(key.to_string(), priority);
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        self.check()?;
        Ok(keys
            .iter()
            .map(|k| self.live(k).map(|e| e.value))
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        self.priorities.remove(key);
        Ok(self.entries.remove(key).is_some())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<u64> {
        self.check()?;
        let keys = self.matching_keys(pattern);
        for key in &keys {
            self.entries.remove(key);
            self.priorities.remove(key);
        }
        Ok(keys.len() as u64)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)> {
        self.check()?;
        let keys = self.matching_keys(pattern);
        let start = (cursor as usize).min(keys.len());
        let end = start.saturating_add(count.max(1)).min(keys.len());
        let next = if end >= keys.len() { 0 } else { end as u64 };
        Ok((next, keys[start..end].to_vec()))
    }

    async fn top_priority(&self, limit: usize) -> Result<Vec<String>> {
        self.check()?;
        let now = Instant::now();
        let mut ranked: Vec<(String, i64)> = self
            .priorities
            .iter()
            .filter(|p| {
                self.entries
                    .get(p.key())
                    .map_or(false, |e| e.is_live(now))
            })
            .map(|p| (p.key().clone(), *p.value()))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        Ok(ranked.into_iter().map(|(k, _)| k).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[tokio::test]
    async fn test_get_with_ttl() {
        let cache = InMemoryRemoteCache::new();
        cache
            .set_with_priority("k", v("1"), Duration::from_secs(30), 0)
            .await
            .unwrap();
        let (value, ttl) = cache.get_with_ttl("k").await.unwrap().unwrap();
        assert_eq!(value, v("1"));
        assert!(ttl.unwrap() <= Duration::from_secs(30));
        assert!(cache.get_with_ttl("absent").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let cache = InMemoryRemoteCache::new();
        cache
            .set_with_priority("k", v("1"), Duration::from_secs(5), 0)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get_with_ttl("k").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_mget_alignment() {
        let cache = InMemoryRemoteCache::new();
        let ttl = Duration::from_secs(60);
        cache.set_with_priority("a", v("1"), ttl, 0).await.unwrap();
        cache.set_with_priority("c", v("3"), ttl, 0).await.unwrap();
        let out = cache
            .mget(&["a".into(), "b".into(), "c".into()])
            .await
            .unwrap();
        assert_eq!(out, vec![Some(v("1")), None, Some(v("3"))]);
    }

    #[tokio::test]
    async fn test_scan_pages_and_delete_pattern() {
        let cache = InMemoryRemoteCache::new();
        let ttl = Duration::from_secs(60);
        for i in 0..5 {
            cache
                .set_with_priority(&format!("search:{i}"), v("x"), ttl, i)
                .await
                .unwrap();
        }
        cache.set_with_priority("meta", v("x"), ttl, 99).await.unwrap();

        let (next, page) = cache.scan(0, "search:*", 2).await.unwrap();
        assert_eq!(page, vec!["search:0", "search:1"]);
        assert_eq!(next, 2);
        let (next, page) = cache.scan(4, "search:*", 2).await.unwrap();
        assert_eq!(page, vec!["search:4"]);
        assert_eq!(next, 0);

        assert_eq!(cache.top_priority(2).await.unwrap(), vec!["meta", "search:4"]);
        assert_eq!(cache.delete_pattern("search:*").await.unwrap(), 5);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable() {
        let cache = InMemoryRemoteCache::new();
        cache.set_available(false);
        assert!(cache.get_with_ttl("k").await.is_err());
        assert!(cache.probe().await.is_err());
    }
}
