//! Tiered Cache Coordinator
//!
//! Composes the in-process LFU tier with a shared remote tier.
//!
//! # Key Lifecycle
//!
//! ```text
//!   MISS ──compute──► POPULATED(local + remote) ──► [HIT]* ──► EVICTED | EXPIRED ──► MISS
//! ```
//!
//! # Read Path
//!
//! ```text
//!   get(key) ──► local ──hit──► (value, Local)
//!                  │ miss
//!                  ▼
//!               remote (value + TTL, one round trip) ──hit──► populate local ──► (value, Remote)
//!                  │ miss / error
//!                  ▼
//!               (None, Miss)
//! ```
//!
//! The local tier has no TTL; entries leave it only by LFU eviction or
//! explicit invalidation.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::compression::ValueCodec;
use super::lfu::{LocalCache, LocalCacheStats};
use super::metrics::{CacheMetrics, CacheStats};
use super::prefetch;
use crate::config::{CacheConfig, PrefetchConfig};
use crate::domain::ports::RemoteCache;
use crate::error::{Error, Result};
use crate::monitoring::EngineMetrics;
use crate::pool::ResourcePool;

/// Keys requested per scan page while warming
const SCAN_PAGE: usize = 100;

// =============================================================================
// Lookup Types
// =============================================================================

/// Tier that answered a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    Local,
    Remote,
    Miss,
}

impl CacheSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheSource::Local => "local",
            CacheSource::Remote => "remote",
            CacheSource::Miss => "miss",
        }
    }
}

impl std::fmt::Display for CacheSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`TieredCache::get`]
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup {
    pub value: Option<Bytes>,
    pub source: CacheSource,
    /// Remaining remote TTL; only known for remote hits
    pub ttl_remaining: Option<Duration>,
}

impl CacheLookup {
    fn miss() -> Self {
        Self {
            value: None,
            source: CacheSource::Miss,
            ttl_remaining: None,
        }
    }

    pub fn is_hit(&self) -> bool {
        self.value.is_some()
    }
}

/// Combined tier statistics
#[derive(Debug, Clone, Serialize)]
pub struct TieredCacheStats {
    pub local: LocalCacheStats,
    pub counters: CacheStats,
}

// =============================================================================
// Tiered Cache
// =============================================================================

/// Local LFU tier in front of a pooled remote tier, with a prefetch queue.
pub struct TieredCache {
    local: LocalCache,
    remote: ResourcePool<dyn RemoteCache>,
    codec: ValueCodec,
    default_ttl: Duration,
    counters: CacheMetrics,
    metrics: Option<EngineMetrics>,
    prefetch_config: PrefetchConfig,
    prefetch_tx: mpsc::Sender<String>,
    prefetch_rx: Mutex<Option<mpsc::Receiver<String>>>,
}

impl TieredCache {
    pub fn new(config: &CacheConfig, remote: ResourcePool<dyn RemoteCache>) -> Self {
        let (prefetch_tx, prefetch_rx) = mpsc::channel(config.prefetch.queue_capacity.max(1));
        Self {
            local: LocalCache::new(config.local_capacity),
            remote,
            codec: ValueCodec::new(&config.compression),
            default_ttl: config.default_ttl(),
            counters: CacheMetrics::new(),
            metrics: None,
            prefetch_config: config.prefetch.clone(),
            prefetch_tx,
            prefetch_rx: Mutex::new(Some(prefetch_rx)),
        }
    }

    /// Mirror lookups and prefetch outcomes into a Prometheus registry
    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The remote tier's pool
    pub fn remote_pool(&self) -> &ResourcePool<dyn RemoteCache> {
        &self.remote
    }

    fn record_source(&self, source: CacheSource) {
        match source {
            CacheSource::Local => self.counters.record_local_hit(),
            CacheSource::Remote => self.counters.record_remote_hit(),
            CacheSource::Miss => self.counters.record_miss(),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_lookup(source.as_str());
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Look a key up in the local tier, then the remote tier.
    ///
    /// A remote hit populates the local tier before returning. Remote errors
    /// degrade to a miss.
    pub async fn get(&self, key: &str) -> CacheLookup {
        if let Some(value) = self.local.get(key) {
            self.record_source(CacheSource::Local);
            return CacheLookup {
                value: Some(value),
                source: CacheSource::Local,
                ttl_remaining: None,
            };
        }

        let started = Instant::now();
        let fetched = {
            let remote = self.remote.acquire();
            remote.get_with_ttl(key).await
        };
        self.counters.record_remote_latency(started.elapsed());

        let lookup = match fetched {
            Ok(Some((framed, ttl))) => match self.codec.decode(&framed) {
                Ok(value) => {
                    self.local.put(key, value.clone());
                    CacheLookup {
                        value: Some(value),
                        source: CacheSource::Remote,
                        ttl_remaining: ttl,
                    }
                }
                Err(e) => {
                    warn!(key, error = %e, "Undecodable remote cache value");
                    self.counters.record_remote_error();
                    CacheLookup::miss()
                }
            },
            Ok(None) => CacheLookup::miss(),
            Err(e) => {
                warn!(key, error = %e, "Remote cache read failed, treating as miss");
                self.counters.record_remote_error();
                CacheLookup::miss()
            }
        };
        self.record_source(lookup.source);
        lookup
    }

    /// Fetch many keys: local hits first, then one multi-get for the rest.
    /// Every remote hit populates the local tier.
    pub async fn batch_get(&self, keys: &[String]) -> HashMap<String, Bytes> {
        let mut found = HashMap::with_capacity(keys.len());
        let mut missing = Vec::new();
        for key in keys {
            match self.local.get(key) {
                Some(value) => {
                    self.record_source(CacheSource::Local);
                    found.insert(key.clone(), value);
                }
                None => missing.push(key.clone()),
            }
        }
        if missing.is_empty() {
            return found;
        }

        let requested = missing.len();
        match self.load_remote(missing).await {
            Ok(loaded) => {
                for _ in 0..loaded.len() {
                    self.record_source(CacheSource::Remote);
                }
                for _ in loaded.len()..requested {
                    self.record_source(CacheSource::Miss);
                }
                found.extend(loaded);
            }
            Err(e) => {
                warn!(keys = requested, error = %e, "Remote multi-get failed");
                self.counters.record_remote_error();
                for _ in 0..requested {
                    self.record_source(CacheSource::Miss);
                }
            }
        }
        found
    }

    /// One multi-get; decoded hits are written to the local tier.
    async fn load_remote(&self, keys: Vec<String>) -> Result<HashMap<String, Bytes>> {
        let started = Instant::now();
        let values = {
            let remote = self.remote.acquire();
            remote.mget(&keys).await?
        };
        self.counters.record_remote_latency(started.elapsed());

        let mut loaded = HashMap::new();
        for (key, framed) in keys.into_iter().zip(values) {
            let Some(framed) = framed else { continue };
            match self.codec.decode(&framed) {
                Ok(value) => {
                    self.local.put(key.clone(), value.clone());
                    loaded.insert(key, value);
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping undecodable remote value");
                    self.counters.record_remote_error();
                }
            }
        }
        Ok(loaded)
    }

    /// Decode a cached JSON value.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await.value {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Write to the remote tier (TTL + priority score), then to the local
    /// tier unconditionally.
    ///
    /// A remote failure is returned as [`Error::UpstreamUnavailable`] after
    /// the local write has happened.
    pub async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
        priority: i64,
    ) -> Result<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let framed = self.codec.encode(&value);
        let remote_result = {
            let remote = self.remote.acquire();
            remote.set_with_priority(key, framed, ttl, priority).await
        };

        self.local.put(key, value);
        if let Some(metrics) = &self.metrics {
            metrics.set_local_cache_entries(self.local.len());
        }

        remote_result.map_err(|e| {
            warn!(key, error = %e, "Remote cache write failed; value kept locally");
            self.counters.record_remote_error();
            Error::upstream("remote-cache", e)
        })
    }

    /// Serialize a value as JSON and [`set`](Self::set) it.
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        priority: i64,
    ) -> Result<()> {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.set(key, bytes, ttl, priority).await
    }

    /// Return the cached value or compute, store and return it.
    ///
    /// A failing remote write does not fail the call; the computed value is
    /// still returned and kept locally.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        priority: i64,
        compute: F,
    ) -> Result<(Bytes, CacheSource)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        let lookup = self.get(key).await;
        if let Some(value) = lookup.value {
            return Ok((value, lookup.source));
        }

        let value = compute().await?;
        if let Err(e) = self.set(key, value.clone(), ttl, priority).await {
            debug!(key, error = %e, "Computed value not stored remotely");
        }
        Ok((value, CacheSource::Miss))
    }

    // =========================================================================
    // Invalidation
    // =========================================================================

    /// Remove one key from both tiers.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let local = self.local.remove(key);
        let remote = {
            let remote = self.remote.acquire();
            remote.delete(key).await
        }
        .map_err(|e| Error::upstream("remote-cache", e))?;
        Ok(local || remote)
    }

    /// Remove every key matching a glob from both tiers. Returns the number
    /// of remote keys deleted.
    #[instrument(skip(self))]
    pub async fn invalidate_pattern(&self, pattern: &str) -> Result<u64> {
        let local = self.local.remove_matching(pattern);
        let remote = {
            let remote = self.remote.acquire();
            remote.delete_pattern(pattern).await
        }
        .map_err(|e| Error::upstream("remote-cache", e))?;
        info!(local, remote, "Cache entries invalidated");
        Ok(remote)
    }

    // =========================================================================
    // Warming
    // =========================================================================

    /// Scan remote keys matching `pattern` and load up to `limit` of them
    /// into the local tier. Returns the number loaded.
    #[instrument(skip(self))]
    pub async fn warm(&self, pattern: &str, limit: usize) -> Result<usize> {
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        {
            let remote = self.remote.acquire();
            loop {
                let (next, page) = remote
                    .scan(cursor, pattern, SCAN_PAGE)
                    .await
                    .map_err(|e| Error::upstream("remote-cache", e))?;
                keys.extend(page);
                if next == 0 || keys.len() >= limit {
                    break;
                }
                cursor = next;
            }
        }
        keys.truncate(limit);
        self.warm_keys(keys).await
    }

    /// Load the `limit` highest-priority remote keys into the local tier.
    pub async fn warm_hottest(&self, limit: usize) -> Result<usize> {
        let keys = {
            let remote = self.remote.acquire();
            remote.top_priority(limit).await
        }
        .map_err(|e| Error::upstream("remote-cache", e))?;
        self.warm_keys(keys).await
    }

    async fn warm_keys(&self, keys: Vec<String>) -> Result<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let loaded = self
            .load_remote(keys)
            .await
            .map_err(|e| Error::upstream("remote-cache", e))?
            .len();
        info!(loaded, "Local cache warmed");
        Ok(loaded)
    }

    // =========================================================================
    // Prefetch
    // =========================================================================

    /// Queue keys for background loading. Never waits: hints that do not fit
    /// in the queue are dropped. Returns the number queued.
    ///
    /// With prefetch disabled every hint is dropped.
    pub fn prefetch<I>(&self, keys: I) -> usize
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let mut queued = 0u64;
        let mut dropped = 0u64;
        if self.prefetch_config.enabled {
            for key in keys {
                match self.prefetch_tx.try_send(key.into()) {
                    Ok(()) => queued += 1,
                    Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => dropped += 1,
                }
            }
        } else {
            dropped = keys.into_iter().count() as u64;
        }

        self.counters.record_prefetch_enqueued(queued);
        self.counters.record_prefetch_dropped(dropped);
        if let Some(metrics) = &self.metrics {
            metrics.record_prefetch("enqueued", queued);
            metrics.record_prefetch("dropped", dropped);
        }
        if dropped > 0 {
            debug!(
                dropped,
                enabled = self.prefetch_config.enabled,
                "Prefetch hints dropped"
            );
        }
        queued as usize
    }

    /// Start the prefetch worker. Returns `None` if prefetch is disabled or
    /// the worker was already started.
    pub fn start_prefetch(self: &Arc<Self>, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        if !self.prefetch_config.enabled {
            debug!("Prefetch disabled, worker not started");
            return None;
        }
        let rx = self.prefetch_rx.lock().take()?;
        Some(tokio::spawn(prefetch::run(
            Arc::downgrade(self),
            rx,
            self.prefetch_config.batch_limit,
            self.prefetch_config.idle_timeout(),
            shutdown,
        )))
    }

    /// Load queued keys not already resident locally.
    pub(crate) async fn prefetch_batch(&self, keys: Vec<String>) -> Result<usize> {
        let mut seen = HashSet::new();
        let wanted: Vec<String> = keys
            .into_iter()
            .filter(|k| !self.local.contains(k) && seen.insert(k.clone()))
            .collect();
        if wanted.is_empty() {
            return Ok(0);
        }
        let loaded = self.load_remote(wanted).await?.len();
        self.counters.record_prefetch_loaded(loaded as u64);
        if let Some(metrics) = &self.metrics {
            metrics.record_prefetch("loaded", loaded as u64);
        }
        Ok(loaded)
    }

    pub(crate) fn record_prefetch_failure(&self, keys: u64) {
        if let Some(metrics) = &self.metrics {
            metrics.record_prefetch("failed", keys);
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Entries in the local tier
    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    /// True if the key is resident in the local tier
    pub fn is_local(&self, key: &str) -> bool {
        self.local.contains(key)
    }

    pub fn stats(&self) -> TieredCacheStats {
        let local = self.local.stats();
        if let Some(metrics) = &self.metrics {
            metrics.set_local_cache_entries(local.entries);
        }
        TieredCacheStats {
            local,
            counters: self.counters.snapshot(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
