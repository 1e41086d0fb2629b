//! Search Engine
//!
//! Entry point composing the tiered cache, the shard router and the index
//! optimizer behind one handle.
//!
//! # Query Path
//!
//! ```text
//!   query ──► fingerprint ──► TieredCache ──hit──► cached response
//!                                 │ miss
//!                                 ▼
//!                           ShardRouter (fan-out, merge)
//!                                 │ complete answer
//!                                 ▼
//!                     store in both tiers (priority = best score)
//! ```
//!
//! Construct once and share as `Arc<SearchEngine>`; there is no global state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapters::{InMemoryRemoteCache, InMemorySearchBackend};
use crate::cache::{query_fingerprint, CacheSource, TieredCache, TieredCacheStats};
use crate::config::EngineConfig;
use crate::domain::ports::{RemoteCache, SearchBackend};
use crate::domain::types::EntityRecord;
use crate::error::Result;
use crate::index::linalg::{check_dimension, normalized};
use crate::index::{IndexOptimizer, PartitionedIndex};
use crate::monitoring::{EngineMetrics, HealthStatus};
use crate::pool::{HandleHealth, ResourcePool};
use crate::sharding::{SearchResponse, ShardRouter, ShardStats, WriteReport};

/// Search answer plus the tier that produced it
#[derive(Debug, Clone, Serialize)]
pub struct EngineSearch {
    pub response: SearchResponse,
    pub source: CacheSource,
}

/// Read-only operator snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub status: HealthStatus,
    pub shards: Vec<ShardStats>,
    pub total_points: u64,
    pub cache: TieredCacheStats,
    pub cache_hit_rate: f64,
    pub local_cache_entries: usize,
    pub remote_cache_health: Vec<HandleHealth>,
    pub generated_at: DateTime<Utc>,
}

/// Reference backends behind an in-memory engine, kept for fault injection
pub struct InMemoryBackends {
    pub shards: Vec<Arc<InMemorySearchBackend>>,
    pub remote: Arc<InMemoryRemoteCache>,
}

/// Sharded similarity search with a tiered result cache
pub struct SearchEngine {
    config: EngineConfig,
    router: ShardRouter,
    cache: Arc<TieredCache>,
    optimizer: IndexOptimizer,
    metrics: EngineMetrics,
}

impl SearchEngine {
    /// Assemble an engine from one pool per shard and a remote cache pool.
    pub fn new(
        config: EngineConfig,
        shard_pools: Vec<ResourcePool<dyn SearchBackend>>,
        remote_pool: ResourcePool<dyn RemoteCache>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = EngineMetrics::new()?;
        let router = ShardRouter::new(config.sharding.clone(), config.dimension, shard_pools)?
            .with_metrics(metrics.clone());
        let cache = Arc::new(TieredCache::new(&config.cache, remote_pool).with_metrics(metrics.clone()));
        let optimizer = IndexOptimizer::new(config.dimension, config.index.clone());

        info!(
            shards = config.sharding.shard_count,
            dimension = config.dimension,
            local_capacity = config.cache.local_capacity,
            "Search engine assembled"
        );

        Ok(Self {
            config,
            router,
            cache,
            optimizer,
            metrics,
        })
    }

    /// Engine over in-memory shards and an in-memory remote cache. Each pool
    /// holds `pool.size` handles sharing one backend.
    pub fn in_memory(config: EngineConfig) -> Result<(Self, InMemoryBackends)> {
        let size = config.pool.size.max(1);
        let shards: Vec<Arc<InMemorySearchBackend>> = (0..config.sharding.shard_count)
            .map(|i| Arc::new(InMemorySearchBackend::new(format!("memory://shard-{i}"))))
            .collect();
        let remote = Arc::new(InMemoryRemoteCache::new());

        let shard_pools = shards
            .iter()
            .enumerate()
            .map(|(i, backend)| {
                ResourcePool::with_factory(format!("shard-{i}"), size, |_| {
                    backend.clone() as Arc<dyn SearchBackend>
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let remote_pool = ResourcePool::with_factory("remote-cache", size, |_| {
            remote.clone() as Arc<dyn RemoteCache>
        })?;

        let engine = Self::new(config, shard_pools, remote_pool)?;
        Ok((engine, InMemoryBackends { shards, remote }))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn optimizer(&self) -> &IndexOptimizer {
        &self.optimizer
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create every shard collection. Idempotent.
    pub async fn provision(&self) -> Result<WriteReport> {
        self.router.create_collections().await
    }

    /// Start the prefetch worker. Returns `None` when prefetch is disabled or
    /// already running.
    pub fn start(&self, shutdown: CancellationToken) -> Option<JoinHandle<()>> {
        self.cache.start_prefetch(shutdown)
    }

    /// Load the highest-priority remote entries into the local tier
    pub async fn warm_cache(&self, limit: usize) -> Result<usize> {
        self.cache.warm_hottest(limit).await
    }

    /// Queue keys for background loading; returns how many were accepted
    pub fn prefetch<I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = String>,
    {
        self.cache.prefetch(keys)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Route and upsert records, then drop cached search results if
    /// configured to.
    pub async fn insert(&self, records: Vec<EntityRecord>) -> Result<WriteReport> {
        let report = self.router.insert(records).await?;
        self.after_write(&report).await;
        Ok(report)
    }

    /// Delete entities by id, then drop cached search results if configured to.
    pub async fn delete(&self, entity_ids: &[String]) -> Result<WriteReport> {
        let report = self.router.delete(entity_ids).await?;
        self.after_write(&report).await;
        Ok(report)
    }

    async fn after_write(&self, report: &WriteReport) {
        if !self.config.cache.invalidate_on_write || report.total_written() == 0 {
            return;
        }
        let pattern = format!("{}:*", self.config.cache.search_prefix);
        match self.cache.invalidate_pattern(&pattern).await {
            Ok(removed) => debug!(removed, "Cached search results invalidated"),
            Err(e) => warn!(error = %e, "Search result invalidation incomplete"),
        }
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Answer from the cache when possible, otherwise fan out across shards.
    ///
    /// Only complete answers are cached.
    #[instrument(skip(self, query))]
    pub async fn search(&self, query: &[f32], top_k: usize, threshold: f32) -> Result<EngineSearch> {
        check_dimension(query, self.config.dimension)?;
        normalized(query)?;

        let key = query_fingerprint(&self.config.cache.search_prefix, query, top_k, threshold);
        let lookup = self.cache.get(&key).await;
        if let Some(bytes) = lookup.value {
            match serde_json::from_slice::<SearchResponse>(&bytes) {
                Ok(response) => {
                    return Ok(EngineSearch {
                        response,
                        source: lookup.source,
                    })
                }
                Err(e) => warn!(key = %key, error = %e, "Discarding undecodable cached result"),
            }
        }

        let response = self.router.search(query, top_k, threshold).await?;
        if response.complete {
            let priority = response
                .hits
                .first()
                .map_or(0, |hit| (hit.score * 1000.0) as i64);
            if let Err(e) = self.cache.set_json(&key, &response, None, priority).await {
                debug!(key = %key, error = %e, "Search result cached locally only");
            }
        }

        Ok(EngineSearch {
            response,
            source: CacheSource::Miss,
        })
    }

    // =========================================================================
    // In-Process Index
    // =========================================================================

    /// Build a partitioned approximate index over records held in memory.
    pub async fn index_records(
        &self,
        records: &[EntityRecord],
        partitions: usize,
    ) -> Result<PartitionedIndex> {
        let vectors = records.iter().map(|r| r.vector.clone()).collect();
        let ids = records.iter().map(|r| r.entity_id.clone()).collect();
        self.optimizer.partitioned_build(vectors, ids, partitions).await
    }

    /// Top-k over an in-process partitioned index
    pub async fn search_index(
        &self,
        index: &PartitionedIndex,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(String, f32)>> {
        self.optimizer.partitioned_search(index, query, k).await
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Per-shard counts and health, cache effectiveness and remote pool health
    pub async fn get_stats(&self) -> EngineStats {
        let (shards, remote_cache_health) = tokio::join!(
            self.router.get_stats(),
            self.cache.remote_pool().health_check()
        );

        let total_points = shards.iter().filter_map(|s| s.points).sum();
        let failing_shards = shards.iter().filter(|s| !s.status.is_healthy()).count();
        let failing_remote = remote_cache_health
            .iter()
            .filter(|h| !h.status.is_healthy())
            .count();

        let mut status = HealthStatus::from_counts(failing_shards, shards.len());
        if failing_remote > 0 {
            status = status.max(HealthStatus::Degraded);
        }

        let cache = self.cache.stats();
        EngineStats {
            status,
            total_points,
            cache_hit_rate: cache.counters.hit_rate,
            local_cache_entries: cache.local.entries,
            cache,
            shards,
            remote_cache_health,
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShardingConfig;

    fn config() -> EngineConfig {
        EngineConfig {
            dimension: 3,
            sharding: ShardingConfig {
                shard_count: 4,
                request_timeout_ms: 1_000,
                ..ShardingConfig::default()
            },
            ..EngineConfig::default()
        }
    }

    fn records() -> Vec<EntityRecord> {
        vec![
            EntityRecord::new("img_1", vec![1.0, 0.0, 0.0]),
            EntityRecord::new("img_2", vec![0.0, 1.0, 0.0]),
            EntityRecord::new("img_3", vec![0.6, 0.8, 0.0]),
            EntityRecord::new("img_7", vec![0.2, 0.3, 0.9]).with_field("label", "cat"),
        ]
    }

    async fn engine() -> (SearchEngine, InMemoryBackends) {
        let (engine, backends) = SearchEngine::in_memory(config()).unwrap();
        engine.provision().await.unwrap();
        engine.insert(records()).await.unwrap();
        (engine, backends)
    }

    #[tokio::test]
    async fn test_search_populates_cache() {
        let (engine, _) = engine().await;
        let first = engine.search(&[1.0, 0.0, 0.0], 2, 0.0).await.unwrap();
        assert_eq!(first.source, CacheSource::Miss);
        assert_eq!(first.response.hits[0].entity_id, "img_1");

        let second = engine.search(&[1.0, 0.0, 0.0], 2, 0.0).await.unwrap();
        assert_eq!(second.source, CacheSource::Local);
        assert_eq!(second.response, first.response);
    }

    #[tokio::test]
    async fn test_write_invalidates_results() {
        let (engine, _) = engine().await;
        engine.search(&[1.0, 0.0, 0.0], 2, 0.0).await.unwrap();
        engine
            .insert(vec![EntityRecord::new("img_9", vec![1.0, 0.01, 0.0])])
            .await
            .unwrap();

        let after = engine.search(&[1.0, 0.0, 0.0], 2, 0.0).await.unwrap();
        assert_eq!(after.source, CacheSource::Miss);
        let ids: Vec<&str> = after.response.hits.iter().map(|h| h.entity_id.as_str()).collect();
        assert!(ids.contains(&"img_9"));
    }

    #[tokio::test]
    async fn test_incomplete_answer_not_cached() {
        let (engine, backends) = engine().await;
        backends.shards[engine.router().route("img_2")].set_available(false);

        let first = engine.search(&[1.0, 0.0, 0.0], 2, 0.0).await.unwrap();
        assert!(!first.response.complete);
        let second = engine.search(&[1.0, 0.0, 0.0], 2, 0.0).await.unwrap();
        assert_eq!(second.source, CacheSource::Miss);
    }

    #[tokio::test]
    async fn test_search_survives_remote_cache_outage() {
        let (engine, backends) = engine().await;
        backends.remote.set_available(false);
        let res = engine.search(&[0.0, 1.0, 0.0], 1, 0.0).await.unwrap();
        assert_eq!(res.response.hits[0].entity_id, "img_2");
    }

    #[tokio::test]
    async fn test_stats() {
        let (engine, backends) = engine().await;
        engine.search(&[1.0, 0.0, 0.0], 2, 0.0).await.unwrap();
        engine.search(&[1.0, 0.0, 0.0], 2, 0.0).await.unwrap();

        let stats = engine.get_stats().await;
        assert_eq!(stats.total_points, 4);
        assert_eq!(stats.status, HealthStatus::Healthy);
        assert_eq!(stats.local_cache_entries, 1);
        assert!(stats.cache_hit_rate > 0.0);

        backends.remote.set_available(false);
        assert_eq!(engine.get_stats().await.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_in_process_index() {
        let (engine, _) = engine().await;
        let index = engine.index_records(&records(), 2).await.unwrap();
        let hits = engine.search_index(&index, &[0.2, 0.3, 0.9], 2).await.unwrap();
        assert_eq!(hits[0].0, "img_7");
    }

    #[tokio::test]
    async fn test_start_respects_prefetch_switch() {
        let mut disabled = config();
        disabled.cache.prefetch.enabled = false;
        let (engine, _) = SearchEngine::in_memory(disabled).unwrap();
        assert!(engine.start(CancellationToken::new()).is_none());

        let (engine, _) = SearchEngine::in_memory(config()).unwrap();
        let shutdown = CancellationToken::new();
        let worker = engine.start(shutdown.clone()).unwrap();
        shutdown.cancel();
        worker.await.unwrap();
    }
}
