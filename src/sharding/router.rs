//! Shard Router
//!
//! Maps entity ids to shards and fans writes and searches out across them.
//!
//! # Fan-out
//!
//! ```text
//!                       ┌──► shard 0 ──┐
//!   search(q, k) ──────►├──► shard 1 ──┤──► merge (score desc, id asc) ──► top k
//!   limit = ⌈k·f⌉       └──► shard N ──┘
//!                       each call bounded by one shared deadline
//! ```
//!
//! Every shard call is converted to a [`ShardOutcome`] at the task boundary:
//! a failing or slow shard contributes nothing and is reported in the
//! response. Only when no shard answers does the search fail.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument, warn};

use super::merge::{merge_ranked, over_fetch_limit};
use crate::config::ShardingConfig;
use crate::domain::ports::SearchBackend;
use crate::domain::types::{EntityRecord, Metadata, Point, SearchHit, SearchRequest, ShardId};
use crate::error::{Error, Result};
use crate::index::linalg::{check_dimension, normalized};
use crate::monitoring::{EngineMetrics, HealthStatus};
use crate::pool::{PoolStats, ResourcePool};

/// Shard owning an entity: the first 8 bytes of `sha256(entity_id)` read as
/// a big-endian integer, modulo `shard_count`.
///
/// Pure and salt-free, so every process computes the same answer.
pub fn route_entity(entity_id: &str, shard_count: usize) -> ShardId {
    let digest = Sha256::digest(entity_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % shard_count.max(1) as u64) as ShardId
}

// =============================================================================
// Outcomes
// =============================================================================

/// Result of one shard's part of a search
#[derive(Debug, Clone, PartialEq)]
pub enum ShardOutcome {
    Success(Vec<SearchHit>),
    Failed(String),
    TimedOut,
}

impl ShardOutcome {
    fn label(&self) -> &'static str {
        match self {
            ShardOutcome::Success(_) => "success",
            ShardOutcome::Failed(_) => "failed",
            ShardOutcome::TimedOut => "timed_out",
        }
    }
}

/// Result of one shard's part of a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShardWriteOutcome {
    Written { count: usize },
    Failed { reason: String },
    TimedOut,
}

impl ShardWriteOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, ShardWriteOutcome::Written { .. })
    }

    fn label(&self) -> &'static str {
        match self {
            ShardWriteOutcome::Written { .. } => "written",
            ShardWriteOutcome::Failed { .. } => "failed",
            ShardWriteOutcome::TimedOut => "timed_out",
        }
    }
}

/// Per-shard outcome of a fan-out write. Nothing is rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub outcomes: BTreeMap<ShardId, ShardWriteOutcome>,
}

impl WriteReport {
    /// Every targeted shard accepted its batch
    pub fn is_complete(&self) -> bool {
        self.outcomes.values().all(ShardWriteOutcome::is_written)
    }

    /// Items accepted across shards
    pub fn total_written(&self) -> usize {
        self.outcomes
            .values()
            .map(|o| match o {
                ShardWriteOutcome::Written { count } => *count,
                _ => 0,
            })
            .sum()
    }

    /// Shards whose batch was not accepted
    pub fn failed_shards(&self) -> Vec<ShardId> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_written())
            .map(|(s, _)| *s)
            .collect()
    }
}

/// Merged search answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Best hits, score descending, ties by entity id ascending
    pub hits: Vec<SearchHit>,
    /// Sum of result counts over the shards that answered
    pub candidates_considered: usize,
    pub shards_failed: Vec<ShardId>,
    pub shards_timed_out: Vec<ShardId>,
    /// False when any shard failed or timed out
    pub complete: bool,
}

impl SearchResponse {
    fn empty() -> Self {
        Self {
            hits: Vec::new(),
            candidates_considered: 0,
            shards_failed: Vec::new(),
            shards_timed_out: Vec::new(),
            complete: true,
        }
    }
}

/// Operator view of one shard
#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub shard: ShardId,
    pub collection: String,
    pub endpoint: String,
    pub points: Option<u64>,
    pub status: HealthStatus,
    pub error: Option<String>,
    pub pool: PoolStats,
}

// =============================================================================
// Router
// =============================================================================

/// Routes entities to shards and fans operations out across them
pub struct ShardRouter {
    config: ShardingConfig,
    dimension: usize,
    shards: Vec<ResourcePool<dyn SearchBackend>>,
    metrics: Option<EngineMetrics>,
}

impl ShardRouter {
    /// One pool per shard, in shard order.
    pub fn new(
        config: ShardingConfig,
        dimension: usize,
        shards: Vec<ResourcePool<dyn SearchBackend>>,
    ) -> Result<Self> {
        if config.shard_count == 0 {
            return Err(Error::Config("shard_count must be at least 1".into()));
        }
        if shards.len() != config.shard_count {
            return Err(Error::Config(format!(
                "expected {} shard pools, got {}",
                config.shard_count,
                shards.len()
            )));
        }
        Ok(Self {
            config,
            dimension,
            shards,
            metrics: None,
        })
    }

    /// Record per-shard latency and merge sizes
    pub fn with_metrics(mut self, metrics: EngineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn config(&self) -> &ShardingConfig {
        &self.config
    }

    /// Connection pool of one shard
    pub fn pool(&self, shard: ShardId) -> Option<&ResourcePool<dyn SearchBackend>> {
        self.shards.get(shard)
    }

    /// Shard owning `entity_id`
    pub fn route(&self, entity_id: &str) -> ShardId {
        route_entity(entity_id, self.shards.len())
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.config.request_timeout()
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create every shard's collection. Idempotent.
    #[instrument(skip(self))]
    pub async fn create_collections(&self) -> Result<WriteReport> {
        let deadline = self.deadline();
        let calls = self.shards.iter().enumerate().map(|(shard, pool)| {
            let collection = self.config.shard_collection(shard);
            let dimension = self.dimension;
            async move {
                let backend = pool.acquire();
                let outcome = match timeout_at(
                    deadline,
                    backend.create_collection(&collection, dimension),
                )
                .await
                {
                    Ok(Ok(())) => ShardWriteOutcome::Written { count: 0 },
                    Ok(Err(e)) => ShardWriteOutcome::Failed {
                        reason: e.to_string(),
                    },
                    Err(_) => ShardWriteOutcome::TimedOut,
                };
                (shard, outcome)
            }
        });
        let report = self.collect_writes("create_collection", join_all(calls).await)?;
        info!(shards = report.outcomes.len(), "Shard collections ready");
        Ok(report)
    }

    /// Validate, normalize and route records, then upsert one batch per
    /// shard concurrently.
    ///
    /// Upserts are keyed by entity id, so retrying a partially failed insert
    /// is safe. Fails outright only if no targeted shard accepted its batch.
    #[instrument(skip(self, records), fields(records = records.len()))]
    pub async fn insert(&self, records: Vec<EntityRecord>) -> Result<WriteReport> {
        let mut groups: BTreeMap<ShardId, Vec<Point>> = BTreeMap::new();
        for record in records {
            check_dimension(&record.vector, self.dimension)?;
            let vector = normalized(&record.vector)?;
            let shard = self.route(&record.entity_id);

            let mut payload = Metadata::new();
            payload.insert("entity_id".into(), Value::String(record.entity_id.clone()));
            payload.insert("metadata".into(), Value::Object(record.metadata));
            payload.insert("shard".into(), Value::from(shard));

            groups.entry(shard).or_default().push(Point {
                id: record.entity_id,
                vector,
                payload,
            });
        }
        if groups.is_empty() {
            return Ok(WriteReport::default());
        }

        let deadline = self.deadline();
        let calls = groups.into_iter().map(|(shard, points)| {
            let collection = self.config.shard_collection(shard);
            let pool = &self.shards[shard];
            async move {
                let backend = pool.acquire();
                let outcome = match timeout_at(deadline, backend.upsert(&collection, points)).await
                {
                    Ok(Ok(count)) => ShardWriteOutcome::Written { count },
                    Ok(Err(e)) => ShardWriteOutcome::Failed {
                        reason: e.to_string(),
                    },
                    Err(_) => ShardWriteOutcome::TimedOut,
                };
                (shard, outcome)
            }
        });
        self.collect_writes("insert", join_all(calls).await)
    }

    /// Delete entities by id from their owning shards.
    #[instrument(skip(self, entity_ids), fields(ids = entity_ids.len()))]
    pub async fn delete(&self, entity_ids: &[String]) -> Result<WriteReport> {
        let mut groups: BTreeMap<ShardId, Vec<String>> = BTreeMap::new();
        for id in entity_ids {
            groups.entry(self.route(id)).or_default().push(id.clone());
        }
        if groups.is_empty() {
            return Ok(WriteReport::default());
        }

        let deadline = self.deadline();
        let calls = groups.into_iter().map(|(shard, ids)| {
            let collection = self.config.shard_collection(shard);
            let pool = &self.shards[shard];
            async move {
                let backend = pool.acquire();
                let outcome = match timeout_at(deadline, backend.delete(&collection, &ids)).await {
                    Ok(Ok(count)) => ShardWriteOutcome::Written { count },
                    Ok(Err(e)) => ShardWriteOutcome::Failed {
                        reason: e.to_string(),
                    },
                    Err(_) => ShardWriteOutcome::TimedOut,
                };
                (shard, outcome)
            }
        });
        self.collect_writes("delete", join_all(calls).await)
    }

    fn collect_writes(
        &self,
        operation: &str,
        results: Vec<(ShardId, ShardWriteOutcome)>,
    ) -> Result<WriteReport> {
        let attempted = results.len();
        let mut report = WriteReport::default();
        for (shard, outcome) in results {
            if let Some(metrics) = &self.metrics {
                metrics.record_shard_write(shard, outcome.label());
            }
            match &outcome {
                ShardWriteOutcome::Written { count } => {
                    debug!(operation, shard, count, "Shard write accepted")
                }
                ShardWriteOutcome::Failed { reason } => {
                    warn!(operation, shard, reason = %reason, "Shard write failed")
                }
                ShardWriteOutcome::TimedOut => {
                    warn!(operation, shard, "Shard write timed out")
                }
            }
            report.outcomes.insert(shard, outcome);
        }

        if attempted > 0 && report.outcomes.values().all(|o| !o.is_written()) {
            return Err(Error::AllShardsUnavailable { attempted });
        }
        Ok(report)
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Search every shard in parallel and merge.
    ///
    /// Each shard is asked for `ceil(top_k * over_fetch_factor)` candidates
    /// at or above `threshold`.
    #[instrument(skip(self, query))]
    pub async fn search(&self, query: &[f32], top_k: usize, threshold: f32) -> Result<SearchResponse> {
        check_dimension(query, self.dimension)?;
        let vector = normalized(query)?;
        if top_k == 0 {
            return Ok(SearchResponse::empty());
        }

        let limit = over_fetch_limit(top_k, self.config.over_fetch_factor);
        let started = Instant::now();
        let deadline = started + self.config.request_timeout();

        let calls = self.shards.iter().enumerate().map(|(shard, pool)| {
            let request = SearchRequest::new(
                self.config.shard_collection(shard),
                vector.clone(),
                limit,
                threshold,
            );
            async move {
                let call_started = Instant::now();
                let backend = pool.acquire();
                let outcome = match timeout_at(deadline, backend.search(request)).await {
                    Ok(Ok(points)) => ShardOutcome::Success(
                        points
                            .into_iter()
                            .map(|p| SearchHit::from_point(p, shard))
                            .collect(),
                    ),
                    Ok(Err(e)) => ShardOutcome::Failed(e.to_string()),
                    Err(_) => ShardOutcome::TimedOut,
                };
                (shard, outcome, call_started.elapsed())
            }
        });
        let results = join_all(calls).await;

        let mut lists = Vec::with_capacity(results.len());
        let mut shards_failed = Vec::new();
        let mut shards_timed_out = Vec::new();
        for (shard, outcome, elapsed) in results {
            self.record_shard_call(shard, &outcome, elapsed);
            match outcome {
                ShardOutcome::Success(hits) => lists.push(hits),
                ShardOutcome::Failed(reason) => {
                    warn!(shard, reason = %reason, "Shard search failed, contributing no results");
                    shards_failed.push(shard);
                }
                ShardOutcome::TimedOut => {
                    warn!(shard, ?elapsed, "Shard search timed out, contributing no results");
                    shards_timed_out.push(shard);
                }
            }
        }

        if lists.is_empty() {
            return Err(if shards_failed.is_empty() {
                Error::Timeout {
                    operation: "search".into(),
                    elapsed: started.elapsed(),
                }
            } else {
                Error::AllShardsUnavailable {
                    attempted: self.shards.len(),
                }
            });
        }

        let merged = merge_ranked(lists, top_k);
        if let Some(metrics) = &self.metrics {
            metrics.record_merge(merged.items.len(), merged.candidates);
        }
        let complete = shards_failed.is_empty() && shards_timed_out.is_empty();
        debug!(
            hits = merged.items.len(),
            candidates = merged.candidates,
            complete,
            "Search merged"
        );

        Ok(SearchResponse {
            hits: merged.items,
            candidates_considered: merged.candidates,
            shards_failed,
            shards_timed_out,
            complete,
        })
    }

    fn record_shard_call(&self, shard: ShardId, outcome: &ShardOutcome, elapsed: Duration) {
        if let Some(metrics) = &self.metrics {
            metrics.record_shard_request(shard, outcome.label(), elapsed);
        }
    }

    // =========================================================================
    // Stats
    // =========================================================================

    /// Point count and reachability of every shard
    pub async fn get_stats(&self) -> Vec<ShardStats> {
        let deadline = self.deadline();
        let calls = self.shards.iter().enumerate().map(|(shard, pool)| {
            let collection = self.config.shard_collection(shard);
            async move {
                let backend = pool.acquire();
                let endpoint = backend.endpoint().to_string();
                let (points, status, error) =
                    match timeout_at(deadline, backend.count(&collection)).await {
                        Ok(Ok(n)) => (Some(n), HealthStatus::Healthy, None),
                        Ok(Err(e)) => (None, HealthStatus::Unhealthy, Some(e.to_string())),
                        Err(_) => (
                            None,
                            HealthStatus::Unhealthy,
                            Some("count timed out".to_string()),
                        ),
                    };
                drop(backend);
                ShardStats {
                    shard,
                    collection,
                    endpoint,
                    points,
                    status,
                    error,
                    pool: pool.stats(),
                }
            }
        });
        join_all(calls).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemorySearchBackend;
    use std::sync::Arc;

    fn router(shards: usize, timeout_ms: u64) -> (ShardRouter, Vec<Arc<InMemorySearchBackend>>) {
        let backends: Vec<Arc<InMemorySearchBackend>> = (0..shards)
            .map(|i| Arc::new(InMemorySearchBackend::new(format!("mem-{i}"))))
            .collect();
        let pools = backends
            .iter()
            .map(|b| {
                let handle: Arc<dyn SearchBackend> = b.clone();
                ResourcePool::new("shard", vec![handle]).unwrap()
            })
            .collect();
        let config = ShardingConfig {
            shard_count: shards,
            request_timeout_ms: timeout_ms,
            ..ShardingConfig::default()
        };
        (ShardRouter::new(config, 3, pools).unwrap(), backends)
    }

    fn records() -> Vec<EntityRecord> {
        vec![
            EntityRecord::new("a", vec![1.0, 0.0, 0.0]).with_field("label", "x"),
            EntityRecord::new("b", vec![0.0, 1.0, 0.0]),
            EntityRecord::new("c", vec![0.7, 0.7, 0.0]),
            EntityRecord::new("d", vec![0.0, 0.0, 1.0]),
            EntityRecord::new("e", vec![0.9, 0.1, 0.0]),
        ]
    }

    #[test]
    fn test_route_known_values() {
        assert_eq!(route_entity("img_7", 4), 1);
        assert_eq!(route_entity("img_7", 8), 5);
        assert_eq!(route_entity("a", 4), 2);
        assert_eq!(route_entity("anything", 1), 0);
    }

    #[test]
    fn test_router_rejects_wrong_pool_count() {
        let (router, _) = router(2, 1000);
        let config = ShardingConfig {
            shard_count: 3,
            ..router.config().clone()
        };
        assert!(ShardRouter::new(config, 3, Vec::new()).is_err());
    }

    #[tokio::test]
    async fn test_insert_groups_by_route() {
        let (router, backends) = router(4, 1000);
        router.create_collections().await.unwrap();
        let report = router.insert(records()).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(report.total_written(), 5);

        for (shard, backend) in backends.iter().enumerate() {
            let expected = records()
                .iter()
                .filter(|r| router.route(&r.entity_id) == shard)
                .count() as u64;
            let collection = router.config().shard_collection(shard);
            assert_eq!(backend.count(&collection).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_bad_vectors() {
        let (router, _) = router(2, 1000);
        router.create_collections().await.unwrap();
        let err = router
            .insert(vec![EntityRecord::new("x", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        let err = router
            .insert(vec![EntityRecord::new("x", vec![0.0; 3])])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidVector(_)));
    }

    #[tokio::test]
    async fn test_search_merges_and_orders() {
        let (router, _) = router(3, 1000);
        router.create_collections().await.unwrap();
        router.insert(records()).await.unwrap();

        let response = router.search(&[1.0, 0.0, 0.0], 3, 0.0).await.unwrap();
        assert!(response.complete);
        let ids: Vec<&str> = response.hits.iter().map(|h| h.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "e", "c"]);
        assert_eq!(response.hits[0].score, 1.0);
        assert_eq!(response.hits[0].metadata["label"], "x");
        assert_eq!(response.hits[0].shard, router.route("a"));
    }

    #[tokio::test]
    async fn test_unreachable_shard_contributes_nothing() {
        let (router, backends) = router(4, 1000);
        router.create_collections().await.unwrap();
        router.insert(records()).await.unwrap();

        let down = router.route("a");
        backends[down].set_available(false);

        let response = router.search(&[1.0, 0.0, 0.0], 5, 0.0).await.unwrap();
        assert!(!response.complete);
        assert_eq!(response.shards_failed, vec![down]);
        assert!(response.hits.iter().all(|h| h.entity_id != "a"));
        let expected: usize = records()
            .iter()
            .filter(|r| router.route(&r.entity_id) != down)
            .count();
        assert_eq!(response.candidates_considered, expected);
    }

    #[tokio::test]
    async fn test_all_shards_down() {
        let (router, backends) = router(2, 1000);
        router.create_collections().await.unwrap();
        for b in &backends {
            b.set_available(false);
        }
        let err = router.search(&[1.0, 0.0, 0.0], 5, 0.0).await.unwrap_err();
        assert!(matches!(err, Error::AllShardsUnavailable { attempted: 2 }));

        let err = router.insert(records()).await.unwrap_err();
        assert!(matches!(err, Error::AllShardsUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_partial_write_reported() {
        let (router, backends) = router(4, 1000);
        router.create_collections().await.unwrap();
        let down = router.route("a");
        backends[down].set_available(false);

        let report = router.insert(records()).await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.failed_shards(), vec![down]);
        assert_matches::assert_matches!(
            report.outcomes[&down],
            ShardWriteOutcome::Failed { .. }
        );
    }

    #[tokio::test]
    async fn test_slow_shard_times_out() {
        let (router, backends) = router(2, 50);
        router.create_collections().await.unwrap();
        router.insert(records()).await.unwrap();
        backends[0].set_latency(Duration::from_millis(500));

        let response = router.search(&[1.0, 0.0, 0.0], 5, 0.0).await.unwrap();
        assert!(!response.complete);
        assert_eq!(response.shards_timed_out, vec![0]);

        backends[1].set_latency(Duration::from_millis(500));
        let err = router.search(&[1.0, 0.0, 0.0], 5, 0.0).await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_delete_and_stats() {
        let (router, backends) = router(2, 1000);
        router.create_collections().await.unwrap();
        router.insert(records()).await.unwrap();

        let report = router.delete(&["a".into(), "b".into()]).await.unwrap();
        assert_eq!(report.total_written(), 2);

        backends[1].set_available(false);
        let stats = router.get_stats().await;
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].status, HealthStatus::Healthy);
        assert_eq!(stats[1].status, HealthStatus::Unhealthy);
        assert!(stats[1].error.is_some());
        assert_eq!(stats[0].endpoint, "mem-0");
    }
}
