//! In-Memory Search Backend
//!
//! Reference [`SearchBackend`] holding collections in nested `DashMap`s and
//! ranking by exact cosine similarity. Availability and latency can be
//! changed at runtime to exercise failure handling.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::ports::{Probe, SearchBackend};
use crate::domain::types::{Point, ScoredPoint, SearchRequest};
use crate::error::{Error, Result};
use crate::index::linalg::cosine;
use crate::sharding::merge::compare_ranked;

struct Collection {
    dimension: usize,
    points: DashMap<String, Point>,
}

/// Search backend kept entirely in process memory
pub struct InMemorySearchBackend {
    endpoint: String,
    collections: DashMap<String, Collection>,
    available: AtomicBool,
    latency_ms: AtomicU64,
    searches: AtomicU64,
}

impl InMemorySearchBackend {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            collections: DashMap::new(),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
            searches: AtomicU64::new(0),
        }
    }

    /// Make every call fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Delay every call by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of search calls served
    pub fn search_count(&self) -> u64 {
        self.searches.load(Ordering::Relaxed)
    }

    async fn enter(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::upstream(&self.endpoint, "connection refused"))
        }
    }

    fn missing(&self, collection: &str) -> Error {
        Error::upstream(
            &self.endpoint,
            format!("collection {collection} does not exist"),
        )
    }
}

#[async_trait]
impl Probe for InMemorySearchBackend {
    async fn probe(&self) -> Result<()> {
        self.enter().await
    }
}

#[async_trait]
impl SearchBackend for InMemorySearchBackend {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<()> {
        self.enter().await?;
        self.collections
            .entry(collection.to_string())
            .or_insert_with(|| Collection {
                dimension,
                points: DashMap::new(),
            });
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<usize> {
        self.enter().await?;
        let target = self
            .collections
            .get(collection)
            .ok_or_else(|| self.missing(collection))?;
        if let Some(bad) = points.iter().find(|p| p.vector.len() != target.dimension) {
            return Err(Error::DimensionMismatch {
                expected: target.dimension,
                actual: bad.vector.len(),
            });
        }
        let count = points.len();
        for point in points {
            target.points.insert(point.id.clone(), point);
        }
        Ok(count)
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<ScoredPoint>> {
        self.enter().await?;
        self.searches.fetch_add(1, Ordering::Relaxed);
        let target = self
            .collections
            .get(&request.collection)
            .ok_or_else(|| self.missing(&request.collection))?;

        let mut scored: Vec<(String, f32)> = target
            .points
            .iter()
            .map(|p| (p.key().clone(), cosine(&request.vector, &p.vector)))
            .filter(|(_, score)| *score >= request.score_threshold)
            .collect();
        scored.sort_by(compare_ranked);
        scored.truncate(request.limit);

        Ok(scored
            .into_iter()
            .filter_map(|(id, score)| {
                target.points.get(&id).map(|p| ScoredPoint {
                    id,
                    score,
                    payload: p.payload.clone(),
                })
            })
            .collect())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize> {
        self.enter().await?;
        let target = self
            .collections
            .get(collection)
            .ok_or_else(|| self.missing(collection))?;
        Ok(ids
            .iter()
            .filter(|id| target.points.remove(id.as_str()).is_some())
            .count())
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        self.enter().await?;
        let target = self
            .collections
            .get(collection)
            .ok_or_else(|| self.missing(collection))?;
        Ok(target.points.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Metadata;

    fn point(id: &str, vector: Vec<f32>) -> Point {
        Point {
            id: id.into(),
            vector,
            payload: Metadata::new(),
        }
    }

    async fn backend() -> InMemorySearchBackend {
        let backend = InMemorySearchBackend::new("mem-0");
        backend.create_collection("c", 2).await.unwrap();
        backend
            .upsert(
                "c",
                vec![
                    point("x", vec![1.0, 0.0]),
                    point("y", vec![0.0, 1.0]),
                    point("z", vec![0.6, 0.8]),
                ],
            )
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_search_ranks_by_cosine() {
        let backend = backend().await;
        let res = backend
            .search(SearchRequest::new("c", vec![1.0, 0.0], 2, 0.0))
            .await
            .unwrap();
        assert_eq!(res.len(), 2);
        assert_eq!(res[0].id, "x");
        assert_eq!(res[0].score, 1.0);
        assert_eq!(res[1].id, "z");
    }

    #[tokio::test]
    async fn test_threshold_filters() {
        let backend = backend().await;
        let res = backend
            .search(SearchRequest::new("c", vec![1.0, 0.0], 10, 0.5))
            .await
            .unwrap();
        let ids: Vec<&str> = res.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "z"]);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let backend = backend().await;
        backend
            .upsert("c", vec![point("x", vec![1.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(backend.count("c").await.unwrap(), 3);
        assert_eq!(backend.delete("c", &["x".into(), "nope".into()]).await.unwrap(), 1);
        assert_eq!(backend.count("c").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_and_missing_collection() {
        let backend = backend().await;
        assert!(backend.count("other").await.is_err());
        backend.set_available(false);
        assert!(backend.probe().await.unwrap_err().is_upstream());
        backend.set_available(true);
        assert!(backend.probe().await.is_ok());
    }
}
