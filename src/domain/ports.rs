//! Domain Ports (Port/Adapter Pattern)
//!
//! Abstractions over the collaborators the data plane talks to. Adapters in
//! [`crate::adapters`] implement them; production deployments plug in their
//! own clients.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Data Plane Core                         │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │        SearchBackend │ RemoteCache │ Probe           │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │  InMemorySearchBackend │ InMemoryRemoteCache │ ...   │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::types::{Point, ScoredPoint, SearchRequest};
use crate::error::Result;

// =============================================================================
// Health Probe
// =============================================================================

/// Liveness probe for a pooled handle.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Return `Ok(())` when the handle can serve requests.
    async fn probe(&self) -> Result<()>;
}

// =============================================================================
// Search Backend Port
// =============================================================================

/// Port for one vector search service instance (one shard).
///
/// Backends are expected to rank by cosine similarity and to treat `upsert`
/// as idempotent per point id.
#[async_trait]
pub trait SearchBackend: Probe {
    /// Human-readable endpoint label used in logs and stats.
    fn endpoint(&self) -> &str;

    /// Create a collection if it does not already exist.
    async fn create_collection(&self, collection: &str, dimension: usize) -> Result<()>;

    /// Insert or replace points. Returns the number of points accepted.
    async fn upsert(&self, collection: &str, points: Vec<Point>) -> Result<usize>;

    /// Ranked search limited to `request.limit` results above the threshold.
    async fn search(&self, request: SearchRequest) -> Result<Vec<ScoredPoint>>;

    /// Delete points by id. Returns the number removed.
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<usize>;

    /// Number of points in a collection.
    async fn count(&self, collection: &str) -> Result<u64>;
}

// =============================================================================
// Remote Cache Port
// =============================================================================

/// Port for the shared key-value cache store.
#[async_trait]
pub trait RemoteCache: Probe {
    /// Fetch a value together with its remaining TTL in one round trip.
    ///
    /// `None` TTL means the key has no expiry.
    async fn get_with_ttl(&self, key: &str) -> Result<Option<(Bytes, Option<Duration>)>>;

    /// Store a value with a TTL and record its priority score.
    async fn set_with_priority(
        &self,
        key: &str,
        value: Bytes,
        ttl: Duration,
        priority: i64,
    ) -> Result<()>;

    /// Multi-key fetch; the output is positionally aligned with `keys`.
    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>>;

    /// Delete one key.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Delete every key matching a glob pattern. Returns the number deleted.
    async fn delete_pattern(&self, pattern: &str) -> Result<u64>;

    /// Incremental scan. Start with cursor 0; a returned cursor of 0 ends the scan.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<(u64, Vec<String>)>;

    /// Keys ordered by descending priority, used for warm-cache selection.
    async fn top_priority(&self, limit: usize) -> Result<Vec<String>>;
}
