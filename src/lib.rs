//! simshard - Sharded Similarity Search Data Plane
//!
//! Routes fixed-dimension query vectors across independent search backends,
//! merges their partial answers into one ranked list, and absorbs repeated
//! queries with a two-tier cache.
//!
//! # Architecture
//!
//! ```text
//!                    ┌──────────────────────────────┐
//!   query ─────────► │         SearchEngine         │
//!                    └──────────────┬───────────────┘
//!                                   │
//!            ┌──────────────────────┼──────────────────────┐
//!            ▼                      ▼                      ▼
//!    TieredCache (LFU +     ShardRouter (hash route,   IndexOptimizer (PCA,
//!    remote, prefetch)      fan-out, merge)            IVF, partitions)
//!            │                      │
//!            ▼                      ▼
//!      ResourcePool ───────► backend handles (ports)
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - In-memory implementations of the domain ports
//! - [`cache`] - Local LFU tier, tiered coordinator, prefetch, fingerprints
//! - [`config`] - YAML configuration
//! - [`domain`] - Value types and port traits
//! - [`engine`] - Engine façade
//! - [`error`] - Error types
//! - [`index`] - Approximate index construction and search
//! - [`monitoring`] - Prometheus registry and health reporting
//! - [`pool`] - Pooled backend handles
//! - [`sharding`] - Routing and scatter-gather

pub mod adapters;
pub mod cache;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod index;
pub mod monitoring;
pub mod pool;
pub mod sharding;

// Re-export commonly used types
pub use cache::{CacheSource, TieredCache};
pub use config::EngineConfig;
pub use domain::{EntityRecord, SearchHit};
pub use engine::{EngineSearch, EngineStats, SearchEngine};
pub use error::{Error, Result};
pub use index::{IndexHandle, IndexOptimizer};
pub use pool::ResourcePool;
pub use sharding::{route_entity, SearchResponse, ShardRouter};
