//! Engine Configuration
//!
//! All settings have defaults so a partial YAML file (or none at all) yields a
//! working configuration.
//!
//! ```yaml
//! dimension: 512
//! sharding:
//!   shard_count: 8
//!   over_fetch_factor: 2.0
//! cache:
//!   local_capacity: 50000
//!   prefetch:
//!     batch_limit: 50
//! index:
//!   train_threshold: 10000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default vector dimension (CLIP ViT-B/32 embeddings)
pub const DEFAULT_DIMENSION: usize = 512;

// =============================================================================
// Top-level Configuration
// =============================================================================

/// Complete data-plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Vector dimension D shared by every index and shard
    pub dimension: usize,
    /// Shard router settings
    pub sharding: ShardingConfig,
    /// Tiered cache settings
    pub cache: CacheConfig,
    /// Approximate index settings
    pub index: IndexConfig,
    /// Connection pool settings
    pub pool: PoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            sharding: ShardingConfig::default(),
            cache: CacheConfig::default(),
            index: IndexConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&raw)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(Error::Config("dimension must be positive".into()));
        }
        if self.sharding.shard_count == 0 {
            return Err(Error::Config("shard_count must be at least 1".into()));
        }
        if self.sharding.over_fetch_factor < 1.0 {
            return Err(Error::Config(format!(
                "over_fetch_factor must be >= 1.0, got {}",
                self.sharding.over_fetch_factor
            )));
        }
        if self.cache.prefetch.batch_limit == 0 || self.cache.prefetch.queue_capacity == 0 {
            return Err(Error::Config(
                "prefetch batch_limit and queue_capacity must be positive".into(),
            ));
        }
        if self.index.nprobe == 0 {
            return Err(Error::Config("nprobe must be at least 1".into()));
        }
        if self.pool.size == 0 {
            return Err(Error::Config("pool size must be at least 1".into()));
        }
        Ok(())
    }
}

// =============================================================================
// Sharding
// =============================================================================

/// Shard router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardingConfig {
    /// Number of shards (fixed for the lifetime of a deployment)
    pub shard_count: usize,
    /// Base collection name; shard i owns `{collection}_shard_{i}`
    pub collection: String,
    /// Each shard is asked for `ceil(top_k * over_fetch_factor)` candidates
    pub over_fetch_factor: f64,
    /// Deadline for one fan-out search or write, in milliseconds
    pub request_timeout_ms: u64,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            shard_count: 8,
            collection: "image_features".to_string(),
            over_fetch_factor: 2.0,
            request_timeout_ms: 30_000,
        }
    }
}

impl ShardingConfig {
    /// Fan-out deadline
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Collection name owned by a shard
    pub fn shard_collection(&self, shard: usize) -> String {
        format!("{}_shard_{}", self.collection, shard)
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Tiered cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries in the local LFU tier
    pub local_capacity: usize,
    /// TTL used when callers do not pass one, in seconds
    pub default_ttl_secs: u64,
    /// Key prefix for cached search results
    pub search_prefix: String,
    /// Drop cached search results after every successful write
    pub invalidate_on_write: bool,
    /// Prefetch pipeline
    pub prefetch: PrefetchConfig,
    /// Remote value compression
    pub compression: CompressionConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            local_capacity: 50_000,
            default_ttl_secs: 3600,
            search_prefix: "search".to_string(),
            invalidate_on_write: false,
            prefetch: PrefetchConfig::default(),
            compression: CompressionConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Default remote TTL
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

/// Prefetch worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    /// Start the background worker
    pub enabled: bool,
    /// Bounded queue size; hints beyond it are dropped
    pub queue_capacity: usize,
    /// Maximum keys per warm-up batch
    pub batch_limit: usize,
    /// How long the worker waits for a first key, in milliseconds
    pub idle_timeout_ms: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: 1000,
            batch_limit: 50,
            idle_timeout_ms: 1000,
        }
    }
}

impl PrefetchConfig {
    /// Idle timeout as a duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Remote value compression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress values written to the remote tier
    pub enabled: bool,
    /// Values smaller than this are stored raw
    pub min_size_bytes: usize,
    /// LZ4 high-compression level
    pub level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size_bytes: 1024,
            level: 6,
        }
    }
}

// =============================================================================
// Index
// =============================================================================

/// Index optimizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Corpus/sample size above which PCA and IVF are used
    pub train_threshold: usize,
    /// Upper bound on the reduced dimension (actual is `min(this, D)`)
    pub reduced_dimension: usize,
    /// Lists probed per approximate search
    pub nprobe: usize,
    /// Upper bound on IVF centroids
    pub max_centroids: usize,
    /// Lloyd iterations for centroid training
    pub kmeans_iterations: usize,
    /// Rows used to fit the projection
    pub pca_max_samples: usize,
    /// Subspace iterations for the projection
    pub pca_iterations: usize,
    /// Delta/base ratio at which a rebuild is recommended
    pub rebuild_growth_ratio: f64,
    /// Seed for centroid initialization
    pub seed: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            train_threshold: 10_000,
            reduced_dimension: 256,
            nprobe: 10,
            max_centroids: 4096,
            kmeans_iterations: 20,
            pca_max_samples: 4096,
            pca_iterations: 8,
            rebuild_growth_ratio: 0.2,
            seed: 0x5eed,
        }
    }
}

// =============================================================================
// Pool
// =============================================================================

/// Resource pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Long-lived handles per backend
    pub size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { size: 10 }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dimension, 512);
        assert_eq!(config.sharding.over_fetch_factor, 2.0);
        assert_eq!(config.cache.prefetch.batch_limit, 50);
        assert_eq!(config.cache.prefetch.idle_timeout(), Duration::from_secs(1));
        assert_eq!(config.index.train_threshold, 10_000);
        assert_eq!(config.index.nprobe, 10);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "dimension: 128\nsharding:\n  shard_count: 4\n";
        let config = EngineConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.dimension, 128);
        assert_eq!(config.sharding.shard_count, 4);
        assert_eq!(config.sharding.collection, "image_features");
        assert_eq!(config.cache.local_capacity, 50_000);
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        let yaml = "sharding:\n  shard_count: 0\n";
        let err = EngineConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let yaml = "sharding:\n  over_fetch_factor: 0.5\n";
        assert!(EngineConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_shard_collection_name() {
        let config = ShardingConfig::default();
        assert_eq!(config.shard_collection(3), "image_features_shard_3");
    }
}
