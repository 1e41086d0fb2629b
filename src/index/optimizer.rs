//! Index Optimizer
//!
//! Chooses between exhaustive and inverted-file indexes by corpus size,
//! trains the optional projection and centroids, and runs partitioned
//! build/search over in-memory corpora.
//!
//! # Lifecycle
//!
//! ```text
//!   train(sample) ──► TrainedState ──► build(vectors, ids) ──► IndexHandle
//!                                                                 │
//!                      append(rows) ──► delta segment ◄───────────┤
//!                                            │                    │
//!                 RebuildRecommended ──► rebuild(handle) ──► IndexHandle
//! ```
//!
//! All CPU-heavy work runs on the blocking thread pool; the async methods are
//! thin wrappers over the `*_blocking` variants.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::flat::FlatIndex;
use super::handle::{
    prepare_vector, AnnIndex, AppendOutcome, IndexHandle, IndexKind, PartitionedIndex,
};
use super::ivf::IvfIndex;
use super::kmeans::{train_centroids, KMeansParams};
use super::linalg::{check_dimension, normalized};
use super::pca::{Pca, PcaParams};
use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::sharding::merge::merge_ranked;

// =============================================================================
// Trained State
// =============================================================================

/// Output of [`IndexOptimizer::train`]
#[derive(Debug, Clone)]
pub struct TrainedState {
    /// Rows in the training sample
    pub sample_size: usize,
    /// Structure recommended for corpora like the sample
    pub kind: IndexKind,
    /// Projection into the reduced space, if trained
    pub projection: Option<Arc<Pca>>,
    /// Row-major centroids in the (possibly reduced) space
    pub centroids: Vec<f32>,
    /// Number of centroids
    pub nlist: usize,
    pub trained_at: DateTime<Utc>,
}

impl TrainedState {
    fn flat(sample_size: usize) -> Self {
        Self {
            sample_size,
            kind: IndexKind::Flat,
            projection: None,
            centroids: Vec::new(),
            nlist: 0,
            trained_at: Utc::now(),
        }
    }

    /// Dimension vectors have after projection
    pub fn output_dim(&self, input_dim: usize) -> usize {
        self.projection
            .as_ref()
            .map(|p| p.output_dim())
            .unwrap_or(input_dim)
    }
}

/// Capacity estimate for a corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEstimate {
    pub num_vectors: usize,
    pub vector_bytes: u64,
    pub index_bytes: u64,
    pub total_bytes: u64,
    pub recommended_bytes: u64,
}

// =============================================================================
// Index Optimizer
// =============================================================================

/// Builds and queries approximate indexes. Cheap to clone; clones share the
/// trained state.
#[derive(Debug, Clone)]
pub struct IndexOptimizer {
    dimension: usize,
    config: IndexConfig,
    trained: Arc<RwLock<Option<Arc<TrainedState>>>>,
}

impl IndexOptimizer {
    pub fn new(dimension: usize, config: IndexConfig) -> Self {
        Self {
            dimension,
            config,
            trained: Arc::new(RwLock::new(None)),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Most recent training result
    pub fn trained(&self) -> Option<Arc<TrainedState>> {
        self.trained.read().clone()
    }

    /// Centroid count for a corpus of `n` rows: `round(sqrt(n))`, capped.
    pub fn nlist_for(&self, n: usize) -> usize {
        ((n as f64).sqrt().round() as usize).clamp(1, self.config.max_centroids.max(1))
    }

    fn kmeans_params(&self) -> KMeansParams {
        KMeansParams {
            iterations: self.config.kmeans_iterations,
            seed: self.config.seed,
        }
    }

    // =========================================================================
    // Training
    // =========================================================================

    /// Fit projection and centroids on a sample (see [`train_blocking`](Self::train_blocking)).
    pub async fn train(&self, sample: Vec<Vec<f32>>) -> Result<Arc<TrainedState>> {
        let this = self.clone();
        run_blocking(move || this.train_blocking(&sample)).await
    }

    /// Samples larger than `train_threshold` get a projection to
    /// `min(reduced_dimension, D)` and `round(sqrt(n))` centroids; smaller
    /// samples recommend a flat index.
    #[instrument(skip(self, sample), fields(sample_size = sample.len()))]
    pub fn train_blocking(&self, sample: &[Vec<f32>]) -> Result<Arc<TrainedState>> {
        let n = sample.len();
        let state = if n > self.config.train_threshold {
            let unit = sample
                .iter()
                .map(|v| {
                    check_dimension(v, self.dimension)?;
                    normalized(v)
                })
                .collect::<Result<Vec<_>>>()?;

            let output_dim = self.config.reduced_dimension.min(self.dimension).max(1);
            let pca = Arc::new(Pca::fit(
                &unit,
                output_dim,
                PcaParams {
                    iterations: self.config.pca_iterations,
                    max_samples: self.config.pca_max_samples,
                    seed: self.config.seed,
                },
            )?);

            let mut rows = Vec::with_capacity(n * output_dim);
            for v in &unit {
                rows.extend(prepare_vector(v, self.dimension, Some(pca.as_ref()))?);
            }
            let nlist = self.nlist_for(n);
            let centroids = train_centroids(&rows, output_dim, nlist, self.kmeans_params());
            let nlist = centroids.len() / output_dim;

            TrainedState {
                sample_size: n,
                kind: IndexKind::Ivf,
                projection: Some(pca),
                centroids,
                nlist,
                trained_at: Utc::now(),
            }
        } else {
            for v in sample {
                check_dimension(v, self.dimension)?;
            }
            TrainedState::flat(n)
        };

        info!(
            kind = %state.kind,
            nlist = state.nlist,
            reduced_dim = state.output_dim(self.dimension),
            "Index training complete"
        );
        let state = Arc::new(state);
        *self.trained.write() = Some(state.clone());
        Ok(state)
    }

    // =========================================================================
    // Build
    // =========================================================================

    /// Build an index over `vectors` with the parallel `ids`.
    pub async fn build(&self, vectors: Vec<Vec<f32>>, ids: Vec<String>) -> Result<IndexHandle> {
        let this = self.clone();
        run_blocking(move || this.build_blocking(&vectors, ids)).await
    }

    #[instrument(skip(self, vectors, ids), fields(rows = vectors.len()))]
    pub fn build_blocking(&self, vectors: &[Vec<f32>], ids: Vec<String>) -> Result<IndexHandle> {
        if vectors.len() != ids.len() {
            return Err(Error::InvalidIndex(format!(
                "{} vectors but {} ids",
                vectors.len(),
                ids.len()
            )));
        }

        let trained = self.trained();
        let projection = trained
            .as_ref()
            .and_then(|t| t.projection.clone())
            .filter(|p| p.input_dim() == self.dimension);
        let dim = projection
            .as_ref()
            .map(|p| p.output_dim())
            .unwrap_or(self.dimension);

        let mut rows = Vec::with_capacity(vectors.len() * dim);
        for v in vectors {
            rows.extend(prepare_vector(v, self.dimension, projection.as_deref())?);
        }

        let reusable = trained
            .as_ref()
            .filter(|t| t.nlist > 0 && t.output_dim(self.dimension) == dim)
            .map(|t| t.centroids.clone());
        let index = self.index_rows(dim, rows, reusable);

        debug!(kind = %index.kind(), dim, "Index built");
        Ok(IndexHandle::new(index, ids, projection, self.dimension))
    }

    /// Pick the structure for already-prepared rows.
    fn index_rows(&self, dim: usize, rows: Vec<f32>, centroids: Option<Vec<f32>>) -> AnnIndex {
        let n = rows.len() / dim.max(1);
        if n == 0 || n < self.config.train_threshold {
            return AnnIndex::Flat(FlatIndex::from_rows(dim, rows));
        }
        let centroids = match centroids {
            Some(c) if !c.is_empty() => c,
            _ => train_centroids(&rows, dim, self.nlist_for(n), self.kmeans_params()),
        };
        AnnIndex::Ivf(IvfIndex::build(dim, centroids, &rows, self.config.nprobe))
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Ranked `(id, score)` pairs, best first, at most `k`.
    pub fn search(&self, handle: &IndexHandle, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        check_dimension(query, self.dimension)?;
        handle.search(query, k)
    }

    // =========================================================================
    // Incremental Growth
    // =========================================================================

    /// Append rows to the handle's delta segment.
    ///
    /// Appended rows are immediately searchable. Once the delta exceeds
    /// `rebuild_growth_ratio` of the base size the caller is told to rebuild.
    pub fn append(
        &self,
        handle: &mut IndexHandle,
        vectors: &[Vec<f32>],
        ids: Vec<String>,
    ) -> Result<AppendOutcome> {
        if vectors.len() != ids.len() {
            return Err(Error::InvalidIndex(format!(
                "{} vectors but {} ids",
                vectors.len(),
                ids.len()
            )));
        }
        let projection = handle.projection().cloned();
        let mut rows = Vec::with_capacity(vectors.len() * handle.indexed_dim());
        for v in vectors {
            rows.extend(prepare_vector(v, handle.input_dim(), projection.as_deref())?);
        }
        handle.push_delta(ids, &rows);

        let delta_len = handle.delta_len();
        if handle.needs_rebuild(self.config.rebuild_growth_ratio) {
            let base_len = handle.base_len();
            warn!(delta_len, base_len, "Index delta outgrew rebuild ratio");
            Ok(AppendOutcome::RebuildRecommended {
                delta_len,
                base_len,
            })
        } else {
            Ok(AppendOutcome::Appended { delta_len })
        }
    }

    /// Rebuild a handle wholesale, folding the delta into the trained structure.
    pub async fn rebuild(&self, handle: IndexHandle) -> Result<IndexHandle> {
        let this = self.clone();
        run_blocking(move || Ok(this.rebuild_blocking(&handle))).await
    }

    /// Stored rows are already in index space, so the projection is kept and
    /// centroids are retrained on the full row set.
    pub fn rebuild_blocking(&self, handle: &IndexHandle) -> IndexHandle {
        let (ids, rows) = handle.export_rows();
        let index = self.index_rows(handle.indexed_dim(), rows, None);
        info!(
            rows = ids.len(),
            kind = %index.kind(),
            "Index rebuilt"
        );
        IndexHandle::new(
            index,
            ids,
            handle.projection().cloned(),
            handle.input_dim(),
        )
    }

    // =========================================================================
    // Partitioned Build / Search
    // =========================================================================

    /// Split the corpus into contiguous ranges and build one index per range
    /// concurrently. The last partition takes the remainder.
    #[instrument(skip(self, vectors, ids), fields(rows = vectors.len()))]
    pub async fn partitioned_build(
        &self,
        vectors: Vec<Vec<f32>>,
        ids: Vec<String>,
        partitions: usize,
    ) -> Result<PartitionedIndex> {
        let n = vectors.len();
        if n != ids.len() {
            return Err(Error::InvalidIndex(format!(
                "{} vectors but {} ids",
                n,
                ids.len()
            )));
        }
        if n == 0 {
            return Err(Error::InvalidIndex(
                "cannot partition an empty corpus".into(),
            ));
        }

        let p = partitions.clamp(1, n);
        let size = n / p;
        let mut vector_iter = vectors.into_iter();
        let mut id_iter = ids.into_iter();

        let mut tasks = Vec::with_capacity(p);
        for i in 0..p {
            let len = if i + 1 == p { n - size * (p - 1) } else { size };
            let chunk: Vec<Vec<f32>> = vector_iter.by_ref().take(len).collect();
            let chunk_ids: Vec<String> = id_iter.by_ref().take(len).collect();
            let this = self.clone();
            tasks.push(run_blocking(move || this.build_blocking(&chunk, chunk_ids)));
        }

        let partitions = join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.map(Arc::new))
            .collect::<Result<Vec<_>>>()?;

        info!(partitions = partitions.len(), "Partitioned index built");
        Ok(PartitionedIndex::new(partitions))
    }

    /// Fan out to every partition asking for `2k` candidates each, merge and
    /// truncate to `k`. A failing partition contributes nothing.
    pub async fn partitioned_search(
        &self,
        index: &PartitionedIndex,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<(String, f32)>> {
        check_dimension(query, self.dimension)?;
        normalized(query)?;

        let per_partition = k.saturating_mul(2);
        let tasks = index.partitions().iter().map(|partition| {
            let partition = partition.clone();
            let query = query.to_vec();
            run_blocking(move || partition.search(&query, per_partition))
        });

        let mut lists = Vec::with_capacity(index.partition_count());
        let mut last_error = None;
        for (i, result) in join_all(tasks).await.into_iter().enumerate() {
            match result {
                Ok(list) => lists.push(list),
                Err(e) => {
                    warn!(partition = i, error = %e, "Partition search failed");
                    last_error = Some(e);
                }
            }
        }

        if lists.is_empty() {
            return Err(last_error.unwrap_or_else(|| {
                Error::IndexNotBuilt("partitioned index has no partitions".into())
            }));
        }
        Ok(merge_ranked(lists, k).items)
    }

    // =========================================================================
    // Capacity Planning
    // =========================================================================

    /// Estimated memory for a corpus of `num_vectors`. Pure, no I/O.
    pub fn estimate_memory(&self, num_vectors: usize) -> MemoryEstimate {
        let per_vector = self.dimension as u64 * std::mem::size_of::<f32>() as u64;
        let vector_bytes = num_vectors as u64 * per_vector;
        let index_bytes = if num_vectors < self.config.train_threshold {
            vector_bytes
        } else {
            vector_bytes + self.nlist_for(num_vectors) as u64 * per_vector
        };
        let total_bytes = vector_bytes + index_bytes;
        MemoryEstimate {
            num_vectors,
            vector_bytes,
            index_bytes,
            total_bytes,
            recommended_bytes: total_bytes + total_bytes / 2,
        }
    }
}

/// Run CPU-bound work on the blocking pool.
async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("index task failed: {e}")))?
}

// =============================================================================
// Tests
// =============================================================================
