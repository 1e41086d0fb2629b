//! Index handles
//!
//! An [`IndexHandle`] bundles the trained structure with its parallel id
//! sequence, the projection applied at build time and a delta segment for
//! rows appended afterwards.
//!
//! ```text
//!            ┌────────────────────────── IndexHandle ─────────────────────────┐
//!  query ──► │ normalize ─► project? ─► normalize ─┬─► AnnIndex (Flat | Ivf)  │ ──► merge ──► top k
//!            │                                     └─► delta (Flat)           │
//!            └────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::flat::{FlatIndex, VectorIndex};
use super::ivf::IvfIndex;
use super::linalg::{check_dimension, normalize_in_place};
use super::pca::Pca;
use crate::error::{Error, Result};
use crate::sharding::merge::merge_ranked;

// =============================================================================
// Index Variants
// =============================================================================

/// Which structure backs an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Exhaustive scan
    Flat,
    /// Inverted file over trained centroids
    Ivf,
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::Flat => write!(f, "flat"),
            IndexKind::Ivf => write!(f, "ivf"),
        }
    }
}

/// Tagged index structure, selected at build time by corpus size.
#[derive(Debug, Clone)]
pub enum AnnIndex {
    Flat(FlatIndex),
    Ivf(IvfIndex),
}

impl AnnIndex {
    pub fn kind(&self) -> IndexKind {
        match self {
            AnnIndex::Flat(_) => IndexKind::Flat,
            AnnIndex::Ivf(_) => IndexKind::Ivf,
        }
    }

    /// Row-major copy of the indexed vectors in row order.
    pub fn reconstruct_all(&self) -> Vec<f32> {
        match self {
            AnnIndex::Flat(idx) => idx.data().to_vec(),
            AnnIndex::Ivf(idx) => idx.reconstruct_all(),
        }
    }
}

impl VectorIndex for AnnIndex {
    fn dim(&self) -> usize {
        match self {
            AnnIndex::Flat(idx) => idx.dim(),
            AnnIndex::Ivf(idx) => idx.dim(),
        }
    }

    fn len(&self) -> usize {
        match self {
            AnnIndex::Flat(idx) => idx.len(),
            AnnIndex::Ivf(idx) => idx.len(),
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        match self {
            AnnIndex::Flat(idx) => idx.search(query, k),
            AnnIndex::Ivf(idx) => idx.search(query, k),
        }
    }
}

// =============================================================================
// Append Outcome
// =============================================================================

/// Result of appending rows after a build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Rows are searchable through the delta segment
    Appended { delta_len: usize },
    /// Rows were appended and the delta outgrew the rebuild ratio
    RebuildRecommended { delta_len: usize, base_len: usize },
}

// =============================================================================
// Index Handle
// =============================================================================

/// A built index and everything needed to query it.
#[derive(Debug, Clone)]
pub struct IndexHandle {
    index: AnnIndex,
    ids: Vec<String>,
    projection: Option<Arc<Pca>>,
    delta: FlatIndex,
    delta_ids: Vec<String>,
    input_dim: usize,
    built_at: DateTime<Utc>,
}

impl IndexHandle {
    pub(crate) fn new(
        index: AnnIndex,
        ids: Vec<String>,
        projection: Option<Arc<Pca>>,
        input_dim: usize,
    ) -> Self {
        let dim = index.dim();
        Self {
            index,
            ids,
            projection,
            delta: FlatIndex::new(dim),
            delta_ids: Vec::new(),
            input_dim,
            built_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> IndexKind {
        self.index.kind()
    }

    /// Rows in the trained structure plus the delta segment
    pub fn len(&self) -> usize {
        self.base_len() + self.delta_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn base_len(&self) -> usize {
        self.ids.len()
    }

    pub fn delta_len(&self) -> usize {
        self.delta_ids.len()
    }

    /// Dimension of vectors accepted by [`search`](Self::search)
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Dimension of the stored vectors (after projection)
    pub fn indexed_dim(&self) -> usize {
        self.index.dim()
    }

    pub fn projection(&self) -> Option<&Arc<Pca>> {
        self.projection.as_ref()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// Ids of the trained structure in row order
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// The trained structure
    pub fn index(&self) -> &AnnIndex {
        &self.index
    }

    /// True when the delta segment exceeds `ratio` of the base size.
    pub fn needs_rebuild(&self, ratio: f64) -> bool {
        let delta = self.delta_len();
        if delta == 0 {
            return false;
        }
        delta as f64 > ratio * self.base_len() as f64
    }

    /// Map a raw vector into index space: normalize, project, re-normalize.
    pub fn prepare(&self, v: &[f32]) -> Result<Vec<f32>> {
        prepare_vector(v, self.input_dim, self.projection.as_deref())
    }

    /// Ranked `(id, score)` pairs from both the trained structure and the delta.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>> {
        let q = self.prepare(query)?;
        Ok(self.search_prepared(&q, k))
    }

    pub(crate) fn search_prepared(&self, q: &[f32], k: usize) -> Vec<(String, f32)> {
        let base: Vec<(String, f32)> = self
            .index
            .search(q, k)
            .into_iter()
            .filter_map(|(row, score)| self.ids.get(row).map(|id| (id.clone(), score)))
            .collect();
        if self.delta_ids.is_empty() {
            return base;
        }
        let delta: Vec<(String, f32)> = self
            .delta
            .search(q, k)
            .into_iter()
            .filter_map(|(row, score)| self.delta_ids.get(row).map(|id| (id.clone(), score)))
            .collect();
        merge_ranked(vec![base, delta], k).items
    }

    /// Append prepared rows to the delta segment.
    pub(crate) fn push_delta(&mut self, ids: Vec<String>, rows: &[f32]) {
        let dim = self.indexed_dim();
        for row in rows.chunks_exact(dim) {
            self.delta.add(row);
        }
        self.delta_ids.extend(ids);
    }

    /// Every stored row in index space, base first then delta.
    pub(crate) fn export_rows(&self) -> (Vec<String>, Vec<f32>) {
        let mut ids = self.ids.clone();
        ids.extend(self.delta_ids.iter().cloned());
        let mut rows = self.index.reconstruct_all();
        rows.extend_from_slice(self.delta.data());
        (ids, rows)
    }
}

/// Normalize, optionally project, and re-normalize one vector.
///
/// A vector equal to the projection's sample mean has no centered
/// component; it falls back to the uncentered projection instead of
/// failing.
pub(crate) fn prepare_vector(v: &[f32], input_dim: usize, projection: Option<&Pca>) -> Result<Vec<f32>> {
    check_dimension(v, input_dim)?;
    let mut out = v.to_vec();
    normalize_in_place(&mut out)?;
    if let Some(pca) = projection {
        let mut projected = pca.transform(&out)?;
        if normalize_in_place(&mut projected).is_err() {
            projected = pca.transform_uncentered(&out)?;
            normalize_in_place(&mut projected).map_err(|_| {
                Error::InvalidVector("vector vanishes under the trained projection".into())
            })?;
        }
        out = projected;
    }
    Ok(out)
}

// =============================================================================
// Partitioned Index
// =============================================================================

/// Independent indexes over contiguous ranges of one corpus.
#[derive(Debug, Clone)]
pub struct PartitionedIndex {
    partitions: Vec<Arc<IndexHandle>>,
}

impl PartitionedIndex {
    pub(crate) fn new(partitions: Vec<Arc<IndexHandle>>) -> Self {
        Self { partitions }
    }

    pub fn partitions(&self) -> &[Arc<IndexHandle>] {
        &self.partitions
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Total rows across partitions
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_handle() -> IndexHandle {
        let data = vec![1.0, 0.0, 0.0, 1.0];
        IndexHandle::new(
            AnnIndex::Flat(FlatIndex::from_rows(2, data)),
            vec!["a".into(), "b".into()],
            None,
            2,
        )
    }

    #[test]
    fn test_search_maps_ids() {
        let handle = flat_handle();
        assert_eq!(handle.kind(), IndexKind::Flat);
        let res = handle.search(&[2.0, 0.0], 2).unwrap();
        assert_eq!(res[0].0, "a");
        assert_eq!(res[1].0, "b");
    }

    #[test]
    fn test_search_rejects_bad_query() {
        let handle = flat_handle();
        assert!(matches!(
            handle.search(&[1.0], 1),
            Err(Error::DimensionMismatch { .. })
        ));
        assert!(matches!(
            handle.search(&[0.0, 0.0], 1),
            Err(Error::InvalidVector(_))
        ));
    }

    #[test]
    fn test_delta_is_searchable() {
        let mut handle = flat_handle();
        let row = prepare_vector(&[1.0, 1.0], 2, None).unwrap();
        handle.push_delta(vec!["c".into()], &row);

        assert_eq!(handle.len(), 3);
        assert_eq!(handle.delta_len(), 1);
        let res = handle.search(&[1.0, 1.0], 1).unwrap();
        assert_eq!(res[0].0, "c");
    }

    #[test]
    fn test_needs_rebuild_ratio() {
        let mut handle = flat_handle();
        assert!(!handle.needs_rebuild(0.2));
        handle.push_delta(vec!["c".into()], &[0.6, 0.8]);
        // 1 > 0.2 * 2
        assert!(handle.needs_rebuild(0.2));
        assert!(!handle.needs_rebuild(0.5));
    }

    #[test]
    fn test_export_rows_order() {
        let mut handle = flat_handle();
        handle.push_delta(vec!["c".into()], &[0.6, 0.8]);
        let (ids, rows) = handle.export_rows();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(rows, vec![1.0, 0.0, 0.0, 1.0, 0.6, 0.8]);
    }
}
