//! Inverted-file index
//!
//! Rows are bucketed by nearest centroid. A query scores the centroids,
//! probes the best `nprobe` lists and ranks only the rows found there.
//!
//! ```text
//!   query ──► centroids (nlist) ──► top nprobe lists ──► exhaustive scan ──► top k
//! ```

use super::flat::{select_top_k, VectorIndex};
use super::kmeans::nearest;
use super::linalg::dot;

/// One inverted list: global row positions plus their vectors.
#[derive(Debug, Clone, Default)]
struct InvertedList {
    rows: Vec<usize>,
    data: Vec<f32>,
}

/// Approximate index over unit vectors.
#[derive(Debug, Clone)]
pub struct IvfIndex {
    dim: usize,
    centroids: Vec<f32>,
    lists: Vec<InvertedList>,
    nprobe: usize,
    len: usize,
}

impl IvfIndex {
    /// Assign every row of `data` to its nearest centroid.
    ///
    /// `centroids` is row-major `nlist x dim` and must not be empty.
    pub fn build(dim: usize, centroids: Vec<f32>, data: &[f32], nprobe: usize) -> Self {
        let nlist = if dim == 0 { 0 } else { centroids.len() / dim };
        let mut lists = vec![InvertedList::default(); nlist];
        let mut len = 0;

        if nlist > 0 {
            for (row, v) in data.chunks_exact(dim).enumerate() {
                let list = &mut lists[nearest(&centroids, dim, v)];
                list.rows.push(row);
                list.data.extend_from_slice(v);
                len += 1;
            }
        }

        Self {
            dim,
            centroids,
            lists,
            nprobe: nprobe.max(1),
            len,
        }
    }

    /// Number of inverted lists
    pub fn nlist(&self) -> usize {
        self.lists.len()
    }

    /// Lists probed per query, clamped to the list count
    pub fn effective_nprobe(&self) -> usize {
        self.nprobe.min(self.nlist())
    }

    /// Row-major copy of every vector ordered by global row.
    pub fn reconstruct_all(&self) -> Vec<f32> {
        let mut out = vec![0f32; self.len * self.dim];
        for list in &self.lists {
            for (p, &row) in list.rows.iter().enumerate() {
                out[row * self.dim..(row + 1) * self.dim]
                    .copy_from_slice(&list.data[p * self.dim..(p + 1) * self.dim]);
            }
        }
        out
    }
}

impl VectorIndex for IvfIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.len
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let nprobe = self.effective_nprobe();
        if nprobe == 0 || k == 0 {
            return Vec::new();
        }

        let probed = select_top_k(
            self.centroids
                .chunks_exact(self.dim)
                .enumerate()
                .map(|(i, c)| (i, dot(c, query))),
            nprobe,
        );

        let dim = self.dim;
        let candidates = probed.into_iter().flat_map(|(list, _)| {
            let list = &self.lists[list];
            list.rows
                .iter()
                .zip(list.data.chunks_exact(dim))
                .map(|(&row, v)| (row, dot(v, query)))
        });
        select_top_k(candidates, k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::linalg::normalized;

    fn corpus() -> Vec<f32> {
        let mut data = Vec::new();
        for v in [
            [1.0, 0.1, 0.0],
            [0.9, 0.2, 0.0],
            [0.0, 1.0, 0.1],
            [0.1, 0.9, 0.0],
            [0.0, 0.0, 1.0],
        ] {
            data.extend(normalized(&v).unwrap());
        }
        data
    }

    fn centroids() -> Vec<f32> {
        vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
    }

    #[test]
    fn test_lists_partition_rows() {
        let idx = IvfIndex::build(3, centroids(), &corpus(), 1);
        assert_eq!(idx.nlist(), 3);
        assert_eq!(idx.len(), 6);
        let total: usize = idx.lists.iter().map(|l| l.rows.len()).sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn test_single_probe_stays_in_list() {
        let idx = IvfIndex::build(3, centroids(), &corpus(), 1);
        let res = idx.search(&[1.0, 0.0, 0.0], 10);
        let rows: Vec<usize> = res.iter().map(|r| r.0).collect();
        assert_eq!(rows, vec![0, 1, 2]);
    }

    #[test]
    fn test_nprobe_clamped_to_nlist() {
        let idx = IvfIndex::build(3, centroids(), &corpus(), 50);
        assert_eq!(idx.effective_nprobe(), 3);
        // Probing every list is exhaustive
        assert_eq!(idx.search(&[1.0, 0.0, 0.0], 10).len(), 6);
    }

    #[test]
    fn test_reconstruct_preserves_order() {
        let data = corpus();
        let idx = IvfIndex::build(3, centroids(), &data, 2);
        let rebuilt = idx.reconstruct_all();
        assert_eq!(rebuilt, data);
        // Rows 3 and 4 sit in the same list but keep their global slots
        assert_eq!(&rebuilt[9..15], &data[9..15]);
    }
}
