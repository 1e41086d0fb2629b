//! Exhaustive inner-product index

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use super::linalg::dot;

/// Shared interface of the index variants.
///
/// Rows are identified by their insertion position; the owning handle maps
/// positions back to entity ids.
pub trait VectorIndex: Send + Sync {
    /// Vector dimension
    fn dim(&self) -> usize;

    /// Number of indexed rows
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Up to `k` `(row, score)` pairs by descending inner product.
    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)>;
}

/// Brute-force index over contiguous row-major storage.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Create an empty index
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
        }
    }

    /// Build from a row-major buffer whose length is a multiple of `dim`.
    pub fn from_rows(dim: usize, data: Vec<f32>) -> Self {
        debug_assert!(dim > 0 && data.len() % dim == 0);
        Self { dim, data }
    }

    /// Append one row
    pub fn add(&mut self, v: &[f32]) {
        debug_assert_eq!(v.len(), self.dim);
        self.data.extend_from_slice(v);
    }

    /// Raw row-major storage
    pub fn data(&self) -> &[f32] {
        &self.data
    }
}

impl VectorIndex for FlatIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.data.len() / self.dim
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if self.dim == 0 {
            return Vec::new();
        }
        select_top_k(
            self.data
                .chunks_exact(self.dim)
                .enumerate()
                .map(|(i, row)| (i, dot(row, query))),
            k,
        )
    }
}

/// Keep the best `k` candidates with a bounded min-heap.
///
/// Output is sorted by descending score, ties by ascending row.
pub(crate) fn select_top_k(
    candidates: impl IntoIterator<Item = (usize, f32)>,
    k: usize,
) -> Vec<(usize, f32)> {
    if k == 0 {
        return Vec::new();
    }
    // Heap top is the current worst kept candidate
    let mut heap: BinaryHeap<Reverse<(OrderedFloat<f32>, Reverse<usize>)>> =
        BinaryHeap::with_capacity(k + 1);

    for (row, score) in candidates {
        let item = (OrderedFloat(score), Reverse(row));
        if heap.len() < k {
            heap.push(Reverse(item));
        } else if let Some(Reverse(worst)) = heap.peek() {
            if item > *worst {
                heap.pop();
                heap.push(Reverse(item));
            }
        }
    }

    let mut out: Vec<(usize, f32)> = heap
        .into_iter()
        .map(|Reverse((score, Reverse(row)))| (row, score.into_inner()))
        .collect();
    out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}
