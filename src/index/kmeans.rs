//! Spherical k-means for inverted-file centroids
//!
//! Inputs are unit vectors; assignment maximizes inner product and centroids
//! are re-normalized after every update, so each centroid stays on the unit
//! sphere and ranking by dot product matches ranking by cosine.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::linalg::{dot, normalize_in_place};

/// Training parameters
#[derive(Debug, Clone, Copy)]
pub struct KMeansParams {
    pub iterations: usize,
    pub seed: u64,
}

/// Train `k` centroids over `n` row-major unit vectors of dimension `dim`.
///
/// Returns a row-major `k' x dim` buffer with `k' = min(k, n)`.
pub fn train_centroids(data: &[f32], dim: usize, k: usize, params: KMeansParams) -> Vec<f32> {
    let n = if dim == 0 { 0 } else { data.len() / dim };
    let k = k.min(n);
    if k == 0 {
        return Vec::new();
    }

    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut centroids = kmeans_plus_plus(data, dim, n, k, &mut rng);
    let mut assignment = vec![usize::MAX; n];

    for _ in 0..params.iterations.max(1) {
        let mut changed = false;
        for (i, slot) in assignment.iter_mut().enumerate() {
            let best = nearest(&centroids, dim, &data[i * dim..(i + 1) * dim]);
            if *slot != best {
                *slot = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sums = vec![0f32; k * dim];
        let mut counts = vec![0usize; k];
        for (i, &c) in assignment.iter().enumerate() {
            counts[c] += 1;
            for (s, &x) in sums[c * dim..(c + 1) * dim]
                .iter_mut()
                .zip(&data[i * dim..(i + 1) * dim])
            {
                *s += x;
            }
        }

        for c in 0..k {
            let slot = &mut sums[c * dim..(c + 1) * dim];
            if counts[c] == 0 || normalize_in_place(slot).is_err() {
                // Empty or degenerate cluster: re-seed from a random point
                let pick = rng.gen_range(0..n);
                slot.copy_from_slice(&data[pick * dim..(pick + 1) * dim]);
            }
        }
        centroids = sums;
    }

    centroids
}

/// Index of the centroid with the highest inner product.
pub fn nearest(centroids: &[f32], dim: usize, v: &[f32]) -> usize {
    centroids
        .chunks_exact(dim)
        .enumerate()
        .map(|(i, c)| (i, dot(c, v)))
        .max_by(|a, b| a.1.total_cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// k-means++ seeding with cosine distance `1 - <x, c>`.
fn kmeans_plus_plus(data: &[f32], dim: usize, n: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let mut centroids = Vec::with_capacity(k * dim);
    let first = rng.gen_range(0..n);
    centroids.extend_from_slice(&data[first * dim..(first + 1) * dim]);

    let mut dist: Vec<f64> = (0..n)
        .map(|i| sq_cos_dist(&data[i * dim..(i + 1) * dim], &centroids[..dim]))
        .collect();

    while centroids.len() < k * dim {
        let total: f64 = dist.iter().sum();
        let pick = if total <= f64::EPSILON {
            rng.gen_range(0..n)
        } else {
            let mut target = rng.gen_range(0.0..total);
            let mut chosen = n - 1;
            for (i, &d) in dist.iter().enumerate() {
                if target < d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        };

        let start = centroids.len();
        centroids.extend_from_slice(&data[pick * dim..(pick + 1) * dim]);
        let newest = &centroids[start..start + dim];
        for (i, d) in dist.iter_mut().enumerate() {
            let nd = sq_cos_dist(&data[i * dim..(i + 1) * dim], newest);
            if nd < *d {
                *d = nd;
            }
        }
    }
    centroids
}

#[inline]
fn sq_cos_dist(a: &[f32], b: &[f32]) -> f64 {
    let d = (1.0 - dot(a, b) as f64).max(0.0);
    d * d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::linalg::normalized;

    fn params() -> KMeansParams {
        KMeansParams {
            iterations: 20,
            seed: 7,
        }
    }

    /// Two tight clusters around +x and +y.
    fn two_clusters() -> Vec<f32> {
        let mut data = Vec::new();
        for i in 0..50 {
            let e = i as f32 * 0.001;
            data.extend(normalized(&[1.0, e, 0.0]).unwrap());
            data.extend(normalized(&[e, 1.0, 0.0]).unwrap());
        }
        data
    }

    #[test]
    fn test_separates_clusters() {
        let data = two_clusters();
        let centroids = train_centroids(&data, 3, 2, params());
        assert_eq!(centroids.len(), 6);

        let a = nearest(&centroids, 3, &[1.0, 0.0, 0.0]);
        let b = nearest(&centroids, 3, &[0.0, 1.0, 0.0]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_centroids_are_unit() {
        let centroids = train_centroids(&two_clusters(), 3, 2, params());
        for c in centroids.chunks_exact(3) {
            let n: f32 = c.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((n - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_k_capped_by_rows() {
        let data = normalized(&[1.0, 2.0]).unwrap();
        let centroids = train_centroids(&data, 2, 5, params());
        assert_eq!(centroids.len(), 2);
        assert!(train_centroids(&[], 2, 3, params()).is_empty());
    }

    #[test]
    fn test_deterministic_for_seed() {
        let data = two_clusters();
        assert_eq!(
            train_centroids(&data, 3, 2, params()),
            train_centroids(&data, 3, 2, params())
        );
    }
}
