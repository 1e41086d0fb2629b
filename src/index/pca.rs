//! Linear dimensionality reduction
//!
//! Principal components are found by subspace (block power) iteration on the
//! sample covariance matrix. This converges to the leading eigenvectors for
//! the symmetric PSD covariance and avoids a full eigendecomposition.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};

/// Fitting parameters
#[derive(Debug, Clone, Copy)]
pub struct PcaParams {
    /// Subspace iterations
    pub iterations: usize,
    /// Maximum rows used to estimate the covariance
    pub max_samples: usize,
    /// RNG seed for the initial basis
    pub seed: u64,
}

impl Default for PcaParams {
    fn default() -> Self {
        Self {
            iterations: 8,
            max_samples: 4096,
            seed: 0x5eed,
        }
    }
}

/// A fitted projection from `input_dim` to `output_dim`.
#[derive(Debug, Clone)]
pub struct Pca {
    input_dim: usize,
    output_dim: usize,
    mean: Vec<f32>,
    /// Row-major `output_dim x input_dim`, rows ordered by explained variance
    components: Vec<f32>,
    explained_variance: Vec<f64>,
}

impl Pca {
    /// Fit a projection keeping `output_dim` components.
    pub fn fit(samples: &[Vec<f32>], output_dim: usize, params: PcaParams) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| Error::InvalidIndex("cannot fit projection on empty sample".into()))?;
        let d = first.len();
        if d == 0 {
            return Err(Error::InvalidIndex("zero-dimensional sample".into()));
        }
        if let Some(bad) = samples.iter().find(|s| s.len() != d) {
            return Err(Error::DimensionMismatch {
                expected: d,
                actual: bad.len(),
            });
        }
        let r = output_dim.clamp(1, d);

        // Evenly strided subsample
        let max_samples = params.max_samples.max(2);
        let step = samples.len().div_ceil(max_samples).max(1);
        let rows: Vec<&Vec<f32>> = samples.iter().step_by(step).collect();
        let n = rows.len();

        let mut mean = vec![0f64; d];
        for row in &rows {
            for (m, &x) in mean.iter_mut().zip(row.iter()) {
                *m += x as f64;
            }
        }
        for m in mean.iter_mut() {
            *m /= n as f64;
        }

        let cov = covariance(&rows, &mean);

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut basis: Vec<f64> = (0..r * d).map(|_| rng.gen_range(-1.0..1.0)).collect();
        orthonormalize_rows(&mut basis, r, d, &mut rng);

        for _ in 0..params.iterations.max(1) {
            let mut next = vec![0f64; r * d];
            for k in 0..r {
                mat_vec(&cov, &basis[k * d..(k + 1) * d], &mut next[k * d..(k + 1) * d]);
            }
            basis = next;
            orthonormalize_rows(&mut basis, r, d, &mut rng);
        }

        // Order components by Rayleigh quotient
        let mut scratch = vec![0f64; d];
        let mut ranked: Vec<(usize, f64)> = (0..r)
            .map(|k| {
                let q = &basis[k * d..(k + 1) * d];
                mat_vec(&cov, q, &mut scratch);
                let variance: f64 = q.iter().zip(scratch.iter()).map(|(a, b)| a * b).sum();
                (k, variance)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let mut components = Vec::with_capacity(r * d);
        let mut explained_variance = Vec::with_capacity(r);
        for (k, variance) in ranked {
            components.extend(basis[k * d..(k + 1) * d].iter().map(|&x| x as f32));
            explained_variance.push(variance.max(0.0));
        }

        Ok(Self {
            input_dim: d,
            output_dim: r,
            mean: mean.into_iter().map(|m| m as f32).collect(),
            components,
            explained_variance,
        })
    }

    /// Project a vector into the reduced space.
    pub fn transform(&self, v: &[f32]) -> Result<Vec<f32>> {
        self.apply(v, true)
    }

    /// Project without subtracting the sample mean.
    ///
    /// Gives a usable direction for vectors sitting on the mean, where the
    /// centered projection is zero.
    pub fn transform_uncentered(&self, v: &[f32]) -> Result<Vec<f32>> {
        self.apply(v, false)
    }

    fn apply(&self, v: &[f32], center: bool) -> Result<Vec<f32>> {
        if v.len() != self.input_dim {
            return Err(Error::DimensionMismatch {
                expected: self.input_dim,
                actual: v.len(),
            });
        }
        let shifted: Vec<f64> = v
            .iter()
            .zip(self.mean.iter())
            .map(|(&x, &m)| if center { x as f64 - m as f64 } else { x as f64 })
            .collect();
        Ok(self
            .components
            .chunks_exact(self.input_dim)
            .map(|row| {
                row.iter()
                    .zip(shifted.iter())
                    .map(|(&c, &x)| c as f64 * x)
                    .sum::<f64>() as f32
            })
            .collect())
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    /// Variance captured by each component, descending
    pub fn explained_variance(&self) -> &[f64] {
        &self.explained_variance
    }
}

/// Sample covariance, full symmetric `d x d` matrix in row-major order.
fn covariance(rows: &[&Vec<f32>], mean: &[f64]) -> Vec<f64> {
    let d = mean.len();
    let mut cov = vec![0f64; d * d];
    let mut centered = vec![0f64; d];

    for row in rows {
        for ((c, &x), &m) in centered.iter_mut().zip(row.iter()).zip(mean.iter()) {
            *c = x as f64 - m;
        }
        for i in 0..d {
            let ci = centered[i];
            if ci == 0.0 {
                continue;
            }
            let base = i * d;
            for j in i..d {
                cov[base + j] += ci * centered[j];
            }
        }
    }

    let denom = (rows.len().saturating_sub(1)).max(1) as f64;
    for i in 0..d {
        for j in i..d {
            let v = cov[i * d + j] / denom;
            cov[i * d + j] = v;
            cov[j * d + i] = v;
        }
    }
    cov
}

fn mat_vec(m: &[f64], v: &[f64], out: &mut [f64]) {
    let d = v.len();
    for (i, o) in out.iter_mut().enumerate() {
        *o = m[i * d..(i + 1) * d]
            .iter()
            .zip(v.iter())
            .map(|(a, b)| a * b)
            .sum();
    }
}

/// Modified Gram-Schmidt over `r` rows of length `d`.
///
/// Rows that collapse (rank deficiency) are re-drawn at random.
fn orthonormalize_rows(rows: &mut [f64], r: usize, d: usize, rng: &mut StdRng) {
    for k in 0..r {
        for attempt in 0..4 {
            for j in 0..k {
                let (done, rest) = rows.split_at_mut(k * d);
                let prev = &done[j * d..(j + 1) * d];
                let cur = &mut rest[..d];
                let proj: f64 = prev.iter().zip(cur.iter()).map(|(a, b)| a * b).sum();
                for (c, p) in cur.iter_mut().zip(prev.iter()) {
                    *c -= proj * p;
                }
            }
            let cur = &mut rows[k * d..(k + 1) * d];
            let n: f64 = cur.iter().map(|x| x * x).sum::<f64>().sqrt();
            if n > 1e-12 {
                for c in cur.iter_mut() {
                    *c /= n;
                }
                break;
            }
            if attempt < 3 {
                for c in cur.iter_mut() {
                    *c = rng.gen_range(-1.0..1.0);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points spread along the (1, 1, 0) direction with tiny noise elsewhere.
    fn line_samples() -> Vec<Vec<f32>> {
        (0..200)
            .map(|i| {
                let t = i as f32 / 10.0 - 10.0;
                let noise = ((i * 7919) % 13) as f32 * 0.001;
                vec![t, t, noise]
            })
            .collect()
    }

    #[test]
    fn test_pca_finds_dominant_direction() {
        let pca = Pca::fit(&line_samples(), 1, PcaParams::default()).unwrap();
        assert_eq!(pca.output_dim(), 1);
        assert_eq!(pca.input_dim(), 3);

        let c = &pca.components;
        let expected = std::f32::consts::FRAC_1_SQRT_2;
        assert!((c[0].abs() - expected).abs() < 1e-3, "got {:?}", c);
        assert!((c[1].abs() - expected).abs() < 1e-3, "got {:?}", c);
        assert!(c[2].abs() < 1e-2);
    }

    #[test]
    fn test_components_are_orthonormal() {
        let samples: Vec<Vec<f32>> = (0..300)
            .map(|i| {
                let i = i as f32;
                vec![i.sin() * 3.0, i.cos(), (i * 0.3).sin() * 0.5, i % 7.0 * 0.1]
            })
            .collect();
        let pca = Pca::fit(&samples, 3, PcaParams::default()).unwrap();
        let d = pca.input_dim();
        for a in 0..3 {
            for b in 0..3 {
                let ra = &pca.components[a * d..(a + 1) * d];
                let rb = &pca.components[b * d..(b + 1) * d];
                let p: f32 = ra.iter().zip(rb).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((p - expected).abs() < 1e-3, "<{a},{b}> = {p}");
            }
        }
        let ev = pca.explained_variance();
        assert!(ev[0] >= ev[1] && ev[1] >= ev[2]);
    }

    #[test]
    fn test_transform_dimension() {
        let pca = Pca::fit(&line_samples(), 2, PcaParams::default()).unwrap();
        let out = pca.transform(&[1.0, 1.0, 0.0]).unwrap();
        assert_eq!(out.len(), 2);
        assert!(pca.transform(&[1.0]).is_err());
    }

    #[test]
    fn test_mean_vector_projects_uncentered() {
        let samples = vec![vec![0.6f32, 0.8, 0.0]; 40];
        let pca = Pca::fit(&samples, 3, PcaParams::default()).unwrap();

        let centered = pca.transform(&samples[0]).unwrap();
        assert!(centered.iter().all(|x| *x == 0.0));

        // Full-rank orthonormal basis keeps the norm
        let raw = pca.transform_uncentered(&samples[0]).unwrap();
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3, "norm {norm}");
    }

    #[test]
    fn test_output_dim_clamped() {
        let pca = Pca::fit(&line_samples(), 10, PcaParams::default()).unwrap();
        assert_eq!(pca.output_dim(), 3);
    }

    #[test]
    fn test_fit_rejects_empty() {
        assert!(Pca::fit(&[], 2, PcaParams::default()).is_err());
    }
}
