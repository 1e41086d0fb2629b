//! Vector math helpers
//!
//! Cosine similarity is inner product on unit vectors, so everything that
//! enters an index or a backend goes through [`normalized`] first.

use crate::error::{Error, Result};

/// Inner product accumulated in f64.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    dot_f64(a, b) as f32
}

#[inline]
fn dot_f64(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| x as f64 * y as f64)
        .sum()
}

/// Euclidean norm.
#[inline]
pub fn norm(v: &[f32]) -> f32 {
    dot_f64(v, v).sqrt() as f32
}

/// Cosine similarity of two raw vectors, clamped to `[-1, 1]`.
///
/// Computed fully in f64 so that `cosine(v, v)` is exactly `1.0`.
/// Zero-norm inputs score 0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let na = dot_f64(a, a).sqrt();
    let nb = dot_f64(b, b).sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot_f64(a, b) / (na * nb)).clamp(-1.0, 1.0) as f32
}

/// Reject vectors that do not have the deployment dimension.
pub fn check_dimension(v: &[f32], expected: usize) -> Result<()> {
    if v.len() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: v.len(),
        });
    }
    Ok(())
}

/// Scale a vector to unit L2 norm in place.
pub fn normalize_in_place(v: &mut [f32]) -> Result<()> {
    if v.iter().any(|x| !x.is_finite()) {
        return Err(Error::InvalidVector("non-finite component".into()));
    }
    let n = dot_f64(v, v).sqrt();
    if n == 0.0 {
        return Err(Error::InvalidVector("zero norm".into()));
    }
    for x in v.iter_mut() {
        *x = (*x as f64 / n) as f32;
    }
    Ok(())
}

/// Unit-norm copy of a vector.
pub fn normalized(v: &[f32]) -> Result<Vec<f32>> {
    let mut out = v.to_vec();
    normalize_in_place(&mut out)?;
    Ok(out)
}
