//! Vector math shared by the in-memory matcher and the SQLite store.
//!
//! Everything is accumulated in `f64` even though embeddings are stored as
//! `f32`, so both ranking paths agree to well below display precision.

/// Maximum distance from 1.0 at which a vector still counts as unit length.
pub const UNIT_NORM_TOLERANCE: f64 = 1e-4;

/// Compute the L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f64 {
    v.iter()
        .map(|x| f64::from(*x) * f64::from(*x))
        .sum::<f64>()
        .sqrt()
}

/// Cosine similarity between two vectors.
///
/// When the lengths differ only the common prefix is compared. Returns `0.0`
/// when either side is empty, has zero norm, or the result is not finite.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let length = a.len().min(b.len());
    if length == 0 {
        return 0.0;
    }

    let (a, b) = (&a[..length], &b[..length]);
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();

    let similarity = dot / (norm_a * norm_b);
    if similarity.is_finite() {
        similarity
    } else {
        0.0
    }
}

/// Cosine distance as used by the structured store ordering.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b)
}

/// Check whether a vector is unit length within [`UNIT_NORM_TOLERANCE`].
pub fn is_unit(v: &[f32]) -> bool {
    (l2_norm(v) - 1.0).abs() <= UNIT_NORM_TOLERANCE
}

/// Scale a vector to unit length. Returns `None` for zero-norm input.
pub fn normalize(v: &[f32]) -> Option<Vec<f32>> {
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(v.iter().map(|x| (f64::from(*x) / norm) as f32).collect())
}
