//! Distance metric implementations.
//!
//! Each metric is a plain `fn(&[f32], &[f32]) -> f32` so it can be
//! handed to the graph as a function-pointer distance. All metrics
//! return a value where smaller means closer; similarity measures are
//! converted to distances.
//!
//! The hyperbolic metrics (Poincaré, Lorentz) clamp their `acosh`
//! argument to 1.0: float rounding can push it fractionally below the
//! domain boundary for near-identical points.

use crate::config::DistanceMetric;

impl DistanceMetric {
    /// Returns the metric's evaluation function.
    pub(crate) fn eval_fn(&self) -> fn(&[f32], &[f32]) -> f32 {
        match self {
            Self::L1 => l1,
            Self::L2 => l2,
            Self::Angle => angle,
            Self::Hamming => hamming,
            Self::Jaccard => jaccard,
            Self::Cosine => cosine,
            Self::NormalizedL2 => normalized_l2,
            Self::Poincare => poincare,
            Self::Lorentz => lorentz,
        }
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
fn norm(a: &[f32]) -> f32 {
    a.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[inline]
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot(a, b) / (norm_a * norm_b)
}

/// Manhattan distance.
pub(crate) fn l1(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum()
}

/// Euclidean distance.
pub(crate) fn l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Angular distance: arccos of cosine similarity, in radians.
pub(crate) fn angle(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b).clamp(-1.0, 1.0).acos()
}

/// Count of component positions where the vectors differ.
pub(crate) fn hamming(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).filter(|(x, y)| x != y).count() as f32
}

/// Generalized Jaccard distance: 1 − Σmin / Σmax.
///
/// Defined for non-negative component values; two zero vectors are at
/// distance 0.
pub(crate) fn jaccard(a: &[f32], b: &[f32]) -> f32 {
    let mut min_sum = 0.0f32;
    let mut max_sum = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        min_sum += x.min(*y);
        max_sum += x.max(*y);
    }
    if max_sum == 0.0 {
        return 0.0;
    }
    1.0 - min_sum / max_sum
}

/// Cosine distance: 1 − cosine similarity.
pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Euclidean distance between unit-normalized copies of the inputs.
///
/// Falls back to plain Euclidean distance when either vector has zero
/// norm (there is no direction to compare).
pub(crate) fn normalized_l2(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return l2(a, b);
    }
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x / norm_a - y / norm_b;
            d * d
        })
        .sum::<f32>()
        .sqrt()
}

/// Hyperbolic distance in the Poincaré ball model.
///
/// d(a, b) = arcosh(1 + 2·‖a−b‖² / ((1−‖a‖²)(1−‖b‖²)))
///
/// Points are expected inside the unit ball; the denominators are
/// floored at a small epsilon so boundary points stay finite.
pub(crate) fn poincare(a: &[f32], b: &[f32]) -> f32 {
    const EPS: f32 = 1e-12;
    let diff_sq: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
    let denom_a = (1.0 - a.iter().map(|x| x * x).sum::<f32>()).max(EPS);
    let denom_b = (1.0 - b.iter().map(|x| x * x).sum::<f32>()).max(EPS);
    let arg = 1.0 + 2.0 * diff_sq / (denom_a * denom_b);
    arg.max(1.0).acosh()
}

/// Hyperbolic distance in the Lorentz (hyperboloid) model.
///
/// The first component is the time-like coordinate:
/// d(a, b) = arcosh(a₀b₀ − Σᵢ₌₁ aᵢbᵢ)
pub(crate) fn lorentz(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() {
        return 0.0;
    }
    let spatial: f32 = a[1..]
        .iter()
        .zip(b[1..].iter())
        .map(|(x, y)| x * y)
        .sum();
    let inner = a[0] * b[0] - spatial;
    inner.max(1.0).acosh()
}
