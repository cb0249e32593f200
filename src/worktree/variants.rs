//! Ranking of alternative implementations of one component.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Fewest and most variants a component may be explored with.
pub const MIN_VARIANTS: usize = 2;
pub const MAX_VARIANTS: usize = 3;

/// Scores a worker reports for one variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantMetrics {
    /// Fraction of checks passing, 0.0..=1.0
    #[serde(default)]
    pub correctness: f64,
    /// Lower is better
    #[serde(default)]
    pub complexity: u32,
    /// Lower is better
    #[serde(default)]
    pub dependency_count: u32,
}

impl VariantMetrics {
    pub fn new(correctness: f64, complexity: u32, dependency_count: u32) -> Self {
        Self {
            correctness,
            complexity,
            dependency_count,
        }
    }

    /// `Less` when `self` ranks ahead of `other`.
    fn rank(&self, other: &Self) -> Ordering {
        other
            .correctness
            .total_cmp(&self.correctness)
            .then(self.complexity.cmp(&other.complexity))
            .then(self.dependency_count.cmp(&other.dependency_count))
    }
}

/// Clamp a requested variant count into the supported range.
pub fn clamp_variant_count(requested: usize) -> usize {
    requested.clamp(MIN_VARIANTS, MAX_VARIANTS)
}

/// Index of the best candidate: highest correctness, then lowest complexity,
/// then fewest dependencies, then the earliest declared.
pub fn select_best(candidates: &[VariantMetrics]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, metrics) in candidates.iter().enumerate() {
        match best {
            Some(b) if metrics.rank(&candidates[b]) != Ordering::Less => {}
            _ => best = Some(i),
        }
    }
    best
}
