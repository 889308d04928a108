use std::collections::BTreeSet;

use rand::distributions::WeightedIndex;
use rand::prelude::*;

/// Number of random draws used for the energy-weighted point subset.
const RANDOM_DRAWS: usize = 60;

/// Stride of the deterministic fit-point grid.
const GRID_STRIDE: usize = 3;

/// Select the sample indices used to score an overlap candidate.
///
/// Deterministic mode takes every third sample. Random mode draws
/// `RANDOM_DRAWS` indices with probability proportional to the squared
/// amplitude, so the subset concentrates on the informative high-energy part
/// of the reference bunch and fewer fit iterations are needed. Duplicate
/// draws collapse, the result is sorted and unique.
///
/// A reference with no energy at all cannot seed the weighted distribution
/// and falls back to the deterministic grid.
pub fn generate_points<R: Rng>(data: &[f64], random: bool, rng: &mut R) -> Vec<usize> {
    if random {
        let weights: Vec<f64> = data.iter().map(|v| v * v).collect();
        let total: f64 = weights.iter().sum();
        if total > 0.0 {
            if let Ok(dist) = WeightedIndex::new(&weights) {
                let points: BTreeSet<usize> =
                    (0..RANDOM_DRAWS).map(|_| dist.sample(rng)).collect();
                return points.into_iter().collect();
            }
        }
    }
    (0..data.len()).step_by(GRID_STRIDE).collect()
}
