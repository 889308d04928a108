//! Per-bunch stability and oscillation-mode primitives.
//!
//! The session-level analyzer extracts per-bunch traces and feeds them
//! through these helpers: an energy mask splits a reference profile into
//! inside/outside sample sets, mean squared amplitudes over those sets give
//! the stability ratio, and the discretized mode number comes from counting
//! local minima in the accumulated mode-amplitude curve.

use serde::{Deserialize, Serialize};

/// Mean squared amplitude inside and outside the bunch area.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BunchStability {
    pub outside: f64,
    pub inside: f64,
}

impl BunchStability {
    /// Inside-to-outside energy ratio used to classify a bunch as unstable.
    pub fn ratio(&self) -> f64 {
        self.inside / self.outside
    }
}

/// Indices where the squared profile reaches `fraction` of its peak.
///
/// A profile with no energy at all has a peak of zero and every point
/// trivially reaches it, so the whole range is selected.
pub fn energy_mask(profile: &[f64], fraction: f64) -> Vec<usize> {
    let peak = profile.iter().map(|v| v * v).fold(f64::NEG_INFINITY, f64::max);
    profile
        .iter()
        .enumerate()
        .filter(|(_, v)| *v * *v >= fraction * peak)
        .map(|(i, _)| i)
        .collect()
}

/// Complement of a sorted index mask within `0..len`.
pub fn mask_complement(len: usize, mask: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(len.saturating_sub(mask.len()));
    let mut m = mask.iter().peekable();
    for i in 0..len {
        if m.peek() == Some(&&i) {
            m.next();
        } else {
            out.push(i);
        }
    }
    out
}

/// Mean of squared amplitudes at the given indices.
///
/// Indices beyond the end of the trace are ignored; an empty selection
/// yields NaN, matching the mean of an empty set.
pub fn mean_square_at(data: &[f64], indices: &[usize]) -> f64 {
    let mut sum = 0.0;
    let mut n = 0usize;
    for &i in indices {
        if i < data.len() {
            sum += data[i] * data[i];
            n += 1;
        }
    }
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Neighbourhood span (in mode points) within which a strict local minimum
/// counts as an oscillation node.
const NODE_SPAN: usize = 6;

/// Required peak-to-valley ratio for a strict local minimum.
const NODE_DEPTH: f64 = 2.5;

/// Loose-minima count above which the curve is treated as a high mode.
const HIGH_MODE_MINIMA: i64 = 5;

/// Count oscillation nodes in an accumulated mode-amplitude curve.
///
/// `amplitudes[i]` is the summed squared amplitude at mode point
/// `points[i]`. A strict node is a point below both its 1- and 2-step
/// neighbours, deep enough against the curve peak and narrow enough in mode
/// points. When the loose count (1-step minima only) exceeds
/// `HIGH_MODE_MINIMA` the strict criterion under-counts and the loose count
/// wins. The mode number is half the node count.
pub fn count_mode_minima(amplitudes: &[f64], points: &[usize]) -> f64 {
    let max_amplitude = amplitudes.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut local_mins = 0i64;
    let mut local_mins_high_mode = -1i64;

    for i in 0..amplitudes.len().saturating_sub(4) {
        if amplitudes[i + 1] > amplitudes[i + 2] && amplitudes[i + 2] < amplitudes[i + 3] {
            local_mins_high_mode += 1;
            if amplitudes[i] > amplitudes[i + 2] && amplitudes[i + 2] < amplitudes[i + 4] {
                if max_amplitude > NODE_DEPTH * amplitudes[i + 2]
                    && points[i + 4] - points[i] < NODE_SPAN
                {
                    local_mins += 1;
                }
            }
        }
    }

    if local_mins_high_mode > HIGH_MODE_MINIMA {
        local_mins = local_mins_high_mode;
    }

    local_mins as f64 / 2.0
}
