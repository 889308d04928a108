//! Synthetic acquisition generation for tests and the demo mode.
//!
//! Builds raw containers with a known beam pattern: half-sine bunch pulses
//! repeated every revolution, optional per-turn sign-alternating oscillation
//! on the delta signals and a deterministic pseudo-noise floor.

use std::path::PathBuf;

use crate::data::raw::{AttrMap, AttrValue, RawDataset, RawFile};

/// Offset of the pulse from the start of its bunch slot.
const PULSE_LEAD: usize = 2;

/// Generator for synthetic head-tail acquisitions.
#[derive(Debug, Clone)]
pub struct SyntheticAcquisition {
    pub harmonic: i64,
    /// True revolution period in samples. The nominal period configured on
    /// the session may deliberately differ to exercise the optimiser.
    pub samples_per_turn: usize,
    pub sampling_period: f64,
    pub turns: usize,
    pub segments: usize,
    pub data_offset: f64,
    pub data_resolution: f64,
    /// Constant level added to every sample.
    pub baseline_level: f64,
    /// Amplitude of the deterministic pseudo-noise on delta signals.
    pub noise: f64,
    /// Trailing samples appended after the last whole turn.
    pub extra_samples: usize,
    /// Width of the generated bunch pulse in samples. A narrow pulse suits
    /// the locator, a slot-filling one gives the overlap search a smooth
    /// error surface.
    pub pulse_width: usize,
    /// Per-segment jitter in samples applied to the pulse positions,
    /// indexed by segment. Missing entries mean no jitter.
    pub segment_jitter: Vec<i64>,
}

impl Default for SyntheticAcquisition {
    fn default() -> Self {
        SyntheticAcquisition {
            harmonic: 10,
            samples_per_turn: 100,
            sampling_period: 1.0e-9,
            turns: 12,
            segments: 1,
            data_offset: 0.0,
            data_resolution: 1.0,
            baseline_level: 0.0,
            noise: 0.0,
            extra_samples: 0,
            pulse_width: 4,
            segment_jitter: Vec::new(),
        }
    }
}

impl SyntheticAcquisition {
    /// True revolution period in seconds.
    pub fn revolution_period(&self) -> f64 {
        self.samples_per_turn as f64 * self.sampling_period
    }

    fn samples_per_bunch(&self) -> usize {
        (self.samples_per_turn as i64 / self.harmonic) as usize
    }

    fn total_samples(&self) -> usize {
        self.turns * self.samples_per_turn + self.extra_samples
    }

    fn jitter(&self, turn: usize) -> i64 {
        self.segment_jitter.get(turn).copied().unwrap_or(0)
    }

    /// Physical trace with half-sine pulses in the given slots every turn.
    ///
    /// `oscillating` pulses flip sign on every other turn, emulating a
    /// coherently oscillating bunch on a difference signal.
    fn trace(&self, pulses: &[(i64, f64)], oscillating: bool, with_noise: bool) -> Vec<f64> {
        let mut out = vec![self.baseline_level; self.total_samples()];
        let spb = self.samples_per_bunch();

        for turn in 0..self.turns {
            let sign = if oscillating && turn % 2 == 1 { -1.0 } else { 1.0 };
            for &(slot, amplitude) in pulses {
                let start = turn as i64 * self.samples_per_turn as i64
                    + slot * spb as i64
                    + PULSE_LEAD as i64
                    + self.jitter(turn);
                for k in 0..self.pulse_width {
                    let i = start + k as i64;
                    if i >= 0 && (i as usize) < out.len() {
                        // interior of a half sine: every pulse sample is
                        // nonzero and neighbours differ
                        let shape = (std::f64::consts::PI * (k + 1) as f64
                            / (self.pulse_width + 1) as f64)
                            .sin();
                        out[i as usize] += sign * amplitude * shape;
                    }
                }
            }
        }

        if with_noise && self.noise > 0.0 {
            for turn in 0..self.turns {
                for k in 0..self.samples_per_turn {
                    let i = turn * self.samples_per_turn + k;
                    out[i] += self.noise * (0.7 * k as f64 + 1.3 * turn as f64).sin();
                }
            }
        }

        out
    }

    fn dataset_attrs(&self) -> AttrMap {
        let mut attrs = AttrMap::new();
        attrs.insert(
            "segment_count".to_string(),
            AttrValue::Int(self.segments as i64),
        );
        attrs.insert(
            "sampling_period".to_string(),
            AttrValue::Float(self.sampling_period),
        );
        attrs.insert(
            "ampl_resolution".to_string(),
            AttrValue::Float(self.data_resolution),
        );
        attrs.insert("data_offset".to_string(), AttrValue::Float(self.data_offset));
        attrs.insert("trigger_delay".to_string(), AttrValue::Float(0.0));
        attrs
    }

    /// Build one raw dataset with the given sigma-style pulse pattern.
    pub fn build_dataset(&self, name: &str, pulses: &[(i64, f64)], oscillating: bool) -> RawDataset {
        let physical = self.trace(pulses, oscillating, oscillating);
        let samples: Vec<f64> = physical
            .iter()
            .map(|v| v / self.data_resolution + self.data_offset)
            .collect();
        RawDataset {
            name: name.to_string(),
            shape: vec![samples.len()],
            samples,
            attrs: self.dataset_attrs(),
        }
    }

    /// Build a full raw container: sigma datasets carry the intensity
    /// pulses, delta datasets the oscillating pulses plus the noise floor.
    pub fn build_file(
        &self,
        sigma_pulses: &[(i64, f64)],
        delta_pulses: &[(i64, f64)],
    ) -> RawFile {
        let mut attrs = AttrMap::new();
        attrs.insert(
            "device".to_string(),
            AttrValue::Text("HT.SYNTH".to_string()),
        );
        attrs.insert("version".to_string(), AttrValue::Int(1));
        attrs.insert("acq_stamp".to_string(), AttrValue::Int(0));

        let mut datasets = Vec::new();
        for plane in ["horizontal", "vertical"] {
            datasets.push(self.build_dataset(&format!("{}/delta", plane), delta_pulses, true));
            datasets.push(self.build_dataset(&format!("{}/sigma", plane), sigma_pulses, false));
        }

        RawFile {
            path: PathBuf::from("synthetic.htr"),
            size: 0,
            attrs,
            datasets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulse_is_confined_to_slot() {
        let gen = SyntheticAcquisition::default();
        let ds = gen.build_dataset("horizontal/sigma", &[(3, 100.0)], false);
        assert_eq!(ds.samples.len(), 1200);
        // pulse occupies samples 32..36 of every turn
        for turn in 0..gen.turns {
            let base = turn * gen.samples_per_turn;
            assert_eq!(ds.samples[base + 30], 0.0);
            assert!(ds.samples[base + 33] > 50.0);
            assert_eq!(ds.samples[base + 38], 0.0);
        }
    }

    #[test]
    fn test_oscillating_pulse_alternates() {
        let gen = SyntheticAcquisition::default();
        let ds = gen.build_dataset("horizontal/delta", &[(0, 40.0)], true);
        let even = ds.samples[3];
        let odd = ds.samples[gen.samples_per_turn + 3];
        assert!(even > 0.0);
        assert!(odd < 0.0);
        assert!((even + odd).abs() < 1e-9);
    }

    #[test]
    fn test_segment_jitter_moves_pulse() {
        let gen = SyntheticAcquisition {
            segments: 3,
            turns: 3,
            segment_jitter: vec![0, 2, 0],
            ..SyntheticAcquisition::default()
        };
        let ds = gen.build_dataset("horizontal/sigma", &[(0, 100.0)], false);
        // second segment's pulse shifted two samples late
        assert_eq!(ds.samples[103], 0.0);
        assert!(ds.samples[105] > 50.0);
    }

    #[test]
    fn test_file_has_all_slots() {
        let gen = SyntheticAcquisition::default();
        let raw = gen.build_file(&[(0, 100.0)], &[(0, 40.0)]);
        assert_eq!(raw.datasets.len(), 4);
        assert!(raw.dataset("horizontal/sigma").is_some());
        assert!(raw.dataset("vertical/delta").is_some());
    }
}
