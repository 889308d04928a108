use std::collections::BTreeMap;

use log::{info, warn};

use htcore::signal::stability::{
    count_mode_minima, energy_mask, mask_complement, mean_square_at, BunchStability,
};

use crate::data::dataset::GetOpts;
use crate::data::file::HtFile;
use crate::data::plane::{Plane, Signal};
use crate::error::HtError;

/// Fraction of the peak energy separating "inside the bunch" samples from
/// the surrounding gap.
const INSIDE_FRACTION: f64 = 0.01;

/// Tighter fraction selecting the mode points.
const MODE_FRACTION: f64 = 0.1;

impl HtFile {
    /// Calculate per-bunch stability.
    ///
    /// For each plane the turn-0 reference bunch's sigma profile splits the
    /// bunch slot into inside and outside sample sets, used for every
    /// tracked bunch and turn. The mean squared delta amplitude over both
    /// sets across all turns lands in `bunch_stability` as
    /// (outside, inside); an unstable bunch shows inside >> outside.
    pub fn calculate_bunch_stability(&mut self) -> Result<(), HtError> {
        self.ensure_open()?;
        info!("finding unstable bunches");

        if self.bunches.is_empty() {
            return Err(HtError::NoBunches);
        }
        let bunches = self.bunches.clone();

        for plane in Plane::ALL {
            if self.data.get(plane, Signal::Delta).is_none()
                || self.data.get(plane, Signal::Sigma).is_none()
            {
                warn!("skipping {} plane, delta or sigma dataset missing", plane);
                continue;
            }

            let (number_of_turns, samples_per_bunch, reference) = {
                let sigma = self
                    .data
                    .get_mut(plane, Signal::Sigma)
                    .ok_or(HtError::MissingDataset { plane, signal: Signal::Sigma })?;
                let profile = sigma.get(0, bunches[0], bunches[0], &GetOpts::default());
                (
                    sigma.number_of_turns(),
                    sigma.samples_per_bunch() as usize,
                    profile.y,
                )
            };

            let inside = energy_mask(&reference, INSIDE_FRACTION);
            let outside = mask_complement(samples_per_bunch, &inside);

            let mut stability: BTreeMap<i64, BunchStability> = BTreeMap::new();
            {
                let delta = self
                    .data
                    .get_mut(plane, Signal::Delta)
                    .ok_or(HtError::MissingDataset { plane, signal: Signal::Delta })?;

                for &bunch in &bunches {
                    let mut mean_inside = 0.0;
                    let mut mean_outside = 0.0;
                    for turn in 0..number_of_turns {
                        let trace = delta.get(turn as i64, bunch, bunch, &GetOpts::default());
                        mean_inside +=
                            mean_square_at(&trace.y, &inside) / number_of_turns as f64;
                        mean_outside +=
                            mean_square_at(&trace.y, &outside) / number_of_turns as f64;
                    }
                    stability.insert(
                        bunch,
                        BunchStability {
                            outside: mean_outside,
                            inside: mean_inside,
                        },
                    );
                }
            }

            *self.bunch_stability.get_mut(plane) = stability;
        }

        Ok(())
    }

    /// Calculate the oscillation mode of unstable bunches.
    ///
    /// For every bunch whose inside/outside ratio reaches `threshold` the
    /// squared delta amplitude is accumulated per mode point across all
    /// turns and the internal local minima of that curve counted; the mode
    /// number is half the node count.
    pub fn calculate_mode(&mut self, threshold: f64) -> Result<(), HtError> {
        self.ensure_open()?;
        info!("calculating instability modes");

        if self.bunches.is_empty() {
            return Err(HtError::NoBunches);
        }
        if Plane::ALL
            .iter()
            .all(|&p| self.bunch_stability.get(p).is_empty())
        {
            return Err(HtError::StabilityNotComputed);
        }
        let bunches = self.bunches.clone();

        for plane in Plane::ALL {
            if self.data.get(plane, Signal::Delta).is_none()
                || self.data.get(plane, Signal::Sigma).is_none()
            {
                continue;
            }

            let number_of_turns;
            let reference = {
                let sigma = self
                    .data
                    .get_mut(plane, Signal::Sigma)
                    .ok_or(HtError::MissingDataset { plane, signal: Signal::Sigma })?;
                number_of_turns = sigma.number_of_turns();
                sigma.get(0, bunches[0], bunches[0], &GetOpts::default()).y
            };

            let mode_points = energy_mask(&reference, MODE_FRACTION);
            let stability = self.bunch_stability.get(plane).clone();

            let mut modes: BTreeMap<i64, f64> = BTreeMap::new();
            {
                let delta = self
                    .data
                    .get_mut(plane, Signal::Delta)
                    .ok_or(HtError::MissingDataset { plane, signal: Signal::Delta })?;

                for &bunch in &bunches {
                    let record = match stability.get(&bunch) {
                        Some(r) => r,
                        None => continue,
                    };
                    if record.ratio() >= threshold {
                        let mut mode_amplitudes = vec![0.0; mode_points.len()];
                        for turn in 0..number_of_turns {
                            let trace =
                                delta.get(turn as i64, bunch, bunch, &GetOpts::default());
                            for (i, &point) in mode_points.iter().enumerate() {
                                if point < trace.y.len() {
                                    mode_amplitudes[i] += trace.y[point] * trace.y[point];
                                }
                            }
                        }
                        modes.insert(bunch, count_mode_minima(&mode_amplitudes, &mode_points));
                    }
                }
            }

            *self.instability_mode.get_mut(plane) = modes;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::SyntheticAcquisition;

    /// A file with intensity pulses in slots 0 and 3 on sigma, a coherent
    /// oscillation of bunch 0 on delta, and a small deterministic noise
    /// floor everywhere on delta.
    fn analysed_file() -> HtFile {
        let gen = SyntheticAcquisition {
            noise: 0.05,
            ..SyntheticAcquisition::default()
        };
        let raw = gen.build_file(&[(0, 100.0), (3, 100.0)], &[(0, 40.0)]);
        let mut htf = HtFile::new(raw);
        htf.set_harmonic(gen.harmonic).unwrap();
        htf.set_frev(gen.revolution_period()).unwrap();
        htf.locate_bunches(Plane::Horizontal, Signal::Sigma, 5.0, 5)
            .unwrap();
        htf
    }

    #[test]
    fn test_requires_located_bunches() {
        let gen = SyntheticAcquisition::default();
        let mut htf = HtFile::new(gen.build_file(&[(0, 100.0)], &[]));
        htf.set_harmonic(gen.harmonic).unwrap();
        htf.set_frev(gen.revolution_period()).unwrap();
        assert!(matches!(
            htf.calculate_bunch_stability(),
            Err(HtError::NoBunches)
        ));
        assert!(matches!(htf.calculate_mode(2.35), Err(HtError::NoBunches)));
    }

    #[test]
    fn test_mode_requires_stability() {
        let mut htf = analysed_file();
        assert!(matches!(
            htf.calculate_mode(2.35),
            Err(HtError::StabilityNotComputed)
        ));
    }

    #[test]
    fn test_oscillating_bunch_is_unstable() {
        let mut htf = analysed_file();
        htf.calculate_bunch_stability().unwrap();

        assert_eq!(htf.bunches, vec![0, 3]);
        let stability = htf.bunch_stability.get(Plane::Horizontal);

        let oscillating = stability.get(&0).unwrap();
        let quiet = stability.get(&3).unwrap();

        // the coherent oscillation dominates the inside samples of bunch 0
        assert!(oscillating.ratio() > 10.0);
        // the quiet bunch sees only the noise floor on both sides
        assert!(quiet.ratio() < 5.0);
        assert!(quiet.ratio() > 0.05);
        // both planes carry the same synthetic data
        let vertical = htf.bunch_stability.get(Plane::Vertical);
        assert!(vertical.get(&0).unwrap().ratio() > 10.0);
    }

    #[test]
    fn test_mode_classification() {
        let mut htf = analysed_file();
        htf.calculate_bunch_stability().unwrap();
        htf.calculate_mode(2.35).unwrap();

        let modes = htf.instability_mode.get(Plane::Horizontal);
        // the unstable bunch gets a mode number, the quiet one does not
        assert!(modes.contains_key(&0));
        assert!(!modes.contains_key(&3));
        // a rigid dipole-like oscillation has no internal nodes
        assert_eq!(*modes.get(&0).unwrap(), 0.0);
    }
}
