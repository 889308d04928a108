use log::info;

use crate::data::dataset::{GetOpts, HtDataset, TurnRange};
use crate::data::file::HtFile;
use crate::data::plane::{Plane, Signal};
use crate::error::HtError;

/// Locate bunches for a specific turn within a specific bunch range.
///
/// One unpadded, non-baseline extraction covers the whole range; fetching
/// bunch by bunch would be slower and the trailing zero padding would
/// corrupt the amplitude estimate. Each bunch is split into `parts` chunks
/// and the peak-to-peak amplitude of every chunk computed; a bunch is
/// present when the largest chunk amplitude exceeds `threshold` times the
/// smallest.
fn locate_in_turn(
    dataset: &mut HtDataset,
    turn: i64,
    first_bunch: i64,
    last_bunch: i64,
    threshold: f64,
    parts: usize,
) -> Vec<i64> {
    let opts = GetOpts {
        baseline: Some(false),
        pad: false,
        align: Some(false),
        ..GetOpts::default()
    };
    let turn_data = dataset.get(turn, first_bunch, last_bunch, &opts);
    let samples_per_bunch = dataset.samples_per_bunch();

    let mut bunches = Vec::new();
    for bunch in 0..=(last_bunch - first_bunch) {
        let bunch_sta = (bunch as f64 * samples_per_bunch) as i64;
        let bunch_end = (bunch_sta as f64 + samples_per_bunch) as i64;

        let lo = (bunch_sta.max(0) as usize).min(turn_data.y.len());
        let hi = (bunch_end.max(0) as usize).min(turn_data.y.len());
        let bunch_data = &turn_data.y[lo..hi];

        let bunch_len = bunch_data.len() - bunch_data.len() % parts;
        if bunch_len == 0 {
            continue;
        }
        let part_len = bunch_len / parts;

        let mut min_amp = f64::INFINITY;
        let mut max_amp = f64::NEG_INFINITY;
        for part in 0..parts {
            let chunk = &bunch_data[part * part_len..(part + 1) * part_len];
            let top = chunk.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let bottom = chunk.iter().copied().fold(f64::INFINITY, f64::min);
            let amplitude = top - bottom;
            min_amp = min_amp.min(amplitude);
            max_amp = max_amp.max(amplitude);
        }

        if max_amp > threshold * min_amp {
            bunches.push(first_bunch + bunch);
        }
    }

    bunches
}

impl HtFile {
    /// Locate bunches in the acquisition.
    ///
    /// Scans turn 0 across the full bunch range; when nothing is found the
    /// last turn is tried and the per-turn tracking runs in reverse. The
    /// first found bunch is then tracked across turns in a narrow window
    /// (`bunch-1 .. bunch+10`) so slippage from an imprecise revolution
    /// period estimate does not lose it; with full turns the window wraps at
    /// the harmonic boundary into the adjacent turn. The result is stored on
    /// the session (`bunches`) and the populated-turn range broadcast to
    /// every dataset.
    pub fn locate_bunches(
        &mut self,
        plane: Plane,
        signal: Signal,
        threshold: f64,
        parts: usize,
    ) -> Result<(), HtError> {
        self.ensure_open()?;

        let (bunches, populated) = {
            let dataset = self
                .data
                .get_mut(plane, signal)
                .ok_or(HtError::MissingDataset { plane, signal })?;

            let number_of_turns = dataset.number_of_turns() as i64;
            let number_of_bunches = dataset.number_of_bunches();
            let max_turn = number_of_turns - 1;
            let max_bunch = number_of_bunches - 1;

            // check for bunches in the first turn
            let mut bunches = locate_in_turn(dataset, 0, 0, max_bunch, threshold, parts);
            let mut reverse = false;

            // if no bunches in the first turn, check the last turn
            if bunches.is_empty() {
                bunches = locate_in_turn(dataset, max_turn, 0, max_bunch, threshold, parts);
                reverse = true;
            }

            let mut populated = TurnRange::empty();

            // follow the first bunch through every turn
            if !bunches.is_empty() {
                let mut bunch = bunches[0];
                let mut matched: Vec<i64> = Vec::new();

                let turn_order: Vec<i64> = if reverse {
                    (0..number_of_turns).rev().collect()
                } else {
                    (0..number_of_turns).collect()
                };

                for turn in turn_order {
                    // compare also slots on each side of the bunch to follow
                    // slippage from an incorrect frev value (+10 slots, frev
                    // is quite far off for ions)
                    let mut first_bunch = bunch - 1;
                    let mut last_bunch = bunch + 10;

                    // with full turns the window wraps at the harmonic
                    // boundary into the adjacent turn
                    let found = if number_of_bunches == dataset.harmonic {
                        if first_bunch < 0 {
                            first_bunch += dataset.harmonic;
                            let mut found = Vec::new();
                            if turn > 0 {
                                found.extend(locate_in_turn(
                                    dataset,
                                    turn - 1,
                                    first_bunch,
                                    dataset.harmonic - 1,
                                    threshold,
                                    parts,
                                ));
                            }
                            found.extend(locate_in_turn(
                                dataset, turn, 0, last_bunch, threshold, parts,
                            ));
                            found
                        } else if last_bunch >= dataset.harmonic {
                            last_bunch -= dataset.harmonic;
                            let mut found = locate_in_turn(
                                dataset,
                                turn,
                                first_bunch,
                                dataset.harmonic - 1,
                                threshold,
                                parts,
                            );
                            if turn < number_of_turns - 1 {
                                found.extend(locate_in_turn(
                                    dataset,
                                    turn + 1,
                                    0,
                                    last_bunch,
                                    threshold,
                                    parts,
                                ));
                            }
                            found
                        } else {
                            locate_in_turn(dataset, turn, first_bunch, last_bunch, threshold, parts)
                        }
                    } else {
                        // without full turns, clip the window instead
                        if first_bunch < 0 {
                            first_bunch = 0;
                        } else if last_bunch >= number_of_bunches {
                            last_bunch = number_of_bunches - 1;
                        }
                        locate_in_turn(dataset, turn, first_bunch, last_bunch, threshold, parts)
                    };

                    // use the first found bunch of this turn as the anchor
                    // for the next one
                    if !found.is_empty() {
                        matched.push(turn);
                        bunch = found[0];
                    }
                }

                // express the bunch numbers relative to turn 0 when the scan
                // ran backwards
                if reverse {
                    let diff = bunches[0] - bunch;
                    for b in &mut bunches {
                        *b -= diff;
                    }
                }

                if let (Some(&lo), Some(&hi)) = (matched.iter().min(), matched.iter().max()) {
                    populated = TurnRange::new(lo as usize, hi as usize);
                }
            }

            (bunches, populated)
        };

        info!(
            "located {} bunches over {} turns",
            bunches.len(),
            populated.len()
        );

        self.bunches = bunches;
        self.set_populated_turns(populated)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synthetic::SyntheticAcquisition;

    fn open_with_pulses(pulses: &[(i64, f64)], gen: &SyntheticAcquisition) -> HtFile {
        let raw = gen.build_file(pulses, &[]);
        let mut htf = HtFile::new(raw);
        htf.set_harmonic(gen.harmonic).unwrap();
        htf.set_frev(gen.revolution_period()).unwrap();
        htf
    }

    #[test]
    fn test_single_slot_found_at_every_position() {
        let gen = SyntheticAcquisition {
            turns: 3,
            ..SyntheticAcquisition::default()
        };
        for slot in 0..gen.harmonic {
            let mut htf = open_with_pulses(&[(slot, 100.0)], &gen);
            htf.locate_bunches(Plane::Horizontal, Signal::Sigma, 5.0, 5)
                .unwrap();
            assert_eq!(htf.bunches, vec![slot], "slot {}", slot);
            assert_eq!(htf.populated_turns().len(), gen.turns);
        }
    }

    #[test]
    fn test_multiple_slots() {
        let gen = SyntheticAcquisition::default();
        let mut htf = open_with_pulses(&[(1, 80.0), (4, 120.0), (7, 60.0)], &gen);
        htf.locate_bunches(Plane::Horizontal, Signal::Sigma, 5.0, 5)
            .unwrap();
        assert_eq!(htf.bunches, vec![1, 4, 7]);
    }

    #[test]
    fn test_flat_data_finds_nothing() {
        let gen = SyntheticAcquisition {
            baseline_level: 5.0,
            ..SyntheticAcquisition::default()
        };
        let mut htf = open_with_pulses(&[], &gen);
        htf.locate_bunches(Plane::Horizontal, Signal::Sigma, 5.0, 5)
            .unwrap();
        assert!(htf.bunches.is_empty());
        assert!(htf.populated_turns().is_empty());
    }

    #[test]
    fn test_tracking_survives_wrong_frev() {
        // the nominal period is three samples per turn too short, the pulse
        // drifts forwards through the nominal grid over the acquisition
        let gen = SyntheticAcquisition {
            samples_per_turn: 1000,
            turns: 12,
            extra_samples: 48,
            ..SyntheticAcquisition::default()
        };
        let mut htf = open_with_pulses(&[(0, 100.0)], &gen);
        htf.set_frev(997.0 * gen.sampling_period).unwrap();
        htf.locate_bunches(Plane::Horizontal, Signal::Sigma, 5.0, 5)
            .unwrap();
        assert_eq!(htf.bunches, vec![0]);
        assert!(htf.populated_turns().len() >= 10);
    }

    #[test]
    fn test_missing_dataset_errors() {
        let gen = SyntheticAcquisition::default();
        let raw = gen.build_file(&[(0, 50.0)], &[]);
        let mut htf = HtFile::new(raw);
        htf.set_harmonic(gen.harmonic).unwrap();
        htf.set_frev(gen.revolution_period()).unwrap();
        let mut raw2 = gen.build_file(&[(0, 50.0)], &[]);
        raw2.datasets.retain(|d| d.name != "horizontal/sigma");
        let mut htf2 = HtFile::new(raw2);
        htf2.set_harmonic(gen.harmonic).unwrap();
        assert!(matches!(
            htf2.locate_bunches(Plane::Horizontal, Signal::Sigma, 5.0, 5),
            Err(HtError::MissingDataset { .. })
        ));
        drop(htf);
    }
}
