use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use htcore::signal::fitness::{index_of_min, overlap_fitness};
use htcore::signal::interpolate::LinearInterp;
use htcore::signal::points::generate_points;

use crate::data::dataset::HtDataset;
use crate::data::file::HtFile;
use crate::data::plane::{Plane, Signal};
use crate::error::HtError;

/// Options for the overlap optimiser. Magnitude and iteration count default
/// per algorithm: 10/5 for the single-segment search, 1/1 for the
/// multi-segment one.
#[derive(Debug, Clone)]
pub struct OverlapOpts {
    /// Use the energy-weighted random fit-point subset instead of the
    /// deterministic grid.
    pub rand: bool,
    /// Initial search magnitude in samples.
    pub magnitude: Option<f64>,
    /// Number of magnitude-refining rounds.
    pub iterations: Option<usize>,
    /// Limit the multi-segment search to the first N segments.
    pub limit: Option<usize>,
    /// Seed for the random point selection, for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for OverlapOpts {
    fn default() -> Self {
        OverlapOpts {
            rand: true,
            magnitude: None,
            iterations: None,
            limit: None,
            seed: None,
        }
    }
}

impl OverlapOpts {
    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

/// Sample offset of the reference bunch window from the start of the raw
/// stream: first populated turn, configured pickup offset, deskew and the
/// folded trigger position.
fn reference_offset(dataset: &HtDataset) -> f64 {
    dataset.populated_turns.first().unwrap_or(0) as f64 * dataset.samples_per_turn()
        + dataset.t_to_samples(dataset.offset) as f64
        + dataset.t_to_samples(dataset.deskew) as f64
        + dataset.trigger_offset() as f64
}

/// Refine the revolution period of a single-segment acquisition.
///
/// The bunch-0 waveform of the first populated turn is the fixed reference.
/// Each round compares it against a window around the extrapolated position
/// of the same bunch in a geometrically growing comparison turn; 21
/// candidate periods around the current estimate are scored by least squares
/// at the fixed point subset and the best one adopted, then the magnitude
/// shrinks tenfold. The window width grows with the round magnitude and the
/// turn separation so the true position cannot escape it.
fn optimise_single_segment(
    dataset: &HtDataset,
    bunches: &[i64],
    opts: &OverlapOpts,
) -> (f64, Option<Vec<f64>>) {
    info!("using single segment optimiser");

    let nb_turns = dataset.populated_turns.len();
    if nb_turns < 2 {
        return (dataset.frev(), None);
    }

    let magnitude = opts.magnitude.unwrap_or(10.0);
    let iterations = opts.iterations.unwrap_or(5);

    let first_bunch = bunches[0];
    let mut repeat_approx = dataset.t_to_samples(dataset.frev()) as f64;
    let bunch_inc = dataset.samples_per_bunch();
    let offset = reference_offset(dataset);

    // extract samples for the first bunch
    let first_bunch_start = (offset + first_bunch as f64 * bunch_inc) as i64;
    let first_bunch_end = (first_bunch_start as f64 + bunch_inc) as i64;
    let first_bunch_data = dataset.convert_slice(first_bunch_start, first_bunch_end);

    let mut rng = opts.rng();
    let points = generate_points(&first_bunch_data, opts.rand, &mut rng);

    let mut mag = magnitude;

    // precision down to 0.001 samples at the defaults
    for j in 1..=iterations {
        let mut fitness: Vec<f64> = Vec::with_capacity(21);
        let mut distance = 0.0;
        let mut best_fit = f64::INFINITY;

        // turn for comparison
        let comp_turn = ((10f64.powi(j as i32 - 1) + 1.0).min(nb_turns as f64) - 1.0) as i64;

        // window around the extrapolated bunch position
        let comp_bunch_start =
            (repeat_approx * comp_turn as f64 - 10.0 * mag * comp_turn as f64) as i64;
        let comp_bunch_end = (comp_bunch_start as f64
            + bunch_inc
            + 20.0 * mag * comp_turn as f64
            + 1.0) as i64;

        let (window_start, comp_bunch_data) = dataset.window(
            first_bunch_start + comp_bunch_start,
            first_bunch_start + comp_bunch_end,
        );
        let interp = LinearInterp::uniform(
            (window_start - first_bunch_start) as f64,
            1.0,
            comp_bunch_data,
        );

        for i in -10..=10 {
            let repeat = repeat_approx + i as f64 * mag;
            let new_distance = comp_turn as f64 * repeat;
            if new_distance != distance {
                distance = new_distance;
                let fit = overlap_fitness(&first_bunch_data, &points, distance, best_fit, |x| {
                    interp.value_at(x)
                });
                best_fit = fit.min(best_fit);
                fitness.push(fit);
            } else {
                let last = fitness.last().copied().unwrap_or(f64::INFINITY);
                fitness.push(last);
            }
        }

        let best_index = index_of_min(&fitness);
        repeat_approx += (best_index as f64 - 10.0) * mag;
        mag /= 10.0;
    }

    (repeat_approx * dataset.period, None)
}

/// Per-segment fine alignment for a multi-segment acquisition.
///
/// Inter-segment spacing from the hardware is not trustworthy, so every
/// populated segment beyond the first gets its own sample offset from the
/// same coarse-to-fine search, centred on the nominal segment start. At
/// magnitudes >= 1 the candidate lookup is a direct index into the window, a
/// performance shortcut for the coarse passes; true interpolation only kicks
/// in below one sample.
fn optimise_multi_segment(
    dataset: &HtDataset,
    bunches: &[i64],
    opts: &OverlapOpts,
) -> (f64, Option<Vec<f64>>) {
    info!("using multi segment optimiser ({} segments)", dataset.segments);

    let magnitude = opts.magnitude.unwrap_or(1.0);
    let iterations = opts.iterations.unwrap_or(1);
    let limit = opts.limit.unwrap_or(dataset.segments);

    let first_bunch = bunches[0];
    let samples_per_segment = dataset.samples_per_turn();
    let bunch_inc = dataset.samples_per_bunch();
    let offset = reference_offset(dataset);

    // extract samples for the first bunch
    let first_bunch_start = (offset + first_bunch as f64 * bunch_inc) as i64;
    let first_bunch_end = (first_bunch_start as f64 + bunch_inc) as i64;
    let first_bunch_data = dataset.convert_slice(first_bunch_start, first_bunch_end);

    let first_populated = dataset.populated_turns.first().unwrap_or(0);
    let mut offset_array: Vec<f64> = vec![0.0; first_populated + 1];

    let mut rng = opts.rng();
    let points = generate_points(&first_bunch_data, opts.rand, &mut rng);

    for segment in 1..dataset.populated_turns.len() {
        if segment < limit {
            let segment_start = (samples_per_segment * segment as f64) as i64;
            let mut distance_approx = segment_start as f64;
            let mut mag = magnitude;

            for _ in 1..=iterations {
                let mut best_fit = f64::INFINITY;
                let mut fitness: Vec<f64> = Vec::with_capacity(21);

                let comp_bunch_start = (segment_start as f64 - 10.0 * mag) as i64;
                let comp_bunch_end =
                    (comp_bunch_start as f64 + bunch_inc + 20.0 * mag + 1.0) as i64;

                let (window_start, comp_bunch_data) = dataset.window(
                    first_bunch_start + comp_bunch_start,
                    first_bunch_start + comp_bunch_end,
                );
                let window_base = (window_start - first_bunch_start) as f64;

                // direct index lookup at coarse magnitudes, interpolation at
                // fine ones
                let sample: Box<dyn Fn(f64) -> f64> = if mag >= 1.0 {
                    let data = comp_bunch_data;
                    Box::new(move |x: f64| {
                        let idx = (x - window_base).round() as i64;
                        if idx >= 0 && (idx as usize) < data.len() {
                            data[idx as usize]
                        } else {
                            f64::NAN
                        }
                    })
                } else {
                    let interp = LinearInterp::uniform(window_base, 1.0, comp_bunch_data);
                    Box::new(move |x: f64| interp.value_at(x))
                };

                for i in -10..=10 {
                    let distance = distance_approx + i as f64 * mag;
                    let fit =
                        overlap_fitness(&first_bunch_data, &points, distance, best_fit, |x| {
                            sample(x)
                        });
                    best_fit = fit.min(best_fit);
                    fitness.push(fit);
                }

                let best_index = index_of_min(&fitness);
                distance_approx += (best_index as f64 - 10.0) * mag;
                mag /= 10.0;
            }

            offset_array.push(distance_approx - segment_start as f64);
        } else {
            offset_array.push(0.0);
        }
    }

    // segments after the last populated one get no correction
    let last_populated = dataset.populated_turns.last().unwrap_or(0);
    for _ in last_populated..dataset.segments.saturating_sub(1) {
        offset_array.push(0.0);
    }

    (dataset.frev(), Some(offset_array))
}

impl HtFile {
    /// Optimise the overlap of repeated bunch waveforms.
    ///
    /// With no located bunches any timing adjustment is cleared. A
    /// single-segment acquisition gets a refined revolution period; a
    /// multi-segment one gets per-segment offsets, unless the hardware
    /// already provided a per-turn adjustment, which is left untouched.
    pub fn optimise_overlap(
        &mut self,
        plane: Plane,
        signal: Signal,
        opts: &OverlapOpts,
    ) -> Result<(), HtError> {
        self.ensure_open()?;

        let (segments, has_hardware_adjust) = {
            let dataset = self
                .data
                .get(plane, signal)
                .ok_or(HtError::MissingDataset { plane, signal })?;
            (dataset.segments, dataset.turn_adjust.is_some())
        };

        if self.bunches.is_empty() {
            self.set_turn_adjust(None)?;
        } else if segments == 1 {
            let bunches = self.bunches.clone();
            let (frev, turn_adjust) = {
                let dataset = self
                    .data
                    .get(plane, signal)
                    .ok_or(HtError::MissingDataset { plane, signal })?;
                optimise_single_segment(dataset, &bunches, opts)
            };
            self.set_frev(frev)?;
            self.set_turn_adjust(turn_adjust)?;
        } else if !has_hardware_adjust {
            let bunches = self.bunches.clone();
            let (frev, turn_adjust) = {
                let dataset = self
                    .data
                    .get(plane, signal)
                    .ok_or(HtError::MissingDataset { plane, signal })?;
                optimise_multi_segment(dataset, &bunches, opts)
            };
            self.set_frev(frev)?;
            self.set_turn_adjust(turn_adjust)?;
        }

        Ok(())
    }
}
