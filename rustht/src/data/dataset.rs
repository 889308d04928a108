use htcore::signal::interpolate::LinearInterp;
use htcore::signal::waveform::Waveform;

use crate::data::plane::{Plane, Signal};
use crate::data::raw::{attr_array, attr_f64, attr_i64, RawDataset};
use crate::error::HtError;

/// Inclusive range of turns in which the tracked bunch was confirmed
/// present. Possibly empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TurnRange {
    bounds: Option<(usize, usize)>,
}

impl TurnRange {
    pub fn empty() -> Self {
        TurnRange { bounds: None }
    }

    pub fn new(first: usize, last: usize) -> Self {
        TurnRange {
            bounds: Some((first.min(last), first.max(last))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_none()
    }

    pub fn len(&self) -> usize {
        match self.bounds {
            Some((a, b)) => b - a + 1,
            None => 0,
        }
    }

    pub fn first(&self) -> Option<usize> {
        self.bounds.map(|(a, _)| a)
    }

    pub fn last(&self) -> Option<usize> {
        self.bounds.map(|(_, b)| b)
    }

    pub fn contains(&self, turn: i64) -> bool {
        match self.bounds {
            Some((a, b)) => turn >= a as i64 && turn <= b as i64,
            None => false,
        }
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<usize> {
        match self.bounds {
            Some((a, b)) => a..=b,
            None => 1..=0,
        }
    }
}

/// Options for [`HtDataset::get`]. `None` falls back to the dataset default.
#[derive(Debug, Clone)]
pub struct GetOpts {
    /// Samples skipped at the start of the turn, defaults to the configured
    /// pickup offset.
    pub skip: Option<i64>,
    /// Extra samples appended at the end of the window.
    pub extra: i64,
    /// Baseline removal, defaults to the dataset flag.
    pub baseline: Option<bool>,
    /// Zero-pad a short result up to the requested length.
    pub pad: bool,
    /// Negate the signal, defaults to the dataset flag.
    pub invert: Option<bool>,
    /// Resample onto the integer-sample grid, defaults to the dataset flag.
    pub align: Option<bool>,
}

impl Default for GetOpts {
    fn default() -> Self {
        GetOpts {
            skip: None,
            extra: 0,
            baseline: None,
            pad: true,
            invert: None,
            align: None,
        }
    }
}

/// Bunch selector for the indexed extraction interface.
#[derive(Debug, Clone, Copy)]
pub enum BunchSelect {
    All,
    Single(i64),
    Range(i64, i64),
}

struct BaselineCache {
    mean: Vec<f64>,
    frev_gen: u64,
}

/// One plane/signal's raw sample array plus calibration and timing
/// attributes, with indexed per-bunch extraction.
pub struct HtDataset {
    samples: Vec<f64>,
    pub size: usize,
    pub shape: Vec<usize>,
    pub segments: usize,
    pub data_resolution: f64,
    pub data_offset: f64,
    pub period: f64,
    pub trigger_delay: f64,
    pub deskew: f64,
    pub offset: f64,
    pub harmonic: i64,
    pub max_offset: f64,
    frev: f64,
    frev_gen: u64,
    baseline: Option<BaselineCache>,
    pub turn_adjust: Option<Vec<f64>>,
    pub remove_baseline: bool,
    pub remove_jitter: bool,
    pub invert: bool,
    pub cable_comp: bool,
    pub align: bool,
    pub populated_turns: TurnRange,
    pub plane: Option<Plane>,
    pub signal: Option<Signal>,
}

impl HtDataset {
    /// Build a dataset from one raw sample array.
    ///
    /// The hardware `trigger_offset` attribute, when present, is an absolute
    /// per-segment timestamp array; it is normalised to per-turn sample
    /// corrections relative to the first segment.
    pub fn from_raw(raw: &RawDataset) -> Self {
        let period = attr_f64(&raw.attrs, "sampling_period", 1.0e-10);
        let deskew = (attr_f64(&raw.attrs, "deskew", 0.0) + attr_f64(&raw.attrs, "delay", 0.0))
            * period;

        let turn_adjust = attr_array(&raw.attrs, "trigger_offset").map(|ta| {
            let first = ta.first().copied().unwrap_or(0.0);
            ta.iter().map(|&v| -(v - first) / period).collect()
        });

        HtDataset {
            samples: raw.samples.clone(),
            size: raw.samples.len(),
            shape: raw.shape.clone(),
            segments: attr_i64(&raw.attrs, "segment_count", 1).max(1) as usize,
            data_resolution: attr_f64(&raw.attrs, "ampl_resolution", 1.0),
            data_offset: attr_f64(&raw.attrs, "data_offset", 0.0),
            period,
            trigger_delay: attr_f64(&raw.attrs, "trigger_delay", 0.0),
            deskew,
            offset: 0.0,
            harmonic: 0,
            max_offset: 0.0,
            frev: 0.0,
            frev_gen: 0,
            baseline: None,
            turn_adjust,
            remove_baseline: false,
            remove_jitter: true,
            invert: false,
            cable_comp: false,
            align: false,
            populated_turns: TurnRange::empty(),
            plane: None,
            signal: None,
        }
    }

    pub fn frev(&self) -> f64 {
        self.frev
    }

    /// Reassign the revolution period. A changed value makes any cached
    /// baseline mean stale; the cache records the generation it was computed
    /// against and is recomputed lazily on the next baseline-corrected get.
    pub fn set_frev(&mut self, val: f64) {
        if val != self.frev {
            self.frev = val;
            self.frev_gen += 1;
        }
    }

    /// Whether a baseline mean is cached and still valid for the current
    /// revolution period.
    pub fn baseline_cached(&self) -> bool {
        self.baseline
            .as_ref()
            .map_or(false, |c| c.frev_gen == self.frev_gen)
    }

    /// Convert a time in seconds to a whole number of samples.
    pub fn t_to_samples(&self, t: f64) -> i64 {
        (t / self.period).round() as i64
    }

    pub fn samples_per_bunch(&self) -> f64 {
        self.frev / self.period / self.harmonic as f64
    }

    pub fn samples_per_turn(&self) -> f64 {
        if self.segments == 1 {
            self.frev / self.period
        } else {
            self.size as f64 / self.segments as f64
        }
    }

    pub fn number_of_bunches(&self) -> i64 {
        if self.segments == 1 {
            self.harmonic
        } else {
            let segment_size = self.size as f64 / self.segments as f64;
            let segment_bunches = segment_size / self.samples_per_bunch();
            if segment_bunches > self.harmonic as f64 {
                self.harmonic
            } else {
                segment_bunches as i64
            }
        }
    }

    pub fn number_of_turns(&self) -> usize {
        if self.segments == 1 {
            let spt = self.samples_per_turn();
            if spt <= 0.0 {
                return 0;
            }
            let samp_before_trig = self.t_to_samples(self.trigger_delay);
            let samp_after_trig = self.size as i64 - samp_before_trig;
            let turns_before_trig = (samp_before_trig as f64 / spt) as i64;
            let turns_after_trig = (samp_after_trig as f64 / spt) as i64;
            (turns_before_trig + turns_after_trig).max(0) as usize
        } else {
            self.segments
        }
    }

    /// Trigger position folded into one turn, in whole samples.
    pub fn trigger_offset(&self) -> i64 {
        let spt = self.samples_per_turn();
        if spt <= 0.0 {
            return 0;
        }
        (self.t_to_samples(self.trigger_delay) as f64).rem_euclid(spt) as i64
    }

    /// Raw codes converted to physical units.
    pub fn convert_data(&self, data: &[f64]) -> Vec<f64> {
        data.iter()
            .map(|&v| (v - self.data_offset) * self.data_resolution)
            .collect()
    }

    /// Converted samples for the clamped raw range `start..end`.
    pub fn convert_slice(&self, start: i64, end: i64) -> Vec<f64> {
        self.window(start, end).1
    }

    /// Converted samples for the clamped raw range, together with the actual
    /// (clamped) start index.
    pub(crate) fn window(&self, start: i64, end: i64) -> (i64, Vec<f64>) {
        let lo = start.clamp(0, self.size as i64);
        let hi = end.clamp(lo, self.size as i64);
        (
            lo,
            self.convert_data(&self.samples[lo as usize..hi as usize]),
        )
    }

    /// Get calibrated bunch data.
    ///
    /// # Arguments
    ///
    /// * `turn` - turn number
    /// * `first_bunch` - first bunch number
    /// * `last_bunch` - last bunch number
    /// * `opts` - extraction options, see [`GetOpts`]
    ///
    /// Returns the x axis in seconds and the amplitudes in physical units.
    /// When the turn-level time correction has a fractional part it is
    /// either resampled away (`align`) or carried on the x axis.
    pub fn get(&mut self, turn: i64, first_bunch: i64, last_bunch: i64, opts: &GetOpts) -> Waveform {
        let skip = opts.skip.unwrap_or_else(|| self.t_to_samples(self.offset));
        let extra = opts.extra;
        let baseline = opts.baseline.unwrap_or(self.remove_baseline);
        let pad = opts.pad;
        let invert = opts.invert.unwrap_or(self.invert);
        let align = opts.align.unwrap_or(self.align);

        let bunch_inc = self.samples_per_bunch();
        let deskew = self.t_to_samples(self.deskew);

        let x_offset = skip + (bunch_inc * first_bunch as f64) as i64 + 1;
        let x_length = ((bunch_inc * (last_bunch - first_bunch + 1) as f64) as i64 + extra).max(0);

        let turn_adjust = match &self.turn_adjust {
            Some(ta) if self.remove_jitter && turn >= 0 && (turn as usize) < ta.len() => {
                ta[turn as usize]
            }
            _ => 0.0,
        };

        let turn_inc = turn as f64 * self.samples_per_turn() + turn_adjust;
        let turn_cor = turn_inc.rem_euclid(1.0);

        let bunch_sta = turn_inc.trunc() as i64 + x_offset + deskew + self.trigger_offset();
        let bunch_end = bunch_sta + x_length;

        let mut x: Vec<f64>;
        let mut y: Vec<f64>;

        if align {
            let raw = self.convert_slice(bunch_sta, bunch_end + 1);
            x = (0..x_length).map(|i| (x_offset + i) as f64).collect();
            if raw.len() > 1 {
                let n_eval = (raw.len() - 1).min(x.len());
                let interp = LinearInterp::uniform(x_offset as f64 - turn_cor, 1.0, raw);
                y = x[..n_eval].iter().map(|&xi| interp.value_at(xi)).collect();
            } else {
                y = raw;
            }
        } else {
            x = (0..x_length)
                .map(|i| (x_offset + i) as f64 - turn_cor)
                .collect();
            y = self.convert_slice(bunch_sta, bunch_end);
        }

        if pad && y.len() < x.len() {
            y.resize(x.len(), 0.0);
        }

        if baseline && self.populated_turns.contains(turn) {
            let mean = self.baseline_mean().to_vec();
            if !align && turn > 0 {
                let lo = (x_offset - 1).clamp(0, mean.len() as i64);
                let hi = (x_offset + x_length).clamp(lo, mean.len() as i64);
                let interp =
                    LinearInterp::uniform(lo as f64, 1.0, mean[lo as usize..hi as usize].to_vec());
                for (i, yi) in y.iter_mut().enumerate() {
                    *yi -= interp.value_at((x_offset + i as i64) as f64 - turn_cor);
                }
            } else {
                let lo = x_offset.clamp(0, mean.len() as i64) as usize;
                let hi = (x_offset + x_length).clamp(lo as i64, mean.len() as i64) as usize;
                for (yi, mi) in y.iter_mut().zip(mean[lo..hi].iter()) {
                    *yi -= mi;
                }
            }
        }

        if invert {
            for v in &mut y {
                *v = -*v;
            }
        }

        for v in &mut x {
            *v *= self.period;
        }

        Waveform::new(x, y)
    }

    /// Get bunch data through a selector, the indexed-access interface.
    ///
    /// * `slice(t, All)` - turn `t`, every bunch
    /// * `slice(t, Single(b))` - turn `t`, bunch `b`
    /// * `slice(t, Range(b0, b1))` - turn `t`, bunches `b0..=b1`
    pub fn slice(&mut self, turn: i64, select: BunchSelect) -> Result<Waveform, HtError> {
        let (first_bunch, last_bunch) = match select {
            BunchSelect::All => (0, self.number_of_bunches() - 1),
            BunchSelect::Single(b) => (b, b),
            BunchSelect::Range(a, b) => {
                if a > b {
                    return Err(HtError::Indexing(format!(
                        "bunch range {}..{} is inverted",
                        a, b
                    )));
                }
                (a, b)
            }
        };
        Ok(self.get(turn, first_bunch, last_bunch, &GetOpts::default()))
    }

    /// The per-sample mean waveform across all populated turns, cached until
    /// the revolution period changes.
    fn baseline_mean(&mut self) -> &[f64] {
        let stale = match &self.baseline {
            Some(cache) => cache.frev_gen != self.frev_gen,
            None => true,
        };
        if stale {
            let mean = self.calc_mean();
            self.baseline = Some(BaselineCache {
                mean,
                frev_gen: self.frev_gen,
            });
        }
        match &self.baseline {
            Some(cache) => &cache.mean,
            None => &[],
        }
    }

    /// Average the waveform over every populated turn, interpolating each
    /// turn onto the first populated turn's x grid.
    fn calc_mean(&mut self) -> Vec<f64> {
        let max_offset_samples = self.t_to_samples(self.max_offset);
        let n_mean = ((self.samples_per_bunch() * self.number_of_bunches() as f64) as i64
            + max_offset_samples)
            .max(0);

        let mut xx: Vec<f64> = (0..n_mean).map(|i| i as f64 * self.period).collect();
        let mut yy: Vec<f64> = vec![0.0; xx.len()];

        let opts = GetOpts {
            skip: Some(-1),
            extra: max_offset_samples + 1,
            baseline: Some(false),
            pad: true,
            invert: Some(false),
            align: Some(false),
        };

        let turns: Vec<usize> = self.populated_turns.iter().collect();
        let last_bunch = self.number_of_bunches() - 1;
        for i in turns {
            let w = self.get(i as i64, 0, last_bunch, &opts);
            if i == 0 {
                if w.x.len() > 1 {
                    xx = w.x[..w.x.len() - 1].to_vec();
                    yy = w.y[..w.y.len() - 1].to_vec();
                }
            } else if !w.y.is_empty() {
                let interp = LinearInterp::uniform(w.x[0], self.period, w.y);
                for (k, &xk) in xx.iter().enumerate() {
                    yy[k] += interp.value_at(xk);
                }
            }
        }

        let n_turns = self.populated_turns.len().max(1) as f64;
        yy.iter().map(|v| v / n_turns).collect()
    }
}
