use std::fmt;
use std::fmt::Formatter;

use itertools::izip;
use serde::{Deserialize, Serialize};

/// A sampled waveform as a pair of time/amplitude vectors.
///
/// The x axis is in seconds (sample positions scaled by the sampling period),
/// the y axis in calibrated physical units.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Waveform {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Waveform {
    /// Creates a new `Waveform` instance.
    ///
    /// # Arguments
    ///
    /// * `x` - A vector of sample times in seconds.
    /// * `y` - A vector of amplitudes.
    ///
    /// # Examples
    ///
    /// ```
    /// use htcore::signal::waveform::Waveform;
    ///
    /// let wf = Waveform::new(vec![0.0, 1e-10, 2e-10], vec![0.1, 0.5, 0.2]);
    /// ```
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        Waveform { x, y }
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Sum of squared amplitudes, the total energy of the trace.
    pub fn energy(&self) -> f64 {
        self.y.iter().map(|v| v * v).sum()
    }

    /// Iterate over (x, y) pairs up to the shorter of the two vectors.
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        izip!(self.x.iter().copied(), self.y.iter().copied())
    }
}

impl fmt::Display for Waveform {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Waveform(data points: {})", self.y.len())
    }
}
