/// Linear interpolation over a uniformly spaced grid.
///
/// Behaves like a one-dimensional linear interpolant with out-of-bounds
/// queries evaluating to NaN rather than an error, so a caller can probe a
/// window without first range-checking every position. A small epsilon of
/// slack is allowed at the grid edges to absorb floating-point fuzz in
/// positions that are nominally on the boundary.
#[derive(Clone, Debug)]
pub struct LinearInterp {
    x0: f64,
    dx: f64,
    y: Vec<f64>,
}

const EDGE_EPS: f64 = 1e-9;

impl LinearInterp {
    /// Creates an interpolant over samples `y` located at `x0 + i * dx`.
    ///
    /// # Arguments
    ///
    /// * `x0` - Position of the first sample.
    /// * `dx` - Grid spacing, must be positive.
    /// * `y` - Sample values.
    ///
    /// # Examples
    ///
    /// ```
    /// use htcore::signal::interpolate::LinearInterp;
    ///
    /// let interp = LinearInterp::uniform(0.0, 1.0, vec![0.0, 2.0, 4.0]);
    /// assert!((interp.value_at(0.5) - 1.0).abs() < 1e-12);
    /// assert!(interp.value_at(-1.0).is_nan());
    /// ```
    pub fn uniform(x0: f64, dx: f64, y: Vec<f64>) -> Self {
        LinearInterp { x0, dx, y }
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Interpolated value at position `x`, NaN outside the grid.
    pub fn value_at(&self, x: f64) -> f64 {
        let n = self.y.len();
        if n == 0 {
            return f64::NAN;
        }
        let t = (x - self.x0) / self.dx;
        let last = (n - 1) as f64;
        if t < -EDGE_EPS || t > last + EDGE_EPS {
            return f64::NAN;
        }
        let t = t.clamp(0.0, last);
        let i = t.floor() as usize;
        if i >= n - 1 {
            return self.y[n - 1];
        }
        let frac = t - i as f64;
        self.y[i] + (self.y[i + 1] - self.y[i]) * frac
    }

    /// Evaluate at many positions.
    pub fn values_at(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&x| self.value_at(x)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_nodes() {
        let interp = LinearInterp::uniform(10.0, 1.0, vec![1.0, 3.0, 2.0]);
        assert!((interp.value_at(10.0) - 1.0).abs() < 1e-12);
        assert!((interp.value_at(11.0) - 3.0).abs() < 1e-12);
        assert!((interp.value_at(12.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_midpoints() {
        let interp = LinearInterp::uniform(0.0, 2.0, vec![0.0, 4.0]);
        assert!((interp.value_at(1.0) - 2.0).abs() < 1e-12);
        assert!((interp.value_at(3.0) - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_out_of_bounds_is_nan() {
        let interp = LinearInterp::uniform(0.0, 1.0, vec![1.0, 2.0]);
        assert!(interp.value_at(-0.5).is_nan());
        assert!(interp.value_at(1.5).is_nan());
    }

    #[test]
    fn test_edge_slack() {
        // positions a hair outside the grid from float arithmetic still resolve
        let interp = LinearInterp::uniform(0.0, 1.0, vec![1.0, 2.0, 3.0]);
        assert!((interp.value_at(-1e-12) - 1.0).abs() < 1e-9);
        assert!((interp.value_at(2.0 + 1e-12) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_scaled_grid() {
        // grid spacing in seconds, as used for baseline resampling
        let dt = 1e-10;
        let interp = LinearInterp::uniform(0.0, dt, vec![0.0, 1.0, 0.0]);
        assert!((interp.value_at(0.5 * dt) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_grid() {
        let interp = LinearInterp::uniform(0.0, 1.0, vec![]);
        assert!(interp.value_at(0.0).is_nan());
    }
}
