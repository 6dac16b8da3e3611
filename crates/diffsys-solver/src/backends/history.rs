//! Solution history for delayed-state lookups in DDE systems.

use nalgebra::{DMatrix, DVector};

/// Accepted (t, y) points with linear interpolation between them.
///
/// Lookups before the first point clamp to the initial state (constant
/// pre-history), lookups past the last point clamp to the newest state.
/// Times are pushed in nondecreasing order.
#[derive(Clone, Debug)]
pub struct History {
    times: Vec<f64>,
    states: Vec<DVector<f64>>,
}

impl History {
    pub fn new(t0: f64, y0: DVector<f64>) -> Self {
        Self {
            times: vec![t0],
            states: vec![y0],
        }
    }

    /// Drop everything and restart from a new anchor point.
    pub fn reset(&mut self, t0: f64, y0: DVector<f64>) {
        self.times.clear();
        self.states.clear();
        self.times.push(t0);
        self.states.push(y0);
    }

    pub fn push(&mut self, t: f64, y: DVector<f64>) {
        debug_assert!(t >= *self.times.last().unwrap_or(&f64::NEG_INFINITY));
        self.times.push(t);
        self.states.push(y);
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// State at time `t`, linearly interpolated.
    ///
    /// A NaN lookup time (a model writing a NaN delay) clamps like
    /// pre-history.
    pub fn value_at(&self, t: f64) -> DVector<f64> {
        let first = self.times[0];
        let last = *self.times.last().unwrap();
        if t.is_nan() || t <= first {
            return self.states[0].clone();
        }
        if t >= last {
            return self.states.last().unwrap().clone();
        }

        let idx = match self.times.binary_search_by(|probe| probe.total_cmp(&t)) {
            Ok(i) => return self.states[i].clone(),
            Err(i) => i,
        };

        let t0 = self.times[idx - 1];
        let t1 = self.times[idx];
        let w = (t - t0) / (t1 - t0);
        &self.states[idx - 1] * (1.0 - w) + &self.states[idx] * w
    }

    /// Delayed-state buffer at time `t`: `[(i, j)] = y_i(t - delays[j])`.
    pub fn delayed_matrix(&self, t: f64, delays: &DVector<f64>) -> DMatrix<f64> {
        let n = self.states[0].len();
        let mut out = DMatrix::zeros(n, delays.len());
        for j in 0..delays.len() {
            let yd = self.value_at(t - delays[j]);
            for i in 0..n {
                out[(i, j)] = yd[i];
            }
        }
        out
    }
}
