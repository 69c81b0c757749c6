//! Vector PID on corrector increments.
//!
//! The proportional term acts on the current correction, the integral on
//! the running sum of past corrections and the derivative on the change
//! between consecutive corrections. Zero I disables the integral, zero D
//! disables the derivative.

use nalgebra::DVector;

/// PID gains shared by both planes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    /// Proportional gain (before injection ramping).
    pub p: f64,
    /// Integral gain.
    pub i: f64,
    /// Derivative gain.
    pub d: f64,
}

/// Per-plane PID memory.
///
/// Persists across cycles; reset only on explicit re-initialization.
#[derive(Debug, Clone, PartialEq)]
pub struct PidState {
    /// Running sum of corrections.
    sum: DVector<f64>,
    /// Correction of the previous cycle.
    last: DVector<f64>,
}

impl PidState {
    /// Zeroed state for `len` correctors.
    pub fn new(len: usize) -> Self {
        Self {
            sum: DVector::zeros(len),
            last: DVector::zeros(len),
        }
    }

    /// Number of correctors.
    #[inline]
    pub fn len(&self) -> usize {
        self.sum.len()
    }

    /// True for a zero-corrector plane.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.sum.is_empty()
    }

    /// Zero the integral and derivative memory.
    #[inline]
    pub fn reset(&mut self) {
        self.sum.fill(0.0);
        self.last.fill(0.0);
    }

    /// Running sum of corrections.
    #[inline]
    pub fn sum(&self) -> &DVector<f64> {
        &self.sum
    }
}

/// Compute one PID step into `delta`.
///
/// `delta = p·dcm + I·sum + D·(dcm − last)`, then `last = dcm` and
/// `sum += dcm`. `p` is the (possibly ramped) proportional gain.
/// No allocation.
#[inline]
pub fn pid_compute(
    state: &mut PidState,
    gains: &PidGains,
    p: f64,
    dcm: &DVector<f64>,
    delta: &mut DVector<f64>,
) {
    delta.copy_from(dcm);
    *delta *= p;

    if gains.i != 0.0 {
        delta.axpy(gains.i, &state.sum, 1.0);
    }
    if gains.d != 0.0 {
        delta.axpy(gains.d, dcm, 1.0);
        delta.axpy(-gains.d, &state.last, 1.0);
    }

    state.last.copy_from(dcm);
    state.sum += dcm;
}
