//! Correction engine: measurement → absolute corrector values.
//!
//! Per cycle and active plane:
//! 1. a new injection restarts the injection counter, which then advances;
//! 2. `dcm = S⁺ · diff` with the cached (optionally weighted) inverse;
//! 3. PID on `dcm` with the proportional gain ramped inside the injection window;
//! 4. the PID delta is accumulated onto the previous corrector values.
//!
//! The measurement RMS is tracked per plane; a cycle whose RMS exceeds the
//! bound on any active plane increments the RMS error counter. The counter
//! is only reset on request. Inactive planes keep their outputs and PID
//! memory untouched.

use fofb_common::feedback::config::CorrectionConfig;
use fofb_common::feedback::{CorrectionType, FaultCode};
use nalgebra::{DMatrix, DVector};
use tracing::{debug, warn};

use super::injection::InjectionWindow;
use super::pid::{PidGains, PidState, pid_compute};
use super::smat::invert;
use crate::error::FofbError;

// ─── Parameters ─────────────────────────────────────────────────────

/// Plane of the orbit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plane {
    /// Horizontal.
    X = 0,
    /// Vertical.
    Y = 1,
}

impl Plane {
    /// Both planes in index order.
    pub const ALL: [Self; 2] = [Self::X, Self::Y];

    /// Correction bit of this plane.
    #[inline]
    pub const fn flag(self) -> CorrectionType {
        match self {
            Self::X => CorrectionType::HORIZONTAL,
            Self::Y => CorrectionType::VERTICAL,
        }
    }

    /// Lower-case name.
    #[inline]
    pub const fn name(self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Y => "y",
        }
    }
}

/// Device counts of one plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisShape {
    /// Beam-position monitors.
    pub bpms: usize,
    /// Correctors.
    pub cms: usize,
}

/// Engine parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineParams {
    /// PID gains.
    pub gains: PidGains,
    /// Sampling frequency [Hz].
    pub frequency: f64,
    /// Weight correctors around the inversion.
    pub weighted: bool,
    /// RMS bound [mm].
    pub rms_bound: f64,
    /// Measurement magnitude sum below which no beam is assumed.
    pub no_beam_level: Option<f64>,
    /// Largest accepted correction entry.
    pub max_corrector_step: Option<f64>,
}

impl From<&CorrectionConfig> for EngineParams {
    fn from(cfg: &CorrectionConfig) -> Self {
        Self {
            gains: PidGains {
                p: cfg.p,
                i: cfg.i,
                d: cfg.d,
            },
            frequency: cfg.frequency,
            weighted: cfg.weighted,
            rms_bound: cfg.rms_bound,
            no_beam_level: cfg.no_beam_level,
            max_corrector_step: cfg.max_corrector_step,
        }
    }
}

/// Outcome of one `correct()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectionStatus {
    /// Correction applied.
    Applied,
    /// No beam; nothing applied.
    NoBeam,
    /// Correction exceeded the step limit; nothing applied.
    CorrectorLimit,
}

impl CorrectionStatus {
    /// Fault code of this outcome.
    #[inline]
    pub const fn fault_code(self) -> FaultCode {
        match self {
            Self::Applied => FaultCode::None,
            Self::NoBeam => FaultCode::NoBeam,
            Self::CorrectorLimit => FaultCode::CorrectorLimit,
        }
    }
}

// ─── Per-Plane State ────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct PlaneState {
    shape: AxisShape,
    inverse: Option<DMatrix<f64>>,
    weights: Option<DVector<f64>>,
    pid: PidState,
    cm: DVector<f64>,
    dcm: DVector<f64>,
    delta: DVector<f64>,
    last_rms: f64,
}

impl PlaneState {
    fn new(shape: AxisShape) -> Self {
        Self {
            shape,
            inverse: None,
            weights: None,
            pid: PidState::new(shape.cms),
            cm: DVector::zeros(shape.cms),
            dcm: DVector::zeros(shape.cms),
            delta: DVector::zeros(shape.cms),
            last_rms: 0.0,
        }
    }
}

// ─── Engine ─────────────────────────────────────────────────────────

/// Response-matrix + PID correction for both planes.
#[derive(Debug, Clone)]
pub struct CorrectionEngine {
    params: EngineParams,
    planes: [PlaneState; 2],
    injection: InjectionWindow,
    rms_errors: u32,
}

impl CorrectionEngine {
    /// Engine for the given plane shapes. Call [`set_smat`](Self::set_smat)
    /// before the first correction.
    pub fn new(params: EngineParams, x: AxisShape, y: AxisShape) -> Self {
        Self {
            params,
            planes: [PlaneState::new(x), PlaneState::new(y)],
            injection: InjectionWindow::from_frequency(params.frequency),
            rms_errors: 0,
        }
    }

    /// Parameters in use.
    #[inline]
    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    /// True once both inverses are cached.
    pub fn is_calibrated(&self) -> bool {
        self.planes.iter().all(|p| p.inverse.is_some())
    }

    /// Replace both cached inverses (and weights).
    ///
    /// Both matrices are validated and inverted before anything is
    /// replaced; on error the previous calibration stays in place.
    pub fn set_smat(
        &mut self,
        smat_x: &DMatrix<f64>,
        smat_y: &DMatrix<f64>,
        ivec_x: f64,
        ivec_y: f64,
    ) -> Result<(), FofbError> {
        let mut fresh = Vec::with_capacity(2);
        for (plane, smat, ivec) in [(Plane::X, smat_x, ivec_x), (Plane::Y, smat_y, ivec_y)] {
            let shape = self.planes[plane as usize].shape;
            if smat.shape() != (shape.bpms, shape.cms) {
                return Err(FofbError::CalibrationMismatch(format!(
                    "{}: response matrix is {}x{}, expected {}x{}",
                    plane.name(),
                    smat.nrows(),
                    smat.ncols(),
                    shape.bpms,
                    shape.cms
                )));
            }
            fresh.push(invert(smat, ivec, self.params.weighted, plane.name())?);
        }

        for (state, inv) in self.planes.iter_mut().zip(fresh) {
            debug!(kept = inv.kept, weighted = inv.weights.is_some(), "response inverse cached");
            state.inverse = Some(inv.inverse);
            state.weights = inv.weights;
        }
        Ok(())
    }

    /// Seed the absolute corrector values, bypassing the PID.
    pub fn set_cms(&mut self, cm_x: &DVector<f64>, cm_y: &DVector<f64>) -> Result<(), FofbError> {
        for (plane, cm) in [(Plane::X, cm_x), (Plane::Y, cm_y)] {
            let expected = self.planes[plane as usize].shape.cms;
            if cm.len() != expected {
                return Err(FofbError::CalibrationMismatch(format!(
                    "{}: {} corrector values, expected {expected}",
                    plane.name(),
                    cm.len()
                )));
            }
        }
        self.planes[0].cm.copy_from(cm_x);
        self.planes[1].cm.copy_from(cm_y);
        Ok(())
    }

    /// Compute one correction.
    ///
    /// Planes whose bit is absent from `kind` are left untouched. Soft
    /// outcomes (`NoBeam`, `CorrectorLimit`) leave every corrector and PID
    /// value as it was.
    pub fn correct(
        &mut self,
        diff_x: &DVector<f64>,
        diff_y: &DVector<f64>,
        new_injection: bool,
        kind: CorrectionType,
    ) -> Result<CorrectionStatus, FofbError> {
        if !self.is_calibrated() {
            return Err(FofbError::InvalidState {
                op: "correct",
                state: "uncalibrated",
            });
        }
        let diffs = [diff_x, diff_y];
        for plane in Plane::ALL {
            let expected = self.planes[plane as usize].shape.bpms;
            let got = diffs[plane as usize].len();
            if got != expected {
                return Err(FofbError::CalibrationMismatch(format!(
                    "{}: {got} measurements, expected {expected}",
                    plane.name()
                )));
            }
        }

        self.injection.update(new_injection);
        let p = self.injection.gain(self.params.gains.p);

        let active = move || Plane::ALL.into_iter().filter(move |pl| kind.contains(pl.flag()));

        // RMS
        let mut rms_exceeded = false;
        for plane in active() {
            let diff = diffs[plane as usize];
            let rms = if diff.is_empty() {
                0.0
            } else {
                (diff.norm_squared() / diff.len() as f64).sqrt()
            };
            self.planes[plane as usize].last_rms = rms;
            if rms > self.params.rms_bound {
                rms_exceeded = true;
            }
        }
        if rms_exceeded {
            self.rms_errors += 1;
            debug!(count = self.rms_errors, "RMS above bound");
        }

        if let Some(level) = self.params.no_beam_level {
            if active().any(|pl| diffs[pl as usize].iter().map(|v| v.abs()).sum::<f64>() < level) {
                return Ok(CorrectionStatus::NoBeam);
            }
        }

        for plane in active() {
            let state = &mut self.planes[plane as usize];
            if let Some(inv) = &state.inverse {
                state.dcm.gemv(1.0, inv, diffs[plane as usize], 0.0);
            }
        }

        if let Some(limit) = self.params.max_corrector_step {
            if active().any(|pl| self.planes[pl as usize].dcm.amax() > limit) {
                warn!(limit, "correction above corrector step limit, not applied");
                return Ok(CorrectionStatus::CorrectorLimit);
            }
        }

        for plane in active() {
            let state = &mut self.planes[plane as usize];
            pid_compute(&mut state.pid, &self.params.gains, p, &state.dcm, &mut state.delta);
            state.cm += &state.delta;
        }

        Ok(CorrectionStatus::Applied)
    }

    /// Absolute corrector values of `plane`.
    #[inline]
    pub fn cm(&self, plane: Plane) -> &DVector<f64> {
        &self.planes[plane as usize].cm
    }

    /// Cached inverse of `plane`.
    #[inline]
    pub fn inverse(&self, plane: Plane) -> Option<&DMatrix<f64>> {
        self.planes[plane as usize].inverse.as_ref()
    }

    /// Corrector weights of `plane`, when weighting is on.
    #[inline]
    pub fn weights(&self, plane: Plane) -> Option<&DVector<f64>> {
        self.planes[plane as usize].weights.as_ref()
    }

    /// RMS of the last measurement of `plane`.
    #[inline]
    pub fn last_rms(&self, plane: Plane) -> f64 {
        self.planes[plane as usize].last_rms
    }

    /// Cycles with RMS above the bound since the last reset.
    #[inline]
    pub fn rms_error_count(&self) -> u32 {
        self.rms_errors
    }

    /// Zero the RMS error counter.
    #[inline]
    pub fn reset_rms_errors(&mut self) {
        self.rms_errors = 0;
    }

    /// Injection context.
    #[inline]
    pub fn injection(&self) -> &InjectionWindow {
        &self.injection
    }

    /// Zero PID memory and return the injection context to idle.
    pub fn reset(&mut self) {
        for state in &mut self.planes {
            state.pid.reset();
        }
        self.injection.reset();
    }
}
