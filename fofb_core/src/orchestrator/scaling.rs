//! Measurement scaling and actuator digitization.
//!
//! Raw samples become millimetres with `raw · RAW_TO_MM · gain − offset`.
//! Corrector values become 24-bit offset-binary digits centred on
//! `HALF_DIGITS`, clamped to the converter range.

use fofb_common::consts::{DAC_MAX_DIGITS, DAC_STATUS_LEVEL, HALF_DIGITS, RAW_TO_MM};
use fofb_common::feedback::config::AxisCalibration;
use nalgebra::DVector;

use super::index::DeviceIndexMap;

/// Per-plane scaling vectors taken from the calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaneScaling {
    gain: DVector<f64>,
    offset: DVector<f64>,
    cm_scale: DVector<f64>,
    cm_slots: Vec<usize>,
}

impl PlaneScaling {
    /// Scaling of one calibrated plane.
    pub fn from_calibration(cal: &AxisCalibration) -> Self {
        Self {
            gain: DVector::from_column_slice(&cal.bpm_gain),
            offset: DVector::from_column_slice(&cal.bpm_offset),
            cm_scale: DVector::from_column_slice(&cal.cm_scale),
            cm_slots: cal.cm_slots.clone(),
        }
    }

    /// Gather `raw` through `map` and convert to millimetres into `out`.
    ///
    /// The map and the calibration vectors are checked against each other
    /// at `init()`; entries past the shortest of them are left untouched.
    pub fn to_physical(&self, raw: &[i16], map: &DeviceIndexMap, out: &mut DVector<f64>) {
        let scaled = map
            .positions()
            .iter()
            .zip(self.gain.iter().zip(self.offset.iter()));
        for (value, (&pos, (&gain, &offset))) in out.iter_mut().zip(scaled) {
            let sample = raw.get(pos).copied().unwrap_or(0) as f64;
            *value = sample * RAW_TO_MM * gain - offset;
        }
    }

    /// `(buffer word, digits)` of every corrector of `cm`.
    pub fn digitize<'a>(
        &'a self,
        cm: &'a DVector<f64>,
        loop_dir: f64,
    ) -> impl Iterator<Item = (usize, u32)> + 'a {
        self.cm_slots
            .iter()
            .zip(cm.iter().zip(self.cm_scale.iter()))
            .map(move |(&slot, (&value, &scale))| (slot, digitize(value, scale, loop_dir)))
    }
}

/// Offset-binary digits of `value · scale · loop_dir`.
#[inline]
pub fn digitize(value: f64, scale: f64, loop_dir: f64) -> u32 {
    let digits = (value * scale * loop_dir).round() + HALF_DIGITS;
    // NaN saturates to 0
    digits.clamp(0.0, DAC_MAX_DIGITS as f64) as u32
}

/// Trailer word carrying `level` as a status voltage.
#[inline]
pub fn status_word(level: f64) -> u32 {
    digitize(level, DAC_STATUS_LEVEL, 1.0)
}
