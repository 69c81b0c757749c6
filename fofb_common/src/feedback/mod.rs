//! Feedback loop shared types.
//!
//! Correction planes, fault codes and the loop configuration shared by the
//! core and the simulator.

pub mod config;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Correction planes processed in a cycle.
    ///
    /// An empty set means no correction (`None = 0`): both axes keep their
    /// previous corrector values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CorrectionType: u8 {
        /// Horizontal (x) plane.
        const HORIZONTAL = 0b01;
        /// Vertical (y) plane.
        const VERTICAL   = 0b10;
        /// Both planes.
        const ALL = Self::HORIZONTAL.bits() | Self::VERTICAL.bits();
    }
}

impl CorrectionType {
    /// No plane selected.
    pub const NONE: Self = Self::empty();
}

impl Default for CorrectionType {
    fn default() -> Self {
        Self::ALL
    }
}

/// Orchestrator variant selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionMode {
    /// Correct both planes.
    #[default]
    All,
    /// Correct the horizontal plane only.
    Horizontal,
    /// Correct the vertical plane only.
    Vertical,
}

impl From<CorrectionMode> for CorrectionType {
    fn from(mode: CorrectionMode) -> Self {
        match mode {
            CorrectionMode::All => CorrectionType::ALL,
            CorrectionMode::Horizontal => CorrectionType::HORIZONTAL,
            CorrectionMode::Vertical => CorrectionType::VERTICAL,
        }
    }
}

/// Numeric cycle status reported through `status()`.
///
/// `None` means the last cycle completed. The operator text is what the
/// status message record carries in its `error` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(i32)]
pub enum FaultCode {
    /// Cycle completed.
    #[default]
    None = 0,
    /// Acquisition side failed (wait, arm, read, acknowledge).
    Adc = 1,
    /// Actuation side failed (output write, control event).
    Dac = 2,
    /// Requested corrector step above the configured limit.
    CorrectorLimit = 3,
    /// Measurement indicates no stored beam.
    NoBeam = 4,
    /// RMS error counter passed the escalation limit.
    Rms = 5,
    /// Configuration, calibration or lifecycle error.
    Config = 6,
}

impl FaultCode {
    /// Raw status value.
    #[inline]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// True for `FaultCode::None`.
    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::None)
    }

    /// Convert from the raw status value.
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Adc),
            2 => Some(Self::Dac),
            3 => Some(Self::CorrectorLimit),
            4 => Some(Self::NoBeam),
            5 => Some(Self::Rms),
            6 => Some(Self::Config),
            _ => None,
        }
    }

    /// Operator-facing description.
    pub const fn message(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Adc => "ADC Timeout",
            Self::Dac => "DAC Problem",
            Self::CorrectorLimit => "To much to correct",
            Self::NoBeam => "No Current",
            Self::Rms => "Bad RMS",
            Self::Config => "Unknown Problem",
        }
    }
}
