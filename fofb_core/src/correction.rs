//! Correction engine root.
//!
//! Weighted response-matrix pseudo-inverse combined with a PID loop,
//! injection-aware proportional ramping and RMS fault tracking.

pub mod engine;
pub mod injection;
pub mod pid;
pub mod smat;

pub use engine::{AxisShape, CorrectionEngine, CorrectionStatus, EngineParams, Plane};
pub use injection::{InjectionPhase, InjectionWindow};
pub use pid::{PidGains, PidState};
