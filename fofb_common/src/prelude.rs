//! Prelude module for common re-exports.
//!
//! ```rust
//! use fofb_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;
pub use crate::telemetry::{NullTelemetry, Telemetry, ValueKind};

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};
pub use crate::feedback::config::{AxisCalibration, FofbConfig};

// ─── Feedback ───────────────────────────────────────────────────────
pub use crate::feedback::{CorrectionMode, CorrectionType, FaultCode};

// ─── Interconnect ───────────────────────────────────────────────────
pub use crate::rfm::{
    ControlCommand, DmaRegion, DmaStatus, DriverStatus, EventId, EventInfo, NodeId, RfmDriver,
};

/// Default event wait timeout as Duration.
pub const DEFAULT_EVENT_TIMEOUT: Duration =
    Duration::from_millis(crate::consts::EVENT_TIMEOUT_MS_DEFAULT);
