//! Feedback error taxonomy.
//!
//! Hardware and transport failures are per-cycle statuses: they are logged
//! with the operation name and the driver's error text, surfaced as a
//! [`FaultCode`], and retried only by the next cycle. Index and calibration
//! errors are fatal at `init()` / `set_smat()`.

use fofb_common::feedback::FaultCode;
use fofb_common::rfm::{DriverStatus, EventId, NodeId};
use thiserror::Error;

/// Direction of a reflective-memory transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Reflective memory → local buffer.
    Inbound,
    /// Local buffer → reflective memory.
    Outbound,
}

impl std::fmt::Display for TransferDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inbound => f.write_str("read"),
            Self::Outbound => f.write_str("write"),
        }
    }
}

/// Errors raised by the feedback core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FofbError {
    /// No event arrived within the timeout.
    #[error("{op}: no {event:?} event within {timeout_ms} ms")]
    EventTimeout {
        /// Operation that waited.
        op: &'static str,
        /// Awaited event.
        event: EventId,
        /// Timeout [ms].
        timeout_ms: u64,
    },

    /// Clearing or arming an event failed.
    #[error("{op}: cannot arm {event:?}: {detail} ({status})")]
    EventArmFailure {
        /// Operation (`clear_event` / `enable_event`).
        op: &'static str,
        /// Event concerned.
        event: EventId,
        /// Raw driver status.
        status: DriverStatus,
        /// Driver error text.
        detail: String,
    },

    /// A read or write failed.
    #[error("{op}: {dir} failed: {detail} ({status})")]
    TransferFailure {
        /// Operation name.
        op: &'static str,
        /// Transfer direction.
        dir: TransferDirection,
        /// Raw driver status.
        status: DriverStatus,
        /// Driver error text.
        detail: String,
    },

    /// Acknowledging the peer failed.
    #[error("acknowledge to node {node} failed: {detail} ({status})")]
    AckFailure {
        /// Peer node.
        node: NodeId,
        /// Raw driver status.
        status: DriverStatus,
        /// Driver error text.
        detail: String,
    },

    /// Raising a control or output event failed.
    #[error("{op}: event to node {node} failed: {detail} ({status})")]
    EventSendFailure {
        /// Operation name.
        op: &'static str,
        /// Target node.
        node: NodeId,
        /// Raw driver status.
        status: DriverStatus,
        /// Driver error text.
        detail: String,
    },

    /// A required device is missing from the device-position table.
    #[error("device {device} not found in the device-position table")]
    IndexNotFound {
        /// Device id.
        device: u32,
    },

    /// A required device occurs more than once in the device-position table.
    #[error("device {device} listed more than once in the device-position table")]
    DuplicateIndex {
        /// Device id.
        device: u32,
    },

    /// Calibration data does not match the device layout.
    #[error("calibration mismatch: {0}")]
    CalibrationMismatch(String),

    /// DMA status block not mapped, or scratch region too small.
    #[error("DMA unavailable: {0}")]
    DmaUnavailable(&'static str),

    /// Event carried a slot index outside the ring.
    #[error("slot {slot} outside ring of {ring} slots")]
    InvalidSlot {
        /// Announced slot.
        slot: u32,
        /// Ring size.
        ring: u32,
    },

    /// Operation not allowed in the current lifecycle state.
    #[error("{op} not allowed in state {state}")]
    InvalidState {
        /// Operation attempted.
        op: &'static str,
        /// Current state name.
        state: &'static str,
    },
}

impl FofbError {
    /// Fault code reported through `status()`.
    pub const fn fault_code(&self) -> FaultCode {
        match self {
            Self::EventTimeout { .. }
            | Self::EventArmFailure { .. }
            | Self::AckFailure { .. }
            | Self::InvalidSlot { .. }
            | Self::DmaUnavailable(_) => FaultCode::Adc,
            Self::TransferFailure { dir, .. } => match dir {
                TransferDirection::Inbound => FaultCode::Adc,
                TransferDirection::Outbound => FaultCode::Dac,
            },
            Self::EventSendFailure { .. } => FaultCode::Dac,
            Self::IndexNotFound { .. }
            | Self::DuplicateIndex { .. }
            | Self::CalibrationMismatch(_)
            | Self::InvalidState { .. } => FaultCode::Config,
        }
    }

    /// True for errors that make `init()` / `set_smat()` fail permanently.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::IndexNotFound { .. }
                | Self::DuplicateIndex { .. }
                | Self::CalibrationMismatch(_)
                | Self::DmaUnavailable(_)
        )
    }
}
