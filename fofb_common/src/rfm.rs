//! Reflective-memory driver contract.
//!
//! This module defines:
//! - `RfmDriver` trait - Interface of the interconnect driver collaborator
//! - `DmaRegion` trait - Interface of the DMA scratch region collaborator
//! - `EventId`, `EventInfo`, `NodeId` - Interrupt event vocabulary
//! - `DriverStatus` - Raw driver error code
//!
//! The core never talks to a board directly; a hardware driver or the
//! simulator from `fofb_sim` is plugged in behind these traits.

use std::time::Duration;
use thiserror::Error;

/// Node id of a board on the reflective-memory ring.
pub type NodeId = u16;

/// Raw, driver-defined error code. Text comes from [`RfmDriver::error_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("driver status {0}")]
pub struct DriverStatus(pub i32);

impl DriverStatus {
    /// Requested range lies outside the mapped window.
    pub const OUT_OF_RANGE: Self = Self(-3);
    /// Event id not known to the driver.
    pub const BAD_EVENT: Self = Self(-4);
    /// Target node does not answer.
    pub const NODE_UNREACHABLE: Self = Self(-5);
}

/// Interrupt events available on the interconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventId {
    /// Reset event.
    Reset = 0,
    /// Sample-ready / acknowledge event between sampling board and controller.
    Intr1 = 1,
    /// Control commands (enable, start, stop).
    Intr2 = 2,
    /// Actuator output ready.
    Intr3 = 3,
    /// Spare.
    Intr4 = 4,
}

impl EventId {
    /// Event used for sample-ready notifications and their acknowledge.
    pub const SAMPLES: Self = Self::Intr1;
    /// Event used for board control commands.
    pub const CONTROL: Self = Self::Intr2;
    /// Event used to announce a fresh actuator buffer.
    pub const OUTPUTS: Self = Self::Intr3;

    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Reset),
            1 => Some(Self::Intr1),
            2 => Some(Self::Intr2),
            3 => Some(Self::Intr3),
            4 => Some(Self::Intr4),
            _ => None,
        }
    }
}

/// Payload of a control event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ControlCommand {
    /// Begin sampling / output.
    Start = 1,
    /// Stop sampling / output.
    Stop = 2,
    /// Enable the board.
    Enable = 3,
    /// Disable the board.
    Disable = 4,
}

impl ControlCommand {
    /// Convert from the raw event payload.
    #[inline]
    pub const fn from_payload(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Start),
            2 => Some(Self::Stop),
            3 => Some(Self::Enable),
            4 => Some(Self::Disable),
            _ => None,
        }
    }
}

/// One received event occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventInfo {
    /// Event that fired.
    pub event: EventId,
    /// Node that raised it.
    pub node_id: NodeId,
    /// Sender-defined extra word (ring slot for sample events).
    pub extended_info: u32,
    /// Set when the wait ended without an occurrence.
    pub timed_out: bool,
}

/// Interconnect driver collaborator.
///
/// # Timing Contracts
///
/// | Operation | RT Constraint |
/// |-----------|---------------|
/// | `wait_for_event()` | blocks up to `timeout` |
/// | everything else | bounded, non-blocking |
pub trait RfmDriver {
    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), DriverStatus>;

    /// Write `buf` starting at `offset`.
    fn write(&mut self, offset: u32, buf: &[u8]) -> Result<(), DriverStatus>;

    /// Drop any pending occurrence of `event`.
    fn clear_event(&mut self, event: EventId) -> Result<(), DriverStatus>;

    /// Arm `event` for reception.
    fn enable_event(&mut self, event: EventId) -> Result<(), DriverStatus>;

    /// Block until `event` fires or `timeout` elapses.
    ///
    /// A timeout may be reported either through `EventInfo::timed_out` or
    /// as an error status, depending on the driver.
    fn wait_for_event(&mut self, event: EventId, timeout: Duration)
    -> Result<EventInfo, DriverStatus>;

    /// Raise `event` on `node` carrying `payload`.
    fn send_event(&mut self, node: NodeId, event: EventId, payload: u32)
    -> Result<(), DriverStatus>;

    /// Payload size from which DMA transfers are used [bytes].
    fn dma_threshold(&self) -> usize;

    /// Human-readable text for a status code.
    fn error_message(&self, status: DriverStatus) -> String;
}

/// DMA status block shared with the sampling hardware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DmaStatus {
    /// Ring slot consumed by the last acquisition.
    pub loop_pos: u32,
}

/// DMA scratch region collaborator.
pub trait DmaRegion {
    /// Scratch memory used for bulk transfers.
    fn memory(&mut self) -> &mut [u8];

    /// Status block, `None` if the region was never mapped.
    fn status(&mut self) -> Option<&mut DmaStatus>;
}
