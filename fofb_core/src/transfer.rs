//! Transfer selection and the reflective-memory bus.
//!
//! Every transfer is routed through [`select_mode`] with a threshold freshly
//! queried from the driver: small payloads go through direct register I/O,
//! everything else is staged in the DMA scratch region.
//!
//! [`Bus`] owns the driver, the DMA region and the process-wide read-only
//! flag. In read-only mode outward writes and events succeed without
//! touching the interconnect; inbound reads and event waits still work.

use std::time::Duration;

use fofb_common::rfm::{DmaRegion, DmaStatus, DriverStatus, EventId, EventInfo, NodeId, RfmDriver};
use tracing::trace;

use crate::error::{FofbError, TransferDirection};

// ─── Transfer Selector ──────────────────────────────────────────────

/// How a payload crosses the interconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Register-level programmed I/O.
    DirectIo,
    /// DMA through the scratch region.
    Bulk,
}

/// Pick the transfer mode for `payload_bytes`.
///
/// `DirectIo` iff `payload_bytes < threshold_bytes`.
#[inline]
pub const fn select_mode(payload_bytes: usize, threshold_bytes: usize) -> TransferMode {
    if payload_bytes < threshold_bytes {
        TransferMode::DirectIo
    } else {
        TransferMode::Bulk
    }
}

// ─── Bus ────────────────────────────────────────────────────────────

/// Driver + DMA region + read-only flag.
#[derive(Debug)]
pub struct Bus<D, M> {
    driver: D,
    dma: M,
    read_only: bool,
}

impl<D: RfmDriver, M: DmaRegion> Bus<D, M> {
    /// Bundle a driver and its DMA region.
    pub fn new(driver: D, dma: M, read_only: bool) -> Self {
        Self {
            driver,
            dma,
            read_only,
        }
    }

    /// True when outward traffic is suppressed.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Shared access to the driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Shared DMA status block, `None` if never mapped.
    pub fn dma_status(&mut self) -> Option<&mut DmaStatus> {
        self.dma.status()
    }

    /// Driver text for `status`.
    pub fn describe(&self, status: DriverStatus) -> String {
        self.driver.error_message(status)
    }

    /// Read `buf.len()` bytes at `offset`.
    pub fn read(
        &mut self,
        op: &'static str,
        offset: u32,
        buf: &mut [u8],
    ) -> Result<TransferMode, FofbError> {
        let mode = select_mode(buf.len(), self.driver.dma_threshold());
        let result = match mode {
            TransferMode::DirectIo => self.driver.read(offset, buf),
            TransferMode::Bulk => {
                let Some(scratch) = self.dma.memory().get_mut(..buf.len()) else {
                    return Err(FofbError::DmaUnavailable(
                        "scratch region smaller than payload",
                    ));
                };
                self.driver
                    .read(offset, scratch)
                    .map(|()| buf.copy_from_slice(scratch))
            }
        };
        result.map_err(|status| self.transfer_failure(op, TransferDirection::Inbound, status))?;
        trace!(op, offset, len = buf.len(), ?mode, "inbound transfer");
        Ok(mode)
    }

    /// Write `buf` at `offset`. No-op in read-only mode.
    pub fn write(
        &mut self,
        op: &'static str,
        offset: u32,
        buf: &[u8],
    ) -> Result<TransferMode, FofbError> {
        let mode = select_mode(buf.len(), self.driver.dma_threshold());
        if self.read_only {
            trace!(op, offset, len = buf.len(), "read-only: write suppressed");
            return Ok(mode);
        }
        let result = match mode {
            TransferMode::DirectIo => self.driver.write(offset, buf),
            TransferMode::Bulk => {
                let Some(scratch) = self.dma.memory().get_mut(..buf.len()) else {
                    return Err(FofbError::DmaUnavailable(
                        "scratch region smaller than payload",
                    ));
                };
                scratch.copy_from_slice(buf);
                self.driver.write(offset, scratch)
            }
        };
        result.map_err(|status| self.transfer_failure(op, TransferDirection::Outbound, status))?;
        trace!(op, offset, len = buf.len(), ?mode, "outbound transfer");
        Ok(mode)
    }

    /// Raise `event` on `node`. No-op in read-only mode.
    pub fn send_event(
        &mut self,
        node: NodeId,
        event: EventId,
        payload: u32,
    ) -> Result<(), DriverStatus> {
        if self.read_only {
            trace!(node, ?event, payload, "read-only: event suppressed");
            return Ok(());
        }
        self.driver.send_event(node, event, payload)
    }

    /// Drop a pending occurrence of `event`.
    pub fn clear_event(&mut self, event: EventId) -> Result<(), DriverStatus> {
        self.driver.clear_event(event)
    }

    /// Arm `event`.
    pub fn enable_event(&mut self, event: EventId) -> Result<(), DriverStatus> {
        self.driver.enable_event(event)
    }

    /// Block on `event` for at most `timeout`.
    pub fn wait_for_event(
        &mut self,
        event: EventId,
        timeout: Duration,
    ) -> Result<EventInfo, DriverStatus> {
        self.driver.wait_for_event(event, timeout)
    }

    fn transfer_failure(
        &self,
        op: &'static str,
        dir: TransferDirection,
        status: DriverStatus,
    ) -> FofbError {
        FofbError::TransferFailure {
            op,
            dir,
            status,
            detail: self.driver.error_message(status),
        }
    }
}
