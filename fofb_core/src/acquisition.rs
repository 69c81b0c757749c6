//! Interrupt-synchronized acquisition of the measurement ring.
//!
//! Per-cycle phases: `Idle → WaitingForEvent → Transferring → Acknowledged`.
//! The sampling peer announces a slot with an event whose extended info is
//! the slot index; the slot is read, its index stored as the DMA loop
//! position, and the peer is acknowledged so it may reuse the slot.

use std::time::Duration;

use fofb_common::consts::ADC_SAMPLE_WIDTH;
use fofb_common::rfm::{DmaRegion, DriverStatus, EventId, EventInfo, NodeId, RfmDriver};
use tracing::{debug, trace};

use crate::error::FofbError;
use crate::transfer::Bus;

/// Acquisition phase of the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcquisitionPhase {
    /// Nothing in flight.
    #[default]
    Idle,
    /// Blocked on the peer's event.
    WaitingForEvent,
    /// Slot announced, samples being read or held.
    Transferring,
    /// Peer released.
    Acknowledged,
}

impl AcquisitionPhase {
    /// Name used in log output.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::WaitingForEvent => "WaitingForEvent",
            Self::Transferring => "Transferring",
            Self::Acknowledged => "Acknowledged",
        }
    }
}

/// Geometry of the measurement ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    /// Origin of slot 0.
    pub base: u32,
    /// 16-bit samples per slot.
    pub sample_count: usize,
    /// Number of slots.
    pub ring_slots: u32,
}

impl RingLayout {
    /// Bytes per slot.
    #[inline]
    pub const fn payload(&self) -> usize {
        self.sample_count * ADC_SAMPLE_WIDTH
    }

    /// Offset of `slot`.
    #[inline]
    pub const fn slot_offset(&self, slot: u32) -> u32 {
        self.base + slot * self.payload() as u32
    }
}

/// Waits for the sampling peer, reads its slot and acknowledges it.
#[derive(Debug)]
pub struct AcquisitionSynchronizer {
    layout: RingLayout,
    timeout: Duration,
    phase: AcquisitionPhase,
    raw: Vec<u8>,
    samples: Vec<i16>,
    peer: Option<EventInfo>,
}

impl AcquisitionSynchronizer {
    /// Synchronizer for `layout`, waiting at most `timeout` per cycle.
    pub fn new(layout: RingLayout, timeout: Duration) -> Self {
        Self {
            layout,
            timeout,
            phase: AcquisitionPhase::Idle,
            raw: vec![0; layout.payload()],
            samples: vec![0; layout.sample_count],
            peer: None,
        }
    }

    /// Current phase.
    #[inline]
    pub fn phase(&self) -> AcquisitionPhase {
        self.phase
    }

    /// Ring geometry.
    #[inline]
    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    /// Samples of the last received slot.
    #[inline]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Announcement of the slot currently held.
    #[inline]
    pub fn peer(&self) -> Option<&EventInfo> {
        self.peer.as_ref()
    }

    /// Clear any stale occurrence of `event`, arm it and block on it.
    pub fn wait_for_peer_event<D: RfmDriver, M: DmaRegion>(
        &mut self,
        bus: &mut Bus<D, M>,
        event: EventId,
        timeout: Duration,
    ) -> Result<EventInfo, FofbError> {
        self.phase = AcquisitionPhase::WaitingForEvent;
        self.peer = None;

        let result = arm_and_wait(bus, event, timeout);

        match result {
            Ok(info) => {
                trace!(node = info.node_id, slot = info.extended_info, "peer event");
                self.phase = AcquisitionPhase::Transferring;
                Ok(info)
            }
            Err(e) => {
                self.phase = AcquisitionPhase::Idle;
                Err(e)
            }
        }
    }

    /// Read the slot announced by `peer` into the sample buffer.
    pub fn receive_samples<D: RfmDriver, M: DmaRegion>(
        &mut self,
        bus: &mut Bus<D, M>,
        peer: &EventInfo,
    ) -> Result<&[i16], FofbError> {
        let slot = peer.extended_info;
        if slot >= self.layout.ring_slots {
            return Err(FofbError::InvalidSlot {
                slot,
                ring: self.layout.ring_slots,
            });
        }
        let Some(status) = bus.dma_status() else {
            return Err(FofbError::DmaUnavailable("DMA status block not mapped"));
        };
        status.loop_pos = slot;

        self.phase = AcquisitionPhase::Transferring;
        bus.read("receive_samples", self.layout.slot_offset(slot), &mut self.raw)?;

        for (dst, chunk) in self
            .samples
            .iter_mut()
            .zip(self.raw.chunks_exact(ADC_SAMPLE_WIDTH))
        {
            *dst = i16::from_ne_bytes([chunk[0], chunk[1]]);
        }
        self.peer = Some(*peer);
        Ok(&self.samples)
    }

    /// Release the slot back to `peer` with a payload-less `ack_event`.
    pub fn acknowledge<D: RfmDriver, M: DmaRegion>(
        &mut self,
        bus: &mut Bus<D, M>,
        peer: NodeId,
        ack_event: EventId,
    ) -> Result<(), FofbError> {
        bus.send_event(peer, ack_event, 0)
            .map_err(|status| FofbError::AckFailure {
                node: peer,
                status,
                detail: bus.describe(status),
            })?;
        self.phase = AcquisitionPhase::Acknowledged;
        Ok(())
    }

    /// Wait for the next sample event and read its slot.
    pub fn acquire<D: RfmDriver, M: DmaRegion>(
        &mut self,
        bus: &mut Bus<D, M>,
    ) -> Result<EventInfo, FofbError> {
        let info = self.wait_for_peer_event(bus, EventId::SAMPLES, self.timeout)?;
        self.receive_samples(bus, &info)?;
        debug!(slot = info.extended_info, "samples acquired");
        Ok(info)
    }
}

fn arm_and_wait<D: RfmDriver, M: DmaRegion>(
    bus: &mut Bus<D, M>,
    event: EventId,
    timeout: Duration,
) -> Result<EventInfo, FofbError> {
    let arm_failure = |op: &'static str, status: DriverStatus, bus: &Bus<D, M>| {
        FofbError::EventArmFailure {
            op,
            event,
            status,
            detail: bus.describe(status),
        }
    };
    let timed_out = || FofbError::EventTimeout {
        op: "wait_for_peer_event",
        event,
        timeout_ms: timeout.as_millis() as u64,
    };

    if let Err(status) = bus.clear_event(event) {
        return Err(arm_failure("clear_event", status, bus));
    }
    if let Err(status) = bus.enable_event(event) {
        return Err(arm_failure("enable_event", status, bus));
    }
    // Drivers report a timeout either as an error status or through the flag.
    match bus.wait_for_event(event, timeout) {
        Ok(info) if !info.timed_out => Ok(info),
        Ok(_) => Err(timed_out()),
        Err(status) => {
            debug!(?event, %status, detail = %bus.describe(status), "event wait failed");
            Err(timed_out())
        }
    }
}
