//! Outward channel: control block, board control events, actuator outputs.
//!
//! All writes use the same size-based transfer selection as acquisition.
//! Control-event failures are fatal for the current startup or shutdown
//! attempt and are never retried here.

use std::time::Duration;

use fofb_common::consts::{CONTROL_BLOCK_SIZE, CONTROL_BLOCK_WORDS, DAC_BUFFER_SIZE};
use fofb_common::rfm::{ControlCommand, DmaRegion, EventId, NodeId, RfmDriver};
use tracing::{debug, info};

use crate::error::FofbError;
use crate::transfer::Bus;

// ─── Control Block ──────────────────────────────────────────────────

/// Sampling board configuration.
///
/// Layout (i32 words): `[0]` loop max, `[1]`/`[2]` reserved, `[3]` averaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    /// Ring size the sampling board wraps at.
    pub loop_max: i32,
    /// Averaging factor.
    pub averaging: i32,
}

impl ControlBlock {
    /// Encode into the fixed 128-word block.
    pub fn encode(&self) -> [u8; CONTROL_BLOCK_SIZE] {
        let mut words = [0i32; CONTROL_BLOCK_WORDS];
        words[0] = self.loop_max;
        words[3] = self.averaging;
        let mut out = [0u8; CONTROL_BLOCK_SIZE];
        for (chunk, word) in out.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        out
    }
}

// ─── Output Buffer ──────────────────────────────────────────────────

/// Actuator output buffer, cleared and fully rewritten every cycle.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    words: [u32; DAC_BUFFER_SIZE],
    bytes: [u8; DAC_BUFFER_SIZE * 4],
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self {
            words: [0; DAC_BUFFER_SIZE],
            bytes: [0; DAC_BUFFER_SIZE * 4],
        }
    }
}

impl OutputBuffer {
    /// Zero every word.
    #[inline]
    pub fn clear(&mut self) {
        self.words = [0; DAC_BUFFER_SIZE];
    }

    /// Set word `slot`. Out-of-range slots are ignored.
    #[inline]
    pub fn set(&mut self, slot: usize, value: u32) {
        if let Some(word) = self.words.get_mut(slot) {
            *word = value;
        }
    }

    /// Digitized words.
    #[inline]
    pub fn words(&self) -> &[u32; DAC_BUFFER_SIZE] {
        &self.words
    }

    fn encode(&mut self) -> &[u8] {
        for (chunk, word) in self.bytes.chunks_exact_mut(4).zip(self.words) {
            chunk.copy_from_slice(&word.to_ne_bytes());
        }
        &self.bytes
    }
}

// ─── Actuation Channel ──────────────────────────────────────────────

/// Writes the control block and outputs and raises control events.
#[derive(Debug, Clone)]
pub struct ActuationChannel {
    control_origin: u32,
    dac_base: u32,
    settle_delay: Duration,
}

impl ActuationChannel {
    /// Channel writing the control block at `control_origin` and outputs at
    /// `dac_base`.
    pub fn new(control_origin: u32, dac_base: u32, settle_delay: Duration) -> Self {
        Self {
            control_origin,
            dac_base,
            settle_delay,
        }
    }

    /// Wait for the settling delay, then write `block`.
    pub fn configure<D: RfmDriver, M: DmaRegion>(
        &self,
        bus: &mut Bus<D, M>,
        block: &ControlBlock,
    ) -> Result<(), FofbError> {
        if !self.settle_delay.is_zero() {
            debug!(delay_ms = self.settle_delay.as_millis() as u64, "settling before configure");
            std::thread::sleep(self.settle_delay);
        }
        let mode = bus.write("configure", self.control_origin, &block.encode())?;
        info!(
            loop_max = block.loop_max,
            averaging = block.averaging,
            ?mode,
            "control block written"
        );
        Ok(())
    }

    /// Enable or disable `node`.
    pub fn set_enable<D: RfmDriver, M: DmaRegion>(
        &self,
        bus: &mut Bus<D, M>,
        node: NodeId,
        enabled: bool,
    ) -> Result<(), FofbError> {
        let (op, cmd) = if enabled {
            ("enable", ControlCommand::Enable)
        } else {
            ("disable", ControlCommand::Disable)
        };
        self.control(bus, op, node, cmd)
    }

    /// Start `node`.
    pub fn start<D: RfmDriver, M: DmaRegion>(
        &self,
        bus: &mut Bus<D, M>,
        node: NodeId,
    ) -> Result<(), FofbError> {
        self.control(bus, "start", node, ControlCommand::Start)
    }

    /// Stop `node`.
    pub fn stop<D: RfmDriver, M: DmaRegion>(
        &self,
        bus: &mut Bus<D, M>,
        node: NodeId,
    ) -> Result<(), FofbError> {
        self.control(bus, "stop", node, ControlCommand::Stop)
    }

    /// Write `buffer` and announce it to `node` with the producing `slot`.
    pub fn write_outputs<D: RfmDriver, M: DmaRegion>(
        &self,
        bus: &mut Bus<D, M>,
        buffer: &mut OutputBuffer,
        node: NodeId,
        slot: u32,
    ) -> Result<(), FofbError> {
        bus.write("write_outputs", self.dac_base, buffer.encode())?;
        bus.send_event(node, EventId::OUTPUTS, slot)
            .map_err(|status| FofbError::EventSendFailure {
                op: "write_outputs",
                node,
                status,
                detail: bus.describe(status),
            })
    }

    fn control<D: RfmDriver, M: DmaRegion>(
        &self,
        bus: &mut Bus<D, M>,
        op: &'static str,
        node: NodeId,
        cmd: ControlCommand,
    ) -> Result<(), FofbError> {
        bus.send_event(node, EventId::CONTROL, cmd as u32)
            .map_err(|status| FofbError::EventSendFailure {
                op,
                node,
                status,
                detail: bus.describe(status),
            })?;
        debug!(node, ?cmd, "control event sent");
        Ok(())
    }
}
