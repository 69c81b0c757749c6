//! Simulated sampling (ADC) board.
//!
//! The peer writes one frame of 16-bit samples per ring slot and announces
//! it with a sample event whose extended info is the slot index. It will
//! not produce the next frame until the controller has acknowledged the
//! previous one, so a slot is never reused before its acknowledge.

use std::f64::consts::TAU;

use fofb_common::consts::ADC_SAMPLE_WIDTH;
use fofb_common::rfm::{ControlCommand, EventId, EventInfo, NodeId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace, warn};

/// Fills the sample frame for a given frame number.
pub trait FrameSource: Send {
    /// Write the samples of frame `index` into `frame`.
    fn fill(&mut self, index: u64, frame: &mut [i16]);
}

impl<F> FrameSource for F
where
    F: FnMut(u64, &mut [i16]) + Send,
{
    fn fill(&mut self, index: u64, frame: &mut [i16]) {
        self(index, frame)
    }
}

/// Same frame every time.
#[derive(Debug, Clone)]
pub struct ConstantFrame(pub Vec<i16>);

impl FrameSource for ConstantFrame {
    fn fill(&mut self, _index: u64, frame: &mut [i16]) {
        for (dst, src) in frame.iter_mut().zip(self.0.iter().chain(std::iter::repeat(&0))) {
            *dst = *src;
        }
    }
}

/// Synthetic orbit: static offsets, a slow oscillation, noise and
/// periodic injection pulses on one channel.
#[derive(Debug, Clone)]
pub struct OrbitGenerator {
    offsets: Vec<f64>,
    amplitude: f64,
    period_frames: f64,
    noise: f64,
    injection_channel: Option<usize>,
    injection_every: u64,
    injection_level: i16,
    rng: StdRng,
}

impl OrbitGenerator {
    /// Generator for `channels` samples with a fixed seed.
    pub fn new(channels: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let offsets = (0..channels).map(|_| rng.gen_range(-300.0..300.0)).collect();
        Self {
            offsets,
            amplitude: 150.0,
            period_frames: 100.0,
            noise: 5.0,
            injection_channel: None,
            injection_every: 0,
            injection_level: 2000,
            rng,
        }
    }

    /// Oscillation amplitude [digits] and period [frames].
    pub fn with_oscillation(mut self, amplitude: f64, period_frames: f64) -> Self {
        self.amplitude = amplitude;
        self.period_frames = period_frames.max(1.0);
        self
    }

    /// Uniform noise amplitude [digits].
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.abs();
        self
    }

    /// Pulse `channel` to `level` every `every` frames.
    pub fn with_injections(mut self, channel: usize, every: u64, level: i16) -> Self {
        self.injection_channel = Some(channel);
        self.injection_every = every;
        self.injection_level = level;
        self
    }
}

impl FrameSource for OrbitGenerator {
    fn fill(&mut self, index: u64, frame: &mut [i16]) {
        let phase = TAU * index as f64 / self.period_frames;
        for (i, dst) in frame.iter_mut().enumerate() {
            let base = self.offsets.get(i).copied().unwrap_or(0.0);
            let noise = if self.noise > 0.0 {
                self.rng.gen_range(-self.noise..=self.noise)
            } else {
                0.0
            };
            let value = base + self.amplitude * (phase + i as f64 * 0.1).sin() + noise;
            *dst = value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        }
        if let Some(ch) = self.injection_channel {
            if let Some(slot) = frame.get_mut(ch) {
                let fire = self.injection_every > 0 && index % self.injection_every == 0;
                *slot = if fire { self.injection_level } else { 0 };
            }
        }
    }
}

/// Counters kept by the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerStats {
    /// Frames written and announced.
    pub produced: u64,
    /// Acknowledges received for an outstanding slot.
    pub acked: u64,
    /// Acknowledges received while nothing was outstanding.
    pub spurious_acks: u64,
    /// Requests for a frame refused because the last slot was not acknowledged.
    pub stalls: u64,
    /// Control commands received.
    pub control_events: u64,
}

/// Simulated ADC board.
pub struct SamplingPeer {
    node: NodeId,
    base: u32,
    sample_count: usize,
    ring_slots: u32,
    next_slot: u32,
    awaiting_ack: Option<u32>,
    enabled: bool,
    started: bool,
    source: Box<dyn FrameSource>,
    frame: Vec<i16>,
    stats: PeerStats,
}

impl SamplingPeer {
    /// Peer on `node` writing `sample_count` samples per slot into a ring of
    /// `ring_slots` slots at `base`. It waits for enable + start commands.
    pub fn new(
        node: NodeId,
        base: u32,
        sample_count: usize,
        ring_slots: u32,
        source: impl FrameSource + 'static,
    ) -> Self {
        Self {
            node,
            base,
            sample_count,
            ring_slots: ring_slots.max(1),
            next_slot: 0,
            awaiting_ack: None,
            enabled: false,
            started: false,
            source: Box::new(source),
            frame: vec![0; sample_count],
            stats: PeerStats::default(),
        }
    }

    /// Skip the enable/start handshake.
    pub fn running(mut self) -> Self {
        self.enabled = true;
        self.started = true;
        self
    }

    /// Node id of the peer.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Counters.
    pub fn stats(&self) -> PeerStats {
        self.stats
    }

    /// True while sampling.
    pub fn is_sampling(&self) -> bool {
        self.enabled && self.started
    }

    /// Slot written but not yet acknowledged.
    pub fn outstanding(&self) -> Option<u32> {
        self.awaiting_ack
    }

    /// Size of one slot in bytes.
    pub fn slot_size(&self) -> usize {
        self.sample_count * ADC_SAMPLE_WIDTH
    }

    /// Write the next frame into `memory` and return its announcement.
    ///
    /// Returns `None` while stopped or while the previous slot is still
    /// unacknowledged.
    pub fn produce(&mut self, memory: &mut [u8]) -> Option<EventInfo> {
        if !self.is_sampling() {
            return None;
        }
        if let Some(slot) = self.awaiting_ack {
            self.stats.stalls += 1;
            trace!(slot, "sampling peer stalled on unacknowledged slot");
            return None;
        }

        let slot = self.next_slot;
        let size = self.slot_size();
        let start = self.base as usize + slot as usize * size;
        let Some(dst) = memory.get_mut(start..start + size) else {
            warn!(slot, start, size, "sampling peer slot outside memory window");
            return None;
        };

        self.source.fill(self.stats.produced, &mut self.frame);
        for (chunk, sample) in dst.chunks_exact_mut(ADC_SAMPLE_WIDTH).zip(&self.frame) {
            chunk.copy_from_slice(&sample.to_ne_bytes());
        }

        self.awaiting_ack = Some(slot);
        self.next_slot = (slot + 1) % self.ring_slots;
        self.stats.produced += 1;

        Some(EventInfo {
            event: EventId::SAMPLES,
            node_id: self.node,
            extended_info: slot,
            timed_out: false,
        })
    }

    /// Controller released the outstanding slot.
    pub fn acknowledge(&mut self) {
        match self.awaiting_ack.take() {
            Some(_) => self.stats.acked += 1,
            None => self.stats.spurious_acks += 1,
        }
    }

    /// Apply a control command.
    pub fn control(&mut self, command: ControlCommand) {
        self.stats.control_events += 1;
        match command {
            ControlCommand::Enable => self.enabled = true,
            ControlCommand::Disable => {
                self.enabled = false;
                self.started = false;
            }
            ControlCommand::Start => self.started = true,
            ControlCommand::Stop => self.started = false,
        }
        debug!(node = self.node, ?command, sampling = self.is_sampling(), "sampling peer control");
    }
}

impl std::fmt::Debug for SamplingPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingPeer")
            .field("node", &self.node)
            .field("base", &self.base)
            .field("sample_count", &self.sample_count)
            .field("ring_slots", &self.ring_slots)
            .field("next_slot", &self.next_slot)
            .field("awaiting_ack", &self.awaiting_ack)
            .field("stats", &self.stats)
            .finish()
    }
}
