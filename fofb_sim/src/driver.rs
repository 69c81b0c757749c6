//! Simulated reflective-memory driver.
//!
//! `SimulatedRfm` keeps the shared memory window, the armed/pending event
//! sets and an optional [`SamplingPeer`] behind one lock. Every driver call
//! is appended to a bounded journal so tests can check call order, and a
//! [`FaultPlan`] makes selected calls fail. Once the journal is full the
//! oldest entries are dropped.
//!
//! Timeouts never block: a wait with nothing to deliver returns an
//! `EventInfo` with `timed_out` set. An optional pace sleeps before each
//! sample wait to emulate the board's sampling rate.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use fofb_common::consts::RFM_WINDOW_SIZE;
use fofb_common::rfm::{ControlCommand, DriverStatus, EventId, EventInfo, NodeId, RfmDriver};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::peer::{PeerStats, SamplingPeer};

/// Default size from which transfers go through DMA [bytes].
pub const DEFAULT_DMA_THRESHOLD: usize = 256;

/// Default number of calls kept in the journal.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 4096;

// ─── Journal ────────────────────────────────────────────────────────

/// One recorded driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalEntry {
    /// `read(offset, len)`.
    Read {
        /// Start offset.
        offset: u32,
        /// Length in bytes.
        len: usize,
    },
    /// `write(offset, len)`.
    Write {
        /// Start offset.
        offset: u32,
        /// Length in bytes.
        len: usize,
    },
    /// `clear_event`.
    Clear(EventId),
    /// `enable_event`.
    Enable(EventId),
    /// `wait_for_event`.
    Wait(EventId),
    /// `send_event`.
    Send {
        /// Target node.
        node: NodeId,
        /// Event raised.
        event: EventId,
        /// Payload word.
        payload: u32,
    },
}

impl JournalEntry {
    /// True for calls that change state outside this node.
    pub fn is_outward(&self) -> bool {
        matches!(self, Self::Write { .. } | Self::Send { .. })
    }
}

/// Ring of the most recent driver calls.
#[derive(Debug)]
struct Journal {
    entries: VecDeque<JournalEntry>,
    capacity: usize,
}

impl Journal {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn record(&mut self, entry: JournalEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
    }
}

/// Calls that should fail.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// `read` returns `NODE_UNREACHABLE`.
    pub fail_reads: bool,
    /// `write` returns `NODE_UNREACHABLE`.
    pub fail_writes: bool,
    /// `send_event` returns `NODE_UNREACHABLE`.
    pub fail_sends: bool,
    /// `enable_event` returns `BAD_EVENT`.
    pub fail_enable: bool,
    /// `clear_event` returns `BAD_EVENT`.
    pub fail_clear: bool,
    /// `wait_for_event` reports a timeout through the info flag.
    pub timeout_flag: bool,
}

// ─── Shared State ───────────────────────────────────────────────────

#[derive(Debug)]
struct SimState {
    memory: Vec<u8>,
    pending: VecDeque<EventInfo>,
    scheduled: VecDeque<EventInfo>,
    armed: HashSet<EventId>,
    journal: Journal,
    faults: FaultPlan,
    peer: Option<SamplingPeer>,
}

impl SimState {
    fn range(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>, DriverStatus> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(DriverStatus::OUT_OF_RANGE)?;
        if end > self.memory.len() {
            return Err(DriverStatus::OUT_OF_RANGE);
        }
        Ok(start..end)
    }
}

// ─── Driver ─────────────────────────────────────────────────────────

/// In-process reflective-memory driver.
#[derive(Debug)]
pub struct SimulatedRfm {
    state: Arc<Mutex<SimState>>,
    dma_threshold: usize,
    pace: Option<Duration>,
}

impl SimulatedRfm {
    /// Driver with a zeroed window of `size` bytes and no peer.
    pub fn new(size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                memory: vec![0; size],
                pending: VecDeque::new(),
                scheduled: VecDeque::new(),
                armed: HashSet::new(),
                journal: Journal::new(DEFAULT_JOURNAL_CAPACITY),
                faults: FaultPlan::default(),
                peer: None,
            })),
            dma_threshold: DEFAULT_DMA_THRESHOLD,
            pace: None,
        }
    }

    /// Attach a simulated sampling board.
    pub fn with_peer(self, peer: SamplingPeer) -> Self {
        self.state.lock().peer = Some(peer);
        self
    }

    /// Override the DMA threshold.
    pub fn with_dma_threshold(mut self, threshold: usize) -> Self {
        self.dma_threshold = threshold;
        self
    }

    /// Keep at most `capacity` calls in the journal (0 turns it off).
    pub fn with_journal_capacity(self, capacity: usize) -> Self {
        self.state.lock().journal.set_capacity(capacity);
        self
    }

    /// Sleep `pace` before each sample wait.
    pub fn with_pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Inspection handle sharing this driver's state.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimulatedRfm {
    fn default() -> Self {
        Self::new(RFM_WINDOW_SIZE)
    }
}

impl RfmDriver for SimulatedRfm {
    fn read(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), DriverStatus> {
        let mut st = self.state.lock();
        st.journal.record(JournalEntry::Read {
            offset,
            len: buf.len(),
        });
        if st.faults.fail_reads {
            return Err(DriverStatus::NODE_UNREACHABLE);
        }
        let range = st.range(offset, buf.len())?;
        buf.copy_from_slice(&st.memory[range]);
        Ok(())
    }

    fn write(&mut self, offset: u32, buf: &[u8]) -> Result<(), DriverStatus> {
        let mut st = self.state.lock();
        st.journal.record(JournalEntry::Write {
            offset,
            len: buf.len(),
        });
        if st.faults.fail_writes {
            return Err(DriverStatus::NODE_UNREACHABLE);
        }
        let range = st.range(offset, buf.len())?;
        st.memory[range].copy_from_slice(buf);
        Ok(())
    }

    fn clear_event(&mut self, event: EventId) -> Result<(), DriverStatus> {
        let mut st = self.state.lock();
        st.journal.record(JournalEntry::Clear(event));
        if st.faults.fail_clear {
            return Err(DriverStatus::BAD_EVENT);
        }
        st.pending.retain(|info| info.event != event);
        Ok(())
    }

    fn enable_event(&mut self, event: EventId) -> Result<(), DriverStatus> {
        let mut st = self.state.lock();
        st.journal.record(JournalEntry::Enable(event));
        if st.faults.fail_enable {
            return Err(DriverStatus::BAD_EVENT);
        }
        st.armed.insert(event);
        Ok(())
    }

    fn wait_for_event(
        &mut self,
        event: EventId,
        timeout: Duration,
    ) -> Result<EventInfo, DriverStatus> {
        if event == EventId::SAMPLES {
            if let Some(pace) = self.pace {
                std::thread::sleep(pace.min(timeout));
            }
        }

        let mut st = self.state.lock();
        st.journal.record(JournalEntry::Wait(event));

        let timed_out = EventInfo {
            event,
            node_id: 0,
            extended_info: 0,
            timed_out: true,
        };
        if st.faults.timeout_flag {
            return Ok(timed_out);
        }
        if !st.armed.contains(&event) {
            return Err(DriverStatus::BAD_EVENT);
        }

        let queued = match st.pending.iter().position(|info| info.event == event) {
            Some(pos) => st.pending.remove(pos),
            None => match st.scheduled.iter().position(|info| info.event == event) {
                Some(pos) => st.scheduled.remove(pos),
                None => None,
            },
        };
        if let Some(info) = queued {
            st.armed.remove(&event);
            return Ok(info);
        }

        if event == EventId::SAMPLES {
            let SimState { memory, peer, .. } = &mut *st;
            if let Some(info) = peer.as_mut().and_then(|p| p.produce(memory)) {
                trace!(slot = info.extended_info, "simulated sample event");
                st.armed.remove(&event);
                return Ok(info);
            }
        }

        Ok(timed_out)
    }

    fn send_event(
        &mut self,
        node: NodeId,
        event: EventId,
        payload: u32,
    ) -> Result<(), DriverStatus> {
        let mut st = self.state.lock();
        st.journal.record(JournalEntry::Send {
            node,
            event,
            payload,
        });
        if st.faults.fail_sends {
            return Err(DriverStatus::NODE_UNREACHABLE);
        }
        if let Some(peer) = st.peer.as_mut().filter(|p| p.node() == node) {
            if event == EventId::SAMPLES {
                peer.acknowledge();
            } else if event == EventId::CONTROL {
                match ControlCommand::from_payload(payload) {
                    Some(cmd) => peer.control(cmd),
                    None => debug!(node, payload, "unknown control payload ignored"),
                }
            }
        }
        Ok(())
    }

    fn dma_threshold(&self) -> usize {
        self.dma_threshold
    }

    fn error_message(&self, status: DriverStatus) -> String {
        match status {
            DriverStatus::OUT_OF_RANGE => "offset outside reflective-memory window".to_string(),
            DriverStatus::BAD_EVENT => "event not armed or unknown".to_string(),
            DriverStatus::NODE_UNREACHABLE => "node unreachable".to_string(),
            other => format!("unknown driver status {}", other.0),
        }
    }
}

// ─── Inspection Handle ──────────────────────────────────────────────

/// Shared view on a [`SimulatedRfm`] used by tests and the demo binary.
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Copy of the call journal, oldest first.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().journal.entries.iter().copied().collect()
    }

    /// Drop the recorded calls.
    pub fn clear_journal(&self) {
        self.state.lock().journal.entries.clear();
    }

    /// Peer counters, if a peer is attached.
    pub fn peer_stats(&self) -> Option<PeerStats> {
        self.state.lock().peer.as_ref().map(SamplingPeer::stats)
    }

    /// True while the peer is sampling.
    pub fn peer_sampling(&self) -> bool {
        self.state
            .lock()
            .peer
            .as_ref()
            .is_some_and(SamplingPeer::is_sampling)
    }

    /// Replace the fault plan.
    pub fn set_faults(&self, faults: FaultPlan) {
        self.state.lock().faults = faults;
    }

    /// Deliver an occurrence of `event` from `node` during the next wait on it.
    pub fn raise(&self, event: EventId, node: NodeId, extended_info: u32) {
        self.state.lock().scheduled.push_back(EventInfo {
            event,
            node_id: node,
            extended_info,
            timed_out: false,
        });
    }

    /// Queue an occurrence that is already pending; `clear_event` drops it.
    pub fn raise_stale(&self, event: EventId, node: NodeId, extended_info: u32) {
        self.state.lock().pending.push_back(EventInfo {
            event,
            node_id: node,
            extended_info,
            timed_out: false,
        });
    }

    /// Copy `len` bytes of the window starting at `offset`.
    pub fn memory(&self, offset: u32, len: usize) -> Vec<u8> {
        let st = self.state.lock();
        let start = (offset as usize).min(st.memory.len());
        let end = start.saturating_add(len).min(st.memory.len());
        st.memory[start..end].to_vec()
    }

    /// Write raw bytes into the window, bypassing the journal.
    pub fn poke(&self, offset: u32, data: &[u8]) {
        let mut st = self.state.lock();
        let start = offset as usize;
        if let Some(dst) = st.memory.get_mut(start..start + data.len()) {
            dst.copy_from_slice(data);
        }
    }

    /// Read `count` native-endian 32-bit words starting at `offset`.
    pub fn words(&self, offset: u32, count: usize) -> Vec<u32> {
        self.memory(offset, count * 4)
            .chunks_exact(4)
            .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}
