//! Heap-backed DMA region.

use fofb_common::rfm::{DmaRegion, DmaStatus};

/// DMA scratch region living on the heap.
#[derive(Debug, Clone)]
pub struct HeapDma {
    memory: Vec<u8>,
    status: Option<DmaStatus>,
    accesses: u64,
}

impl HeapDma {
    /// Region of `size` bytes with a mapped status block.
    pub fn new(size: usize) -> Self {
        Self {
            memory: vec![0; size],
            status: Some(DmaStatus::default()),
            accesses: 0,
        }
    }

    /// Region whose status block was never mapped.
    pub fn unmapped(size: usize) -> Self {
        Self {
            status: None,
            ..Self::new(size)
        }
    }

    /// Number of times the scratch memory was handed out.
    pub fn accesses(&self) -> u64 {
        self.accesses
    }

    /// Current loop position, if mapped.
    pub fn loop_pos(&self) -> Option<u32> {
        self.status.map(|s| s.loop_pos)
    }
}

impl DmaRegion for HeapDma {
    fn memory(&mut self) -> &mut [u8] {
        self.accesses += 1;
        &mut self.memory
    }

    fn status(&mut self) -> Option<&mut DmaStatus> {
        self.status.as_mut()
    }
}
