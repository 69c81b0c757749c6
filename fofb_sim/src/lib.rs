//! # FOFB Simulation
//!
//! Software stand-in for the reflective-memory ring, for development and
//! testing without boards.
//!
//! # Module Structure
//!
//! - [`driver`] - `SimulatedRfm`, an `RfmDriver` with a call journal and fault injection
//! - [`dma`] - `HeapDma`, a heap-backed `DmaRegion`
//! - [`peer`] - `SamplingPeer`, the simulated ADC board writing the measurement ring
//!
//! ```text
//!  ┌──────────────┐  event(slot)   ┌──────────────┐
//!  │ SamplingPeer │ ─────────────► │ SimulatedRfm │ ◄── core (RfmDriver)
//!  │  (ADC node)  │ ◄───────────── │  memory +    │
//!  └──────────────┘  ack / control │  journal     │
//!                                  └──────────────┘
//! ```

#![deny(missing_docs)]

pub mod dma;
pub mod driver;
pub mod peer;

pub use crate::dma::HeapDma;
pub use crate::driver::{
    DEFAULT_JOURNAL_CAPACITY, FaultPlan, JournalEntry, SimHandle, SimulatedRfm,
};
pub use crate::peer::{ConstantFrame, FrameSource, OrbitGenerator, PeerStats, SamplingPeer};
