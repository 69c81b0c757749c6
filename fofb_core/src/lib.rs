//! # FOFB Core Library
//!
//! Fast orbit feedback loop over a reflective-memory interconnect. Each
//! cycle waits for the sampling board's event, reads its ring slot,
//! computes corrector updates from the inverted response matrix and a PID
//! on the increments, writes the actuator buffer and releases the slot.
//!
//! ## Components
//!
//! 1. [`transfer`] - transfer mode selection and the bus wrapper
//! 2. [`acquisition`] - event wait, slot read, acknowledge
//! 3. [`actuation`] - control block, output buffer, control events
//! 4. [`correction`] - SVD inverse, PID, injection window, RMS tracking
//! 5. [`orchestrator`] - one loop's lifecycle and cycle body
//! 6. [`cycle`] - loop thread setup and the outer runner
//!
//! ## Allocation
//!
//! Sample, output and vector buffers are allocated at construction and
//! reused by every cycle.

pub mod acquisition;
pub mod actuation;
pub mod correction;
pub mod cycle;
pub mod error;
pub mod orchestrator;
pub mod telemetry;
pub mod transfer;

pub use error::FofbError;
pub use orchestrator::{FeedbackLoop, LifecycleState, Orchestrator};
