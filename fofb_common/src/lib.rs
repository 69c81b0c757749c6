//! FOFB Common Library
//!
//! Shared constants, configuration loading and the contracts of the
//! external collaborators used by every crate of the fast orbit feedback
//! workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Memory map, buffer sizes, digitizer scaling
//! - [`config`] - Configuration loading traits and types
//! - [`feedback`] - Feedback loop configuration, correction planes, fault codes
//! - [`rfm`] - Reflective-memory driver and DMA region traits
//! - [`telemetry`] - Telemetry handle and status message encoding
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```toml
//! [dependencies]
//! fofb_common = { path = "../fofb_common" }
//! ```
//!
//! ```rust
//! use fofb_common::prelude::*;
//! ```

pub mod config;
pub mod consts;
pub mod feedback;
pub mod prelude;
pub mod rfm;
pub mod telemetry;
