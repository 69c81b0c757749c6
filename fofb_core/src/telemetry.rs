//! Telemetry backed by `tracing`.
//!
//! Log and error events go to the `fofb` target, value dumps to
//! `fofb::values` at TRACE so they can be enabled separately with
//! `RUST_LOG=fofb::values=trace`.

use fofb_common::feedback::FaultCode;
use fofb_common::telemetry::{Telemetry, ValueKind};
use tracing::{error, info, trace, warn};

/// [`Telemetry`] emitting `tracing` events tagged with the loop name.
#[derive(Debug, Clone)]
pub struct TracingTelemetry {
    service: String,
}

impl TracingTelemetry {
    /// Telemetry for loop `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    /// Loop name attached to every event.
    pub fn service(&self) -> &str {
        &self.service
    }
}

impl Telemetry for TracingTelemetry {
    fn log(&self, message: &str) {
        info!(target: "fofb", service = %self.service, "{message}");
    }

    fn error(&self, operation: &str, detail: &str) {
        error!(target: "fofb", service = %self.service, operation, "{detail}");
    }

    fn publish_values(&self, kind: ValueKind, slot: u32, x: &[f64], y: &[f64]) {
        trace!(
            target: "fofb::values",
            service = %self.service,
            kind = kind.name(),
            slot,
            x = ?x,
            y = ?y,
            "values"
        );
    }

    fn post_fault(&self, fault: FaultCode) {
        if fault.is_ok() {
            info!(target: "fofb", service = %self.service, "fault cleared");
        } else {
            warn!(
                target: "fofb",
                service = %self.service,
                code = fault.code(),
                "{}",
                fault.message()
            );
        }
    }
}
