//! Telemetry handle and status message record.
//!
//! The feedback components never reach for a global logger. A
//! [`Telemetry`] handle is created by the process and injected into each
//! component at construction. Every method is fire-and-forget: an
//! implementation must not block and cannot fail the cycle.

use crate::feedback::FaultCode;

/// Logical name attached to a value dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Beam position measurements [mm].
    Bpm,
    /// Corrector values.
    Cm,
}

impl ValueKind {
    /// Name used on the telemetry channel.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Bpm => "BPM",
            Self::Cm => "CM",
        }
    }
}

/// Telemetry collaborator.
pub trait Telemetry: Send + Sync {
    /// Informational event.
    fn log(&self, message: &str);

    /// Failure of `operation` with its detail text.
    fn error(&self, operation: &str, detail: &str);

    /// Snapshot of both planes for ring slot `slot`.
    fn publish_values(&self, kind: ValueKind, slot: u32, x: &[f64], y: &[f64]);

    /// Operator-facing fault notification.
    fn post_fault(&self, fault: FaultCode) {
        if !fault.is_ok() {
            self.error("fault", fault.message());
        }
    }
}

/// Telemetry sink that drops everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {
    fn log(&self, _message: &str) {}
    fn error(&self, _operation: &str, _detail: &str) {}
    fn publish_values(&self, _kind: ValueKind, _slot: u32, _x: &[f64], _y: &[f64]) {}
}

// ─── Status Message Record ──────────────────────────────────────────

/// Field header of the status message record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldHeader {
    name_len: u16,
    size_y: u16,
    size_x: u16,
    kind: u16,
}

/// Type tag of a text field.
const FIELD_TEXT: u16 = 2;

impl FieldHeader {
    const SIZE: usize = 8;

    fn append_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.name_len.to_le_bytes());
        out.extend_from_slice(&self.size_y.to_le_bytes());
        out.extend_from_slice(&self.size_x.to_le_bytes());
        out.extend_from_slice(&self.kind.to_le_bytes());
    }
}

/// Named text field, clipped to what a `u16` length can describe.
#[derive(Debug, Clone, Copy)]
struct TextField<'a> {
    name: &'a str,
    value: &'a str,
}

impl<'a> TextField<'a> {
    fn new(name: &'a str, value: &'a str) -> Self {
        Self {
            name: clip(name),
            value: clip(value),
        }
    }

    fn encoded_len(&self) -> usize {
        FieldHeader::SIZE + self.name.len() + self.value.len()
    }

    fn header(&self) -> FieldHeader {
        FieldHeader {
            name_len: wire_len(self.name),
            size_y: 1,
            size_x: wire_len(self.value),
            kind: FIELD_TEXT,
        }
    }

    fn append_to(&self, out: &mut Vec<u8>) {
        self.header().append_to(out);
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(self.value.as_bytes());
    }
}

/// Encode the two-field (`status`, `error`) record read by the control room.
///
/// Layout: element count (`u16`), then per field a header
/// `{name_len, size_y, size_x, type}` (`u16` each), the name and the text.
/// Text longer than `u16::MAX` bytes is cut at the last char boundary that
/// fits, and the header carries the cut length.
pub fn encode_status_message(message: &str, error: &str) -> Vec<u8> {
    let fields = [TextField::new("status", message), TextField::new("error", error)];
    let mut out = Vec::with_capacity(2 + fields.iter().map(TextField::encoded_len).sum::<usize>());
    out.extend_from_slice(&(fields.len() as u16).to_le_bytes());
    for field in &fields {
        field.append_to(&mut out);
    }
    out
}

fn clip(text: &str) -> &str {
    let mut end = text.len().min(u16::MAX as usize);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[inline]
fn wire_len(text: &str) -> u16 {
    // clipped texts always fit
    u16::try_from(text.len()).unwrap_or(u16::MAX)
}
