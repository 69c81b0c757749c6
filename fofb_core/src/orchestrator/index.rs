//! Device index maps.
//!
//! A map translates logical device order (as listed in the calibration)
//! into sample positions of the raw frame. Built once at `init()`.

use fofb_common::consts::MAX_DEVICES;

use crate::error::FofbError;

/// Logical index → position in the raw sample frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceIndexMap {
    positions: heapless::Vec<usize, MAX_DEVICES>,
}

impl DeviceIndexMap {
    /// Resolve every device of `required` against the device-position
    /// `table`.
    ///
    /// A device absent from the table fails with `IndexNotFound`, one listed
    /// twice with `DuplicateIndex`.
    pub fn build(table: &[u32], required: &[u32]) -> Result<Self, FofbError> {
        let mut positions = heapless::Vec::new();
        for &device in required {
            let position = position_of(table, device)?;
            positions.push(position).map_err(|_| {
                FofbError::CalibrationMismatch(format!(
                    "more than {MAX_DEVICES} devices in one plane"
                ))
            })?;
        }
        Ok(Self { positions })
    }

    /// Positions in logical order.
    #[inline]
    pub fn positions(&self) -> &[usize] {
        &self.positions
    }

    /// Number of mapped devices.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// True when nothing is mapped.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Position of a single `device` in `table`.
pub fn position_of(table: &[u32], device: u32) -> Result<usize, FofbError> {
    let mut hits = table
        .iter()
        .enumerate()
        .filter(|&(_, d)| *d == device)
        .map(|(i, _)| i);
    let first = hits.next().ok_or(FofbError::IndexNotFound { device })?;
    if hits.next().is_some() {
        return Err(FofbError::DuplicateIndex { device });
    }
    Ok(first)
}
