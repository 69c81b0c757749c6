//! System-wide constants for the FOFB workspace.
//!
//! Single source of truth for buffer sizes, digitizer scaling and the
//! default reflective-memory map. The memory map values are installation
//! constants and must match on every board of the ring.

use static_assertions::const_assert;

/// Number of 16-bit samples in one ADC ring slot.
pub const ADC_BUFFER_SIZE: usize = 256;

/// Width of one ADC sample in bytes.
pub const ADC_SAMPLE_WIDTH: usize = 2;

/// Number of 32-bit words in the actuator (DAC) output buffer.
pub const DAC_BUFFER_SIZE: usize = 128;

/// Number of 32-bit words in the ADC control block.
pub const CONTROL_BLOCK_WORDS: usize = 128;

/// Size of the ADC control block in bytes.
pub const CONTROL_BLOCK_SIZE: usize = CONTROL_BLOCK_WORDS * 4;

/// DAC trailer word carrying the loop direction.
pub const DAC_LOOP_DIR_WORD: usize = 112;

/// DAC trailer word carrying the active plane mask.
pub const DAC_PLANE_WORD: usize = 113;

/// Digit level written into the trailer words for a unit status value.
pub const DAC_STATUS_LEVEL: f64 = 2_500_000.0;

/// ADC digits → millimetres (±10 V over 16 bit, 1 V/mm pickups).
pub const RAW_TO_MM: f64 = 0.3051758e-3;

/// Mid-scale of the 24-bit DAC; zero current is encoded as this value.
pub const HALF_DIGITS: f64 = (1u32 << 23) as f64;

/// Largest encodable DAC value.
pub const DAC_MAX_DIGITS: u32 = (1u32 << 24) - 1;

/// Maximum number of devices (BPMs or correctors) per axis.
pub const MAX_DEVICES: usize = 128;

/// Default number of ring slots written by the sampling board.
pub const LOOP_MAX_DEFAULT: u32 = 512;

/// Default ADC averaging factor.
pub const AVERAGING_DEFAULT: i32 = 2;

/// Default event wait timeout in milliseconds.
pub const EVENT_TIMEOUT_MS_DEFAULT: u64 = 1000;

/// Default hardware settling delay before the control block is accepted.
pub const SETTLE_DELAY_MS_DEFAULT: u64 = 2000;

/// Default sampling frequency of the feedback loop [Hz].
pub const FREQUENCY_DEFAULT: f64 = 150.0;

/// Default raw level on the injection channel that flags a new injection.
pub const INJECTION_THRESHOLD_DEFAULT: f64 = 1000.0;

/// Default ADC board node id.
pub const ADC_NODE_DEFAULT: u16 = 0x01;

/// Default DAC board node id.
pub const DAC_NODE_DEFAULT: u16 = 0x02;

// ─── Default Memory Map ─────────────────────────────────────────────

/// Origin of the ADC control block.
pub const CTRL_MEMPOS: u32 = 0x0000_0000;

/// Origin of the ADC measurement ring.
pub const ADC_MEMPOS: u32 = 0x0000_1000;

/// Origin of the actuator output buffer.
pub const DAC_MEMPOS: u32 = 0x0005_0000;

/// Origin of the status/error message record.
pub const MESSAGE_MEMPOS: u32 = 0x0006_0000;

/// Size of the reflective-memory window covering the default map.
pub const RFM_WINDOW_SIZE: usize = 0x0008_0000;

const_assert!(DAC_LOOP_DIR_WORD < DAC_BUFFER_SIZE);
const_assert!(DAC_PLANE_WORD < DAC_BUFFER_SIZE);
const_assert!(
    (ADC_MEMPOS as usize) + (LOOP_MAX_DEFAULT as usize) * ADC_BUFFER_SIZE * ADC_SAMPLE_WIDTH
        <= DAC_MEMPOS as usize
);
const_assert!((DAC_MEMPOS as usize) + DAC_BUFFER_SIZE * 4 <= MESSAGE_MEMPOS as usize);
const_assert!((MESSAGE_MEMPOS as usize) < RFM_WINDOW_SIZE);
