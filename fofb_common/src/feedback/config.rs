//! Feedback loop configuration.
//!
//! All config types use `serde::Deserialize` for TOML loading. Optional
//! sections fall back to the installation defaults in [`crate::consts`].
//! Calibration shapes are checked here so that a bad file is rejected
//! before the interconnect is touched.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, SharedConfig};
use crate::consts::{
    ADC_BUFFER_SIZE, ADC_MEMPOS, ADC_NODE_DEFAULT, AVERAGING_DEFAULT, CTRL_MEMPOS,
    DAC_BUFFER_SIZE, DAC_LOOP_DIR_WORD, DAC_MEMPOS, DAC_NODE_DEFAULT, DAC_PLANE_WORD,
    EVENT_TIMEOUT_MS_DEFAULT, FREQUENCY_DEFAULT, INJECTION_THRESHOLD_DEFAULT, LOOP_MAX_DEFAULT,
    MAX_DEVICES, MESSAGE_MEMPOS, SETTLE_DELAY_MS_DEFAULT,
};
use crate::feedback::CorrectionMode;

// ─── Top-Level Config ───────────────────────────────────────────────

/// Complete configuration of one feedback loop instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FofbConfig {
    /// Service identity and log level.
    pub shared: SharedConfig,
    /// Nodes, timeouts and ring geometry.
    #[serde(default)]
    pub interconnect: InterconnectConfig,
    /// Reflective-memory origins.
    #[serde(default)]
    pub memory_map: MemoryMapConfig,
    /// Controller parameters.
    #[serde(default)]
    pub correction: CorrectionConfig,
    /// Raw ADC frame layout.
    pub adc: AdcLayoutConfig,
    /// Per-axis calibration.
    pub calibration: CalibrationConfig,
    /// Outer runner policy.
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl FofbConfig {
    /// Validate bounds and calibration shapes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.interconnect.validate().map_err(ConfigError::ValidationError)?;
        self.correction.validate().map_err(ConfigError::ValidationError)?;

        if self.adc.device_table.len() != self.interconnect.sample_count {
            return Err(ConfigError::ValidationError(format!(
                "adc.device_table has {} entries, sample_count is {}",
                self.adc.device_table.len(),
                self.interconnect.sample_count
            )));
        }

        self.calibration
            .x
            .validate("x")
            .map_err(ConfigError::ValidationError)?;
        self.calibration
            .y
            .validate("y")
            .map_err(ConfigError::ValidationError)?;

        let mut slots = HashSet::new();
        for slot in self
            .calibration
            .x
            .cm_slots
            .iter()
            .chain(self.calibration.y.cm_slots.iter())
        {
            if !slots.insert(*slot) {
                return Err(ConfigError::ValidationError(format!(
                    "corrector slot {slot} used twice"
                )));
            }
        }
        Ok(())
    }
}

// ─── Interconnect ───────────────────────────────────────────────────

/// Node ids, event timing and ring geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterconnectConfig {
    /// Sampling (ADC) board node id.
    #[serde(default = "default_adc_node")]
    pub adc_node: u16,
    /// Actuator (DAC) board node id.
    #[serde(default = "default_dac_node")]
    pub dac_node: u16,
    /// Maximum wait for the sampling board's event [ms].
    #[serde(default = "default_event_timeout_ms")]
    pub event_timeout_ms: u64,
    /// Quiescence period before the control block is written [ms].
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Number of slots in the measurement ring.
    #[serde(default = "default_ring_slots")]
    pub ring_slots: u32,
    /// Number of 16-bit samples per slot.
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    /// ADC averaging factor written into the control block.
    #[serde(default = "default_averaging")]
    pub averaging: i32,
    /// Suppress every outward write and control event.
    #[serde(default)]
    pub read_only: bool,
}

fn default_adc_node() -> u16 {
    ADC_NODE_DEFAULT
}
fn default_dac_node() -> u16 {
    DAC_NODE_DEFAULT
}
fn default_event_timeout_ms() -> u64 {
    EVENT_TIMEOUT_MS_DEFAULT
}
fn default_settle_delay_ms() -> u64 {
    SETTLE_DELAY_MS_DEFAULT
}
fn default_ring_slots() -> u32 {
    LOOP_MAX_DEFAULT
}
fn default_sample_count() -> usize {
    ADC_BUFFER_SIZE
}
fn default_averaging() -> i32 {
    AVERAGING_DEFAULT
}

impl Default for InterconnectConfig {
    fn default() -> Self {
        Self {
            adc_node: ADC_NODE_DEFAULT,
            dac_node: DAC_NODE_DEFAULT,
            event_timeout_ms: EVENT_TIMEOUT_MS_DEFAULT,
            settle_delay_ms: SETTLE_DELAY_MS_DEFAULT,
            ring_slots: LOOP_MAX_DEFAULT,
            sample_count: ADC_BUFFER_SIZE,
            averaging: AVERAGING_DEFAULT,
            read_only: false,
        }
    }
}

impl InterconnectConfig {
    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.adc_node == self.dac_node {
            return Err(format!(
                "adc_node and dac_node must differ (both {})",
                self.adc_node
            ));
        }
        if self.event_timeout_ms == 0 {
            return Err("event_timeout_ms must be > 0".to_string());
        }
        if self.ring_slots == 0 || self.ring_slots > LOOP_MAX_DEFAULT {
            return Err(format!(
                "ring_slots {} out of range [1, {}]",
                self.ring_slots, LOOP_MAX_DEFAULT
            ));
        }
        if self.sample_count == 0 || self.sample_count > ADC_BUFFER_SIZE {
            return Err(format!(
                "sample_count {} out of range [1, {}]",
                self.sample_count, ADC_BUFFER_SIZE
            ));
        }
        if self.averaging < 1 {
            return Err(format!("averaging {} must be >= 1", self.averaging));
        }
        Ok(())
    }
}

// ─── Memory Map ─────────────────────────────────────────────────────

/// Reflective-memory origins shared by all boards of the installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMapConfig {
    /// ADC control block.
    pub control_origin: u32,
    /// Measurement ring.
    pub adc_base: u32,
    /// Actuator output buffer.
    pub dac_base: u32,
    /// Status/error message record.
    pub message_origin: u32,
}

impl Default for MemoryMapConfig {
    fn default() -> Self {
        Self {
            control_origin: CTRL_MEMPOS,
            adc_base: ADC_MEMPOS,
            dac_base: DAC_MEMPOS,
            message_origin: MESSAGE_MEMPOS,
        }
    }
}

// ─── Correction ─────────────────────────────────────────────────────

/// Controller parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Orchestrator variant.
    #[serde(default)]
    pub mode: CorrectionMode,
    /// Sampling frequency [Hz]; sets the injection window.
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    /// Proportional gain.
    #[serde(default = "default_p")]
    pub p: f64,
    /// Integral gain.
    #[serde(default)]
    pub i: f64,
    /// Derivative gain.
    #[serde(default)]
    pub d: f64,
    /// Use corrector weighting around the inversion.
    #[serde(default)]
    pub weighted: bool,
    /// RMS above which a cycle counts as an RMS error [mm].
    #[serde(default = "default_rms_bound")]
    pub rms_bound: f64,
    /// Measurement sum below which no beam is assumed.
    #[serde(default)]
    pub no_beam_level: Option<f64>,
    /// Largest accepted corrector step per cycle.
    #[serde(default)]
    pub max_corrector_step: Option<f64>,
    /// Sign of the loop (+1 or -1).
    #[serde(default = "default_loop_dir")]
    pub loop_dir: f64,
    /// Device id of the auxiliary injection channel.
    #[serde(default)]
    pub injection_device: u32,
    /// Raw level above which a new injection is flagged.
    #[serde(default = "default_injection_threshold")]
    pub injection_threshold: f64,
}

fn default_frequency() -> f64 {
    FREQUENCY_DEFAULT
}
fn default_p() -> f64 {
    1.0
}
fn default_rms_bound() -> f64 {
    1.0
}
fn default_loop_dir() -> f64 {
    1.0
}
fn default_injection_threshold() -> f64 {
    INJECTION_THRESHOLD_DEFAULT
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            mode: CorrectionMode::All,
            frequency: FREQUENCY_DEFAULT,
            p: 1.0,
            i: 0.0,
            d: 0.0,
            weighted: false,
            rms_bound: 1.0,
            no_beam_level: None,
            max_corrector_step: None,
            loop_dir: 1.0,
            injection_device: 0,
            injection_threshold: INJECTION_THRESHOLD_DEFAULT,
        }
    }
}

impl CorrectionConfig {
    /// Validate parameter bounds.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(format!("frequency {} must be > 0", self.frequency));
        }
        for (name, gain) in [("p", self.p), ("i", self.i), ("d", self.d)] {
            if !gain.is_finite() {
                return Err(format!("gain {name} is not finite"));
            }
        }
        if !(self.rms_bound.is_finite() && self.rms_bound > 0.0) {
            return Err(format!("rms_bound {} must be > 0", self.rms_bound));
        }
        if let Some(step) = self.max_corrector_step {
            if step.is_nan() || step <= 0.0 {
                return Err(format!("max_corrector_step {step} must be > 0"));
            }
        }
        if self.loop_dir != 1.0 && self.loop_dir != -1.0 {
            return Err(format!("loop_dir {} must be +1 or -1", self.loop_dir));
        }
        Ok(())
    }
}

// ─── Calibration ────────────────────────────────────────────────────

/// Raw ADC frame layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdcLayoutConfig {
    /// Device id found at each sample position of a ring slot.
    pub device_table: Vec<u32>,
}

/// Calibration of both planes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Horizontal plane.
    pub x: AxisCalibration,
    /// Vertical plane.
    pub y: AxisCalibration,
}

/// Calibration of one plane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AxisCalibration {
    /// Response matrix, one row per BPM, one column per corrector.
    pub smat: Vec<Vec<f64>>,
    /// Number of singular values kept by the inversion (0 = all).
    #[serde(default)]
    pub ivec: f64,
    /// BPM device ids in logical order.
    pub bpm_devices: Vec<u32>,
    /// Per-BPM gain.
    pub bpm_gain: Vec<f64>,
    /// Per-BPM offset [mm].
    pub bpm_offset: Vec<f64>,
    /// DAC buffer word of each corrector.
    pub cm_slots: Vec<usize>,
    /// Digits per corrector unit.
    pub cm_scale: Vec<f64>,
    /// Initial corrector values; empty means all zero.
    #[serde(default)]
    pub cm_initial: Vec<f64>,
}

impl AxisCalibration {
    /// Number of BPMs on this plane.
    #[inline]
    pub fn bpm_count(&self) -> usize {
        self.bpm_devices.len()
    }

    /// Number of correctors on this plane.
    #[inline]
    pub fn cm_count(&self) -> usize {
        self.cm_slots.len()
    }

    /// Validate per-device vector lengths and slot bounds.
    pub fn validate(&self, axis: &str) -> Result<(), String> {
        let bpms = self.bpm_count();
        let cms = self.cm_count();
        if bpms == 0 || bpms > MAX_DEVICES {
            return Err(format!("{axis}: {bpms} BPMs out of range [1, {MAX_DEVICES}]"));
        }
        if cms == 0 || cms > MAX_DEVICES {
            return Err(format!("{axis}: {cms} correctors out of range [1, {MAX_DEVICES}]"));
        }
        if self.bpm_gain.len() != bpms || self.bpm_offset.len() != bpms {
            return Err(format!(
                "{axis}: bpm_gain/bpm_offset need {bpms} entries, got {}/{}",
                self.bpm_gain.len(),
                self.bpm_offset.len()
            ));
        }
        if self.cm_scale.len() != cms {
            return Err(format!(
                "{axis}: cm_scale needs {cms} entries, got {}",
                self.cm_scale.len()
            ));
        }
        if !self.cm_initial.is_empty() && self.cm_initial.len() != cms {
            return Err(format!(
                "{axis}: cm_initial needs {cms} entries, got {}",
                self.cm_initial.len()
            ));
        }
        if self.smat.len() != bpms {
            return Err(format!(
                "{axis}: smat has {} rows, expected {bpms}",
                self.smat.len()
            ));
        }
        if let Some(row) = self.smat.iter().position(|r| r.len() != cms) {
            return Err(format!(
                "{axis}: smat row {row} has {} columns, expected {cms}",
                self.smat[row].len()
            ));
        }
        if self.ivec < 0.0 {
            return Err(format!("{axis}: ivec {} must be >= 0", self.ivec));
        }
        for &slot in &self.cm_slots {
            if slot >= DAC_BUFFER_SIZE || slot == DAC_LOOP_DIR_WORD || slot == DAC_PLANE_WORD {
                return Err(format!("{axis}: corrector slot {slot} not usable"));
            }
        }
        Ok(())
    }
}

// ─── Runner ─────────────────────────────────────────────────────────

/// Outer loop policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// RMS error count that raises a `Bad RMS` fault (0 = never).
    #[serde(default = "default_rms_error_limit")]
    pub rms_error_limit: u32,
    /// Consecutive failed cycles before the runner stops (0 = never).
    #[serde(default)]
    pub max_consecutive_faults: u32,
    /// Publish value dumps every N cycles (0 = off).
    #[serde(default)]
    pub value_dump_interval: u32,
}

fn default_rms_error_limit() -> u32 {
    5
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            rms_error_limit: 5,
            max_consecutive_faults: 0,
            value_dump_interval: 0,
        }
    }
}
