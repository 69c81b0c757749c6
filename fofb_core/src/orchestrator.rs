//! Cycle orchestrator.
//!
//! One [`Orchestrator`] drives one feedback loop through its lifecycle:
//!
//! ```text
//! Uninitialized ──init()──► Ready ──make()──► Running ──disable()──► Disabled
//!                              ▲                                        │
//!                              └────────────────init()──────────────────┘
//! ```
//!
//! Each `make()` runs acquire → map → scale → correct → digitize → write
//! outputs → acknowledge and reports the outcome as a [`FaultCode`]. No
//! error crosses the cycle boundary.
//!
//! The three variants (full correction, horizontal-only, vertical-only)
//! share the same type and differ only in the plane mask chosen at
//! construction.

pub mod index;
pub mod scaling;

use std::sync::Arc;
use std::time::Duration;

use fofb_common::consts::{DAC_LOOP_DIR_WORD, DAC_PLANE_WORD};
use fofb_common::feedback::config::{AxisCalibration, FofbConfig};
use fofb_common::feedback::{CorrectionMode, CorrectionType, FaultCode};
use fofb_common::rfm::{DmaRegion, EventId, EventInfo, NodeId, RfmDriver};
use fofb_common::telemetry::{Telemetry, ValueKind, encode_status_message};
use nalgebra::DVector;
use tracing::{debug, info, warn};

use crate::acquisition::{AcquisitionSynchronizer, RingLayout};
use crate::actuation::{ActuationChannel, ControlBlock, OutputBuffer};
use crate::correction::smat::matrix_from_rows;
use crate::correction::{AxisShape, CorrectionEngine, EngineParams, Plane};
use crate::error::FofbError;
use crate::transfer::Bus;

pub use index::DeviceIndexMap;
pub use scaling::PlaneScaling;

// ─── Lifecycle ──────────────────────────────────────────────────────

/// Lifecycle state of a feedback loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed; maps and calibration not loaded.
    Uninitialized,
    /// Boards configured and started.
    Ready,
    /// At least one cycle run.
    Running,
    /// Boards stopped and disabled.
    Disabled,
}

impl LifecycleState {
    /// Lowercase name for logs and errors.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Disabled => "disabled",
        }
    }
}

/// Capability interface of a feedback loop.
pub trait FeedbackLoop {
    /// Build the index maps, load the calibration and configure the boards.
    ///
    /// Allowed from `Uninitialized` and, to restart a stopped loop, from
    /// `Disabled`; PID memory and the injection context start from zero.
    fn init(&mut self) -> Result<(), FofbError>;

    /// Run one cycle and return its status.
    fn make(&mut self) -> FaultCode;

    /// Stop and disable the boards. Idempotent.
    fn disable(&mut self) -> Result<(), FofbError>;

    /// Status of the last cycle.
    fn status(&self) -> FaultCode;

    /// Current lifecycle state.
    fn state(&self) -> LifecycleState;

    /// Cycles whose RMS exceeded the bound since the last reset.
    fn rms_error_count(&self) -> u32;

    /// Clear the RMS error counter.
    fn reset_rms_errors(&mut self);

    /// Write the operator message for `fault`.
    fn post_fault(&mut self, fault: FaultCode) -> Result<(), FofbError>;

    /// Publish the last measurement and corrector vectors.
    fn publish_values(&self);
}

// ─── Orchestrator ───────────────────────────────────────────────────

/// Device maps resolved at `init()`.
#[derive(Debug, Clone)]
struct Maps {
    planes: [DeviceIndexMap; 2],
    injection: usize,
}

/// Node ids and policy constants of one loop.
#[derive(Debug, Clone, Copy)]
struct LoopSettings {
    adc_node: NodeId,
    dac_node: NodeId,
    loop_dir: f64,
    injection_threshold: f64,
    injection_device: u32,
    message_origin: u32,
    control: ControlBlock,
}

/// Feedback loop over one reflective-memory bus.
pub struct Orchestrator<D, M> {
    name: String,
    kind: CorrectionType,
    settings: LoopSettings,
    device_table: Vec<u32>,
    calibration: [AxisCalibration; 2],
    bus: Bus<D, M>,
    acquisition: AcquisitionSynchronizer,
    actuation: ActuationChannel,
    engine: CorrectionEngine,
    scaling: [PlaneScaling; 2],
    maps: Option<Maps>,
    diff: [DVector<f64>; 2],
    output: OutputBuffer,
    slot: u32,
    state: LifecycleState,
    status: FaultCode,
    last_error: Option<FofbError>,
    telemetry: Arc<dyn Telemetry>,
}

impl<D: RfmDriver, M: DmaRegion> Orchestrator<D, M> {
    /// Loop correcting the planes of `mode`.
    pub fn new(
        config: &FofbConfig,
        mode: CorrectionMode,
        driver: D,
        dma: M,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let ic = &config.interconnect;
        let map = &config.memory_map;
        let cal = [config.calibration.x.clone(), config.calibration.y.clone()];
        let shape = |c: &AxisCalibration| AxisShape {
            bpms: c.bpm_count(),
            cms: c.cm_count(),
        };

        let layout = RingLayout {
            base: map.adc_base,
            sample_count: ic.sample_count,
            ring_slots: ic.ring_slots,
        };
        let settings = LoopSettings {
            adc_node: ic.adc_node,
            dac_node: ic.dac_node,
            loop_dir: config.correction.loop_dir,
            injection_threshold: config.correction.injection_threshold,
            injection_device: config.correction.injection_device,
            message_origin: map.message_origin,
            control: ControlBlock {
                loop_max: ic.ring_slots as i32,
                averaging: ic.averaging,
            },
        };

        Self {
            name: config.shared.service_name.clone(),
            kind: mode.into(),
            settings,
            device_table: config.adc.device_table.clone(),
            bus: Bus::new(driver, dma, ic.read_only),
            acquisition: AcquisitionSynchronizer::new(
                layout,
                Duration::from_millis(ic.event_timeout_ms),
            ),
            actuation: ActuationChannel::new(
                map.control_origin,
                map.dac_base,
                Duration::from_millis(ic.settle_delay_ms),
            ),
            engine: CorrectionEngine::new(
                EngineParams::from(&config.correction),
                shape(&cal[0]),
                shape(&cal[1]),
            ),
            scaling: [
                PlaneScaling::from_calibration(&cal[0]),
                PlaneScaling::from_calibration(&cal[1]),
            ],
            maps: None,
            diff: [
                DVector::zeros(cal[0].bpm_count()),
                DVector::zeros(cal[1].bpm_count()),
            ],
            output: OutputBuffer::default(),
            slot: 0,
            calibration: cal,
            state: LifecycleState::Uninitialized,
            status: FaultCode::None,
            last_error: None,
            telemetry,
        }
    }

    /// Loop with the mode named in the configuration.
    pub fn from_config(config: &FofbConfig, driver: D, dma: M, telemetry: Arc<dyn Telemetry>) -> Self {
        Self::new(config, config.correction.mode, driver, dma, telemetry)
    }

    /// Loop correcting both planes.
    pub fn full(config: &FofbConfig, driver: D, dma: M, telemetry: Arc<dyn Telemetry>) -> Self {
        Self::new(config, CorrectionMode::All, driver, dma, telemetry)
    }

    /// Loop correcting the horizontal plane only.
    pub fn horizontal_only(
        config: &FofbConfig,
        driver: D,
        dma: M,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self::new(config, CorrectionMode::Horizontal, driver, dma, telemetry)
    }

    /// Loop correcting the vertical plane only.
    pub fn vertical_only(
        config: &FofbConfig,
        driver: D,
        dma: M,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self::new(config, CorrectionMode::Vertical, driver, dma, telemetry)
    }

    /// Planes corrected by this loop.
    #[inline]
    pub fn kind(&self) -> CorrectionType {
        self.kind
    }

    /// Error behind the last non-zero status.
    #[inline]
    pub fn last_error(&self) -> Option<&FofbError> {
        self.last_error.as_ref()
    }

    /// Scaled measurement of the last cycle [mm].
    #[inline]
    pub fn measurement(&self, plane: Plane) -> &DVector<f64> {
        &self.diff[plane as usize]
    }

    /// Absolute corrector values.
    #[inline]
    pub fn correctors(&self, plane: Plane) -> &DVector<f64> {
        self.engine.cm(plane)
    }

    /// Last written actuator buffer.
    #[inline]
    pub fn outputs(&self) -> &OutputBuffer {
        &self.output
    }

    /// Correction engine.
    #[inline]
    pub fn engine(&self) -> &CorrectionEngine {
        &self.engine
    }

    /// Underlying bus.
    #[inline]
    pub fn bus(&self) -> &Bus<D, M> {
        &self.bus
    }

    fn load(&mut self) -> Result<(), FofbError> {
        let table = &self.device_table;
        let frame = self.acquisition.layout().sample_count;
        if table.len() != frame {
            return Err(FofbError::CalibrationMismatch(format!(
                "device table has {} entries, frame carries {frame} samples",
                table.len()
            )));
        }
        for (cal, axis) in self.calibration.iter().zip(["x", "y"]) {
            cal.validate(axis).map_err(FofbError::CalibrationMismatch)?;
        }

        let maps = Maps {
            planes: [
                DeviceIndexMap::build(table, &self.calibration[0].bpm_devices)?,
                DeviceIndexMap::build(table, &self.calibration[1].bpm_devices)?,
            ],
            injection: index::position_of(table, self.settings.injection_device)?,
        };

        let [cx, cy] = &self.calibration;
        let smat_x = matrix_from_rows(&cx.smat, cx.bpm_count(), cx.cm_count(), "x")?;
        let smat_y = matrix_from_rows(&cy.smat, cy.bpm_count(), cy.cm_count(), "y")?;
        self.engine.set_smat(&smat_x, &smat_y, cx.ivec, cy.ivec)?;
        self.engine.set_cms(&initial_cms(cx), &initial_cms(cy))?;

        self.maps = Some(maps);
        Ok(())
    }

    fn configure(&mut self) -> Result<(), FofbError> {
        let LoopSettings {
            adc_node,
            dac_node,
            control,
            ..
        } = self.settings;
        self.actuation.configure(&mut self.bus, &control)?;
        self.actuation.set_enable(&mut self.bus, adc_node, true)?;
        self.actuation.start(&mut self.bus, adc_node)?;
        self.actuation.set_enable(&mut self.bus, dac_node, true)?;
        self.actuation.start(&mut self.bus, dac_node)?;
        Ok(())
    }

    fn cycle(&mut self) -> Result<FaultCode, FofbError> {
        let info = self.acquisition.acquire(&mut self.bus)?;
        self.slot = info.extended_info;

        // The slot is held from here on and must be released even when
        // the computation fails.
        let outcome = self.process(&info);
        let ack = self
            .acquisition
            .acknowledge(&mut self.bus, info.node_id, EventId::SAMPLES);
        let code = outcome?;
        ack?;
        Ok(code)
    }

    fn process(&mut self, info: &EventInfo) -> Result<FaultCode, FofbError> {
        let Some(maps) = &self.maps else {
            return Err(FofbError::InvalidState {
                op: "make",
                state: self.state.name(),
            });
        };

        let samples = self.acquisition.samples();
        for plane in Plane::ALL {
            let i = plane as usize;
            self.scaling[i].to_physical(samples, &maps.planes[i], &mut self.diff[i]);
        }
        let injection_raw = samples.get(maps.injection).copied().unwrap_or(0) as f64;
        let new_injection = injection_raw > self.settings.injection_threshold;
        if new_injection {
            debug!(slot = info.extended_info, level = injection_raw, "injection detected");
        }

        let status = self
            .engine
            .correct(&self.diff[0], &self.diff[1], new_injection, self.kind)?;

        self.fill_outputs();
        self.actuation.write_outputs(
            &mut self.bus,
            &mut self.output,
            self.settings.dac_node,
            info.extended_info,
        )?;
        Ok(status.fault_code())
    }

    fn fill_outputs(&mut self) {
        self.output.clear();
        for plane in Plane::ALL {
            let cm = self.engine.cm(plane);
            for (slot, digits) in self.scaling[plane as usize].digitize(cm, self.settings.loop_dir) {
                self.output.set(slot, digits);
            }
        }
        self.output
            .set(DAC_LOOP_DIR_WORD, scaling::status_word(self.settings.loop_dir));
        self.output
            .set(DAC_PLANE_WORD, scaling::status_word(f64::from(self.kind.bits())));
    }

    fn record(&mut self, result: Result<FaultCode, FofbError>) -> FaultCode {
        self.status = match result {
            Ok(code) => {
                self.last_error = None;
                code
            }
            Err(e) => {
                self.telemetry.error("make", &e.to_string());
                let code = e.fault_code();
                self.last_error = Some(e);
                code
            }
        };
        self.status
    }
}

impl<D: RfmDriver, M: DmaRegion> FeedbackLoop for Orchestrator<D, M> {
    fn init(&mut self) -> Result<(), FofbError> {
        match self.state {
            LifecycleState::Uninitialized => {}
            LifecycleState::Disabled => {
                // Restart from a clean controller
                self.engine.reset();
                self.maps = None;
                self.state = LifecycleState::Uninitialized;
                debug!(loop_name = %self.name, "re-initializing disabled loop");
            }
            state => {
                return Err(FofbError::InvalidState {
                    op: "init",
                    state: state.name(),
                });
            }
        }

        let result = self.load().and_then(|()| self.configure());
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!(loop_name = %self.name, error = %e, "calibration rejected");
            } else {
                warn!(loop_name = %self.name, error = %e, "board setup failed, init may be retried");
            }
            self.telemetry.error("init", &e.to_string());
            self.status = e.fault_code();
            self.last_error = Some(e.clone());
            return result;
        }

        self.state = LifecycleState::Ready;
        self.status = FaultCode::None;
        info!(
            loop_name = %self.name,
            kind = ?self.kind,
            read_only = self.bus.is_read_only(),
            "feedback loop ready"
        );
        self.telemetry.log("feedback loop ready");
        Ok(())
    }

    fn make(&mut self) -> FaultCode {
        if !matches!(self.state, LifecycleState::Ready | LifecycleState::Running) {
            let e = FofbError::InvalidState {
                op: "make",
                state: self.state.name(),
            };
            return self.record(Err(e));
        }
        self.state = LifecycleState::Running;
        let result = self.cycle();
        self.record(result)
    }

    fn disable(&mut self) -> Result<(), FofbError> {
        if self.state == LifecycleState::Disabled {
            return Ok(());
        }
        let LoopSettings {
            adc_node, dac_node, ..
        } = self.settings;
        let result = self
            .actuation
            .stop(&mut self.bus, adc_node)
            .and_then(|()| self.actuation.set_enable(&mut self.bus, adc_node, false))
            .and_then(|()| self.actuation.stop(&mut self.bus, dac_node))
            .and_then(|()| self.actuation.set_enable(&mut self.bus, dac_node, false));
        match result {
            Ok(()) => {
                self.state = LifecycleState::Disabled;
                info!(loop_name = %self.name, "feedback loop disabled");
                self.telemetry.log("feedback loop disabled");
                Ok(())
            }
            Err(e) => {
                self.telemetry.error("disable", &e.to_string());
                Err(e)
            }
        }
    }

    #[inline]
    fn status(&self) -> FaultCode {
        self.status
    }

    #[inline]
    fn state(&self) -> LifecycleState {
        self.state
    }

    #[inline]
    fn rms_error_count(&self) -> u32 {
        self.engine.rms_error_count()
    }

    #[inline]
    fn reset_rms_errors(&mut self) {
        self.engine.reset_rms_errors();
    }

    fn post_fault(&mut self, fault: FaultCode) -> Result<(), FofbError> {
        self.telemetry.post_fault(fault);
        let status = format!("{} {}", self.name, self.state.name());
        let record = encode_status_message(&status, fault.message());
        if self.bus.is_read_only() {
            warn!(fault = fault.message(), "read-only: status message not written");
            return Ok(());
        }
        self.bus
            .write("post_fault", self.settings.message_origin, &record)?;
        Ok(())
    }

    fn publish_values(&self) {
        let [x, y] = &self.diff;
        self.telemetry
            .publish_values(ValueKind::Bpm, self.slot, x.as_slice(), y.as_slice());
        self.telemetry.publish_values(
            ValueKind::Cm,
            self.slot,
            self.engine.cm(Plane::X).as_slice(),
            self.engine.cm(Plane::Y).as_slice(),
        );
    }
}

fn initial_cms(cal: &AxisCalibration) -> DVector<f64> {
    if cal.cm_initial.is_empty() {
        DVector::zeros(cal.cm_count())
    } else {
        DVector::from_column_slice(&cal.cm_initial)
    }
}
