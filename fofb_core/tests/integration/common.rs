//! Shared rig builders.

use std::sync::Arc;

use fofb_common::config::{LogLevel, SharedConfig};
use fofb_common::feedback::CorrectionMode;
use fofb_common::feedback::config::{
    AdcLayoutConfig, AxisCalibration, CalibrationConfig, FofbConfig,
};
use fofb_common::telemetry::NullTelemetry;
use fofb_core::orchestrator::Orchestrator;
use fofb_sim::{FrameSource, HeapDma, JournalEntry, SamplingPeer, SimHandle, SimulatedRfm};

/// Device id of the injection channel.
pub const INJECTION_DEVICE: u32 = 900;

/// Loop over the simulated rig.
pub type SimLoop = Orchestrator<SimulatedRfm, HeapDma>;

/// Square identity response.
pub fn identity(n: usize) -> Vec<Vec<f64>> {
    (0..n)
        .map(|r| (0..n).map(|c| if r == c { 1.0 } else { 0.0 }).collect())
        .collect()
}

/// `n` BPMs and `n` correctors with device ids from `first_device` and
/// output words from `first_slot`.
pub fn axis(n: usize, first_device: u32, first_slot: usize, gain: f64) -> AxisCalibration {
    AxisCalibration {
        smat: identity(n),
        ivec: 0.0,
        bpm_devices: (0..n as u32).map(|i| first_device + i).collect(),
        bpm_gain: vec![gain; n],
        bpm_offset: vec![0.0; n],
        cm_slots: (first_slot..first_slot + n).collect(),
        cm_scale: vec![1000.0; n],
        cm_initial: vec![],
    }
}

/// Configuration with `n` devices per plane.
///
/// Frame layout: X BPMs at positions `0..n`, Y BPMs at `n..2n`, the
/// injection channel at `2n`.
pub fn config(n: usize) -> FofbConfig {
    let mut device_table: Vec<u32> = (0..n as u32).map(|i| 100 + i).collect();
    device_table.extend((0..n as u32).map(|i| 200 + i));
    device_table.push(INJECTION_DEVICE);

    let mut cfg = FofbConfig {
        shared: SharedConfig {
            log_level: LogLevel::Debug,
            service_name: "fofb-it".to_string(),
        },
        interconnect: Default::default(),
        memory_map: Default::default(),
        correction: Default::default(),
        adc: AdcLayoutConfig { device_table },
        calibration: CalibrationConfig {
            x: axis(n, 100, 0, 1.0),
            y: axis(n, 200, 64, 1.0),
        },
        runner: Default::default(),
    };
    cfg.interconnect.sample_count = 2 * n + 1;
    cfg.interconnect.ring_slots = 4;
    cfg.interconnect.settle_delay_ms = 0;
    cfg.interconnect.event_timeout_ms = 20;
    cfg.correction.injection_device = INJECTION_DEVICE;
    cfg
}

/// Loop plus a handle on its simulated interconnect.
pub struct Rig {
    pub fb: SimLoop,
    pub sim: SimHandle,
}

/// Rig with the mode named in the configuration.
pub fn rig(cfg: &FofbConfig, source: impl FrameSource + 'static) -> Rig {
    rig_with_mode(cfg, cfg.correction.mode, source)
}

/// Rig for an explicit correction mode.
pub fn rig_with_mode(
    cfg: &FofbConfig,
    mode: CorrectionMode,
    source: impl FrameSource + 'static,
) -> Rig {
    let ic = &cfg.interconnect;
    let peer = SamplingPeer::new(
        ic.adc_node,
        cfg.memory_map.adc_base,
        ic.sample_count,
        ic.ring_slots,
        source,
    );
    let rfm = SimulatedRfm::default().with_peer(peer);
    let sim = rfm.handle();
    let fb = Orchestrator::new(cfg, mode, rfm, HeapDma::new(4096), Arc::new(NullTelemetry));
    Rig { fb, sim }
}

/// Outward calls recorded so far.
pub fn outward(sim: &SimHandle) -> Vec<JournalEntry> {
    sim.journal()
        .into_iter()
        .filter(JournalEntry::is_outward)
        .collect()
}
