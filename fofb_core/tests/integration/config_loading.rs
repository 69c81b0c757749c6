//! Configuration files and a full loop built from them.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use fofb_common::config::{ConfigError, ConfigLoader};
use fofb_common::feedback::config::FofbConfig;
use fofb_common::feedback::{CorrectionMode, FaultCode};
use fofb_common::telemetry::NullTelemetry;
use fofb_core::orchestrator::{FeedbackLoop, Orchestrator};
use fofb_sim::{HeapDma, OrbitGenerator, SamplingPeer, SimulatedRfm};
use tempfile::NamedTempFile;

fn sample_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config/fofb.toml")
}

#[test]
fn shipped_config_is_valid() {
    let cfg = FofbConfig::load(&sample_path()).unwrap();
    cfg.validate().unwrap();
    assert_eq!(cfg.correction.mode, CorrectionMode::All);
    assert_eq!(cfg.calibration.x.bpm_count(), 4);
    assert_eq!(cfg.interconnect.sample_count, cfg.adc.device_table.len());
}

#[test]
fn missing_file() {
    let result = FofbConfig::load(&PathBuf::from("/nonexistent/fofb.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}

#[test]
fn bad_loop_direction_rejected() {
    let text = std::fs::read_to_string(sample_path())
        .unwrap()
        .replace("loop_dir = 1.0", "loop_dir = 2.0");
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();

    let cfg = FofbConfig::load(file.path()).unwrap();
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::ValidationError(msg)) if msg.contains("loop_dir")
    ));
}

#[test]
fn minimal_file_takes_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[shared]
service_name = "fofb-min"

[adc]
device_table = [1, 2]

[calibration.x]
smat = [[1.0]]
bpm_devices = [1]
bpm_gain = [1.0]
bpm_offset = [0.0]
cm_slots = [0]
cm_scale = [1.0]

[calibration.y]
smat = [[1.0]]
bpm_devices = [2]
bpm_gain = [1.0]
bpm_offset = [0.0]
cm_slots = [1]
cm_scale = [1.0]
"#
    )
    .unwrap();

    let cfg = FofbConfig::load(file.path()).unwrap();
    assert_eq!(cfg.interconnect.ring_slots, 512);
    assert_eq!(cfg.interconnect.averaging, 2);
    assert_eq!(cfg.memory_map.dac_base, 0x50000);
    assert_eq!(cfg.runner.rms_error_limit, 5);
    // 256 samples expected by default, two listed.
    assert!(cfg.validate().is_err());
}

#[test]
fn shipped_config_runs_on_simulated_rig() {
    let cfg = FofbConfig::load(&sample_path()).unwrap();
    let ic = &cfg.interconnect;
    let orbit = OrbitGenerator::new(ic.sample_count, 3).with_noise(2.0);
    let peer = SamplingPeer::new(
        ic.adc_node,
        cfg.memory_map.adc_base,
        ic.sample_count,
        ic.ring_slots,
        orbit,
    );
    let rfm = SimulatedRfm::default().with_peer(peer);
    let sim = rfm.handle();
    let mut fb = Orchestrator::from_config(&cfg, rfm, HeapDma::new(4096), Arc::new(NullTelemetry));

    fb.init().unwrap();
    for _ in 0..100 {
        assert_eq!(fb.make(), FaultCode::None);
    }
    fb.disable().unwrap();

    let stats = sim.peer_stats().unwrap();
    assert_eq!((stats.produced, stats.acked, stats.stalls), (100, 100, 0));
}
