//! End-to-end correction results.

use fofb_common::consts::{DAC_LOOP_DIR_WORD, DAC_PLANE_WORD, RAW_TO_MM};
use fofb_common::feedback::{CorrectionMode, FaultCode};
use fofb_core::correction::{InjectionPhase, Plane};
use fofb_core::orchestrator::FeedbackLoop;
use fofb_core::orchestrator::scaling::{digitize, status_word};
use fofb_sim::ConstantFrame;

use super::common::{config, rig, rig_with_mode};

/// Eight BPMs per plane with distinct raw readings.
fn frame() -> Vec<i16> {
    let mut f: Vec<i16> = (1..=8).map(|i| i * 40).collect();
    f.extend((1..=8).map(|i| -i * 25));
    f.push(0);
    f
}

#[test]
fn identity_loop_outputs_scaled_measurement() {
    let mut cfg = config(8);
    cfg.calibration.x.bpm_gain = vec![2.0; 8];
    cfg.calibration.y.bpm_gain = vec![0.5; 8];
    let mut rig = rig(&cfg, ConstantFrame(frame()));
    rig.fb.init().unwrap();

    assert_eq!(rig.fb.make(), FaultCode::None);

    let raw = frame();
    for (plane, gain, first) in [(Plane::X, 2.0, 0usize), (Plane::Y, 0.5, 8)] {
        let measured = rig.fb.measurement(plane);
        let cm = rig.fb.correctors(plane);
        assert_eq!(cm.len(), 8);
        for i in 0..8 {
            let expected = raw[first + i] as f64 * RAW_TO_MM * gain;
            assert_eq!(measured[i], expected);
            assert!((cm[i] - expected).abs() < 1e-12, "{plane:?}[{i}]");
        }
    }

    let words = rig.sim.words(cfg.memory_map.dac_base, 128);
    for i in 0..8 {
        let x = raw[i] as f64 * RAW_TO_MM * 2.0;
        let y = raw[8 + i] as f64 * RAW_TO_MM * 0.5;
        assert_eq!(words[i], digitize(x, 1000.0, 1.0));
        assert_eq!(words[64 + i], digitize(y, 1000.0, 1.0));
    }
    assert_eq!(words[DAC_LOOP_DIR_WORD], status_word(1.0));
    assert_eq!(words[DAC_PLANE_WORD], status_word(3.0));
}

#[test]
fn correctors_accumulate_with_proportional_gain() {
    let mut cfg = config(2);
    cfg.correction.p = 0.25;
    let mut rig = rig(&cfg, ConstantFrame(vec![400, 0, 0, 0, 0]));
    rig.fb.init().unwrap();

    for _ in 0..4 {
        rig.fb.make();
    }
    let step = 400.0 * RAW_TO_MM;
    assert!((rig.fb.correctors(Plane::X)[0] - step).abs() < 1e-12);
}

#[test]
fn negative_loop_direction_flips_digits() {
    let mut cfg = config(2);
    cfg.correction.loop_dir = -1.0;
    let mut rig = rig(&cfg, ConstantFrame(vec![400, 0, 0, 0, 0]));
    rig.fb.init().unwrap();
    rig.fb.make();

    let words = rig.sim.words(cfg.memory_map.dac_base, 128);
    assert_eq!(words[0], digitize(400.0 * RAW_TO_MM, 1000.0, -1.0));
    assert!(words[0] < 1 << 23);
    assert_eq!(words[DAC_LOOP_DIR_WORD], status_word(-1.0));
}

#[test]
fn vertical_only_keeps_horizontal_correctors() {
    let mut cfg = config(2);
    cfg.calibration.x.cm_initial = vec![0.1, -0.1];
    let mut rig = rig_with_mode(&cfg, CorrectionMode::Vertical, ConstantFrame(vec![300; 5]));
    rig.fb.init().unwrap();

    for _ in 0..3 {
        assert_eq!(rig.fb.make(), FaultCode::None);
    }
    assert_eq!(rig.fb.correctors(Plane::X).as_slice(), &[0.1, -0.1]);
    assert!(rig.fb.correctors(Plane::Y).iter().all(|v| *v > 0.0));

    let words = rig.sim.words(cfg.memory_map.dac_base, 128);
    assert_eq!(words[0], digitize(0.1, 1000.0, 1.0));
    assert_eq!(words[DAC_PLANE_WORD], status_word(2.0));
}

#[test]
fn weighting_keeps_output_length() {
    let mut cfg = config(3);
    cfg.correction.weighted = true;
    cfg.calibration.x.smat = vec![
        vec![2.0, 0.1, 0.0],
        vec![0.0, 1.0, 0.3],
        vec![0.5, 0.0, 4.0],
    ];
    let mut rig = rig(&cfg, ConstantFrame(vec![100, 200, 300, 0, 0, 0, 0]));
    rig.fb.init().unwrap();
    assert_eq!(rig.fb.make(), FaultCode::None);
    assert_eq!(rig.fb.correctors(Plane::X).len(), 3);
    assert!(rig.fb.engine().weights(Plane::X).is_some());
}

#[test]
fn injection_suppresses_then_restores_gain() {
    let mut cfg = config(2);
    cfg.correction.frequency = 10_000.0;
    // Injection pulse on the first frame only.
    let source = |index: u64, frame: &mut [i16]| {
        frame.fill(0);
        frame[0] = 500;
        frame[4] = if index == 0 { 2000 } else { 0 };
    };
    let mut rig = rig(&cfg, source);
    rig.fb.init().unwrap();

    let mut history = Vec::new();
    for _ in 0..620 {
        assert_eq!(rig.fb.make(), FaultCode::None);
        history.push(rig.fb.correctors(Plane::X)[0]);
    }
    let step = |k: usize| history[k] - history[k - 1];
    let full = 500.0 * RAW_TO_MM;

    // The injection cycle counts as 1, so cycles 0..8 run at full gain.
    assert!((history[0] - full).abs() < 1e-12);
    assert!((step(8) - full).abs() < 1e-12);
    // Window [10, 600) is reached on cycle 9: gain ramps up from zero.
    assert!(step(9).abs() < 1e-12);
    assert!((step(304) - full * 0.5).abs() < 1e-12);
    assert!(step(598) < full);
    // Expired.
    assert!((step(599) - full).abs() < 1e-12);
    assert_eq!(rig.fb.engine().injection().phase(), InjectionPhase::Expired);
}
