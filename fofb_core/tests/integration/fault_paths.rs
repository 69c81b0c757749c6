//! Soft statuses and per-cycle failures.

use fofb_common::feedback::FaultCode;
use fofb_common::telemetry::encode_status_message;
use fofb_core::FofbError;
use fofb_core::correction::Plane;
use fofb_core::orchestrator::FeedbackLoop;
use fofb_sim::{ConstantFrame, FaultPlan, JournalEntry};

use super::common::{config, rig};

#[test]
fn no_beam_keeps_correctors_and_releases_slot() {
    let mut cfg = config(2);
    cfg.correction.no_beam_level = Some(0.01);
    cfg.calibration.x.cm_initial = vec![0.2, 0.3];
    let mut rig = rig(&cfg, ConstantFrame(vec![1, -1, 0, 0, 0]));
    rig.fb.init().unwrap();
    rig.sim.clear_journal();

    assert_eq!(rig.fb.make(), FaultCode::NoBeam);
    assert_eq!(rig.fb.status(), FaultCode::NoBeam);
    assert_eq!(rig.fb.correctors(Plane::X).as_slice(), &[0.2, 0.3]);

    // Previous outputs are still written and the slot released.
    assert!(rig.sim.journal().iter().any(|e| matches!(
        e,
        JournalEntry::Write { offset, .. } if *offset == cfg.memory_map.dac_base
    )));
    assert_eq!(rig.sim.peer_stats().unwrap().acked, 1);
}

#[test]
fn step_limit_reports_corrector_limit() {
    let mut cfg = config(2);
    cfg.correction.max_corrector_step = Some(0.01);
    let mut rig = rig(&cfg, ConstantFrame(vec![1000, 0, 0, 0, 0]));
    rig.fb.init().unwrap();

    assert_eq!(rig.fb.make(), FaultCode::CorrectorLimit);
    assert!(rig.fb.correctors(Plane::X).iter().all(|v| *v == 0.0));
    assert_eq!(rig.sim.peer_stats().unwrap().acked, 1);
}

#[test]
fn rms_errors_counted_per_cycle() {
    let mut cfg = config(2);
    cfg.correction.rms_bound = 0.05;
    cfg.correction.p = 0.0;
    let mut rig = rig(&cfg, ConstantFrame(vec![1000, 1000, 1000, 1000, 0]));
    rig.fb.init().unwrap();

    for _ in 0..3 {
        assert_eq!(rig.fb.make(), FaultCode::None);
    }
    assert_eq!(rig.fb.rms_error_count(), 3);
    assert!(rig.fb.engine().last_rms(Plane::Y) > 0.05);
    rig.fb.reset_rms_errors();
    assert_eq!(rig.fb.rms_error_count(), 0);
}

#[test]
fn read_failure_is_adc_fault_and_recovers() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();

    rig.sim.set_faults(FaultPlan {
        fail_reads: true,
        ..Default::default()
    });
    assert_eq!(rig.fb.make(), FaultCode::Adc);
    assert!(matches!(
        rig.fb.last_error(),
        Some(FofbError::TransferFailure { .. })
    ));

    // The slot was announced but never read, so it is not acknowledged
    // and the peer stalls.
    rig.sim.set_faults(FaultPlan::default());
    assert_eq!(rig.fb.make(), FaultCode::Adc);
    assert_eq!(rig.sim.peer_stats().unwrap().stalls, 1);
}

#[test]
fn arm_failure_is_adc_fault() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();
    rig.sim.set_faults(FaultPlan {
        fail_enable: true,
        ..Default::default()
    });
    assert_eq!(rig.fb.make(), FaultCode::Adc);
    assert!(matches!(
        rig.fb.last_error(),
        Some(FofbError::EventArmFailure { op: "enable_event", .. })
    ));
}

#[test]
fn post_fault_writes_status_record() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();
    rig.fb.make();

    rig.fb.post_fault(FaultCode::Rms).unwrap();
    let expected = encode_status_message("fofb-it running", "Bad RMS");
    assert_eq!(
        rig.sim.memory(cfg.memory_map.message_origin, expected.len()),
        expected
    );
}
