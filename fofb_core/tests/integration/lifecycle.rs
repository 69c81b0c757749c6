//! Lifecycle transitions of the orchestrator.

use fofb_common::feedback::FaultCode;
use fofb_common::rfm::{ControlCommand, EventId};
use fofb_core::FofbError;
use fofb_core::correction::Plane;
use fofb_core::orchestrator::{FeedbackLoop, LifecycleState};
use fofb_sim::{ConstantFrame, JournalEntry};

use super::common::{config, outward, rig};

#[test]
fn missing_bpm_keeps_loop_uninitialized() {
    let mut cfg = config(4);
    cfg.calibration.y.bpm_devices[2] = 777;
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 9]));

    assert_eq!(rig.fb.init(), Err(FofbError::IndexNotFound { device: 777 }));
    assert_eq!(rig.fb.state(), LifecycleState::Uninitialized);
    assert_eq!(rig.fb.status(), FaultCode::Config);
    assert!(outward(&rig.sim).is_empty());
    assert!(!rig.sim.peer_sampling());
}

#[test]
fn duplicated_device_rejected() {
    let mut cfg = config(4);
    cfg.adc.device_table[8] = 101;
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 9]));
    assert_eq!(rig.fb.init(), Err(FofbError::DuplicateIndex { device: 101 }));
    assert_eq!(rig.fb.state(), LifecycleState::Uninitialized);
}

#[test]
fn singular_response_rejected() {
    let mut cfg = config(2);
    cfg.calibration.x.smat = vec![vec![0.0, 0.0], vec![0.0, 0.0]];
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    assert!(matches!(
        rig.fb.init(),
        Err(FofbError::CalibrationMismatch(_))
    ));
    assert_eq!(rig.fb.state(), LifecycleState::Uninitialized);
}

#[test]
fn short_gain_vector_rejected_at_init() {
    let mut cfg = config(2);
    cfg.calibration.x.bpm_gain = vec![1.0];
    let mut rig = rig(&cfg, ConstantFrame(vec![100; 5]));

    assert!(matches!(
        rig.fb.init(),
        Err(FofbError::CalibrationMismatch(_))
    ));
    assert_eq!(rig.fb.state(), LifecycleState::Uninitialized);
    assert_eq!(rig.fb.status(), FaultCode::Config);
    assert!(outward(&rig.sim).is_empty());

    assert_eq!(rig.fb.make(), FaultCode::Config);
    assert!(outward(&rig.sim).is_empty());
}

#[test]
fn short_corrector_scale_rejected_at_init() {
    let mut cfg = config(2);
    cfg.calibration.y.cm_scale = vec![1000.0];
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    assert!(matches!(
        rig.fb.init(),
        Err(FofbError::CalibrationMismatch(_))
    ));
    assert_eq!(rig.fb.state(), LifecycleState::Uninitialized);
}

#[test]
fn device_table_must_cover_frame() {
    let mut cfg = config(2);
    cfg.adc.device_table.push(901);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    assert!(matches!(
        rig.fb.init(),
        Err(FofbError::CalibrationMismatch(_))
    ));
    assert_eq!(rig.fb.state(), LifecycleState::Uninitialized);
    assert!(outward(&rig.sim).is_empty());
}

#[test]
fn ready_then_running_then_disabled() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![10; 5]));

    rig.fb.init().unwrap();
    assert_eq!(rig.fb.state(), LifecycleState::Ready);
    assert!(rig.sim.peer_sampling());

    assert_eq!(rig.fb.make(), FaultCode::None);
    assert_eq!(rig.fb.state(), LifecycleState::Running);

    rig.fb.disable().unwrap();
    assert_eq!(rig.fb.state(), LifecycleState::Disabled);
    assert!(!rig.sim.peer_sampling());
}

#[test]
fn disable_twice_sends_events_once() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();
    rig.sim.clear_journal();

    rig.fb.disable().unwrap();
    rig.fb.disable().unwrap();
    rig.fb.disable().unwrap();

    let control = |node, cmd: ControlCommand| JournalEntry::Send {
        node,
        event: EventId::CONTROL,
        payload: cmd as u32,
    };
    assert_eq!(
        outward(&rig.sim),
        vec![
            control(1, ControlCommand::Stop),
            control(1, ControlCommand::Disable),
            control(2, ControlCommand::Stop),
            control(2, ControlCommand::Disable),
        ]
    );
}

#[test]
fn make_after_disable_reports_config() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();
    rig.fb.disable().unwrap();
    rig.sim.clear_journal();

    assert_eq!(rig.fb.make(), FaultCode::Config);
    assert!(rig.sim.journal().is_empty());
}

#[test]
fn disabled_loop_restarts_from_clean_controller() {
    let mut cfg = config(2);
    cfg.calibration.x.cm_initial = vec![0.5, -0.5];
    // Injection pulse on the first frame only.
    let source = |index: u64, frame: &mut [i16]| {
        frame.fill(100);
        frame[4] = if index == 0 { 2000 } else { 0 };
    };
    let mut rig = rig(&cfg, source);
    rig.fb.init().unwrap();
    for _ in 0..3 {
        assert_eq!(rig.fb.make(), FaultCode::None);
    }
    assert_eq!(rig.fb.engine().injection().counter(), Some(3));
    assert_ne!(rig.fb.correctors(Plane::X).as_slice(), &[0.5, -0.5]);
    rig.fb.disable().unwrap();
    assert!(!rig.sim.peer_sampling());

    rig.fb.init().unwrap();
    assert_eq!(rig.fb.state(), LifecycleState::Ready);
    assert_eq!(rig.fb.engine().injection().counter(), None);
    assert_eq!(rig.fb.correctors(Plane::X).as_slice(), &[0.5, -0.5]);
    assert!(rig.sim.peer_sampling());

    assert_eq!(rig.fb.make(), FaultCode::None);
    assert_eq!(rig.fb.state(), LifecycleState::Running);
    assert_eq!(rig.sim.peer_stats().map(|s| s.acked), Some(4));
}

#[test]
fn init_rejected_while_running() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();
    assert_eq!(rig.fb.make(), FaultCode::None);
    assert_eq!(
        rig.fb.init(),
        Err(FofbError::InvalidState {
            op: "init",
            state: "running"
        })
    );
}

#[test]
fn failed_disable_can_be_retried() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();

    rig.sim.set_faults(fofb_sim::FaultPlan {
        fail_sends: true,
        ..Default::default()
    });
    assert!(matches!(
        rig.fb.disable(),
        Err(FofbError::EventSendFailure { op: "stop", .. })
    ));
    assert_ne!(rig.fb.state(), LifecycleState::Disabled);

    rig.sim.set_faults(Default::default());
    rig.fb.disable().unwrap();
    assert_eq!(rig.fb.state(), LifecycleState::Disabled);
}
