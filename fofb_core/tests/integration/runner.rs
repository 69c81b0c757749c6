//! Cycle runner driving a real orchestrator.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use fofb_common::feedback::FaultCode;
use fofb_common::telemetry::encode_status_message;
use fofb_core::cycle::{CycleError, CycleRunner, RunnerPolicy};
use fofb_core::orchestrator::{FeedbackLoop, LifecycleState};
use fofb_sim::{ConstantFrame, FaultPlan};

use super::common::{config, rig};

fn policy() -> RunnerPolicy {
    RunnerPolicy {
        rms_error_limit: 0,
        max_consecutive_faults: 0,
        value_dump_interval: 10,
        max_cycles: None,
    }
}

#[test]
fn runs_until_cycle_limit() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![50, 60, 70, 80, 0]));
    rig.fb.init().unwrap();

    let mut runner = CycleRunner::new(
        rig.fb,
        RunnerPolicy {
            max_cycles: Some(25),
            ..policy()
        },
        Arc::new(AtomicBool::new(true)),
    );
    runner.run().unwrap();
    assert_eq!(runner.stats().cycle_count, 25);
    assert_eq!(runner.stats().fault_count, 0);

    let mut fb = runner.into_inner();
    fb.disable().unwrap();
    assert_eq!(fb.state(), LifecycleState::Disabled);
    assert_eq!(rig.sim.peer_stats().unwrap().acked, 25);
}

#[test]
fn rms_limit_posts_bad_rms() {
    let mut cfg = config(2);
    cfg.correction.rms_bound = 0.01;
    cfg.correction.p = 0.0;
    let mut rig = rig(&cfg, ConstantFrame(vec![1000; 5]));
    rig.fb.init().unwrap();

    let mut runner = CycleRunner::new(
        rig.fb,
        RunnerPolicy {
            rms_error_limit: 2,
            ..policy()
        },
        Arc::new(AtomicBool::new(true)),
    );
    for _ in 0..3 {
        assert_eq!(runner.step().unwrap(), FaultCode::None);
    }
    assert_eq!(runner.feedback().rms_error_count(), 0);

    let record = encode_status_message("fofb-it running", "Bad RMS");
    assert_eq!(
        rig.sim.memory(cfg.memory_map.message_origin, record.len()),
        record
    );
}

#[test]
fn timeout_streak_stops_runner() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();
    rig.sim.set_faults(FaultPlan {
        timeout_flag: true,
        ..Default::default()
    });

    let mut runner = CycleRunner::new(
        rig.fb,
        RunnerPolicy {
            max_consecutive_faults: 3,
            ..policy()
        },
        Arc::new(AtomicBool::new(true)),
    );
    let err = runner.run().unwrap_err();
    assert!(matches!(
        err,
        CycleError::TooManyFaults {
            count: 3,
            last: FaultCode::Adc
        }
    ));

    let record = encode_status_message("fofb-it running", "ADC Timeout");
    assert_eq!(
        rig.sim.memory(cfg.memory_map.message_origin, record.len()),
        record
    );
}
