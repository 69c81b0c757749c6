//! Read-only mode: the loop observes but never drives the interconnect.

use std::sync::Arc;

use fofb_common::feedback::FaultCode;
use fofb_common::telemetry::NullTelemetry;
use fofb_core::correction::Plane;
use fofb_core::orchestrator::{FeedbackLoop, LifecycleState, Orchestrator};
use fofb_sim::{ConstantFrame, HeapDma, JournalEntry, SamplingPeer, SimulatedRfm};

use super::common::{config, outward};

#[test]
fn no_outward_traffic_but_reads_succeed() {
    let mut cfg = config(2);
    cfg.interconnect.read_only = true;

    // The boards are driven by someone else: the peer already samples.
    let peer = SamplingPeer::new(1, cfg.memory_map.adc_base, 5, 4, ConstantFrame(vec![300; 5]))
        .running();
    let rfm = SimulatedRfm::default().with_peer(peer);
    let sim = rfm.handle();
    let mut fb = Orchestrator::from_config(&cfg, rfm, HeapDma::new(4096), Arc::new(NullTelemetry));

    fb.init().unwrap();
    assert_eq!(fb.state(), LifecycleState::Ready);
    assert_eq!(fb.make(), FaultCode::None);
    fb.post_fault(FaultCode::Dac).unwrap();
    fb.disable().unwrap();

    assert!(outward(&sim).is_empty());
    assert!(
        sim.journal()
            .iter()
            .any(|e| matches!(e, JournalEntry::Read { .. }))
    );
    assert!(fb.measurement(Plane::X).iter().all(|v| *v > 0.0));
    assert!(fb.correctors(Plane::X).iter().all(|v| *v > 0.0));
    assert!(
        sim.words(cfg.memory_map.dac_base, 128)
            .iter()
            .all(|w| *w == 0)
    );
    assert!(
        sim.memory(cfg.memory_map.message_origin, 16)
            .iter()
            .all(|b| *b == 0)
    );
}
