//! Slot ring handshake between the sampling peer and the loop.

use fofb_common::feedback::FaultCode;
use fofb_common::rfm::EventId;
use fofb_core::orchestrator::FeedbackLoop;
use fofb_sim::{ConstantFrame, DEFAULT_JOURNAL_CAPACITY, FaultPlan, JournalEntry};

use super::common::{config, rig};

fn output_announcements(journal: &[JournalEntry]) -> Vec<u32> {
    journal
        .iter()
        .filter_map(|e| match *e {
            JournalEntry::Send {
                node: 2,
                event: EventId::OUTPUTS,
                payload,
            } => Some(payload),
            _ => None,
        })
        .collect()
}

#[test]
fn every_slot_acknowledged_before_reuse() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![5, -5, 5, -5, 0]));
    rig.fb.init().unwrap();

    for _ in 0..10 {
        assert_eq!(rig.fb.make(), FaultCode::None);
    }

    let stats = rig.sim.peer_stats().unwrap();
    assert_eq!(stats.produced, 10);
    assert_eq!(stats.acked, 10);
    assert_eq!(stats.stalls, 0);
    assert_eq!(stats.spurious_acks, 0);

    // Ring of 4: slots wrap and each output carries its producing slot.
    assert_eq!(
        output_announcements(&rig.sim.journal()),
        vec![0, 1, 2, 3, 0, 1, 2, 3, 0, 1]
    );
}

#[test]
fn long_run_keeps_call_journal_bounded() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![5, -5, 5, -5, 0]));
    rig.fb.init().unwrap();

    let cycles = DEFAULT_JOURNAL_CAPACITY as u64;
    for _ in 0..cycles {
        assert_eq!(rig.fb.make(), FaultCode::None);
    }

    let journal = rig.sim.journal();
    assert_eq!(journal.len(), DEFAULT_JOURNAL_CAPACITY);
    // The tail still holds the latest cycle's announcement.
    let last = output_announcements(&journal).last().copied();
    assert_eq!(last, Some(((cycles - 1) % 4) as u32));
    assert_eq!(rig.sim.peer_stats().map(|s| s.acked), Some(cycles));
}

#[test]
fn ack_follows_output_write() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();
    rig.sim.clear_journal();

    rig.fb.make();
    let journal = rig.sim.journal();
    let pos = |pred: &dyn Fn(&JournalEntry) -> bool| journal.iter().position(pred);

    let read = pos(&|e| matches!(e, JournalEntry::Read { .. })).unwrap();
    let write = pos(&|e| matches!(e, JournalEntry::Write { offset, .. } if *offset == cfg.memory_map.dac_base)).unwrap();
    let announce = pos(&|e| matches!(e, JournalEntry::Send { event: EventId::OUTPUTS, .. })).unwrap();
    let ack = pos(&|e| matches!(e, JournalEntry::Send { node: 1, event: EventId::SAMPLES, payload: 0 })).unwrap();
    assert!(read < write && write < announce && announce < ack);
}

#[test]
fn unacknowledged_slot_is_never_overwritten() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();

    // Every send fails: outputs cannot be announced and the slot is not
    // released.
    rig.sim.set_faults(FaultPlan {
        fail_sends: true,
        ..Default::default()
    });
    assert_eq!(rig.fb.make(), FaultCode::Dac);

    rig.sim.set_faults(FaultPlan::default());
    assert_eq!(rig.fb.make(), FaultCode::Adc);

    let stats = rig.sim.peer_stats().unwrap();
    assert_eq!(stats.produced, 1);
    assert_eq!(stats.acked, 0);
    assert_eq!(stats.stalls, 1);
}

#[test]
fn computation_failure_still_releases_slot() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();

    rig.sim.set_faults(FaultPlan {
        fail_writes: true,
        ..Default::default()
    });
    assert_eq!(rig.fb.make(), FaultCode::Dac);
    assert_eq!(rig.sim.peer_stats().unwrap().acked, 1);

    rig.sim.set_faults(FaultPlan::default());
    assert_eq!(rig.fb.make(), FaultCode::None);
}

#[test]
fn timeout_attempts_no_transfer() {
    let cfg = config(2);
    let mut rig = rig(&cfg, ConstantFrame(vec![0; 5]));
    rig.fb.init().unwrap();
    rig.sim.set_faults(FaultPlan {
        timeout_flag: true,
        ..Default::default()
    });
    rig.sim.clear_journal();

    assert_eq!(rig.fb.make(), FaultCode::Adc);
    let journal = rig.sim.journal();
    assert!(journal.iter().all(|e| !matches!(
        e,
        JournalEntry::Read { .. } | JournalEntry::Write { .. } | JournalEntry::Send { .. }
    )));
    assert!(journal.contains(&JournalEntry::Wait(EventId::SAMPLES)));
}
