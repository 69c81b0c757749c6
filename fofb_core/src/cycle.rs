//! Outer cycle runner: RT setup, repeated `make()`, fault escalation.
//!
//! ## Loop Thread
//! [`LoopThread::prepare`] locks pages, prefaults the stack, pins the
//! thread to its core and switches it to SCHED_FIFO. Without the `rt`
//! feature only the stack prefault runs.
//!
//! ## Cycle Loop
//! The loop is paced by the sampling board's event, not by a timer: each
//! `make()` blocks in the interrupt wait. The runner measures every cycle,
//! posts operator messages when the status changes, escalates the RMS
//! counter, throttles value dumps and stops on a shutdown request or too
//! many consecutive faults.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use fofb_common::feedback::FaultCode;
use fofb_common::feedback::config::RunnerConfig;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::orchestrator::FeedbackLoop;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Cycles that ended with a non-zero status.
    pub fault_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: i64,
    /// Minimum cycle duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum cycle duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Running sum of squares for stddev computation.
    pub sum_sq_cycle_ns: i128,
}

impl CycleStats {
    /// Create a new zeroed stats instance.
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            fault_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            sum_sq_cycle_ns: 0,
        }
    }

    /// Record a cycle duration. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, status: FaultCode) {
        self.cycle_count += 1;
        if !status.is_ok() {
            self.fault_count += 1;
        }
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns += duration_ns;
        self.sum_sq_cycle_ns += (duration_ns as i128) * (duration_ns as i128);
    }

    /// Average cycle time [ns] (returns 0 if no cycles).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }

    /// Population standard deviation of the cycle time [ns].
    pub fn stddev_cycle_ns(&self) -> f64 {
        if self.cycle_count == 0 {
            return 0.0;
        }
        let n = self.cycle_count as f64;
        let mean = self.sum_cycle_ns as f64 / n;
        let var = self.sum_sq_cycle_ns as f64 / n - mean * mean;
        var.max(0.0).sqrt()
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Errors during RT setup or cycle execution.
#[derive(Debug, Error)]
pub enum CycleError {
    /// RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),

    /// Consecutive fault limit reached.
    #[error("{count} consecutive faulty cycles, last status {last:?}")]
    TooManyFaults {
        /// Consecutive faulty cycles.
        count: u32,
        /// Status of the last cycle.
        last: FaultCode,
    },
}

/// Stack touched before the first cycle so the event wait never page-faults.
const STACK_PREFAULT_BYTES: usize = 256 * 1024;

/// Placement of the thread that runs the feedback cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopThread {
    /// CPU core the loop is pinned to.
    pub cpu_core: usize,
    /// SCHED_FIFO priority.
    pub priority: i32,
}

impl LoopThread {
    /// Prepare the calling thread for cycling.
    ///
    /// Pages are locked, the stack is prefaulted, then the thread is pinned
    /// and switched to SCHED_FIFO. Without the `rt` feature only the stack
    /// prefault runs.
    pub fn prepare(&self) -> Result<(), CycleError> {
        lock_pages()?;
        prefault_stack();
        self.pin()?;
        self.raise_priority()?;
        info!(
            cpu_core = self.cpu_core,
            priority = self.priority,
            rt = cfg!(feature = "rt"),
            "loop thread prepared"
        );
        Ok(())
    }

    #[cfg(feature = "rt")]
    fn pin(&self) -> Result<(), CycleError> {
        use nix::sched::{CpuSet, sched_setaffinity};
        use nix::unistd::Pid;

        let mut cores = CpuSet::new();
        cores
            .set(self.cpu_core)
            .map_err(|e| CycleError::RtSetup(format!("core {}: {e}", self.cpu_core)))?;
        sched_setaffinity(Pid::from_raw(0), &cores)
            .map_err(|e| CycleError::RtSetup(format!("pin to core {}: {e}", self.cpu_core)))
    }

    #[cfg(not(feature = "rt"))]
    fn pin(&self) -> Result<(), CycleError> {
        Ok(())
    }

    #[cfg(feature = "rt")]
    fn raise_priority(&self) -> Result<(), CycleError> {
        let param = libc::sched_param {
            sched_priority: self.priority,
        };
        // SAFETY: `param` outlives the call; pid 0 is the calling thread.
        if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
            let err = std::io::Error::last_os_error();
            return Err(CycleError::RtSetup(format!(
                "SCHED_FIFO priority {}: {err}",
                self.priority
            )));
        }
        Ok(())
    }

    #[cfg(not(feature = "rt"))]
    fn raise_priority(&self) -> Result<(), CycleError> {
        Ok(())
    }
}

#[cfg(feature = "rt")]
fn lock_pages() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("lock pages: {e}")))
}

#[cfg(not(feature = "rt"))]
fn lock_pages() -> Result<(), CycleError> {
    Ok(())
}

fn prefault_stack() {
    let mut stack = [0u8; STACK_PREFAULT_BYTES];
    for byte in stack.iter_mut() {
        // SAFETY: `byte` is a valid, exclusive reference into `stack`.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&stack);
}

// ─── Cycle Runner ───────────────────────────────────────────────────

/// Escalation and throttling policy of the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerPolicy {
    /// RMS error count above which `Rms` is posted and the counter reset
    /// (0 = never).
    pub rms_error_limit: u32,
    /// Stop after this many consecutive faulty cycles (0 = never).
    pub max_consecutive_faults: u32,
    /// Publish values every N cycles (0 = never).
    pub value_dump_interval: u32,
    /// Stop after this many cycles.
    pub max_cycles: Option<u64>,
}

impl From<&RunnerConfig> for RunnerPolicy {
    fn from(cfg: &RunnerConfig) -> Self {
        Self {
            rms_error_limit: cfg.rms_error_limit,
            max_consecutive_faults: cfg.max_consecutive_faults,
            value_dump_interval: cfg.value_dump_interval,
            max_cycles: None,
        }
    }
}

/// Drives a [`FeedbackLoop`] until shutdown.
pub struct CycleRunner<L> {
    feedback: L,
    policy: RunnerPolicy,
    running: Arc<AtomicBool>,
    stats: CycleStats,
    consecutive_faults: u32,
    posted: FaultCode,
}

impl<L: FeedbackLoop> CycleRunner<L> {
    /// Runner for an initialized loop; clearing `running` stops it after
    /// the current cycle.
    pub fn new(feedback: L, policy: RunnerPolicy, running: Arc<AtomicBool>) -> Self {
        Self {
            feedback,
            policy,
            running,
            stats: CycleStats::new(),
            consecutive_faults: 0,
            posted: FaultCode::None,
        }
    }

    /// Timing statistics.
    #[inline]
    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    /// Driven loop.
    #[inline]
    pub fn feedback(&self) -> &L {
        &self.feedback
    }

    /// Driven loop, mutably.
    #[inline]
    pub fn feedback_mut(&mut self) -> &mut L {
        &mut self.feedback
    }

    /// Give the loop back.
    pub fn into_inner(self) -> L {
        self.feedback
    }

    /// Run one cycle and apply the escalation policy.
    pub fn step(&mut self) -> Result<FaultCode, CycleError> {
        let start = Instant::now();
        let status = self.feedback.make();
        self.stats
            .record(start.elapsed().as_nanos() as i64, status);

        if status != self.posted {
            self.post(status);
        }

        if status.is_ok() {
            self.consecutive_faults = 0;
        } else {
            self.consecutive_faults += 1;
            debug!(
                status = status.code(),
                consecutive = self.consecutive_faults,
                "faulty cycle"
            );
        }

        let rms_errors = self.feedback.rms_error_count();
        if self.policy.rms_error_limit > 0 && rms_errors > self.policy.rms_error_limit {
            warn!(rms_errors, limit = self.policy.rms_error_limit, "RMS error limit passed");
            self.post(FaultCode::Rms);
            self.feedback.reset_rms_errors();
        }

        let interval = u64::from(self.policy.value_dump_interval);
        if interval > 0 && self.stats.cycle_count % interval == 0 {
            self.feedback.publish_values();
        }

        let limit = self.policy.max_consecutive_faults;
        if limit > 0 && self.consecutive_faults >= limit {
            return Err(CycleError::TooManyFaults {
                count: self.consecutive_faults,
                last: status,
            });
        }
        Ok(status)
    }

    /// Cycle until shutdown, the cycle limit or a fatal fault streak.
    pub fn run(&mut self) -> Result<(), CycleError> {
        info!(policy = ?self.policy, "entering feedback loop");
        let result = loop {
            if !self.running.load(Ordering::SeqCst) {
                info!("shutdown requested");
                break Ok(());
            }
            if self
                .policy
                .max_cycles
                .is_some_and(|max| self.stats.cycle_count >= max)
            {
                info!(cycles = self.stats.cycle_count, "cycle limit reached");
                break Ok(());
            }
            if let Err(e) = self.step() {
                break Err(e);
            }
        };

        info!(
            cycles = self.stats.cycle_count,
            faults = self.stats.fault_count,
            avg_ns = self.stats.avg_cycle_ns(),
            min_ns = self.stats.min_cycle_ns,
            max_ns = self.stats.max_cycle_ns,
            stddev_ns = self.stats.stddev_cycle_ns() as i64,
            "feedback loop left"
        );
        result
    }

    fn post(&mut self, fault: FaultCode) {
        if let Err(e) = self.feedback.post_fault(fault) {
            warn!(error = %e, "cannot post fault message");
        }
        self.posted = fault;
    }
}
