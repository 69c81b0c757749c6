//! # FOFB Loop
//!
//! Runs one fast orbit feedback loop against a simulated reflective-memory
//! interconnect: a sampling board producing a synthetic orbit and an
//! actuator board receiving the corrector buffer.
//!
//! Startup: load and validate the TOML configuration, `init()` the loop,
//! prepare the loop thread (pinning and RT priority), then cycle until
//! Ctrl-C, the cycle limit or too many consecutive faults. The boards are
//! stopped and disabled on the way out.

use clap::Parser;
use fofb_common::config::ConfigLoader;
use fofb_common::consts::{ADC_SAMPLE_WIDTH, CONTROL_BLOCK_SIZE, DAC_BUFFER_SIZE};
use fofb_common::feedback::config::FofbConfig;
use fofb_common::telemetry::Telemetry;
use fofb_core::cycle::{CycleRunner, LoopThread, RunnerPolicy};
use fofb_core::orchestrator::{FeedbackLoop, Orchestrator};
use fofb_core::telemetry::TracingTelemetry;
use fofb_sim::{HeapDma, OrbitGenerator, SamplingPeer, SimulatedRfm};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// FOFB Loop: fast orbit feedback over reflective memory
#[derive(Parser, Debug)]
#[command(name = "fofb_loop")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Fast orbit feedback loop on a simulated reflective-memory rig")]
struct Args {
    /// Path to the loop configuration TOML.
    #[arg(default_value = "config/fofb.toml")]
    config: PathBuf,

    /// CPU core to pin the loop thread to (default: 1).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (default: 80).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,

    /// Suppress every outward write and control event.
    #[arg(long)]
    read_only: bool,

    /// Stop after this many cycles.
    #[arg(long)]
    cycles: Option<u64>,

    /// Simulated sampling period [µs].
    #[arg(long, default_value_t = 100)]
    pace_us: u64,

    /// Seed of the synthetic orbit.
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Injection pulse period of the simulated orbit [frames] (0 = none).
    #[arg(long, default_value_t = 0)]
    injection_every: u64,
}

fn main() {
    let args = Args::parse();
    let loaded = FofbConfig::load(&args.config);
    let level = match &loaded {
        _ if args.verbose => Level::DEBUG,
        Ok(cfg) => cfg.shared.log_level.into(),
        Err(_) => Level::INFO,
    };
    setup_tracing(level, args.json);

    info!("FOFB loop v{} starting...", env!("CARGO_PKG_VERSION"));

    let result: Result<(), Box<dyn std::error::Error>> = match loaded {
        Ok(cfg) => run(&args, cfg),
        Err(e) => Err(format!("{}: {e}", args.config.display()).into()),
    };
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("FOFB loop shutdown complete");
}

fn run(args: &Args, mut config: FofbConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.interconnect.read_only |= args.read_only;
    config.validate()?;
    info!(
        service = %config.shared.service_name,
        mode = ?config.correction.mode,
        bpms_x = config.calibration.x.bpm_count(),
        bpms_y = config.calibration.y.bpm_count(),
        read_only = config.interconnect.read_only,
        "config OK"
    );

    let (rfm, dma) = simulated_rig(args, &config);
    let telemetry: Arc<dyn Telemetry> =
        Arc::new(TracingTelemetry::new(config.shared.service_name.clone()));
    let mut feedback = Orchestrator::from_config(&config, rfm, dma, telemetry);
    feedback.init()?;

    LoopThread {
        cpu_core: args.cpu_core,
        priority: args.rt_priority,
    }
    .prepare()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let policy = RunnerPolicy {
        max_cycles: args.cycles,
        ..RunnerPolicy::from(&config.runner)
    };
    let mut runner = CycleRunner::new(feedback, policy, running);
    let outcome = runner.run();

    let mut feedback = runner.into_inner();
    if let Err(e) = feedback.disable() {
        warn!("disable failed: {e}");
    }
    outcome?;
    Ok(())
}

/// Simulated interconnect with a sampling peer on the ADC node.
fn simulated_rig(args: &Args, config: &FofbConfig) -> (SimulatedRfm, HeapDma) {
    let ic = &config.interconnect;
    let mut orbit = OrbitGenerator::new(ic.sample_count, args.seed);
    if args.injection_every > 0 {
        let channel = config
            .adc
            .device_table
            .iter()
            .position(|&d| d == config.correction.injection_device);
        match channel {
            Some(ch) => orbit = orbit.with_injections(ch, args.injection_every, i16::MAX),
            None => warn!("injection device not in the device table, no pulses simulated"),
        }
    }

    let peer = SamplingPeer::new(
        ic.adc_node,
        config.memory_map.adc_base,
        ic.sample_count,
        ic.ring_slots,
        orbit,
    );
    let rfm = SimulatedRfm::default()
        .with_peer(peer)
        .with_journal_capacity(0)
        .with_pace(Duration::from_micros(args.pace_us));
    let scratch = (ic.sample_count * ADC_SAMPLE_WIDTH)
        .max(CONTROL_BLOCK_SIZE)
        .max(DAC_BUFFER_SIZE * 4);
    let dma = HeapDma::new(scratch);
    (rfm, dma)
}

/// Setup tracing subscriber.
fn setup_tracing(level: Level, json: bool) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
