//! faultmon - measurement and fault-injection harness.
//!
//! Samples device metrics every interval for a fixed number of observations,
//! buffering them in memory and flushing to CSV, while an independent
//! probabilistic schedule starts and stops synthetic fault injections.
//! At shutdown the two logs can be merged into one labeled timeline.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info, warn};
use tracing_subscriber::EnvFilter;

use faultmon::buffer::{CsvObservationSink, ObservationBuffer};
use faultmon::config::{self, InjectionDefaults};
use faultmon::inject::{EventKind, InjectionLog, InjectorRegistry, load::build_mechanism};
use faultmon::merge;
use faultmon::probe::{self, RealFs};
use faultmon::run::{RunConfig, RunCoordinator};
use faultmon::sampler::Sampler;
use faultmon::scheduler::InjectionScheduler;
use faultmon::util::{self, SystemClock};

/// Measurement and fault-injection harness.
#[derive(Parser)]
#[command(name = "faultmon", about = "Measurement and fault-injection harness", version)]
struct Args {
    /// Location of the observation output file.
    #[arg(short, long, default_value = "test.csv")]
    outfile: PathBuf,

    /// Interval in ms between two observations.
    #[arg(short, long, default_value = "1000")]
    interval: u64,

    /// Number of observations before stopping.
    #[arg(short, long, default_value = "15")]
    nobs: u64,

    /// Number of observations to keep in RAM before saving to file.
    #[arg(short, long, default_value = "10")]
    wobs: usize,

    /// Duration in ms of an injection.
    #[arg(long = "inj-duration", default_value = "1000")]
    inj_duration: u64,

    /// Injection rate (probability an idle injector starts on a tick).
    #[arg(long = "inj-rate", default_value = "0.05")]
    inj_rate: f64,

    /// Cooldown in ms after an injection ends.
    #[arg(long = "inj-cooldown", default_value = "5000")]
    inj_cooldown: u64,

    /// Path to a JSON file declaring injectors (overrides the scalar
    /// defaults per-injector). Without it the built-in set is used.
    #[arg(long = "inj-json")]
    inj_json: Option<PathBuf>,

    /// Merge the observation and injection logs at shutdown.
    /// Disable with --merge=false.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    merge: bool,

    /// Append a timestamp to the output file names.
    /// Disable with --timestamp-names=false.
    #[arg(long = "timestamp-names", default_value_t = true, action = clap::ArgAction::Set)]
    timestamp_names: bool,

    /// Seed for the injection schedule. Random when omitted.
    #[arg(long)]
    seed: Option<u64>,

    /// Path to the proc filesystem (for testing).
    #[arg(long, default_value = "/proc")]
    proc_path: String,

    /// Verbosity: 0 silent, 1 summary, 2 per-tick detail.
    #[arg(short, long, default_value = "1")]
    verbose: u8,
}

/// Maps the verbosity level onto a tracing filter.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("faultmon={}", level).parse().unwrap());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    let run_config = RunConfig {
        interval_ms: args.interval,
        observations: args.nobs,
    };
    if let Err(msg) = run_config.validate() {
        error!("Invalid configuration: {}", msg);
        return ExitCode::FAILURE;
    }
    if args.wobs == 0 {
        error!("Invalid configuration: window size must be positive");
        return ExitCode::FAILURE;
    }

    // Resolve injector specs before touching any output file.
    let defaults = InjectionDefaults {
        rate: args.inj_rate,
        duration_ms: args.inj_duration,
        cooldown_ms: args.inj_cooldown,
    };
    let specs = match &args.inj_json {
        Some(path) => config::load_injector_specs(path, &defaults),
        None => config::builtin_injector_specs(&defaults),
    };
    let specs = match specs {
        Ok(specs) => specs,
        Err(e) => {
            error!("Injector configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Output naming: `test.csv` -> `test_<ts>.csv` + `test_inj_<ts>.csv`.
    let suffix = if args.timestamp_names {
        util::timestamp_suffix(util::current_ms())
    } else {
        String::new()
    };
    let obs_path = util::with_suffix(&args.outfile, &suffix);
    let inj_path = util::with_suffix(&args.outfile, &format!("_inj{}", suffix));
    let merged_path = util::with_suffix(&args.outfile, &format!("_labeled{}", suffix));

    let sink = match CsvObservationSink::create(&obs_path) {
        Ok(sink) => sink,
        Err(e) => {
            error!("Cannot write observation log {:?}: {}", obs_path, e);
            return ExitCode::FAILURE;
        }
    };
    let log = match InjectionLog::create(&inj_path) {
        Ok(log) => log,
        Err(e) => {
            error!("Cannot write injection log {:?}: {}", inj_path, e);
            return ExitCode::FAILURE;
        }
    };

    info!("faultmon {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: {} observations every {} ms, window={}, output={:?}",
        args.nobs, args.interval, args.wobs, obs_path
    );
    info!(
        "Injection defaults: duration={} ms, rate={:.3}, cooldown={} ms, {} injectors",
        args.inj_duration,
        args.inj_rate,
        args.inj_cooldown,
        specs.len()
    );

    // Probes available on this machine.
    let probes = probe::available_probes(probe::builtin_probes(RealFs::new(), &args.proc_path));
    if probes.is_empty() {
        error!("No probes available, nothing to sample");
        return ExitCode::FAILURE;
    }
    // A probe slower than one interval would starve the tick schedule.
    let grace = Duration::from_millis(args.interval);
    let sampler = Sampler::new(probes, grace);

    let mut registry = InjectorRegistry::new();
    for spec in specs {
        let mechanism = build_mechanism(spec.kind);
        if let Err(e) = registry.register(spec, mechanism) {
            error!("Injector configuration: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let seed = args.seed.unwrap_or_else(rand::random);
    info!("Injection schedule seed: {}", seed);
    let scheduler = InjectionScheduler::new(&registry, seed);

    // Graceful shutdown on Ctrl-C.
    let cancel = Arc::new(AtomicBool::new(false));
    let c = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        c.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    let coordinator = RunCoordinator::new(
        run_config,
        SystemClock::new(),
        sampler,
        ObservationBuffer::new(args.wobs, sink),
        registry,
        scheduler,
        log,
        cancel,
    );

    let output = match coordinator.run() {
        Ok(output) => output,
        Err(e) => {
            error!("Run failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(e) = &output.summary.flush_error {
        error!("Observation log is incomplete: {}", e);
        return ExitCode::FAILURE;
    }

    for name in output.registry.specs().map(|s| s.name.clone()) {
        let started = output.log.events_for(&name, EventKind::Start).len();
        let completed = output.log.events_for(&name, EventKind::End).len();
        info!(
            "Injector '{}': {} started, {} ran to completion",
            name, started, completed
        );
    }

    if args.merge {
        match merge::merge_files(&obs_path, &inj_path, &merged_path, "timestamp") {
            Ok(stats) => info!(
                "Merged output {:?}: {} observations, {} labeled",
                merged_path, stats.observations, stats.labeled
            ),
            Err(e) => {
                error!("Merge failed: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
