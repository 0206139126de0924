//! faultmon-merge - joins an observation log with an injection log.
//!
//! Standalone post-processing step: labels every observation row with the
//! injections active at its timestamp. Works on finalized logs only, so it
//! can be re-run at any time and yields byte-identical output.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use faultmon::merge;

/// Merge monitored data with injections into one labeled file.
#[derive(Parser)]
#[command(
    name = "faultmon-merge",
    about = "Merge observation and injection logs into a labeled CSV",
    version
)]
struct Args {
    /// Location of the observation (monitor) file.
    #[arg(short, long)]
    monfile: PathBuf,

    /// Location of the injection file.
    #[arg(short, long)]
    injfile: PathBuf,

    /// Location of the output file.
    #[arg(short, long, default_value = "monitor_labeled.csv")]
    outfile: PathBuf,

    /// Name of the timestamp column in the monitor file.
    #[arg(short, long, default_value = "timestamp")]
    timetag: String,

    /// Verbosity: 0 silent, 1 summary, 2 detail.
    #[arg(short, long, default_value = "1")]
    verbose: u8,
}

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

    info!(
        "Merging {:?} with {:?} into {:?}",
        args.monfile, args.injfile, args.outfile
    );

    match merge::merge_files(&args.monfile, &args.injfile, &args.outfile, &args.timetag) {
        Ok(stats) => {
            info!(
                "{} observations, {} injection intervals, {} rows labeled",
                stats.observations, stats.intervals, stats.labeled
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Merge failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
