//! Probes that sample device state.
//!
//! A probe reads one source (usually a `/proc` file) and returns a small set
//! of named metric fields. Probes fail independently: one broken probe must
//! never prevent the others from being sampled (see `Sampler`).

pub mod procfs;
pub mod traits;

pub use procfs::{CpuStatProbe, LoadAvgProbe, MemInfoProbe};
pub use traits::{FileSystem, MockFs, RealFs};

use std::sync::Arc;

use tracing::info;

/// A single sampled metric value. Rendered with `Display` into a CSV cell.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{}", v),
            FieldValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Error type for probe failures.
#[derive(Debug)]
pub enum ProbeError {
    /// I/O error reading the probe's source.
    Io(std::io::Error),
    /// Source content did not parse.
    Parse(String),
    /// Probe exceeded its grace budget and its result was discarded.
    Timeout { elapsed_ms: u64, grace_ms: u64 },
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeError::Io(e) => write!(f, "I/O error: {}", e),
            ProbeError::Parse(msg) => write!(f, "parse error: {}", msg),
            ProbeError::Timeout { elapsed_ms, grace_ms } => {
                write!(f, "probe took {} ms, grace is {} ms", elapsed_ms, grace_ms)
            }
        }
    }
}

impl std::error::Error for ProbeError {}

impl From<std::io::Error> for ProbeError {
    fn from(e: std::io::Error) -> Self {
        ProbeError::Io(e)
    }
}

/// A source of device metrics sampled once per tick.
///
/// `Send + Sync` because the sampler runs each read on a worker thread so a
/// blocked probe cannot stall the tick schedule.
pub trait Probe: Send + Sync {
    /// Short identifier used as the field-name prefix and in failure logs.
    fn name(&self) -> &str;

    /// Whether the probe's source can be read on this machine.
    fn available(&self) -> bool;

    /// Reads the source and returns named metric fields, in a stable order.
    fn sample(&self) -> Result<Vec<(String, FieldValue)>, ProbeError>;
}

/// All built-in probes, without availability filtering.
pub fn builtin_probes<F: FileSystem + Clone + 'static>(
    fs: F,
    proc_path: &str,
) -> Vec<Arc<dyn Probe>> {
    vec![
        Arc::new(LoadAvgProbe::new(fs.clone(), proc_path)),
        Arc::new(MemInfoProbe::new(fs.clone(), proc_path)),
        Arc::new(CpuStatProbe::new(fs, proc_path)),
    ]
}

/// Filters probes down to those whose source is readable on this machine,
/// logging what was kept and what was dropped.
pub fn available_probes(probes: Vec<Arc<dyn Probe>>) -> Vec<Arc<dyn Probe>> {
    let total = probes.len();
    let available: Vec<Arc<dyn Probe>> = probes.into_iter().filter(|p| p.available()).collect();
    for probe in &available {
        info!("Probe available: {}", probe.name());
    }
    if available.len() < total {
        info!(
            "{} of {} probes available on this machine",
            available.len(),
            total
        );
    }
    available
}
