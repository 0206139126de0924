//! Per-tick sampling of all registered probes into one `Observation`.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::probe::{FieldValue, Probe, ProbeError};

/// One sampled snapshot of device metrics.
///
/// Immutable once created; field order is meaningful and drives the CSV
/// header derivation on first flush.
#[derive(Debug, Clone)]
pub struct Observation {
    /// Tick index, strictly increasing across the run.
    pub seq: u64,
    /// Milliseconds since the run started (shared monotonic coordinate).
    pub monotonic_ms: i64,
    /// Wall-clock milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Metric name to value, in probe registration order.
    pub fields: Vec<(String, FieldValue)>,
}

impl Observation {
    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}

/// Invokes every probe once per tick and aggregates the results.
///
/// Probes fail independently: a failing or slow probe contributes no fields
/// to the observation (its cells render as the empty sentinel), and the
/// failure is logged. Each read runs on a worker thread and is waited on for
/// at most the grace budget, so a probe blocked in I/O delays its own tick
/// slot by the grace period and nothing more. An abandoned worker finishes
/// in the background and its late result is discarded.
pub struct Sampler {
    probes: Vec<Arc<dyn Probe>>,
    grace: Duration,
}

impl Sampler {
    pub fn new(probes: Vec<Arc<dyn Probe>>, grace: Duration) -> Self {
        Self { probes, grace }
    }

    pub fn probe_count(&self) -> usize {
        self.probes.len()
    }

    fn sample_with_grace(&self, probe: &Arc<dyn Probe>) -> Result<Vec<(String, FieldValue)>, ProbeError> {
        let (tx, rx) = mpsc::channel();
        let worker_probe = probe.clone();
        let started = Instant::now();
        std::thread::spawn(move || {
            let _ = tx.send(worker_probe.sample());
        });

        match rx.recv_timeout(self.grace) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ProbeError::Timeout {
                elapsed_ms: started.elapsed().as_millis() as u64,
                grace_ms: self.grace.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ProbeError::Io(std::io::Error::other("probe worker terminated")))
            }
        }
    }

    /// Samples all probes and produces the observation for this tick.
    pub fn tick(&self, seq: u64, monotonic_ms: i64, timestamp_ms: i64) -> Observation {
        let mut fields = Vec::new();

        for probe in &self.probes {
            match self.sample_with_grace(probe) {
                Ok(probe_fields) => fields.extend(probe_fields),
                Err(e) => {
                    warn!("Probe '{}' failed on tick {}: {}", probe.name(), seq, e);
                }
            }
        }

        debug!(
            "Tick {}: sampled {} fields from {} probes",
            seq,
            fields.len(),
            self.probes.len()
        );

        Observation {
            seq,
            monotonic_ms,
            timestamp_ms,
            fields,
        }
    }
}
