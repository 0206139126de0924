//! Post-run merge of the observation and injection logs.
//!
//! The merge is a pure function of the two CSV files, so it can run as an
//! independent, replayable post-processing step: parse the injection log
//! into intervals, then label every observation row whose timestamp falls
//! inside an interval (inclusive start, exclusive end).

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::inject::EventKind;

/// Error type for the merge step. Inconsistent log content (orphan events,
/// unknown names) is recovered with warnings; only unusable inputs fail.
#[derive(Debug)]
pub enum MergeError {
    /// I/O error reading an input or writing the output.
    Io(io::Error),
    /// The observation log has no recognizable timestamp column.
    MissingTimestamp { tried: Vec<String> },
    /// The observation log is empty (not even a header).
    EmptyObservationLog,
}

impl std::fmt::Display for MergeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MergeError::Io(e) => write!(f, "I/O error: {}", e),
            MergeError::MissingTimestamp { tried } => {
                write!(f, "no timestamp column (tried {})", tried.join(", "))
            }
            MergeError::EmptyObservationLog => write!(f, "observation log is empty"),
        }
    }
}

impl std::error::Error for MergeError {}

impl From<io::Error> for MergeError {
    fn from(e: io::Error) -> Self {
        MergeError::Io(e)
    }
}

/// A closed (or run-end-bounded) injection interval reconstructed from
/// start/end event rows.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionInterval {
    pub name: String,
    pub start_ms: i64,
    /// Exclusive end. `i64::MAX` when the log had a start with no matching
    /// end: the injection is treated as open-ended to the end of the run.
    pub end_ms: i64,
}

impl InjectionInterval {
    /// Whether the injection was active at observation time `t`
    /// (inclusive start, exclusive end).
    pub fn covers(&self, t: i64) -> bool {
        self.start_ms <= t && t < self.end_ms
    }
}

/// Reconstructs injection intervals from event rows `(name, kind, timestamp)`.
///
/// An end or abort with no open start is skipped with a warning. A start
/// with no end becomes open-ended. Rows are expected in occurrence order,
/// as the harness writes them.
pub fn build_intervals(events: &[(String, EventKind, i64)]) -> Vec<InjectionInterval> {
    let mut open: Vec<(String, i64)> = Vec::new();
    let mut intervals = Vec::new();

    for (name, kind, timestamp) in events {
        match kind {
            EventKind::Start => {
                if open.iter().any(|(n, _)| n == name) {
                    warn!("Injection log: '{}' started twice without an end", name);
                    continue;
                }
                open.push((name.clone(), *timestamp));
            }
            EventKind::End | EventKind::Aborted => {
                match open.iter().position(|(n, _)| n == name) {
                    Some(i) => {
                        let (name, start_ms) = open.remove(i);
                        intervals.push(InjectionInterval {
                            name,
                            start_ms,
                            end_ms: *timestamp,
                        });
                    }
                    // A failed start attempt logs a lone `aborted` row;
                    // it never covers any observation.
                    None if *kind == EventKind::Aborted => {}
                    None => {
                        warn!("Injection log: '{}' ended without a start, skipped", name);
                    }
                }
            }
        }
    }

    for (name, start_ms) in open {
        warn!(
            "Injection log: '{}' has no end event, treating as open-ended",
            name
        );
        intervals.push(InjectionInterval {
            name,
            start_ms,
            end_ms: i64::MAX,
        });
    }

    intervals.sort_by_key(|i| (i.start_ms, i.name.clone()));
    intervals
}

/// The injector names active at time `t`, in interval order.
pub fn active_at(intervals: &[InjectionInterval], t: i64) -> Vec<&str> {
    intervals
        .iter()
        .filter(|i| i.covers(t))
        .map(|i| i.name.as_str())
        .collect()
}

/// Outcome counters for one merge run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub observations: usize,
    pub intervals: usize,
    pub labeled: usize,
}

/// Timestamp column candidates, tried in order after the configured tag.
const TIMESTAMP_FALLBACKS: [&str; 3] = ["_timestamp", "timestamp", "time"];

fn timestamp_index(header: &[String], tag: &str) -> Result<usize, MergeError> {
    let mut tried = vec![tag.to_string()];
    if let Some(i) = header.iter().position(|h| h == tag) {
        return Ok(i);
    }
    for fallback in TIMESTAMP_FALLBACKS {
        tried.push(fallback.to_string());
        if let Some(i) = header.iter().position(|h| h == fallback) {
            return Ok(i);
        }
    }
    tried.dedup();
    Err(MergeError::MissingTimestamp { tried })
}

fn parse_csv_line(line: &str) -> Vec<String> {
    line.split(',').map(|c| c.trim().to_string()).collect()
}

/// Parses the injection log CSV (`name,event,timestamp`) into event tuples.
/// Malformed rows are skipped with a warning.
pub fn read_injection_events(path: &Path) -> Result<Vec<(String, EventKind, i64)>, MergeError> {
    let content = std::fs::read_to_string(path)?;
    let mut events = Vec::new();

    for (number, line) in content.lines().enumerate().skip(1) {
        if line.trim().is_empty() {
            continue;
        }
        let cells = parse_csv_line(line);
        if cells.len() != 3 {
            warn!("Injection log line {}: expected 3 cells, skipped", number + 1);
            continue;
        }
        let kind = match cells[1].parse::<EventKind>() {
            Ok(kind) => kind,
            Err(e) => {
                warn!("Injection log line {}: {}, skipped", number + 1, e);
                continue;
            }
        };
        let timestamp = match cells[2].parse::<i64>() {
            Ok(t) => t,
            Err(_) => {
                warn!(
                    "Injection log line {}: bad timestamp '{}', skipped",
                    number + 1,
                    cells[2]
                );
                continue;
            }
        };
        events.push((cells[0].clone(), kind, timestamp));
    }
    Ok(events)
}

/// Merges the observation log and the injection log into a labeled CSV.
///
/// The output repeats every observation column and appends `injected`
/// (0 or 1) and `active_injectors` (`;`-joined names, empty when none).
/// Rows are ordered by timestamp. Running the merge twice over unmodified
/// inputs yields byte-identical output.
pub fn merge_files(
    observation_log: &Path,
    injection_log: &Path,
    output: &Path,
    timestamp_tag: &str,
) -> Result<MergeStats, MergeError> {
    let events = read_injection_events(injection_log)?;
    let intervals = build_intervals(&events);

    let content = std::fs::read_to_string(observation_log)?;
    let mut lines = content.lines();
    let header = match lines.next() {
        Some(line) if !line.trim().is_empty() => parse_csv_line(line),
        _ => return Err(MergeError::EmptyObservationLog),
    };
    let ts_index = timestamp_index(&header, timestamp_tag)?;

    // Parse rows, keeping only those with a usable timestamp.
    let mut rows: Vec<(i64, Vec<String>)> = Vec::new();
    for (number, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let cells = parse_csv_line(line);
        if cells.len() <= ts_index {
            warn!("Observation log line {}: too few cells, skipped", number + 2);
            continue;
        }
        match cells[ts_index].parse::<i64>() {
            Ok(t) => rows.push((t, cells)),
            Err(_) => {
                warn!(
                    "Observation log line {}: bad timestamp '{}', skipped",
                    number + 2,
                    cells[ts_index]
                );
            }
        }
    }
    rows.sort_by_key(|(t, _)| *t);

    let mut stats = MergeStats {
        observations: rows.len(),
        intervals: intervals.len(),
        labeled: 0,
    };

    let file = File::create(output)?;
    let mut writer = BufWriter::new(file);
    writeln!(
        writer,
        "{},injected,active_injectors",
        header.join(",")
    )?;
    for (t, cells) in rows {
        let active = active_at(&intervals, t);
        if !active.is_empty() {
            stats.labeled += 1;
        }
        writeln!(
            writer,
            "{},{},{}",
            cells.join(","),
            if active.is_empty() { 0 } else { 1 },
            active.join(";")
        )?;
    }
    writer.flush()?;

    info!(
        "Merged {} observations against {} injection intervals, {} labeled",
        stats.observations, stats.intervals, stats.labeled
    );
    Ok(stats)
}
