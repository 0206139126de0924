//! Append-only injection event log.
//!
//! Rows are written as they occur, one per start/stop transition, so the log
//! on disk is usable by the merge step even after a crash mid-run.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use tracing::warn;

/// Transition type of an injection event row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Injection engaged.
    Start,
    /// Injection ran its full duration and was stopped.
    End,
    /// Injection was cut short (cancellation) or failed to engage at all.
    Aborted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::End => "end",
            EventKind::Aborted => "aborted",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(EventKind::Start),
            "end" => Ok(EventKind::End),
            "aborted" => Ok(EventKind::Aborted),
            other => Err(format!("unknown event kind '{}'", other)),
        }
    }
}

/// One injection log row. `name` references an `InjectorSpec` by value.
#[derive(Debug, Clone, PartialEq)]
pub struct InjectionEvent {
    pub name: String,
    pub kind: EventKind,
    pub timestamp_ms: i64,
}

/// CSV header of the injection log.
pub const INJECTION_LOG_HEADER: &str = "name,event,timestamp";

/// Collects injection events in memory and, when file-backed, appends each
/// row to the CSV log immediately.
///
/// A row that fails to write is kept in memory and logged as a warning; the
/// run is never unwound for an injection-log write error.
pub struct InjectionLog {
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
    events: Vec<InjectionEvent>,
}

impl InjectionLog {
    /// Creates a file-backed log, writing the header up front. Failing here
    /// is a configuration error surfaced before the run starts.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", INJECTION_LOG_HEADER)?;
        writer.flush()?;
        Ok(Self {
            path: Some(path),
            writer: Some(writer),
            events: Vec::new(),
        })
    }

    /// In-memory log for tests and library use without persistence.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            writer: None,
            events: Vec::new(),
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    /// Appends one event, persisting it when file-backed.
    pub fn record(&mut self, event: InjectionEvent) {
        if let Some(writer) = self.writer.as_mut() {
            let row = format!(
                "{},{},{}",
                event.name,
                event.kind.as_str(),
                event.timestamp_ms
            );
            if let Err(e) = writeln!(writer, "{}", row).and_then(|_| writer.flush()) {
                warn!("Failed to append injection event '{}': {}", row, e);
            }
        }
        self.events.push(event);
    }

    pub fn events(&self) -> &[InjectionEvent] {
        &self.events
    }

    /// Events of one kind for one injector, in occurrence order.
    pub fn events_for(&self, name: &str, kind: EventKind) -> Vec<&InjectionEvent> {
        self.events
            .iter()
            .filter(|e| e.name == name && e.kind == kind)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_backed_log_appends_rows_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inj.csv");
        let mut log = InjectionLog::create(&path).unwrap();

        log.record(InjectionEvent {
            name: "cpu_stress".into(),
            kind: EventKind::Start,
            timestamp_ms: 1_000,
        });
        log.record(InjectionEvent {
            name: "cpu_stress".into(),
            kind: EventKind::End,
            timestamp_ms: 2_000,
        });

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec![
            "name,event,timestamp",
            "cpu_stress,start,1000",
            "cpu_stress,end,2000",
        ]);
        assert_eq!(log.events().len(), 2);
    }

    #[test]
    fn events_for_filters_by_name_and_kind() {
        let mut log = InjectionLog::in_memory();
        for (name, kind, ts) in [
            ("a", EventKind::Start, 0),
            ("b", EventKind::Start, 10),
            ("a", EventKind::End, 20),
        ] {
            log.record(InjectionEvent {
                name: name.into(),
                kind,
                timestamp_ms: ts,
            });
        }
        assert_eq!(log.events_for("a", EventKind::Start).len(), 1);
        assert_eq!(log.events_for("a", EventKind::End).len(), 1);
        assert_eq!(log.events_for("b", EventKind::End).len(), 0);
    }

    #[test]
    fn event_kind_round_trips_through_str() {
        for kind in [EventKind::Start, EventKind::End, EventKind::Aborted] {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("bogus".parse::<EventKind>().is_err());
    }
}
