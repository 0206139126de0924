//! In-memory observation buffer with windowed flushing to a CSV sink.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::sampler::Observation;

/// Multiple of the window size the buffer may grow to while the sink keeps
/// failing. Beyond this the run is aborted rather than exhausting memory.
const CEILING_FACTOR: usize = 64;

/// Destination for flushed observations.
///
/// The buffer retries failed writes on the next flush trigger, so an
/// implementation must either write all given observations or none.
pub trait ObservationSink {
    fn write_all(&mut self, observations: &[Observation]) -> io::Result<()>;
}

/// Raw append target of the CSV sink.
///
/// Abstracted from `File` so the failure handling can be exercised with an
/// in-memory double. `truncate_to` undoes a partially applied append.
pub trait AppendTarget {
    /// Current end-of-data position.
    fn position(&mut self) -> io::Result<u64>;

    /// Appends the bytes at the end. May leave partial data on error.
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Discards everything past `len`.
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl AppendTarget for File {
    fn position(&mut self) -> io::Result<u64> {
        self.seek(SeekFrom::End(0))
    }

    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len)).map(|_| ())
    }
}

/// Append-only CSV sink over any [`AppendTarget`].
///
/// The header is derived from the first flushed observation: `seq` and
/// `timestamp` columns followed by one column per metric field. Later rows
/// are mapped onto that header by field name; a missing field renders as an
/// empty cell, an unexpected field is dropped with a warning.
///
/// A batch is formatted in memory and appended in one call; on failure any
/// partial bytes are truncated away, so the all-or-none contract of
/// [`ObservationSink`] holds and the buffer's retry cannot duplicate rows.
pub struct CsvSink<T: AppendTarget> {
    target: T,
    header: Option<Vec<String>>,
}

/// The production sink, backed by a file.
pub type CsvObservationSink = CsvSink<File>;

impl CsvSink<File> {
    /// Creates (or truncates) the output file. Failing here is a
    /// configuration error surfaced before the run starts.
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
        Ok(Self::with_target(file))
    }
}

impl<T: AppendTarget> CsvSink<T> {
    pub fn with_target(target: T) -> Self {
        Self {
            target,
            header: None,
        }
    }
}

impl<T: AppendTarget> ObservationSink for CsvSink<T> {
    fn write_all(&mut self, observations: &[Observation]) -> io::Result<()> {
        if observations.is_empty() {
            return Ok(());
        }

        let new_header = self.header.is_none();
        let header = self.header.get_or_insert_with(|| {
            let mut header = vec!["seq".to_string(), "timestamp".to_string()];
            header.extend(observations[0].fields.iter().map(|(n, _)| n.clone()));
            header
        });

        let mut batch = String::new();
        if new_header {
            batch.push_str(&header.join(","));
            batch.push('\n');
        }
        for obs in observations {
            let mut cells = Vec::with_capacity(header.len());
            cells.push(obs.seq.to_string());
            cells.push(obs.timestamp_ms.to_string());
            for name in &header[2..] {
                match obs.field(name) {
                    Some(value) => cells.push(value.to_string()),
                    // Failed probe on this tick: empty sentinel cell.
                    None => cells.push(String::new()),
                }
            }
            let known = obs.fields.iter().filter(|(n, _)| header.contains(n)).count();
            if known < obs.fields.len() {
                warn!(
                    "Observation {} has {} fields not in the header, dropped",
                    obs.seq,
                    obs.fields.len() - known
                );
            }
            batch.push_str(&cells.join(","));
            batch.push('\n');
        }

        let start = self.target.position()?;
        if let Err(e) = self.target.append(batch.as_bytes()) {
            if let Err(t) = self.target.truncate_to(start) {
                warn!("Could not roll back a partial flush: {}", t);
            }
            if new_header {
                self.header = None;
            }
            return Err(e);
        }
        Ok(())
    }
}

/// Error from the buffer itself (sink errors are retried, not surfaced here).
#[derive(Debug)]
pub enum BufferError {
    /// The sink kept failing until the buffer hit its hard memory ceiling.
    CeilingExceeded { buffered: usize, ceiling: usize },
}

impl std::fmt::Display for BufferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferError::CeilingExceeded { buffered, ceiling } => write!(
                f,
                "{} observations buffered, ceiling is {}: storage kept failing",
                buffered, ceiling
            ),
        }
    }
}

impl std::error::Error for BufferError {}

/// Fixed-capacity, append-only store of observations.
///
/// Reaching the window size triggers a flush. A failed flush keeps the data
/// and retries on the next trigger; only breaching the hard ceiling is fatal.
pub struct ObservationBuffer<S: ObservationSink> {
    window: usize,
    ceiling: usize,
    observations: Vec<Observation>,
    sink: S,
    flushes: u64,
    flushed_records: u64,
    last_error: Option<io::Error>,
}

impl<S: ObservationSink> ObservationBuffer<S> {
    pub fn new(window: usize, sink: S) -> Self {
        let window = window.max(1);
        Self {
            window,
            ceiling: window * CEILING_FACTOR,
            observations: Vec::with_capacity(window),
            sink,
            flushes: 0,
            flushed_records: 0,
            last_error: None,
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Number of successful flushes so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    /// Total observations persisted across all flushes.
    pub fn flushed_records(&self) -> u64 {
        self.flushed_records
    }

    /// The most recent flush error, if the last flush attempt failed.
    pub fn last_error(&self) -> Option<&io::Error> {
        self.last_error.as_ref()
    }

    /// Appends one observation, flushing when the window fills up.
    pub fn append(&mut self, obs: Observation) -> Result<(), BufferError> {
        self.observations.push(obs);
        if self.observations.len() >= self.window {
            if let Err(e) = self.flush() {
                warn!(
                    "Flush failed, retaining {} observations: {}",
                    self.observations.len(),
                    e
                );
            }
        }
        if self.observations.len() > self.ceiling {
            return Err(BufferError::CeilingExceeded {
                buffered: self.observations.len(),
                ceiling: self.ceiling,
            });
        }
        Ok(())
    }

    /// Writes all buffered observations in insertion order, then clears the
    /// buffer. A no-op on an empty buffer.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.observations.is_empty() {
            return Ok(());
        }
        match self.sink.write_all(&self.observations) {
            Ok(()) => {
                debug!("Flushed {} observations", self.observations.len());
                self.flushes += 1;
                self.flushed_records += self.observations.len() as u64;
                self.observations.clear();
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                self.last_error = Some(io::Error::new(e.kind(), e.to_string()));
                Err(e)
            }
        }
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::FieldValue;
    use std::cell::Cell;
    use std::rc::Rc;

    fn obs(seq: u64) -> Observation {
        Observation {
            seq,
            monotonic_ms: seq as i64 * 1_000,
            timestamp_ms: 1_000 + seq as i64 * 1_000,
            fields: vec![("metric".into(), FieldValue::Int(seq as i64))],
        }
    }

    /// Records flush sizes in memory.
    #[derive(Default)]
    struct RecordingSink {
        flush_sizes: Vec<usize>,
        records: Vec<u64>,
    }

    impl ObservationSink for RecordingSink {
        fn write_all(&mut self, observations: &[Observation]) -> io::Result<()> {
            self.flush_sizes.push(observations.len());
            self.records.extend(observations.iter().map(|o| o.seq));
            Ok(())
        }
    }

    /// Fails the first `failures` writes, then succeeds.
    struct FlakySink {
        failures: Cell<usize>,
        written: Rc<Cell<usize>>,
    }

    impl ObservationSink for FlakySink {
        fn write_all(&mut self, observations: &[Observation]) -> io::Result<()> {
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(io::Error::new(io::ErrorKind::Other, "disk on fire"));
            }
            self.written.set(self.written.get() + observations.len());
            Ok(())
        }
    }

    #[test]
    fn five_observations_window_two_flushes_as_2_2_1() {
        let mut buffer = ObservationBuffer::new(2, RecordingSink::default());
        for seq in 0..5 {
            buffer.append(obs(seq)).unwrap();
        }
        buffer.flush().unwrap();

        let sink = buffer.into_sink();
        assert_eq!(sink.flush_sizes, vec![2, 2, 1]);
        assert_eq!(sink.records, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn no_loss_no_duplication_across_window_sizes() {
        for window in [1usize, 3, 7, 10] {
            let n = 23u64;
            let mut buffer = ObservationBuffer::new(window, RecordingSink::default());
            for seq in 0..n {
                buffer.append(obs(seq)).unwrap();
            }
            buffer.flush().unwrap();
            assert!(buffer.flush_count() >= n.div_ceil(window as u64));
            assert_eq!(buffer.flushed_records(), n);
            let sink = buffer.into_sink();
            assert_eq!(sink.records, (0..n).collect::<Vec<_>>());
        }
    }

    #[test]
    fn empty_flush_is_a_noop() {
        let mut buffer = ObservationBuffer::new(4, RecordingSink::default());
        buffer.flush().unwrap();
        assert_eq!(buffer.flush_count(), 0);
        assert!(buffer.into_sink().flush_sizes.is_empty());
    }

    #[test]
    fn failed_flush_retains_data_and_retries() {
        let written = Rc::new(Cell::new(0));
        let sink = FlakySink {
            failures: Cell::new(1),
            written: written.clone(),
        };
        let mut buffer = ObservationBuffer::new(2, sink);

        buffer.append(obs(0)).unwrap();
        buffer.append(obs(1)).unwrap(); // triggers a failing flush
        assert_eq!(buffer.len(), 2);
        assert!(buffer.last_error().is_some());

        buffer.append(obs(2)).unwrap(); // next trigger succeeds
        assert_eq!(buffer.len(), 0);
        assert_eq!(written.get(), 3);
        assert!(buffer.last_error().is_none());
    }

    #[test]
    fn persistent_failure_hits_the_ceiling() {
        let sink = FlakySink {
            failures: Cell::new(usize::MAX),
            written: Rc::new(Cell::new(0)),
        };
        let mut buffer = ObservationBuffer::new(1, sink);
        let mut fatal = None;
        for seq in 0..200 {
            if let Err(e) = buffer.append(obs(seq)) {
                fatal = Some(e);
                break;
            }
        }
        match fatal {
            Some(BufferError::CeilingExceeded { ceiling, .. }) => {
                assert_eq!(ceiling, CEILING_FACTOR)
            }
            None => panic!("expected the ceiling to be enforced"),
        }
    }

    /// Applies half of each failing append before erroring, like a disk
    /// filling up mid-batch.
    struct FlakyTarget {
        data: Vec<u8>,
        failures: usize,
    }

    impl AppendTarget for FlakyTarget {
        fn position(&mut self) -> io::Result<u64> {
            Ok(self.data.len() as u64)
        }

        fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
            if self.failures > 0 {
                self.failures -= 1;
                self.data.extend_from_slice(&bytes[..bytes.len() / 2]);
                return Err(io::Error::new(io::ErrorKind::WriteZero, "device full"));
            }
            self.data.extend_from_slice(bytes);
            Ok(())
        }

        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn failed_csv_flush_rolls_back_so_retry_does_not_duplicate_rows() {
        let sink = CsvSink::with_target(FlakyTarget {
            data: Vec::new(),
            failures: 1,
        });
        let mut buffer = ObservationBuffer::new(2, sink);
        buffer.append(obs(0)).unwrap();
        buffer.append(obs(1)).unwrap(); // flush fails, partial bytes rolled back
        assert!(buffer.last_error().is_some());
        buffer.append(obs(2)).unwrap(); // retry writes the whole batch once

        let content = String::from_utf8(buffer.into_sink().target.data).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines, vec![
            "seq,timestamp,metric",
            "0,1000,0",
            "1,2000,1",
            "2,3000,2",
        ]);
    }

    #[test]
    fn csv_sink_writes_header_rows_and_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("obs.csv");
        let mut sink = CsvObservationSink::create(&path).unwrap();

        let full = obs(0);
        let missing_field = Observation {
            fields: Vec::new(),
            ..obs(1)
        };
        sink.write_all(&[full, missing_field]).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "seq,timestamp,metric");
        assert_eq!(lines[1], "0,1000,0");
        assert_eq!(lines[2], "1,2000,"); // empty sentinel cell
    }
}
