//! Clock abstraction and output-file naming helpers.

use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Reports the current wall-clock time in milliseconds since the Unix epoch.
pub fn current_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Abstraction for time so the run loop can be driven by a fake clock in tests.
///
/// `sleep` is part of the trait because the coordinator paces its ticks by
/// sleeping in slices; a manual clock advances its own time instead of
/// blocking, which keeps timing tests deterministic and instant.
pub trait Clock {
    /// Current wall-clock time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64;

    /// Waits for (or simulates) the given duration.
    fn sleep(&self, duration: Duration);
}

/// Production clock backed by `SystemTime` and `std::thread::sleep`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        current_ms()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Manually advanced clock for tests. `sleep` advances time instead of blocking.
#[derive(Debug)]
pub struct ManualClock {
    now_ms: Cell<i64>,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: Cell::new(start_ms),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration.as_millis() as i64);
    }
}

/// Inserts a suffix before the `.csv` extension (or appends it when the path
/// has no extension): `out/test.csv` + `_inj` -> `out/test_inj.csv`.
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("csv");
    path.with_file_name(format!("{}{}.{}", stem, suffix, ext))
}

/// Formats a wall-clock timestamp as a filename-safe suffix,
/// e.g. `_2024-05-01_13-22-07`.
pub fn timestamp_suffix(epoch_ms: i64) -> String {
    let dt = chrono::DateTime::from_timestamp_millis(epoch_ms).unwrap_or_default();
    dt.format("_%Y-%m-%d_%H-%M-%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_on_sleep() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.sleep(Duration::from_millis(250));
        assert_eq!(clock.now_ms(), 1_250);
        clock.advance(50);
        assert_eq!(clock.now_ms(), 1_300);
    }

    #[test]
    fn with_suffix_preserves_directory_and_extension() {
        let p = with_suffix(Path::new("out/test.csv"), "_inj");
        assert_eq!(p, PathBuf::from("out/test_inj.csv"));
    }

    #[test]
    fn with_suffix_handles_missing_extension() {
        let p = with_suffix(Path::new("data"), "_inj");
        assert_eq!(p, PathBuf::from("data_inj.csv"));
    }

    #[test]
    fn timestamp_suffix_is_filename_safe() {
        let s = timestamp_suffix(0);
        assert_eq!(s, "_1970-01-01_00-00-00");
        assert!(!s.contains(' '));
        assert!(!s.contains(':'));
    }
}
