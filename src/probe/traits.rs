//! Filesystem abstraction so probes can be tested without a real `/proc`.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Read-only filesystem operations needed by the built-in probes.
pub trait FileSystem: Send + Sync {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

/// In-memory filesystem for tests and non-Linux development machines.
#[derive(Debug, Default, Clone)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers file content under the given path.
    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    /// A mock `/proc` with plausible content for every built-in probe.
    pub fn typical_system() -> Self {
        Self::new()
            .with_file("/proc/loadavg", "0.52 0.58 0.59 1/257 31159\n")
            .with_file(
                "/proc/meminfo",
                "MemTotal:        3882924 kB\n\
                 MemFree:         1319908 kB\n\
                 MemAvailable:    2634580 kB\n\
                 SwapTotal:       1048572 kB\n\
                 SwapFree:        1048572 kB\n",
            )
            .with_file(
                "/proc/stat",
                "cpu  84650 120 32907 4218475 3481 0 1090 0 0 0\n\
                 cpu0 21288 27 8331 1054059 847 0 514 0 0 0\n",
            )
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{:?}", path)))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }
}
