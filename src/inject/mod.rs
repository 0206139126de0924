//! Fault injectors and the registry that tracks which ones are active.

pub mod events;
pub mod load;

pub use events::{EventKind, InjectionEvent, InjectionLog};
pub use load::{CpuStress, DiskStress, MemoryStress, SpinLoop};

use serde::{Deserialize, Serialize};

/// Built-in fault mechanisms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectorKind {
    CpuStress,
    MemoryStress,
    DiskStress,
    Spin,
}

impl InjectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InjectorKind::CpuStress => "cpu_stress",
            InjectorKind::MemoryStress => "memory_stress",
            InjectorKind::DiskStress => "disk_stress",
            InjectorKind::Spin => "spin",
        }
    }
}

/// Immutable per-injector schedule parameters, unique by name for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorSpec {
    pub name: String,
    pub kind: InjectorKind,
    /// Probability in [0,1] that an injection is attempted on a decision tick.
    pub rate: f64,
    /// How long an injection, once started, remains active.
    pub duration_ms: u64,
    /// Minimum idle time after an injection ends before the next may start.
    pub cooldown_ms: u64,
}

/// Error type for injector operations.
#[derive(Debug)]
pub enum InjectError {
    /// Start requested for a name no spec was registered under.
    Unknown(String),
    /// Start requested while an injection of the same name is running.
    AlreadyActive(String),
    /// Two specs registered under the same name.
    Duplicate(String),
    /// The underlying fault mechanism failed to engage.
    Mechanism(String),
}

impl std::fmt::Display for InjectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InjectError::Unknown(name) => write!(f, "unknown injector '{}'", name),
            InjectError::AlreadyActive(name) => {
                write!(f, "injector '{}' is already active", name)
            }
            InjectError::Duplicate(name) => {
                write!(f, "injector '{}' registered twice", name)
            }
            InjectError::Mechanism(msg) => write!(f, "fault mechanism failed: {}", msg),
        }
    }
}

impl std::error::Error for InjectError {}

/// A fault mechanism that can be switched on and off.
///
/// `start` engages the fault (typically by spawning worker threads) and
/// returns quickly; `stop` disengages it and must be idempotent.
pub trait Injector: Send {
    fn start(&mut self) -> Result<(), InjectError>;
    fn stop(&mut self);
}

struct RegisteredInjector {
    spec: InjectorSpec,
    mechanism: Box<dyn Injector>,
    active: bool,
}

/// Holds the run's injector set and enforces at-most-one-active-per-name.
///
/// Registration order is preserved; the scheduler iterates entries by index
/// so a run with a fixed seed evaluates injectors in a fixed order.
#[derive(Default)]
pub struct InjectorRegistry {
    entries: Vec<RegisteredInjector>,
}

impl InjectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a spec together with its fault mechanism.
    /// Names must be unique.
    pub fn register(
        &mut self,
        spec: InjectorSpec,
        mechanism: Box<dyn Injector>,
    ) -> Result<(), InjectError> {
        if self.entries.iter().any(|e| e.spec.name == spec.name) {
            return Err(InjectError::Duplicate(spec.name));
        }
        self.entries.push(RegisteredInjector {
            spec,
            mechanism,
            active: false,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn spec(&self, index: usize) -> &InjectorSpec {
        &self.entries[index].spec
    }

    pub fn specs(&self) -> impl Iterator<Item = &InjectorSpec> {
        self.entries.iter().map(|e| &e.spec)
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.spec.name == name && e.active)
    }

    fn index_of(&self, name: &str) -> Result<usize, InjectError> {
        self.entries
            .iter()
            .position(|e| e.spec.name == name)
            .ok_or_else(|| InjectError::Unknown(name.to_string()))
    }

    /// Starts the named injector. Fails for unknown names and when an
    /// injection of the same name is already running.
    pub fn start(&mut self, name: &str) -> Result<(), InjectError> {
        let index = self.index_of(name)?;
        self.start_at(index)
    }

    /// Stops the named injector. Idempotent: stopping an inactive or
    /// already-stopped injector is a no-op.
    pub fn stop(&mut self, name: &str) -> Result<(), InjectError> {
        let index = self.index_of(name)?;
        self.stop_at(index);
        Ok(())
    }

    pub(crate) fn start_at(&mut self, index: usize) -> Result<(), InjectError> {
        let entry = &mut self.entries[index];
        if entry.active {
            return Err(InjectError::AlreadyActive(entry.spec.name.clone()));
        }
        entry.mechanism.start()?;
        entry.active = true;
        Ok(())
    }

    pub(crate) fn stop_at(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        if entry.active {
            entry.mechanism.stop();
            entry.active = false;
        }
    }

    /// Stops everything still running. Used on teardown.
    pub fn stop_all(&mut self) {
        for index in 0..self.entries.len() {
            self.stop_at(index);
        }
    }
}
