//! Injector configuration: built-in defaults and JSON spec files.
//!
//! A JSON file declares one or more injectors:
//!
//! ```json
//! [
//!   { "type": "CPU", "name": "cpu_burn", "rate": 0.1 },
//!   { "type": "Mem", "duration_ms": 2000, "cooldown_ms": 10000 }
//! ]
//! ```
//!
//! Fields left out fall back to the scalar defaults from the command line.
//! Type names accept the aliases the original tooling used (CPU/Proc,
//! Mem/RAM, Disk/SSD, Spin).

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::inject::{InjectorKind, InjectorSpec};

/// Error type for configuration problems. All fatal, surfaced before the
/// run starts.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// A numeric parameter is outside its valid range.
    Invalid(String),
    /// Unrecognized injector type string.
    UnknownKind(String),
    /// Two injector specs share a name.
    DuplicateName(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "I/O error: {}", e),
            ConfigError::Json(e) => write!(f, "malformed injector JSON: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
            ConfigError::UnknownKind(kind) => write!(f, "unknown injector type '{}'", kind),
            ConfigError::DuplicateName(name) => {
                write!(f, "duplicate injector name '{}'", name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}

/// Scalar injection parameters from the command line, used for every spec
/// field a JSON entry leaves out.
#[derive(Debug, Clone, Copy)]
pub struct InjectionDefaults {
    pub rate: f64,
    pub duration_ms: u64,
    pub cooldown_ms: u64,
}

/// One entry of the injector JSON file, before defaults are applied.
#[derive(Debug, Deserialize)]
struct RawInjectorSpec {
    #[serde(rename = "type")]
    kind: String,
    name: Option<String>,
    rate: Option<f64>,
    duration_ms: Option<u64>,
    cooldown_ms: Option<u64>,
}

fn parse_kind(raw: &str) -> Result<InjectorKind, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "memory" | "ram" | "memoryusage" | "mem" | "memorystress" => {
            Ok(InjectorKind::MemoryStress)
        }
        "disk" | "ssd" | "diskmemoryusage" | "diskstress" => Ok(InjectorKind::DiskStress),
        "cpu" | "proc" | "cpuusage" | "cpustress" => Ok(InjectorKind::CpuStress),
        "spin" | "spinloop" => Ok(InjectorKind::Spin),
        other => Err(ConfigError::UnknownKind(other.to_string())),
    }
}

fn validate_spec(spec: &InjectorSpec) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&spec.rate) {
        return Err(ConfigError::Invalid(format!(
            "injector '{}': rate {} outside [0,1]",
            spec.name, spec.rate
        )));
    }
    if spec.duration_ms == 0 {
        return Err(ConfigError::Invalid(format!(
            "injector '{}': duration must be positive",
            spec.name
        )));
    }
    Ok(())
}

fn check_unique_names(specs: &[InjectorSpec]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(ConfigError::DuplicateName(spec.name.clone()));
        }
    }
    Ok(())
}

/// The full built-in injector set with the scalar defaults applied.
pub fn builtin_injector_specs(
    defaults: &InjectionDefaults,
) -> Result<Vec<InjectorSpec>, ConfigError> {
    let kinds = [
        InjectorKind::CpuStress,
        InjectorKind::MemoryStress,
        InjectorKind::DiskStress,
        InjectorKind::Spin,
    ];
    let specs: Vec<InjectorSpec> = kinds
        .into_iter()
        .map(|kind| InjectorSpec {
            name: kind.as_str().to_string(),
            kind,
            rate: defaults.rate,
            duration_ms: defaults.duration_ms,
            cooldown_ms: defaults.cooldown_ms,
        })
        .collect();
    for spec in &specs {
        validate_spec(spec)?;
    }
    Ok(specs)
}

/// Loads injector specs from a JSON file, applying the scalar defaults to
/// any omitted field. A name defaults to the injector type's identifier.
pub fn load_injector_specs(
    path: &Path,
    defaults: &InjectionDefaults,
) -> Result<Vec<InjectorSpec>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let raw: Vec<RawInjectorSpec> = serde_json::from_str(&content)?;

    let mut specs = Vec::with_capacity(raw.len());
    for entry in raw {
        let kind = parse_kind(&entry.kind)?;
        let spec = InjectorSpec {
            name: entry.name.unwrap_or_else(|| kind.as_str().to_string()),
            kind,
            rate: entry.rate.unwrap_or(defaults.rate),
            duration_ms: entry.duration_ms.unwrap_or(defaults.duration_ms),
            cooldown_ms: entry.cooldown_ms.unwrap_or(defaults.cooldown_ms),
        };
        validate_spec(&spec)?;
        info!(
            "Injector from JSON: {} ({}), rate={}, duration={} ms, cooldown={} ms",
            spec.name,
            spec.kind.as_str(),
            spec.rate,
            spec.duration_ms,
            spec.cooldown_ms
        );
        specs.push(spec);
    }

    if specs.is_empty() {
        return Err(ConfigError::Invalid(
            "injector JSON declares no injectors".into(),
        ));
    }
    check_unique_names(&specs)?;
    Ok(specs)
}
