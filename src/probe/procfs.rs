//! Built-in probes reading the Linux `/proc` filesystem.
//!
//! The parsers are pure functions over file content so they can be tested
//! with string inputs.

use std::path::PathBuf;

use crate::probe::traits::FileSystem;
use crate::probe::{FieldValue, Probe, ProbeError};

/// Parsed data from `/proc/loadavg`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
    pub running: u32,
    pub total: u32,
}

/// Parses `/proc/loadavg` content.
pub fn parse_loadavg(content: &str) -> Result<LoadAvg, ProbeError> {
    let parts: Vec<&str> = content.split_whitespace().collect();
    if parts.len() < 4 {
        return Err(ProbeError::Parse("invalid loadavg format".into()));
    }

    let load1 = parts[0]
        .parse()
        .map_err(|_| ProbeError::Parse("invalid load1".into()))?;
    let load5 = parts[1]
        .parse()
        .map_err(|_| ProbeError::Parse("invalid load5".into()))?;
    let load15 = parts[2]
        .parse()
        .map_err(|_| ProbeError::Parse("invalid load15".into()))?;

    // Format: running/total
    let (running, total) = if let Some((r, t)) = parts[3].split_once('/') {
        (r.parse().unwrap_or(0), t.parse().unwrap_or(0))
    } else {
        (0, 0)
    };

    Ok(LoadAvg {
        load1,
        load5,
        load15,
        running,
        total,
    })
}

/// Parsed data from `/proc/meminfo` (the subset the probe reports).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemInfo {
    pub total_kb: u64,
    pub free_kb: u64,
    pub available_kb: u64,
    pub swap_free_kb: u64,
}

/// Parses `/proc/meminfo` content. Values are in kB.
pub fn parse_meminfo(content: &str) -> Result<MemInfo, ProbeError> {
    let mut info = MemInfo::default();
    let mut seen_total = false;

    for line in content.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let value: u64 = rest
            .trim()
            .trim_end_matches(" kB")
            .trim()
            .parse()
            .unwrap_or(0);
        match key.trim() {
            "MemTotal" => {
                info.total_kb = value;
                seen_total = true;
            }
            "MemFree" => info.free_kb = value,
            "MemAvailable" => info.available_kb = value,
            "SwapFree" => info.swap_free_kb = value,
            _ => {}
        }
    }

    if !seen_total {
        return Err(ProbeError::Parse("meminfo missing MemTotal".into()));
    }
    Ok(info)
}

/// Aggregate CPU jiffies from the first line of `/proc/stat`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
}

/// Parses the `cpu` summary line of `/proc/stat`.
pub fn parse_cpu_stat(content: &str) -> Result<CpuStat, ProbeError> {
    let line = content
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| ProbeError::Parse("stat missing cpu line".into()))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse().unwrap_or(0))
        .collect();
    if fields.len() < 5 {
        return Err(ProbeError::Parse("invalid cpu line".into()));
    }

    Ok(CpuStat {
        user: fields[0],
        nice: fields[1],
        system: fields[2],
        idle: fields[3],
        iowait: fields[4],
    })
}

/// Probe for `/proc/loadavg`.
pub struct LoadAvgProbe<F: FileSystem> {
    fs: F,
    path: PathBuf,
}

impl<F: FileSystem> LoadAvgProbe<F> {
    pub fn new(fs: F, proc_path: &str) -> Self {
        Self {
            fs,
            path: PathBuf::from(proc_path).join("loadavg"),
        }
    }
}

impl<F: FileSystem> Probe for LoadAvgProbe<F> {
    fn name(&self) -> &str {
        "load"
    }

    fn available(&self) -> bool {
        self.fs.exists(&self.path)
    }

    fn sample(&self) -> Result<Vec<(String, FieldValue)>, ProbeError> {
        let content = self.fs.read_to_string(&self.path)?;
        let load = parse_loadavg(&content)?;
        Ok(vec![
            ("load_1m".into(), FieldValue::Float(load.load1)),
            ("load_5m".into(), FieldValue::Float(load.load5)),
            ("load_15m".into(), FieldValue::Float(load.load15)),
            (
                "procs_running".into(),
                FieldValue::Int(load.running as i64),
            ),
            ("procs_total".into(), FieldValue::Int(load.total as i64)),
        ])
    }
}

/// Probe for `/proc/meminfo`.
pub struct MemInfoProbe<F: FileSystem> {
    fs: F,
    path: PathBuf,
}

impl<F: FileSystem> MemInfoProbe<F> {
    pub fn new(fs: F, proc_path: &str) -> Self {
        Self {
            fs,
            path: PathBuf::from(proc_path).join("meminfo"),
        }
    }
}

impl<F: FileSystem> Probe for MemInfoProbe<F> {
    fn name(&self) -> &str {
        "mem"
    }

    fn available(&self) -> bool {
        self.fs.exists(&self.path)
    }

    fn sample(&self) -> Result<Vec<(String, FieldValue)>, ProbeError> {
        let content = self.fs.read_to_string(&self.path)?;
        let mem = parse_meminfo(&content)?;
        Ok(vec![
            ("mem_total_kb".into(), FieldValue::Int(mem.total_kb as i64)),
            ("mem_free_kb".into(), FieldValue::Int(mem.free_kb as i64)),
            (
                "mem_available_kb".into(),
                FieldValue::Int(mem.available_kb as i64),
            ),
            (
                "swap_free_kb".into(),
                FieldValue::Int(mem.swap_free_kb as i64),
            ),
        ])
    }
}

/// Probe for the aggregate CPU counters of `/proc/stat`.
///
/// Reports raw jiffies; rate computation is left to offline analysis so the
/// observation log stays a pure record of what was read.
pub struct CpuStatProbe<F: FileSystem> {
    fs: F,
    path: PathBuf,
}

impl<F: FileSystem> CpuStatProbe<F> {
    pub fn new(fs: F, proc_path: &str) -> Self {
        Self {
            fs,
            path: PathBuf::from(proc_path).join("stat"),
        }
    }
}

impl<F: FileSystem> Probe for CpuStatProbe<F> {
    fn name(&self) -> &str {
        "cpu"
    }

    fn available(&self) -> bool {
        self.fs.exists(&self.path)
    }

    fn sample(&self) -> Result<Vec<(String, FieldValue)>, ProbeError> {
        let content = self.fs.read_to_string(&self.path)?;
        let cpu = parse_cpu_stat(&content)?;
        Ok(vec![
            ("cpu_user".into(), FieldValue::Int(cpu.user as i64)),
            ("cpu_nice".into(), FieldValue::Int(cpu.nice as i64)),
            ("cpu_system".into(), FieldValue::Int(cpu.system as i64)),
            ("cpu_idle".into(), FieldValue::Int(cpu.idle as i64)),
            ("cpu_iowait".into(), FieldValue::Int(cpu.iowait as i64)),
        ])
    }
}
