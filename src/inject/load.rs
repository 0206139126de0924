//! Built-in load injectors.
//!
//! Each injector engages by spawning worker threads that generate load until
//! a shared stop flag is raised. The workers never sleep-wait on the run's
//! tick schedule; start/stop is the only coupling to the scheduler.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::warn;

use crate::inject::{InjectError, Injector, InjectorKind};

/// Running worker threads plus the flag that stops them.
struct StressHandle {
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl StressHandle {
    fn spawn<F>(count: usize, body: F) -> Self
    where
        F: Fn(Arc<AtomicBool>) + Send + Sync + Clone + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let workers = (0..count)
            .map(|_| {
                let stop = stop.clone();
                let body = body.clone();
                std::thread::spawn(move || body(stop))
            })
            .collect();
        Self { stop, workers }
    }

    fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        for worker in self.workers {
            if worker.join().is_err() {
                warn!("Stress worker panicked during shutdown");
            }
        }
    }
}

fn worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Spins one busy-loop worker per core.
#[derive(Default)]
pub struct CpuStress {
    handle: Option<StressHandle>,
}

impl CpuStress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Injector for CpuStress {
    fn start(&mut self) -> Result<(), InjectError> {
        if self.handle.is_some() {
            return Err(InjectError::Mechanism("cpu stress already running".into()));
        }
        self.handle = Some(StressHandle::spawn(worker_count(), |stop| {
            let mut x: u64 = 0x9e37_79b9;
            while !stop.load(Ordering::Relaxed) {
                x = x.wrapping_mul(x).rotate_left(7);
                std::hint::black_box(x);
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

/// Grows an allocation in steps up to a limit, then holds it.
pub struct MemoryStress {
    chunk_bytes: usize,
    limit_bytes: usize,
    handle: Option<StressHandle>,
}

impl MemoryStress {
    pub fn new() -> Self {
        // 4 MiB steps up to 256 MiB keeps the pressure noticeable on small
        // boards without tripping the kernel OOM killer outright.
        Self::with_limits(4 << 20, 256 << 20)
    }

    pub fn with_limits(chunk_bytes: usize, limit_bytes: usize) -> Self {
        Self {
            chunk_bytes,
            limit_bytes,
            handle: None,
        }
    }
}

impl Injector for MemoryStress {
    fn start(&mut self) -> Result<(), InjectError> {
        if self.handle.is_some() {
            return Err(InjectError::Mechanism(
                "memory stress already running".into(),
            ));
        }
        let chunk = self.chunk_bytes;
        let limit = self.limit_bytes;
        self.handle = Some(StressHandle::spawn(1, move |stop| {
            let mut hog: Vec<Vec<u8>> = Vec::new();
            let mut held = 0usize;
            while !stop.load(Ordering::Relaxed) {
                if held < limit {
                    let mut block = vec![0u8; chunk];
                    // Touch each page so the allocation is actually resident.
                    for page in block.chunks_mut(4096) {
                        page[0] = 1;
                    }
                    held += block.len();
                    hog.push(block);
                } else {
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
            drop(hog);
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

/// Churns temporary files with write-then-read passes of 1 MiB blocks.
pub struct DiskStress {
    workers: usize,
    blocks: usize,
    dir: Option<PathBuf>,
    handle: Option<StressHandle>,
}

impl DiskStress {
    pub fn new() -> Self {
        Self {
            workers: 2,
            blocks: 10,
            dir: None,
            handle: None,
        }
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }
}

impl Injector for DiskStress {
    fn start(&mut self) -> Result<(), InjectError> {
        if self.handle.is_some() {
            return Err(InjectError::Mechanism("disk stress already running".into()));
        }
        // Validate the scratch directory up front so an unusable target
        // surfaces as a start failure instead of silent dead workers.
        let dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir(),
        };
        tempfile::tempfile_in(&dir)
            .map_err(|e| InjectError::Mechanism(format!("scratch dir {:?}: {}", dir, e)))?;

        let blocks = self.blocks;
        self.handle = Some(StressHandle::spawn(self.workers, move |stop| {
            let block = vec![0xa5u8; 1 << 20];
            let mut readback = vec![0u8; 1 << 20];
            while !stop.load(Ordering::Relaxed) {
                let Ok(mut file) = tempfile::tempfile_in(&dir) else {
                    // Scratch space vanished mid-run; back off and retry.
                    std::thread::sleep(Duration::from_millis(50));
                    continue;
                };
                for _ in 0..blocks {
                    if stop.load(Ordering::Relaxed) || file.write_all(&block).is_err() {
                        break;
                    }
                }
                if file.seek(SeekFrom::Start(0)).is_ok() {
                    for _ in 0..blocks {
                        if stop.load(Ordering::Relaxed) || file.read_exact(&mut readback).is_err() {
                            break;
                        }
                    }
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

/// Single busy-loop thread. The lightest built-in fault.
#[derive(Default)]
pub struct SpinLoop {
    handle: Option<StressHandle>,
}

impl SpinLoop {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Injector for SpinLoop {
    fn start(&mut self) -> Result<(), InjectError> {
        if self.handle.is_some() {
            return Err(InjectError::Mechanism("spin loop already running".into()));
        }
        self.handle = Some(StressHandle::spawn(1, |stop| {
            while !stop.load(Ordering::Relaxed) {
                std::hint::spin_loop();
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.shutdown();
        }
    }
}

/// Builds the fault mechanism for a spec's kind.
pub fn build_mechanism(kind: InjectorKind) -> Box<dyn Injector> {
    match kind {
        InjectorKind::CpuStress => Box::new(CpuStress::new()),
        InjectorKind::MemoryStress => Box::new(MemoryStress::new()),
        InjectorKind::DiskStress => Box::new(DiskStress::new()),
        InjectorKind::Spin => Box::new(SpinLoop::new()),
    }
}
