//! The wall-clock run loop driving sampling and injection together.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::buffer::{BufferError, ObservationBuffer, ObservationSink};
use crate::inject::{InjectionLog, InjectorRegistry};
use crate::sampler::Sampler;
use crate::scheduler::InjectionScheduler;
use crate::util::Clock;

/// Validated run parameters.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Time between two observations.
    pub interval_ms: u64,
    /// Number of observations before stopping.
    pub observations: u64,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("interval must be positive".into());
        }
        if self.observations == 0 {
            return Err("number of observations must be positive".into());
        }
        Ok(())
    }
}

/// Fatal run errors. Per-tick failures are recovered in place; only resource
/// exhaustion unwinds the loop.
#[derive(Debug)]
pub enum RunError {
    Buffer(BufferError),
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Buffer(e) => write!(f, "observation buffer: {}", e),
        }
    }
}

impl std::error::Error for RunError {}

impl From<BufferError> for RunError {
    fn from(e: BufferError) -> Self {
        RunError::Buffer(e)
    }
}

/// What happened during a run, reported at shutdown.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub observations: u64,
    pub flushes: u64,
    pub flushed_records: u64,
    pub injection_events: usize,
    pub cancelled: bool,
    /// Set when the final mandatory flush failed; buffered data was lost at
    /// process exit and the run should not be treated as complete.
    pub flush_error: Option<String>,
}

/// Everything a finished run leaves behind.
pub struct RunOutput<S: ObservationSink> {
    pub summary: RunSummary,
    pub log: InjectionLog,
    pub registry: InjectorRegistry,
    pub sink: S,
}

/// Owns the buffer, sampler, scheduler, and registry for one run and drives
/// them for N ticks.
///
/// Within a tick the sampler always runs before the injection decision, so
/// an observation reflects system state prior to any injection started that
/// same tick.
pub struct RunCoordinator<C: Clock, S: ObservationSink> {
    config: RunConfig,
    clock: C,
    sampler: Sampler,
    buffer: ObservationBuffer<S>,
    registry: InjectorRegistry,
    scheduler: InjectionScheduler,
    log: InjectionLog,
    cancel: Arc<AtomicBool>,
}

/// Slice used for cancellation-aware sleeping between ticks.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

impl<C: Clock, S: ObservationSink> RunCoordinator<C, S> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RunConfig,
        clock: C,
        sampler: Sampler,
        buffer: ObservationBuffer<S>,
        registry: InjectorRegistry,
        scheduler: InjectionScheduler,
        log: InjectionLog,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            clock,
            sampler,
            buffer,
            registry,
            scheduler,
            log,
            cancel,
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Runs the full loop and performs teardown: mandatory final flush plus
    /// forced aborts of anything still active, at the true stop time.
    pub fn run(mut self) -> Result<RunOutput<S>, RunError> {
        let mut summary = RunSummary::default();
        let start_ms = self.clock.now_ms();
        let interval_ms = self.config.interval_ms as i64;

        info!(
            "Run starting: {} observations every {} ms, {} probes, {} injectors",
            self.config.observations,
            self.config.interval_ms,
            self.sampler.probe_count(),
            self.registry.len()
        );

        let result = self.tick_loop(start_ms, interval_ms, &mut summary);

        // Teardown happens even when the loop failed: active injections must
        // not outlive the run, and buffered observations must be flushed.
        let stop_ms = self.clock.now_ms();
        self.scheduler
            .abort_active(stop_ms, &mut self.registry, &mut self.log);
        self.registry.stop_all();

        if let Err(e) = self.buffer.flush() {
            error!("Final flush failed, {} observations lost: {}", self.buffer.len(), e);
            summary.flush_error = Some(e.to_string());
        }

        summary.flushes = self.buffer.flush_count();
        summary.flushed_records = self.buffer.flushed_records();
        summary.injection_events = self.log.events().len();

        info!(
            "Run finished: {} observations in {} flushes, {} injection events{}",
            summary.flushed_records,
            summary.flushes,
            summary.injection_events,
            if summary.cancelled { " (cancelled)" } else { "" }
        );

        result?;
        Ok(RunOutput {
            summary,
            log: self.log,
            registry: self.registry,
            sink: self.buffer.into_sink(),
        })
    }

    fn tick_loop(
        &mut self,
        start_ms: i64,
        interval_ms: i64,
        summary: &mut RunSummary,
    ) -> Result<(), RunError> {
        for seq in 0..self.config.observations {
            if self.cancelled() {
                info!("Run cancelled after {} observations", seq);
                summary.cancelled = true;
                return Ok(());
            }

            let tick_ms = self.clock.now_ms();
            let observation = self.sampler.tick(seq, tick_ms - start_ms, tick_ms);
            self.buffer.append(observation)?;
            self.scheduler
                .evaluate(tick_ms, &mut self.registry, &mut self.log);
            summary.observations += 1;

            debug!(
                "Tick {} at {} ms: {} buffered, {} injection events",
                seq,
                tick_ms - start_ms,
                self.buffer.len(),
                self.log.events().len()
            );

            if seq + 1 < self.config.observations {
                self.pace(tick_ms, interval_ms);
            }
        }
        Ok(())
    }

    /// Sleeps out the rest of the tick interval in slices, so a cancellation
    /// request is observed within one slice rather than one interval.
    fn pace(&self, tick_ms: i64, interval_ms: i64) {
        let elapsed = self.clock.now_ms() - tick_ms;
        if elapsed >= interval_ms {
            warn!(
                "Tick overran its interval: {} ms of work, {} ms budget",
                elapsed, interval_ms
            );
            return;
        }
        let mut remaining = Duration::from_millis((interval_ms - elapsed) as u64);
        while remaining > Duration::ZERO && !self.cancelled() {
            let step = remaining.min(SLEEP_SLICE);
            self.clock.sleep(step);
            remaining -= step;
        }
    }
}
