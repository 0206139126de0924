//! Probabilistic injection scheduler.
//!
//! Each injector moves through Idle -> Active -> Cooldown -> Idle. One
//! evaluation pass runs per tick, visiting the injectors in registration
//! order and checking transitions in the fixed order: Active end check,
//! Cooldown expiry check, Idle start decision. An injector stopped within a
//! tick never restarts in that same tick, so at least one tick boundary
//! always separates an end from the next start.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::inject::{EventKind, InjectionEvent, InjectionLog, InjectorRegistry};

/// Per-injector schedule state. The timestamp payloads make illegal
/// combinations (active while cooling down) unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectorState {
    /// No injection running, cooldown elapsed.
    Idle,
    /// Injection running, scheduled to end at `until_ms`.
    Active { until_ms: i64 },
    /// Injection ended, blocked from restarting until `until_ms`.
    Cooldown { until_ms: i64 },
}

/// Decides, once per tick and independently per injector, whether to start
/// or stop injections. Randomness comes from a seeded generator so runs are
/// reproducible.
pub struct InjectionScheduler {
    states: Vec<InjectorState>,
    rng: ChaCha8Rng,
}

impl InjectionScheduler {
    /// One state slot per registry entry, all starting Idle.
    pub fn new(registry: &InjectorRegistry, seed: u64) -> Self {
        Self {
            states: vec![InjectorState::Idle; registry.len()],
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn state(&self, index: usize) -> InjectorState {
        self.states[index]
    }

    /// True if any injector is currently Active.
    pub fn any_active(&self) -> bool {
        self.states
            .iter()
            .any(|s| matches!(s, InjectorState::Active { .. }))
    }

    /// Runs one decision pass across all injectors.
    pub fn evaluate(
        &mut self,
        now_ms: i64,
        registry: &mut InjectorRegistry,
        log: &mut InjectionLog,
    ) {
        for index in 0..registry.len() {
            let spec = registry.spec(index);
            let (name, rate, duration_ms, cooldown_ms) = (
                spec.name.clone(),
                spec.rate,
                spec.duration_ms as i64,
                spec.cooldown_ms as i64,
            );

            let mut stopped_this_tick = false;

            if let InjectorState::Active { until_ms } = self.states[index]
                && now_ms >= until_ms
            {
                registry.stop_at(index);
                log.record(InjectionEvent {
                    name: name.clone(),
                    kind: EventKind::End,
                    timestamp_ms: now_ms,
                });
                info!("Injection '{}' ended at {}", name, now_ms);
                self.states[index] = InjectorState::Cooldown {
                    until_ms: now_ms + cooldown_ms,
                };
                stopped_this_tick = true;
            }

            if let InjectorState::Cooldown { until_ms } = self.states[index]
                && now_ms >= until_ms
            {
                self.states[index] = InjectorState::Idle;
            }

            // An injector that just stopped must wait for the next tick
            // boundary before it may be drawn again. The registry is also
            // consulted so a start is never issued over a running injection.
            if self.states[index] == InjectorState::Idle
                && !stopped_this_tick
                && !registry.is_active(&name)
            {
                let draw: f64 = self.rng.random();
                if draw < rate {
                    match registry.start_at(index) {
                        Ok(()) => {
                            log.record(InjectionEvent {
                                name: name.clone(),
                                kind: EventKind::Start,
                                timestamp_ms: now_ms,
                            });
                            info!(
                                "Injection '{}' started at {}, ends at {}",
                                name,
                                now_ms,
                                now_ms + duration_ms
                            );
                            self.states[index] = InjectorState::Active {
                                until_ms: now_ms + duration_ms,
                            };
                        }
                        Err(e) => {
                            // Failed attempt: back to Idle, no cooldown, so
                            // a transient fault does not rate-limit like a
                            // completed injection would.
                            warn!("Injection '{}' failed to start: {}", name, e);
                            log.record(InjectionEvent {
                                name: name.clone(),
                                kind: EventKind::Aborted,
                                timestamp_ms: now_ms,
                            });
                        }
                    }
                } else {
                    debug!("Injector '{}' stays idle (draw {:.3})", name, draw);
                }
            }
        }
    }

    /// Force-stops every Active injector, logging `aborted` at the true stop
    /// time. Called on cancellation and at normal teardown.
    pub fn abort_active(
        &mut self,
        now_ms: i64,
        registry: &mut InjectorRegistry,
        log: &mut InjectionLog,
    ) {
        for index in 0..registry.len() {
            if let InjectorState::Active { .. } = self.states[index] {
                let name = registry.spec(index).name.clone();
                registry.stop_at(index);
                log.record(InjectionEvent {
                    name: name.clone(),
                    kind: EventKind::Aborted,
                    timestamp_ms: now_ms,
                });
                warn!("Injection '{}' aborted at shutdown ({})", name, now_ms);
                self.states[index] = InjectorState::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::{InjectError, Injector, InjectorKind, InjectorSpec};

    struct NoopInjector;

    impl Injector for NoopInjector {
        fn start(&mut self) -> Result<(), InjectError> {
            Ok(())
        }
        fn stop(&mut self) {}
    }

    struct FailingInjector;

    impl Injector for FailingInjector {
        fn start(&mut self) -> Result<(), InjectError> {
            Err(InjectError::Mechanism("resource unavailable".into()))
        }
        fn stop(&mut self) {}
    }

    fn spec(name: &str, rate: f64, duration_ms: u64, cooldown_ms: u64) -> InjectorSpec {
        InjectorSpec {
            name: name.to_string(),
            kind: InjectorKind::Spin,
            rate,
            duration_ms,
            cooldown_ms,
        }
    }

    fn registry_with(specs: Vec<InjectorSpec>) -> InjectorRegistry {
        let mut registry = InjectorRegistry::new();
        for s in specs {
            registry.register(s, Box::new(NoopInjector)).unwrap();
        }
        registry
    }

    /// Drives `ticks` evaluation passes at `interval_ms` starting at t=0.
    fn drive(
        scheduler: &mut InjectionScheduler,
        registry: &mut InjectorRegistry,
        log: &mut InjectionLog,
        ticks: u64,
        interval_ms: i64,
    ) {
        for tick in 0..ticks {
            scheduler.evaluate(tick as i64 * interval_ms, registry, log);
        }
    }

    #[test]
    fn rate_zero_never_fires() {
        let mut registry = registry_with(vec![spec("never", 0.0, 1_000, 0)]);
        let mut scheduler = InjectionScheduler::new(&registry, 7);
        let mut log = InjectionLog::in_memory();
        drive(&mut scheduler, &mut registry, &mut log, 10_000, 100);
        assert!(log.events().is_empty());
    }

    #[test]
    fn rate_one_active_phase_lasts_exactly_duration() {
        // rate=1, duration=1000, cooldown=5000, 1000ms ticks over 10s:
        // exactly one start/end pair, end - start == duration, and no second
        // start before the cooldown has elapsed.
        let mut registry = registry_with(vec![spec("always", 1.0, 1_000, 5_000)]);
        let mut scheduler = InjectionScheduler::new(&registry, 1);
        let mut log = InjectionLog::in_memory();
        drive(&mut scheduler, &mut registry, &mut log, 10, 1_000);

        let starts = log.events_for("always", EventKind::Start);
        let ends = log.events_for("always", EventKind::End);
        assert_eq!(starts.len(), 2); // second cycle starts once cooldown ends
        assert_eq!(ends.len(), 2);
        for (start, end) in starts.iter().zip(ends.iter()) {
            assert_eq!(end.timestamp_ms - start.timestamp_ms, 1_000);
        }
        // Cooldown invariant: next start >= previous end + cooldown.
        assert!(starts[1].timestamp_ms >= ends[0].timestamp_ms + 5_000);
        assert!(starts[1].timestamp_ms >= starts[0].timestamp_ms + 6_000);
    }

    #[test]
    fn zero_cooldown_still_waits_one_tick_boundary() {
        let mut registry = registry_with(vec![spec("greedy", 1.0, 1_000, 0)]);
        let mut scheduler = InjectionScheduler::new(&registry, 1);
        let mut log = InjectionLog::in_memory();
        drive(&mut scheduler, &mut registry, &mut log, 5, 1_000);

        // t=0 start, t=1000 end (no same-tick restart), t=2000 start, ...
        let starts = log.events_for("greedy", EventKind::Start);
        let ends = log.events_for("greedy", EventKind::End);
        assert_eq!(starts[0].timestamp_ms, 0);
        assert_eq!(ends[0].timestamp_ms, 1_000);
        assert_eq!(starts[1].timestamp_ms, 2_000);
        for (start, end) in starts.iter().zip(ends.iter()) {
            assert_eq!(end.timestamp_ms - start.timestamp_ms, 1_000);
        }
    }

    #[test]
    fn cooldown_invariant_holds_across_many_cycles() {
        let mut registry = registry_with(vec![spec("cycler", 1.0, 200, 300)]);
        let mut scheduler = InjectionScheduler::new(&registry, 99);
        let mut log = InjectionLog::in_memory();
        drive(&mut scheduler, &mut registry, &mut log, 200, 100);

        let starts = log.events_for("cycler", EventKind::Start);
        let ends = log.events_for("cycler", EventKind::End);
        assert!(starts.len() > 3);
        for window in 0..starts.len() - 1 {
            let end = ends[window].timestamp_ms;
            let next_start = starts[window + 1].timestamp_ms;
            assert!(next_start >= end + 300);
        }
    }

    #[test]
    fn failed_start_logs_aborted_and_skips_cooldown() {
        let mut registry = InjectorRegistry::new();
        registry
            .register(spec("flaky", 1.0, 1_000, 60_000), Box::new(FailingInjector))
            .unwrap();
        let mut scheduler = InjectionScheduler::new(&registry, 5);
        let mut log = InjectionLog::in_memory();
        drive(&mut scheduler, &mut registry, &mut log, 3, 1_000);

        // Every tick retries: no cooldown is consumed by a failed attempt.
        assert_eq!(log.events_for("flaky", EventKind::Aborted).len(), 3);
        assert!(log.events_for("flaky", EventKind::Start).is_empty());
        assert_eq!(scheduler.state(0), InjectorState::Idle);
    }

    #[test]
    fn injectors_are_evaluated_independently() {
        let mut registry = registry_with(vec![
            spec("a", 1.0, 2_000, 0),
            spec("b", 1.0, 3_000, 0),
            spec("off", 0.0, 1_000, 0),
        ]);
        let mut scheduler = InjectionScheduler::new(&registry, 3);
        let mut log = InjectionLog::in_memory();
        scheduler.evaluate(0, &mut registry, &mut log);

        // Both rate-1 injectors are concurrently active.
        assert!(registry.is_active("a"));
        assert!(registry.is_active("b"));
        assert!(!registry.is_active("off"));
        assert!(scheduler.any_active());
    }

    #[test]
    fn abort_active_logs_true_stop_time() {
        let mut registry = registry_with(vec![spec("victim", 1.0, 10_000, 0)]);
        let mut scheduler = InjectionScheduler::new(&registry, 2);
        let mut log = InjectionLog::in_memory();
        scheduler.evaluate(0, &mut registry, &mut log);
        assert!(registry.is_active("victim"));

        // Cancelled at t=3500, well before the scheduled end at t=10000.
        scheduler.abort_active(3_500, &mut registry, &mut log);
        let aborted = log.events_for("victim", EventKind::Aborted);
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].timestamp_ms, 3_500);
        assert!(!registry.is_active("victim"));
        assert!(!scheduler.any_active());
    }

    #[test]
    fn same_seed_reproduces_the_same_schedule() {
        let run = |seed: u64| {
            let mut registry = registry_with(vec![spec("p", 0.3, 500, 700)]);
            let mut scheduler = InjectionScheduler::new(&registry, seed);
            let mut log = InjectionLog::in_memory();
            drive(&mut scheduler, &mut registry, &mut log, 100, 250);
            log.events().to_vec()
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }
}
