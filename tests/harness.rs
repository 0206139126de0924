//! End-to-end runs: sample to CSV, inject on schedule, merge the logs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use faultmon::buffer::{CsvObservationSink, ObservationBuffer};
use faultmon::inject::{
    EventKind, InjectError, InjectionLog, Injector, InjectorKind, InjectorRegistry, InjectorSpec,
};
use faultmon::merge;
use faultmon::probe::{MockFs, available_probes, builtin_probes};
use faultmon::run::{RunConfig, RunCoordinator};
use faultmon::sampler::Sampler;
use faultmon::scheduler::InjectionScheduler;
use faultmon::util::{Clock, ManualClock};

struct NoopInjector;

impl Injector for NoopInjector {
    fn start(&mut self) -> Result<(), InjectError> {
        Ok(())
    }
    fn stop(&mut self) {}
}

/// Manual clock that raises the cancel flag once time passes a threshold.
struct CancellingClock {
    inner: ManualClock,
    cancel: Arc<AtomicBool>,
    cancel_at_ms: i64,
}

impl Clock for CancellingClock {
    fn now_ms(&self) -> i64 {
        self.inner.now_ms()
    }

    fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration);
        if self.inner.now_ms() >= self.cancel_at_ms {
            self.cancel.store(true, Ordering::SeqCst);
        }
    }
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

#[test]
fn full_run_produces_consistent_logs_and_merge() {
    let dir = tempfile::tempdir().unwrap();
    let obs_path = dir.path().join("obs.csv");
    let inj_path = dir.path().join("inj.csv");
    let merged_path = dir.path().join("merged.csv");

    let probes = available_probes(builtin_probes(MockFs::typical_system(), "/proc"));
    let sampler = Sampler::new(probes, Duration::from_secs(5));

    let mut registry = InjectorRegistry::new();
    registry
        .register(spec("always", 1.0, 1_000, 5_000), Box::new(NoopInjector))
        .unwrap();
    registry
        .register(spec("never", 0.0, 1_000, 0), Box::new(NoopInjector))
        .unwrap();
    let scheduler = InjectionScheduler::new(&registry, 42);

    let coordinator = RunCoordinator::new(
        RunConfig {
            interval_ms: 1_000,
            observations: 10,
        },
        ManualClock::new(50_000),
        sampler,
        ObservationBuffer::new(3, CsvObservationSink::create(&obs_path).unwrap()),
        registry,
        scheduler,
        InjectionLog::create(&inj_path).unwrap(),
        Arc::new(AtomicBool::new(false)),
    );

    let output = coordinator.run().unwrap();
    assert_eq!(output.summary.observations, 10);
    assert_eq!(output.summary.flushed_records, 10);
    // 10 observations, window 3: at least ceil(10/3) flushes.
    assert!(output.summary.flushes >= 4);

    // Observation log: header + 10 rows, seq 0..9, 1000 ms apart.
    let content = std::fs::read_to_string(&obs_path).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 11);
    assert!(lines[0].starts_with("seq,timestamp,"));
    assert!(lines[0].contains("load_1m"));
    assert!(lines[0].contains("mem_total_kb"));
    assert!(lines[0].contains("cpu_user"));
    for (i, line) in lines[1..].iter().enumerate() {
        let cells: Vec<&str> = line.split(',').collect();
        assert_eq!(cells[0], i.to_string());
        assert_eq!(cells[1], (50_000 + i as i64 * 1_000).to_string());
    }

    // Injection log: rate-0 injector never fires; rate-1 injector cycles
    // with duration 1000 and cooldown 5000.
    assert!(output.log.events_for("never", EventKind::Start).is_empty());
    let starts = output.log.events_for("always", EventKind::Start);
    let ends = output.log.events_for("always", EventKind::End);
    assert_eq!(starts[0].timestamp_ms, 50_000);
    assert_eq!(ends[0].timestamp_ms - starts[0].timestamp_ms, 1_000);
    assert!(starts[1].timestamp_ms >= ends[0].timestamp_ms + 5_000);

    // Merge: observations during the active window get labeled.
    let stats = merge::merge_files(&obs_path, &inj_path, &merged_path, "timestamp").unwrap();
    assert_eq!(stats.observations, 10);
    let merged = std::fs::read_to_string(&merged_path).unwrap();
    let merged_lines: Vec<&str> = merged.lines().collect();
    assert!(merged_lines[0].ends_with(",injected,active_injectors"));
    // t=50000 falls in [50000, 51000): labeled. t=51000 does not.
    assert!(merged_lines[1].ends_with(",1,always"));
    assert!(merged_lines[2].ends_with(",0,"));

    // Replaying the merge yields byte-identical output.
    let merged_again = dir.path().join("merged2.csv");
    merge::merge_files(&obs_path, &inj_path, &merged_again, "timestamp").unwrap();
    assert_eq!(
        std::fs::read(&merged_path).unwrap(),
        std::fs::read(&merged_again).unwrap()
    );
}

#[test]
fn cancellation_aborts_active_injection_at_true_stop_time() {
    let dir = tempfile::tempdir().unwrap();
    let obs_path = dir.path().join("obs.csv");
    let inj_path = dir.path().join("inj.csv");
    let merged_path = dir.path().join("merged.csv");

    let cancel = Arc::new(AtomicBool::new(false));
    // Injection starts at t=0 and should run until t=60000; the run is
    // cancelled a little after t=3000.
    let clock = CancellingClock {
        inner: ManualClock::new(0),
        cancel: cancel.clone(),
        cancel_at_ms: 3_500,
    };

    let mut registry = InjectorRegistry::new();
    registry
        .register(spec("victim", 1.0, 60_000, 0), Box::new(NoopInjector))
        .unwrap();
    let scheduler = InjectionScheduler::new(&registry, 7);

    let coordinator = RunCoordinator::new(
        RunConfig {
            interval_ms: 1_000,
            observations: 100,
        },
        clock,
        Sampler::new(
            available_probes(builtin_probes(MockFs::typical_system(), "/proc")),
            Duration::from_secs(5),
        ),
        ObservationBuffer::new(10, CsvObservationSink::create(&obs_path).unwrap()),
        registry,
        scheduler,
        InjectionLog::create(&inj_path).unwrap(),
        cancel,
    );

    let output = coordinator.run().unwrap();
    assert!(output.summary.cancelled);
    assert!(output.summary.observations < 100);
    // Cancellation must not lose buffered observations.
    assert_eq!(output.summary.flushed_records, output.summary.observations);

    // The injection ends with `aborted` at the cancellation time, far from
    // its scheduled end.
    let aborted = output.log.events_for("victim", EventKind::Aborted);
    assert_eq!(aborted.len(), 1);
    assert!(aborted[0].timestamp_ms >= 3_500);
    assert!(aborted[0].timestamp_ms < 60_000);
    assert!(output.log.events_for("victim", EventKind::End).is_empty());

    // The merged view reflects the truncated interval: every observation
    // before the abort is labeled.
    merge::merge_files(&obs_path, &inj_path, &merged_path, "timestamp").unwrap();
    let merged = std::fs::read_to_string(&merged_path).unwrap();
    for line in merged.lines().skip(1) {
        let cells: Vec<&str> = line.split(',').collect();
        let t: i64 = cells[1].parse().unwrap();
        let labeled = line.ends_with(",1,victim");
        assert_eq!(labeled, t < aborted[0].timestamp_ms, "row at t={}", t);
    }
}
