//! Scheduler runs against a temporary results directory with a fake launcher.

use matrix_benchmark_rs::benchmark::{BlockResult, TestDescriptor, TrialResult};
use matrix_benchmark_rs::config::{BenchmarkConfig, SizeConfig};
use matrix_benchmark_rs::operation::Operation;
use matrix_benchmark_rs::scheduler::{CaseKey, CaseState, Disposition, Scheduler, SizeResults};
use matrix_benchmark_rs::store::ResultStore;
use matrix_benchmark_rs::supervisor::{LaunchError, Launcher, Supervisor, WorkerExit};
use matrix_benchmark_rs::worker::WorkerReply;
use std::fs;
use std::time::Duration;

/// Answers every launch with a one-trial block, except for operations listed
/// in `crash`, and remembers what it was asked to run.
#[derive(Default)]
struct RecordingLauncher {
    launched: Vec<TestDescriptor>,
    crash: Vec<Operation>,
}

impl Launcher for RecordingLauncher {
    fn launch(&mut self, descriptor: &TestDescriptor, _heap_mb: u64, _timeout: Duration) -> Result<WorkerExit, LaunchError> {
        self.launched.push(descriptor.clone());
        if self.crash.contains(&descriptor.operation) {
            return Ok(WorkerExit::Crashed {
                code: Some(101),
                detail: "adapter panicked".to_string(),
            });
        }
        Ok(WorkerExit::Replied(WorkerReply::Completed(BlockResult {
            trials: vec![trial(descriptor.size as f64)],
            repetition_estimate: Some(42),
        })))
    }
}

fn trial(ops_per_sec: f64) -> TrialResult {
    TrialResult {
        ops_per_sec,
        repetitions: 42,
        elapsed_nanos: 3_000_000_000,
        memory_bytes: 0,
        error: None,
    }
}

fn config(dir: &std::path::Path) -> BenchmarkConfig {
    let mut config = BenchmarkConfig {
        output_dir: dir.to_path_buf(),
        sizes: SizeConfig {
            min_size: 1,
            max_size: 1,
            explicit: vec![4, 8],
        },
        ..BenchmarkConfig::default()
    };
    config.schedule.blocks_per_size = 2;
    config
}

fn key(library: &str, operation: Operation) -> CaseKey {
    CaseKey {
        library: library.to_string(),
        operation,
    }
}

fn supervisor(launcher: RecordingLauncher, config: &BenchmarkConfig) -> Supervisor<RecordingLauncher> {
    Supervisor::new(launcher, config.memory.clone(), Duration::from_secs(1))
}

#[test]
fn fresh_run_walks_every_size_and_block() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let store = ResultStore::open(dir.path()).unwrap();

    let mut scheduler = Scheduler::new(&config, &store, supervisor(RecordingLauncher::default(), &config));
    let summaries = scheduler.run(&[key("native", Operation::Mult)]).unwrap();

    let launched = &scheduler.supervisor().launcher().launched;
    let sizes: Vec<usize> = launched.iter().map(|d| d.size).collect();
    assert_eq!(sizes, vec![4, 4, 8, 8]);
    assert_eq!(launched[0].repetition_estimate, None);
    assert_eq!(launched[1].repetition_estimate, Some(42));
    assert_eq!(launched[2].repetition_estimate, None);

    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].disposition, Disposition::Completed);
    assert_eq!(summaries[0].blocks_run, 4);

    let stored = store.load("native", "mult").unwrap();
    assert!(stored.complete);
    assert_eq!(stored.finished.len(), 2);
    assert_eq!(stored.finished[1].trials.len(), 2);
}

#[test]
fn restart_reruns_only_the_incomplete_case() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let store = ResultStore::open(dir.path()).unwrap();

    let mut done = CaseState::new("native", Operation::Add);
    done.size_index = 2;
    done.finished = vec![
        SizeResults {
            size: 4,
            trials: vec![trial(1.0), trial(2.0)],
            truncated: false,
        },
        SizeResults {
            size: 8,
            trials: vec![trial(3.0), trial(4.0)],
            truncated: false,
        },
    ];
    done.disposition = Some(Disposition::Completed);
    done.complete = true;
    store.save(&done).unwrap();

    let mut halfway = CaseState::new("native", Operation::Mult);
    halfway.block_index = 1;
    halfway.repetition_estimate = Some(7);
    halfway.current = vec![trial(9.0)];
    store.save(&halfway).unwrap();

    let done_path = store.path_for("native", "add");
    let before = fs::read(&done_path).unwrap();

    let mut scheduler = Scheduler::new(&config, &store, supervisor(RecordingLauncher::default(), &config));
    let summaries = scheduler.run(&[key("native", Operation::Add), key("native", Operation::Mult)]).unwrap();

    let launched = &scheduler.supervisor().launcher().launched;
    assert!(launched.iter().all(|d| d.operation == Operation::Mult));
    let blocks: Vec<(usize, Option<u64>)> = launched.iter().map(|d| (d.size, d.repetition_estimate)).collect();
    assert_eq!(blocks, vec![(4, Some(7)), (8, None), (8, Some(42))]);

    assert_eq!(fs::read(&done_path).unwrap(), before);

    let reused = summaries.iter().find(|s| s.operation == Operation::Add).unwrap();
    assert!(reused.reused);
    assert_eq!(reused.blocks_run, 0);

    let resumed = store.load("native", "mult").unwrap();
    assert!(resumed.complete);
    assert_eq!(resumed.finished[0].trials.len(), 2);
}

#[test]
fn failed_case_is_stored_incomplete_and_retried_later() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let store = ResultStore::open(dir.path()).unwrap();
    let cases = [key("native", Operation::Lu), key("native", Operation::Det)];

    let launcher = RecordingLauncher {
        crash: vec![Operation::Lu],
        ..RecordingLauncher::default()
    };
    let mut scheduler = Scheduler::new(&config, &store, supervisor(launcher, &config));
    let summaries = scheduler.run(&cases).unwrap();

    // one failing library does not stop the others
    let det = summaries.iter().find(|s| s.operation == Operation::Det).unwrap();
    assert_eq!(det.disposition, Disposition::Completed);
    let lu = summaries.iter().find(|s| s.operation == Operation::Lu).unwrap();
    assert!(matches!(lu.disposition, Disposition::Crashed { .. }));
    assert!(!store.load("native", "lu").unwrap().complete);

    let mut scheduler = Scheduler::new(&config, &store, supervisor(RecordingLauncher::default(), &config));
    scheduler.run(&cases).unwrap();

    let launched = &scheduler.supervisor().launcher().launched;
    assert_eq!(launched.len(), 4);
    assert!(launched.iter().all(|d| d.operation == Operation::Lu));
    assert!(store.load("native", "lu").unwrap().complete);
}

#[test]
fn randomized_order_still_finishes_every_case() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.schedule.randomize_order = true;
    let store = ResultStore::open(dir.path()).unwrap();
    let cases = [
        key("native", Operation::Mult),
        key("native", Operation::Add),
        key("nalgebra", Operation::Svd),
    ];

    let mut scheduler = Scheduler::new(&config, &store, supervisor(RecordingLauncher::default(), &config));
    let summaries = scheduler.run(&cases).unwrap();

    assert_eq!(summaries.len(), 3);
    assert!(summaries.iter().all(|s| s.disposition == Disposition::Completed && s.blocks_run == 4));
    assert_eq!(scheduler.supervisor().launcher().launched.len(), 12);
}

#[test]
fn inputs_are_identical_across_libraries() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let store = ResultStore::open(dir.path()).unwrap();

    let mut scheduler = Scheduler::new(&config, &store, supervisor(RecordingLauncher::default(), &config));
    scheduler
        .run(&[key("native", Operation::Mult), key("nalgebra", Operation::Mult)])
        .unwrap();

    let launched = &scheduler.supervisor().launcher().launched;
    let native: Vec<u64> = launched.iter().filter(|d| d.library == "native").map(|d| d.seed).collect();
    let nalgebra: Vec<u64> = launched.iter().filter(|d| d.library == "nalgebra").map(|d| d.seed).collect();
    assert_eq!(native, nalgebra);
}
