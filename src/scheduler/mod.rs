//! Case/block scheduling with resumable state
//!
//! A case is one (library, operation) pair walked across every matrix size;
//! each size is measured in a fixed number of blocks, one worker process per
//! block. Case state is persisted after every block so an interrupted run
//! picks up where it stopped.

use crate::benchmark::{TestDescriptor, TrialResult};
use crate::config::BenchmarkConfig;
use crate::library::LibraryRegistry;
use crate::operation::Operation;
use crate::store::{ResultStore, StoreError};
use crate::supervisor::{BlockOutcome, Launcher, Supervisor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Final state of a case.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Every size finished all its blocks.
    Completed,
    /// A block ran out of budget; larger sizes were skipped.
    TooSlow,
    /// A worker was killed at the hard timeout; larger sizes were skipped.
    TimedOut,
    OutOfMemory { attempts: u32, last_heap_mb: u64 },
    Crashed { reason: String },
}

impl Disposition {
    /// Whether a resumed run may reuse this case as it is.
    pub fn is_complete(&self) -> bool {
        matches!(self, Disposition::Completed | Disposition::TooSlow | Disposition::TimedOut)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Disposition::Completed => write!(f, "completed"),
            Disposition::TooSlow => write!(f, "too slow"),
            Disposition::TimedOut => write!(f, "timed out"),
            Disposition::OutOfMemory { attempts, last_heap_mb } => {
                write!(f, "out of memory ({} attempts, last {} MB)", attempts, last_heap_mb)
            }
            Disposition::Crashed { reason } => write!(f, "crashed: {}", reason),
        }
    }
}

/// Trials collected for one finished matrix size.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SizeResults {
    pub size: usize,
    pub trials: Vec<TrialResult>,
    /// Fewer blocks than configured ran for this size.
    pub truncated: bool,
}

/// Persisted progress of one case.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CaseState {
    pub library: String,
    pub operation: Operation,
    pub size_index: usize,
    pub block_index: usize,
    pub repetition_estimate: Option<u64>,
    /// Trials of the size currently being measured.
    pub current: Vec<TrialResult>,
    pub finished: Vec<SizeResults>,
    pub disposition: Option<Disposition>,
    pub complete: bool,
}

impl CaseState {
    pub fn new(library: &str, operation: Operation) -> Self {
        Self {
            library: library.to_string(),
            operation,
            size_index: 0,
            block_index: 0,
            repetition_estimate: None,
            current: Vec::new(),
            finished: Vec::new(),
            disposition: None,
            complete: false,
        }
    }

    fn finish_size(&mut self, sizes: &[usize], truncated: bool) {
        if self.current.is_empty() && truncated {
            return;
        }
        if let Some(&size) = sizes.get(self.size_index) {
            self.finished.push(SizeResults {
                size,
                trials: std::mem::take(&mut self.current),
                truncated,
            });
        }
    }

    fn retire(&mut self, disposition: Disposition) {
        self.complete = disposition.is_complete();
        self.disposition = Some(disposition);
    }

    /// Folds a block outcome into the state. Returns `true` when the case is
    /// retired for this run.
    pub fn apply(&mut self, outcome: BlockOutcome, sizes: &[usize], blocks_per_size: usize) -> bool {
        match outcome {
            BlockOutcome::Succeeded(block) => {
                self.current.extend(block.trials);
                self.repetition_estimate = block.repetition_estimate;
                self.block_index += 1;
                if self.block_index >= blocks_per_size {
                    self.finish_size(sizes, false);
                    self.size_index += 1;
                    self.block_index = 0;
                    self.repetition_estimate = None;
                }
                if self.size_index >= sizes.len() {
                    self.retire(Disposition::Completed);
                    return true;
                }
                false
            }
            BlockOutcome::TooSlow(block) => {
                self.current.extend(block.trials);
                self.finish_size(sizes, true);
                self.retire(Disposition::TooSlow);
                true
            }
            BlockOutcome::TimedOut => {
                self.finish_size(sizes, true);
                self.retire(Disposition::TimedOut);
                true
            }
            BlockOutcome::OutOfMemory { attempts, last_heap_mb } => {
                self.retire(Disposition::OutOfMemory { attempts, last_heap_mb });
                true
            }
            BlockOutcome::Crashed(reason) => {
                self.retire(Disposition::Crashed { reason });
                true
            }
        }
    }
}

/// Identity of a case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaseKey {
    pub library: String,
    pub operation: Operation,
}

/// How a case ended in this run.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseSummary {
    pub library: String,
    pub operation: Operation,
    pub disposition: Disposition,
    pub blocks_run: usize,
    pub sizes_done: usize,
    /// The case was already complete on disk and was not touched.
    pub reused: bool,
}

impl CaseSummary {
    fn from_state(state: &CaseState, blocks_run: usize, reused: bool) -> Self {
        Self {
            library: state.library.clone(),
            operation: state.operation,
            disposition: state.disposition.clone().unwrap_or(Disposition::Completed),
            blocks_run,
            sizes_done: state.finished.len(),
            reused,
        }
    }
}

/// Every configured (library, operation) pair the registry can run.
pub fn plan_cases(config: &BenchmarkConfig, registry: &LibraryRegistry) -> Vec<CaseKey> {
    let libraries: Vec<String> = if config.libraries.is_empty() {
        registry.names().into_iter().map(str::to_string).collect()
    } else {
        config.libraries.clone()
    };
    let operations: Vec<Operation> = if config.operations.is_empty() {
        Operation::ALL.to_vec()
    } else {
        config.operations.clone()
    };

    let mut cases = Vec::new();
    for library in &libraries {
        if registry.get(library).is_none() {
            warn!(library = %library, "unknown library, skipping");
            continue;
        }
        for &operation in &operations {
            if registry.supports(library, operation) {
                cases.push(CaseKey {
                    library: library.clone(),
                    operation,
                });
            } else {
                info!(library = %library, operation = %operation, "operation not supported, skipping");
            }
        }
    }
    cases
}

/// Seed for a block. Independent of the library so every library sees the
/// same inputs.
pub fn block_seed(run_seed: u64, size_index: usize, block_index: usize) -> u64 {
    run_seed
        .wrapping_add((size_index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(block_index as u64)
}

struct Pending {
    state: CaseState,
    blocks_run: usize,
}

pub struct Scheduler<'a, L: Launcher> {
    config: &'a BenchmarkConfig,
    store: &'a ResultStore,
    supervisor: Supervisor<L>,
    sizes: Vec<usize>,
    rng: StdRng,
}

impl<'a, L: Launcher> Scheduler<'a, L> {
    pub fn new(config: &'a BenchmarkConfig, store: &'a ResultStore, supervisor: Supervisor<L>) -> Self {
        Self {
            config,
            store,
            supervisor,
            sizes: config.sizes.sizes(),
            rng: StdRng::seed_from_u64(config.seed),
        }
    }

    pub fn supervisor(&self) -> &Supervisor<L> {
        &self.supervisor
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    fn descriptor(&self, state: &CaseState) -> TestDescriptor {
        let trial = &self.config.trial;
        TestDescriptor {
            library: state.library.clone(),
            operation: state.operation,
            size: self.sizes[state.size_index],
            seed: block_seed(self.config.seed, state.size_index, state.block_index),
            goal_duration_ms: trial.goal_duration_ms,
            max_duration_ms: trial.max_duration_ms,
            sanity_check: trial.sanity_check,
            tolerance: trial.tolerance,
            trials: trial.trials_per_block,
            repetition_estimate: state.repetition_estimate,
        }
    }

    fn pick(&mut self, pending: usize) -> usize {
        if self.config.schedule.randomize_order {
            self.rng.gen_range(0..pending)
        } else {
            0
        }
    }

    /// Runs every case to retirement. Cases already complete on disk are
    /// reported but not re-run.
    pub fn run(&mut self, cases: &[CaseKey]) -> Result<Vec<CaseSummary>, StoreError> {
        let blocks_per_size = self.config.schedule.blocks_per_size;
        let mut summaries = Vec::new();
        let mut worklist = Vec::new();

        for key in cases {
            match self.store.load(&key.library, key.operation.name()) {
                Some(state) if state.complete => {
                    info!(library = %key.library, operation = %key.operation, "already complete, reusing stored results");
                    summaries.push(CaseSummary::from_state(&state, 0, true));
                }
                Some(mut state) => {
                    info!(
                        library = %key.library,
                        operation = %key.operation,
                        size_index = state.size_index,
                        block_index = state.block_index,
                        "resuming case"
                    );
                    state.disposition = None;
                    worklist.push(Pending { state, blocks_run: 0 });
                }
                None => worklist.push(Pending {
                    state: CaseState::new(&key.library, key.operation),
                    blocks_run: 0,
                }),
            }
        }

        while !worklist.is_empty() {
            let index = self.pick(worklist.len());
            let entry = &mut worklist[index];

            let retired = if entry.state.size_index >= self.sizes.len() {
                entry.state.retire(Disposition::Completed);
                true
            } else {
                let descriptor = self.descriptor(&entry.state);
                info!(
                    library = %descriptor.library,
                    operation = %descriptor.operation,
                    size = descriptor.size,
                    block = entry.state.block_index + 1,
                    of = blocks_per_size,
                    "running block"
                );
                let outcome = self.supervisor.run(&descriptor);
                entry.blocks_run += 1;
                entry.state.apply(outcome, &self.sizes, blocks_per_size)
            };
            self.store.save(&entry.state)?;

            if retired {
                let done = worklist.remove(index);
                let summary = CaseSummary::from_state(&done.state, done.blocks_run, false);
                info!(
                    library = %summary.library,
                    operation = %summary.operation,
                    disposition = %summary.disposition,
                    "case finished"
                );
                summaries.push(summary);
            }
        }

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::BlockResult;

    fn trial(ops_per_sec: f64) -> TrialResult {
        TrialResult {
            ops_per_sec,
            repetitions: 10,
            elapsed_nanos: 1_000,
            memory_bytes: 0,
            error: None,
        }
    }

    fn block(n: usize) -> BlockOutcome {
        BlockOutcome::Succeeded(BlockResult {
            trials: vec![trial(1.0); n],
            repetition_estimate: Some(10),
        })
    }

    #[test]
    fn size_advances_only_after_all_blocks() {
        let sizes = [4, 8];
        let mut state = CaseState::new("native", Operation::Mult);

        assert!(!state.apply(block(2), &sizes, 2));
        assert_eq!((state.size_index, state.block_index), (0, 1));
        assert_eq!(state.repetition_estimate, Some(10));

        assert!(!state.apply(block(2), &sizes, 2));
        assert_eq!((state.size_index, state.block_index), (1, 0));
        assert_eq!(state.repetition_estimate, None);
        assert_eq!(state.finished[0].trials.len(), 4);
        assert!(state.current.is_empty());

        state.apply(block(1), &sizes, 2);
        assert!(state.apply(block(1), &sizes, 2));
        assert!(state.complete);
        assert_eq!(state.disposition, Some(Disposition::Completed));
        assert_eq!(state.finished.len(), 2);
    }

    #[test]
    fn too_slow_keeps_partial_trials_and_completes() {
        let sizes = [4, 8, 16];
        let mut state = CaseState::new("native", Operation::Lu);
        state.apply(block(3), &sizes, 2);
        state.apply(block(3), &sizes, 2);

        let partial = BlockOutcome::TooSlow(BlockResult {
            trials: vec![trial(0.5)],
            repetition_estimate: None,
        });
        assert!(state.apply(partial, &sizes, 2));
        assert!(state.complete);
        assert_eq!(state.disposition, Some(Disposition::TooSlow));
        assert_eq!(state.finished.len(), 2);
        assert!(state.finished[1].truncated);
        assert_eq!(state.finished[1].size, 8);
    }

    #[test]
    fn crash_retires_without_completing() {
        let mut state = CaseState::new("native", Operation::Det);
        assert!(state.apply(BlockOutcome::Crashed("boom".into()), &[4], 1));
        assert!(!state.complete);
        assert_eq!(state.size_index, 0);
    }

    #[test]
    fn seeds_differ_per_block_but_not_per_library() {
        assert_ne!(block_seed(1, 0, 0), block_seed(1, 0, 1));
        assert_ne!(block_seed(1, 0, 1), block_seed(1, 1, 0));
        assert_eq!(block_seed(1, 2, 3), block_seed(1, 2, 3));
    }

    #[test]
    fn planning_skips_unsupported_pairs() {
        let registry = LibraryRegistry::builtin();
        let config = BenchmarkConfig {
            libraries: vec!["native".into(), "nalgebra".into(), "colt".into()],
            operations: vec![Operation::Mult, Operation::Svd],
            ..BenchmarkConfig::default()
        };
        let cases = plan_cases(&config, &registry);
        let pairs: Vec<_> = cases.iter().map(|c| (c.library.as_str(), c.operation)).collect();
        assert_eq!(
            pairs,
            vec![
                ("native", Operation::Mult),
                ("nalgebra", Operation::Mult),
                ("nalgebra", Operation::Svd),
            ]
        );
    }
}
