//! Benchmark coordinator
//!
//! ```bash
//! # every library and operation, sizes 2..=2000
//! run_benchmark --output results/
//!
//! # two operations on nalgebra, short trials, random case order
//! run_benchmark --library nalgebra --operation mult --operation svd \
//!               --max-size 500 --trial-ms 500 --randomize
//! ```
//!
//! Running again with the same `--output` resumes: finished cases are kept,
//! unfinished and failed ones continue from their last stored block.

use anyhow::{Context, Result};
use clap::Parser;
use matrix_benchmark_rs::config::{BenchmarkConfig, MemoryMode};
use matrix_benchmark_rs::library::LibraryRegistry;
use matrix_benchmark_rs::operation::Operation;
use matrix_benchmark_rs::report;
use matrix_benchmark_rs::scheduler::{plan_cases, Scheduler};
use matrix_benchmark_rs::store::ResultStore;
use matrix_benchmark_rs::supervisor::{ProcessLauncher, Supervisor};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "run_benchmark")]
#[command(about = "Compare dense linear-algebra libraries across matrix sizes")]
struct Args {
    /// JSON config file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Results directory (existing results are resumed)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Library to run (repeatable; default all)
    #[arg(long = "library")]
    libraries: Vec<String>,

    /// Operation to run (repeatable; default all)
    #[arg(long = "operation")]
    operations: Vec<Operation>,

    #[arg(long)]
    min_size: Option<usize>,

    #[arg(long)]
    max_size: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Goal duration of one trial in milliseconds
    #[arg(long)]
    trial_ms: Option<u64>,

    /// Time budget of one block in milliseconds
    #[arg(long)]
    max_ms: Option<u64>,

    /// Blocks per matrix size
    #[arg(long)]
    blocks: Option<usize>,

    /// Trials per block
    #[arg(long)]
    trials: Option<usize>,

    /// Keep the heap budget fixed instead of growing it after out-of-memory
    #[arg(long)]
    fixed_memory: bool,

    /// Base heap budget in MB
    #[arg(long)]
    memory_mb: Option<u64>,

    /// Heap budget increment per retry in MB
    #[arg(long)]
    memory_scale_mb: Option<u64>,

    /// Skip output verification
    #[arg(long)]
    no_sanity: bool,

    /// Pick the next case at random instead of in order
    #[arg(long)]
    randomize: bool,

    /// CPU core to pin workers to
    #[arg(long)]
    core: Option<usize>,

    /// Worker binary (default: run_single_benchmark next to this executable)
    #[arg(long)]
    worker: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<BenchmarkConfig> {
        let mut config = match &self.config {
            Some(path) => BenchmarkConfig::load(path)?,
            None => BenchmarkConfig::default(),
        };

        if let Some(output) = self.output {
            config.output_dir = output;
        }
        if !self.libraries.is_empty() {
            config.libraries = self.libraries;
        }
        if !self.operations.is_empty() {
            config.operations = self.operations;
        }
        if let Some(v) = self.min_size {
            config.sizes.min_size = v;
        }
        if let Some(v) = self.max_size {
            config.sizes.max_size = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.trial_ms {
            config.trial.goal_duration_ms = v;
        }
        if let Some(v) = self.max_ms {
            config.trial.max_duration_ms = v;
        }
        if let Some(v) = self.blocks {
            config.schedule.blocks_per_size = v;
        }
        if let Some(v) = self.trials {
            config.trial.trials_per_block = v;
        }
        if self.fixed_memory {
            config.memory.mode = MemoryMode::Fixed;
        }
        if let Some(v) = self.memory_mb {
            config.memory.base_mb = v;
        }
        if let Some(v) = self.memory_scale_mb {
            config.memory.scale_mb = v;
        }
        if self.no_sanity {
            config.trial.sanity_check = false;
        }
        if self.randomize {
            config.schedule.randomize_order = true;
        }
        if self.core.is_some() {
            config.worker.core_id = self.core;
        }
        if self.worker.is_some() {
            config.worker.path = self.worker;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Args::parse().into_config()?;
    let registry = LibraryRegistry::builtin();

    let store = ResultStore::open(&config.output_dir)
        .with_context(|| format!("cannot open results directory {}", config.output_dir.display()))?;
    // keep the effective configuration next to the results
    let config_json = serde_json::to_string_pretty(&config)?;
    std::fs::write(store.dir().join("config.json.used"), config_json)
        .context("failed to record configuration")?;

    let worker_path = match &config.worker.path {
        Some(path) => path.clone(),
        None => ProcessLauncher::default_worker_path().context("cannot locate worker binary")?,
    };
    let launcher = ProcessLauncher::new(&worker_path).with_core(config.worker.core_id);
    let supervisor = Supervisor::new(launcher, config.memory.clone(), config.trial.worker_timeout(&config.memory));

    for name in registry.names() {
        if let Some(target) = registry.get(name) {
            info!(library = target.name, description = target.description, "registered library");
        }
    }

    let cases = plan_cases(&config, &registry);
    info!(
        cases = cases.len(),
        sizes = ?config.sizes.sizes(),
        worker = %worker_path.display(),
        "starting benchmark"
    );

    let mut scheduler = Scheduler::new(&config, &store, supervisor);
    let summaries = scheduler.run(&cases)?;

    report::print_dispositions(&summaries);
    let states = store.load_all()?;
    report::print_metrics(&report::metrics_rows(&states));

    Ok(())
}
