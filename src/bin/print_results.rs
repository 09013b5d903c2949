use anyhow::{bail, Result};
use clap::Parser;
use matrix_benchmark_rs::report;
use matrix_benchmark_rs::store::ResultStore;
use std::path::PathBuf;

/// Print summary metrics for every case stored in a results directory
#[derive(Parser, Debug)]
#[command(name = "print_results")]
struct Args {
    /// Results directory written by run_benchmark
    dir: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    if !args.dir.is_dir() {
        bail!("{} is not a valid directory", args.dir.display());
    }

    let store = ResultStore::open(&args.dir)?;
    let states = store.load_all()?;
    let incomplete = states.iter().filter(|s| !s.complete).count();

    report::print_metrics(&report::metrics_rows(&states));
    if incomplete > 0 {
        println!("{} of {} cases are incomplete; rerun run_benchmark on this directory to resume", incomplete, states.len());
    }
    Ok(())
}
