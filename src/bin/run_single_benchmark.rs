//! Worker process: runs one block and replies on stdout.
//!
//! Spawned by `run_benchmark`; not meant to be run by hand. The descriptor
//! arrives on stdin, the bincode reply leaves on stdout, logs go to stderr.

use clap::Parser;
use matrix_benchmark_rs::library::LibraryRegistry;
use matrix_benchmark_rs::memory::{self, TrackingAllocator};
use matrix_benchmark_rs::worker::{self, WorkerReply};
use std::io::{self, Write};
use tracing::{error, warn};

#[global_allocator]
static ALLOCATOR: TrackingAllocator = TrackingAllocator;

#[derive(Parser, Debug)]
#[command(name = "run_single_benchmark")]
#[command(about = "Run one benchmark block in isolation")]
struct Args {
    /// Heap budget in MB; exceeding it exits with status 87
    #[arg(long)]
    heap_mb: Option<u64>,

    /// CPU core to pin to
    #[arg(long)]
    core: Option<usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Some(core) = args.core {
        if let Err(e) = memory::set_affinity(core) {
            warn!(core, "could not pin to core: {}", e);
        }
    }

    let reply = match worker::read_descriptor(io::stdin().lock()) {
        Ok(descriptor) => {
            let registry = LibraryRegistry::builtin();
            // budget covers the block itself, not start-up
            if let Some(mb) = args.heap_mb {
                memory::set_limit_bytes(memory::current_bytes().saturating_add(mb.saturating_mul(1024 * 1024)));
            }
            worker::run_block(&descriptor, &registry)
        }
        Err(e) => WorkerReply::Failed(format!("could not read descriptor: {}", e)),
    };

    let code = reply.exit_code();
    let written = worker::encode_reply(&reply)
        .map_err(|e| e.to_string())
        .and_then(|bytes| {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&bytes).and_then(|_| stdout.flush()).map_err(|e| e.to_string())
        });

    if let Err(e) = written {
        error!("could not write reply: {}", e);
        std::process::exit(2);
    }
    std::process::exit(code);
}
