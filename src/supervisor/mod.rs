//! Isolated execution of one block per worker process
//!
//! Every block runs in a fresh `run_single_benchmark` process so that a crash,
//! a runaway loop or a memory blow-up in one library never touches the
//! measurement of another. Out-of-memory exits are retried with a larger heap
//! budget; every other failure is final for the block.

use crate::benchmark::{BlockResult, TestDescriptor};
use crate::config::MemoryConfig;
use crate::memory::EXIT_OUT_OF_MEMORY;
use crate::worker::{self, WorkerReply, EXIT_FAILED};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// File name of the worker binary.
pub const WORKER_BINARY: &str = "run_single_benchmark";

/// Marker printed by Rust's default allocation-failure handler.
const ALLOC_FAILURE_MARKER: &str = "memory allocation of";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How a worker process ended, as seen from outside.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerExit {
    Replied(WorkerReply),
    OutOfMemory,
    TimedOut,
    Crashed { code: Option<i32>, detail: String },
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to spawn worker '{path}': {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to send descriptor to worker: {0}")]
    Send(String),

    #[error("failed while waiting for worker: {0}")]
    Wait(#[from] std::io::Error),
}

/// Starts a worker for one descriptor and reports how it ended.
pub trait Launcher {
    fn launch(&mut self, descriptor: &TestDescriptor, heap_mb: u64, timeout: Duration) -> Result<WorkerExit, LaunchError>;
}

/// Maps a finished worker's exit code and output onto a [`WorkerExit`].
///
/// | exit | output | result |
/// |---|---|---|
/// | 0 or 1 | decodable reply | `Replied` |
/// | 87, or stderr has the alloc-failure marker | any | `OutOfMemory` |
/// | anything else | any | `Crashed` |
pub fn classify(code: Option<i32>, stdout: &[u8], stderr: &str) -> WorkerExit {
    if code == Some(EXIT_OUT_OF_MEMORY) || (code != Some(0) && stderr.contains(ALLOC_FAILURE_MARKER)) {
        return WorkerExit::OutOfMemory;
    }

    match code {
        Some(0) | Some(EXIT_FAILED) => match worker::decode_reply(stdout) {
            Ok(reply) if reply.exit_code() == code.unwrap_or(-1) => WorkerExit::Replied(reply),
            Ok(reply) => WorkerExit::Crashed {
                code,
                detail: format!("reply {:?} does not match exit code", reply),
            },
            Err(e) => WorkerExit::Crashed {
                code,
                detail: format!("undecodable reply ({} bytes): {}; stderr: {}", stdout.len(), e, stderr.trim()),
            },
        },
        _ => WorkerExit::Crashed {
            code,
            detail: stderr.trim().to_string(),
        },
    }
}

/// Launches the worker binary as a child process.
pub struct ProcessLauncher {
    path: PathBuf,
    core_id: Option<usize>,
}

impl ProcessLauncher {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            core_id: None,
        }
    }

    pub fn with_core(mut self, core_id: Option<usize>) -> Self {
        self.core_id = core_id;
        self
    }

    /// The worker binary sitting next to the running executable.
    pub fn default_worker_path() -> std::io::Result<PathBuf> {
        let exe = std::env::current_exe()?;
        let dir = exe.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(dir.join(format!("{}{}", WORKER_BINARY, std::env::consts::EXE_SUFFIX)))
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

fn send_descriptor(child: &mut Child, descriptor: &TestDescriptor) -> Result<(), LaunchError> {
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| LaunchError::Send("worker stdin is not piped".to_string()))?;
    let mut writer = BufWriter::new(stdin);
    worker::write_descriptor(&mut writer, descriptor).map_err(|e| LaunchError::Send(e.to_string()))?;
    writer.flush().map_err(|e| LaunchError::Send(e.to_string()))
}

impl Launcher for ProcessLauncher {
    fn launch(&mut self, descriptor: &TestDescriptor, heap_mb: u64, timeout: Duration) -> Result<WorkerExit, LaunchError> {
        let mut cmd = Command::new(&self.path);
        cmd.arg("--heap-mb").arg(heap_mb.to_string());
        if let Some(core) = self.core_id {
            cmd.arg("--core").arg(core.to_string());
        }
        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
            path: self.path.clone(),
            source,
        })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        if let Err(e) = send_descriptor(&mut child, descriptor) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if start.elapsed() > timeout {
                let _ = child.kill();
                child.wait()?;
                break None;
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = String::from_utf8_lossy(&stderr.join().unwrap_or_default()).into_owned();

        match status {
            None => Ok(WorkerExit::TimedOut),
            Some(status) => Ok(classify(status.code(), &stdout, &stderr)),
        }
    }
}

/// Terminal state of one supervised block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    Succeeded(BlockResult),
    /// The block ran out of time budget; carries the trials that finished.
    TooSlow(BlockResult),
    TimedOut,
    /// Every attempt ran out of memory.
    OutOfMemory { attempts: u32, last_heap_mb: u64 },
    Crashed(String),
}

pub struct Supervisor<L: Launcher> {
    launcher: L,
    memory: MemoryConfig,
    timeout: Duration,
}

impl<L: Launcher> Supervisor<L> {
    pub fn new(launcher: L, memory: MemoryConfig, timeout: Duration) -> Self {
        Self { launcher, memory, timeout }
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Runs `descriptor` in a worker, retrying out-of-memory exits with the
    /// next heap budget until the attempts run out.
    pub fn run(&mut self, descriptor: &TestDescriptor) -> BlockOutcome {
        let attempts = self.memory.attempts().max(1);
        let mut heap_mb = self.memory.heap_budget_mb(0);

        for attempt in 0..attempts {
            heap_mb = self.memory.heap_budget_mb(attempt);
            debug!(
                library = %descriptor.library,
                operation = %descriptor.operation,
                size = descriptor.size,
                attempt,
                heap_mb,
                "spawning worker"
            );

            let exit = match self.launcher.launch(descriptor, heap_mb, self.timeout) {
                Ok(exit) => exit,
                Err(e) => {
                    error!(library = %descriptor.library, operation = %descriptor.operation, "{}", e);
                    return BlockOutcome::Crashed(e.to_string());
                }
            };

            match exit {
                WorkerExit::Replied(WorkerReply::Completed(block)) => return BlockOutcome::Succeeded(block),
                WorkerExit::Replied(WorkerReply::TooSlow(block)) => {
                    info!(
                        library = %descriptor.library,
                        operation = %descriptor.operation,
                        size = descriptor.size,
                        "block too slow"
                    );
                    return BlockOutcome::TooSlow(block);
                }
                WorkerExit::Replied(WorkerReply::Failed(reason)) => {
                    error!(
                        library = %descriptor.library,
                        operation = %descriptor.operation,
                        size = descriptor.size,
                        "worker failed: {}",
                        reason
                    );
                    return BlockOutcome::Crashed(reason);
                }
                WorkerExit::TimedOut => {
                    warn!(
                        library = %descriptor.library,
                        operation = %descriptor.operation,
                        size = descriptor.size,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "worker killed after timeout"
                    );
                    return BlockOutcome::TimedOut;
                }
                WorkerExit::Crashed { code, detail } => {
                    error!(
                        library = %descriptor.library,
                        operation = %descriptor.operation,
                        size = descriptor.size,
                        ?code,
                        "worker crashed: {}",
                        detail
                    );
                    let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                    return BlockOutcome::Crashed(format!("exit {}: {}", code, detail));
                }
                WorkerExit::OutOfMemory => {
                    warn!(
                        library = %descriptor.library,
                        operation = %descriptor.operation,
                        size = descriptor.size,
                        attempt,
                        heap_mb,
                        "worker ran out of memory"
                    );
                }
            }
        }

        BlockOutcome::OutOfMemory {
            attempts,
            last_heap_mb: heap_mb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::BlockResult;

    #[test]
    fn exit_87_is_out_of_memory() {
        assert_eq!(classify(Some(EXIT_OUT_OF_MEMORY), b"", ""), WorkerExit::OutOfMemory);
    }

    #[test]
    fn alloc_failure_message_is_out_of_memory() {
        let stderr = "memory allocation of 80000000 bytes failed\n";
        assert_eq!(classify(Some(134), b"", stderr), WorkerExit::OutOfMemory);
        assert_eq!(classify(None, b"", stderr), WorkerExit::OutOfMemory);
    }

    #[test]
    fn clean_exit_with_reply_is_replied() {
        let reply = WorkerReply::Completed(BlockResult::default());
        let bytes = worker::encode_reply(&reply).unwrap();
        assert_eq!(classify(Some(0), &bytes, ""), WorkerExit::Replied(reply));
    }

    #[test]
    fn failed_reply_must_come_with_exit_one() {
        let reply = WorkerReply::Failed("boom".to_string());
        let bytes = worker::encode_reply(&reply).unwrap();
        assert_eq!(classify(Some(EXIT_FAILED), &bytes, ""), WorkerExit::Replied(reply));
        assert!(matches!(classify(Some(0), &bytes, ""), WorkerExit::Crashed { .. }));
    }

    #[test]
    fn garbage_or_signal_is_crashed() {
        assert!(matches!(classify(Some(0), b"\x01", ""), WorkerExit::Crashed { code: Some(0), .. }));
        assert!(matches!(classify(None, b"", "segfault"), WorkerExit::Crashed { code: None, .. }));
        assert!(matches!(classify(Some(101), b"", "panicked"), WorkerExit::Crashed { code: Some(101), .. }));
    }
}
