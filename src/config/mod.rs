//! Run configuration
//!
//! Defaults describe a full run. A JSON file may override any subset of the
//! fields; command-line flags are applied on top by the binaries.

use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub output_dir: PathBuf,
    /// Library names to run; empty means every registered library.
    pub libraries: Vec<String>,
    /// Operations to run; empty means all of them.
    pub operations: Vec<Operation>,
    pub seed: u64,
    pub sizes: SizeConfig,
    pub trial: TrialConfig,
    pub schedule: ScheduleConfig,
    pub memory: MemoryConfig,
    pub worker: WorkerConfig,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SizeConfig {
    pub min_size: usize,
    pub max_size: usize,
    /// Explicit list; replaces the min/max series when non-empty.
    pub explicit: Vec<usize>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TrialConfig {
    pub goal_duration_ms: u64,
    pub max_duration_ms: u64,
    pub trials_per_block: usize,
    pub sanity_check: bool,
    pub tolerance: f64,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    pub blocks_per_size: usize,
    pub randomize_order: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    /// Every attempt gets `base_mb`; out-of-memory is not retried.
    Fixed,
    /// Attempt `k` gets `base_mb + scale_mb * k`.
    Dynamic,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub mode: MemoryMode,
    pub base_mb: u64,
    pub scale_mb: u64,
    pub max_attempts: u32,
    /// Added to the block's max duration to get the hard kill timeout.
    pub timeout_grace_ms: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker binary; defaults to `run_single_benchmark` next to the running
    /// executable.
    pub path: Option<PathBuf>,
    pub core_id: Option<usize>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("benchmark_results"),
            libraries: Vec::new(),
            operations: Vec::new(),
            seed: 0xDEAD_BEEF,
            sizes: SizeConfig::default(),
            trial: TrialConfig::default(),
            schedule: ScheduleConfig::default(),
            memory: MemoryConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl Default for SizeConfig {
    fn default() -> Self {
        Self {
            min_size: 2,
            max_size: 2000,
            explicit: Vec::new(),
        }
    }
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            goal_duration_ms: 3000,
            max_duration_ms: 600_000,
            trials_per_block: 5,
            sanity_check: true,
            tolerance: 0.05,
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            blocks_per_size: 3,
            randomize_order: false,
        }
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            mode: MemoryMode::Dynamic,
            base_mb: 256,
            scale_mb: 256,
            max_attempts: 5,
            timeout_grace_ms: 60_000,
        }
    }
}

impl MemoryConfig {
    /// Heap budget for the zero-based `attempt`.
    pub fn heap_budget_mb(&self, attempt: u32) -> u64 {
        match self.mode {
            MemoryMode::Fixed => self.base_mb,
            MemoryMode::Dynamic => self
                .base_mb
                .saturating_add(self.scale_mb.saturating_mul(attempt as u64)),
        }
    }

    /// Attempts allowed per block.
    pub fn attempts(&self) -> u32 {
        match self.mode {
            MemoryMode::Fixed => 1,
            MemoryMode::Dynamic => self.max_attempts,
        }
    }
}

impl TrialConfig {
    /// Hard wall-clock limit for a worker process.
    pub fn worker_timeout(&self, memory: &MemoryConfig) -> Duration {
        Duration::from_millis(self.max_duration_ms.saturating_add(memory.timeout_grace_ms))
    }
}

impl SizeConfig {
    /// Matrix sizes to evaluate, ascending. Without an explicit list this is
    /// the 1-2-5 series clipped to `[min_size, max_size]`.
    pub fn sizes(&self) -> Vec<usize> {
        if !self.explicit.is_empty() {
            let mut sizes = self.explicit.clone();
            sizes.sort_unstable();
            sizes.dedup();
            return sizes;
        }

        let mut sizes = Vec::new();
        let mut decade = 1usize;
        while decade <= self.max_size {
            for step in [1, 2, 5] {
                let size = decade.saturating_mul(step);
                if size >= self.min_size && size <= self.max_size {
                    sizes.push(size);
                }
            }
            decade = match decade.checked_mul(10) {
                Some(d) => d,
                None => break,
            };
        }
        sizes
    }
}

impl BenchmarkConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg.to_string())) };

        if self.sizes.sizes().is_empty() {
            return invalid("no matrix sizes selected");
        }
        if self.sizes.sizes().contains(&0) {
            return invalid("matrix sizes must be positive");
        }
        if self.trial.goal_duration_ms == 0 {
            return invalid("goal duration must be positive");
        }
        if self.trial.max_duration_ms < self.trial.goal_duration_ms {
            return invalid("max duration must be at least the goal duration");
        }
        if self.trial.trials_per_block == 0 {
            return invalid("trials per block must be positive");
        }
        if !(self.trial.tolerance > 0.0) {
            return invalid("tolerance must be positive");
        }
        if self.schedule.blocks_per_size == 0 {
            return invalid("blocks per size must be positive");
        }
        if self.memory.base_mb == 0 {
            return invalid("base heap budget must be positive");
        }
        if self.memory.mode == MemoryMode::Dynamic {
            if self.memory.max_attempts == 0 {
                return invalid("at least one attempt is required");
            }
            if self.memory.scale_mb == 0 && self.memory.max_attempts > 1 {
                return invalid("dynamic memory needs a positive scale to retry");
            }
        }
        Ok(())
    }
}
