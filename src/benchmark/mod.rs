//! Records exchanged between the scheduler, the supervisor and the worker

use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Everything a worker needs to run one block. Created by the scheduler and
/// never modified afterwards.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TestDescriptor {
    pub library: String,
    pub operation: Operation,
    pub size: usize,
    pub seed: u64,
    pub goal_duration_ms: u64,
    pub max_duration_ms: u64,
    pub sanity_check: bool,
    pub tolerance: f64,
    pub trials: usize,
    /// Repetition count carried over from the previous block, if any.
    pub repetition_estimate: Option<u64>,
}

impl TestDescriptor {
    pub fn goal_nanos(&self) -> u64 {
        self.goal_duration_ms.saturating_mul(1_000_000)
    }

    pub fn max_nanos(&self) -> u64 {
        self.max_duration_ms.saturating_mul(1_000_000)
    }
}

/// Outcome of checking an operation's outputs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    NoError,
    LargeError,
    /// The output contained NaN.
    Uncountable,
    /// Outputs were missing or could not be interpreted.
    Unknown,
}

impl ErrorClass {
    pub fn is_error(&self) -> bool {
        !matches!(self, ErrorClass::NoError)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::NoError => "ok",
            ErrorClass::LargeError => "large error",
            ErrorClass::Uncountable => "uncountable",
            ErrorClass::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// One timed sample.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TrialResult {
    pub ops_per_sec: f64,
    pub repetitions: u64,
    pub elapsed_nanos: u64,
    /// Peak heap bytes observed while the trial ran.
    pub memory_bytes: u64,
    /// `None` when sanity checking was disabled.
    pub error: Option<ErrorClass>,
}

/// What a worker hands back for one block.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct BlockResult {
    pub trials: Vec<TrialResult>,
    pub repetition_estimate: Option<u64>,
}
