//! Adaptive repetition-count calibration
//!
//! Cost per call is not constant across repetition counts (call overhead,
//! warm caches), so the controller refines `n` by linear projection until a
//! run lands within 90% of the goal duration.

use crate::matrix::DenseMatrix;
use crate::memory;
use crate::operation::OperationAdapter;
use thiserror::Error;
use tracing::{debug, trace};

/// Refinement iterations allowed per trial.
pub const MAX_REFINEMENTS: usize = 20;

/// Upper bound on a projected repetition count. Half the `u64` range, so
/// doubling and projection never overflow.
pub const MAX_REPETITIONS: u64 = u64::MAX / 2;

/// Fraction of the goal a run must reach to be accepted.
const ACCEPT_FRACTION: f64 = 0.9;

#[derive(Debug, Error, PartialEq)]
pub enum TrialError {
    #[error("timing did not settle after {iterations} refinement iterations (last n = {repetitions})")]
    Unstable { iterations: usize, repetitions: u64 },

    #[error("block budget of {budget_nanos} ns exhausted after {spent_nanos} ns")]
    BudgetExhausted { budget_nanos: u64, spent_nanos: u64 },
}

/// A trial that reached the goal duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub repetitions: u64,
    pub elapsed_nanos: u64,
    pub ops_per_sec: f64,
    pub refinements: usize,
}

pub struct TrialController {
    goal_nanos: u64,
    budget_nanos: Option<u64>,
    spent_nanos: u64,
    estimate: Option<u64>,
    quiesce: fn(),
}

impl TrialController {
    pub fn new(goal_nanos: u64) -> Self {
        Self {
            goal_nanos: goal_nanos.max(1),
            budget_nanos: None,
            spent_nanos: 0,
            estimate: None,
            quiesce: memory::quiesce,
        }
    }

    /// Starting repetition count, usually carried from an earlier block.
    pub fn with_estimate(mut self, estimate: Option<u64>) -> Self {
        self.estimate = estimate.filter(|&n| n > 0);
        self
    }

    /// Total measured nanoseconds this controller may spend across all its
    /// trials.
    pub fn with_budget(mut self, budget_nanos: u64) -> Self {
        self.budget_nanos = Some(budget_nanos);
        self
    }

    pub fn with_quiesce(mut self, quiesce: fn()) -> Self {
        self.quiesce = quiesce;
        self
    }

    pub fn estimate(&self) -> Option<u64> {
        self.estimate
    }

    pub fn spent_nanos(&self) -> u64 {
        self.spent_nanos
    }

    /// Runs one trial: calibrates `n`, then reports the accepted run.
    pub fn measure(
        &mut self,
        adapter: &mut dyn OperationAdapter,
        inputs: &[DenseMatrix],
        outputs: &mut Vec<DenseMatrix>,
    ) -> Result<Measurement, TrialError> {
        let mut n = self.estimate.unwrap_or(1);

        for iteration in 1..=MAX_REFINEMENTS {
            if let Some(budget) = self.budget_nanos {
                if self.spent_nanos >= budget {
                    return Err(TrialError::BudgetExhausted {
                        budget_nanos: budget,
                        spent_nanos: self.spent_nanos,
                    });
                }
            }

            (self.quiesce)();
            let t = adapter.process(inputs, outputs, n);
            self.spent_nanos = self.spent_nanos.saturating_add(t);
            trace!(iteration, repetitions = n, elapsed_nanos = t, "refinement");

            if t == 0 {
                n = n.saturating_mul(2).min(MAX_REPETITIONS);
                continue;
            }

            if t as f64 >= ACCEPT_FRACTION * self.goal_nanos as f64 {
                let ops_per_sec = n as f64 / (t as f64 / 1e9);
                self.estimate = Some(project(self.goal_nanos, n, t));
                debug!(repetitions = n, elapsed_nanos = t, ops_per_sec, iteration, "trial accepted");
                return Ok(Measurement {
                    repetitions: n,
                    elapsed_nanos: t,
                    ops_per_sec,
                    refinements: iteration,
                });
            }

            let projected = project(self.goal_nanos, n, t);
            if projected > n {
                n = projected;
            }
            // otherwise the projection stalled; retry with the same n
        }

        Err(TrialError::Unstable {
            iterations: MAX_REFINEMENTS,
            repetitions: n,
        })
    }
}

/// `ceil(goal · n / t)`, clamped to `[1, MAX_REPETITIONS]`.
fn project(goal_nanos: u64, n: u64, t: u64) -> u64 {
    let projected = (goal_nanos as f64 * n as f64 / t as f64).ceil();
    if projected >= MAX_REPETITIONS as f64 {
        MAX_REPETITIONS
    } else {
        (projected as u64).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_rounds_up_and_clamps() {
        assert_eq!(project(1_000, 1, 3), 334);
        assert_eq!(project(10, 1, 1_000), 1);
        assert_eq!(project(u64::MAX, u64::MAX, 1), MAX_REPETITIONS);
    }
}
