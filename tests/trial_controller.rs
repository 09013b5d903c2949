//! Calibration behaviour of the trial controller, driven by adapters that
//! report synthetic elapsed times instead of sleeping.

use matrix_benchmark_rs::matrix::DenseMatrix;
use matrix_benchmark_rs::operation::OperationAdapter;
use matrix_benchmark_rs::trial::{Measurement, TrialController, TrialError, MAX_REFINEMENTS, MAX_REPETITIONS};
use proptest::prelude::*;

const MS: u64 = 1_000_000;

fn no_quiesce() {}

/// Costs a fixed number of nanoseconds per repetition.
struct ConstantCost {
    nanos_per_call: u64,
    calls: Vec<u64>,
}

impl ConstantCost {
    fn new(nanos_per_call: u64) -> Self {
        Self { nanos_per_call, calls: Vec::new() }
    }
}

impl OperationAdapter for ConstantCost {
    fn process(&mut self, _inputs: &[DenseMatrix], _outputs: &mut Vec<DenseMatrix>, trial_count: u64) -> u64 {
        self.calls.push(trial_count);
        trial_count.saturating_mul(self.nanos_per_call)
    }

    fn name(&self) -> &str {
        "constant"
    }
}

/// Reports zero until `n` reaches a threshold, like a coarse timer.
struct CoarseTimer {
    resolution_reps: u64,
    nanos_per_call: u64,
    calls: Vec<u64>,
}

impl OperationAdapter for CoarseTimer {
    fn process(&mut self, _inputs: &[DenseMatrix], _outputs: &mut Vec<DenseMatrix>, trial_count: u64) -> u64 {
        self.calls.push(trial_count);
        if trial_count < self.resolution_reps {
            0
        } else {
            trial_count * self.nanos_per_call
        }
    }

    fn name(&self) -> &str {
        "coarse"
    }
}

/// Always reports the same duration no matter how many repetitions ran.
struct FlatCost;

impl OperationAdapter for FlatCost {
    fn process(&mut self, _inputs: &[DenseMatrix], _outputs: &mut Vec<DenseMatrix>, _trial_count: u64) -> u64 {
        1
    }

    fn name(&self) -> &str {
        "flat"
    }
}

fn measure(controller: &mut TrialController, adapter: &mut dyn OperationAdapter) -> Result<Measurement, TrialError> {
    let mut outputs = Vec::new();
    controller.measure(adapter, &[], &mut outputs)
}

#[test]
fn two_millisecond_call_settles_on_five_hundred() {
    let mut adapter = ConstantCost::new(2 * MS);
    let mut controller = TrialController::new(1000 * MS).with_quiesce(no_quiesce);

    let m = measure(&mut controller, &mut adapter).unwrap();

    assert_eq!(m.repetitions, 500);
    assert!(m.refinements <= 3, "took {} refinements", m.refinements);
    assert!((m.ops_per_sec - 500.0).abs() < 1e-6);
    assert_eq!(adapter.calls, vec![1, 500]);
    assert_eq!(controller.estimate(), Some(500));
}

proptest! {
    #[test]
    fn accepted_time_reaches_ninety_percent_of_goal(goal_ms in 1u64..=2_000_000, cost_nanos in 1u64..=100_000_000) {
        let mut adapter = ConstantCost::new(cost_nanos);
        let mut controller = TrialController::new(goal_ms * MS).with_quiesce(no_quiesce);

        let m = measure(&mut controller, &mut adapter).unwrap();

        prop_assert!(m.elapsed_nanos as f64 >= 0.9 * (goal_ms * MS) as f64);
        prop_assert!(m.refinements <= MAX_REFINEMENTS);
    }
}

#[test]
fn nanosecond_kernel_converges_on_a_long_goal() {
    let mut adapter = ConstantCost::new(1);
    let mut controller = TrialController::new(1_500_000 * MS).with_quiesce(no_quiesce);

    let m = measure(&mut controller, &mut adapter).unwrap();

    assert_eq!(m.repetitions, 1_500_000 * MS);
    assert_eq!(adapter.calls, vec![1, 1_500_000 * MS]);
}

#[test]
fn carried_estimate_is_accepted_immediately() {
    let mut adapter = ConstantCost::new(2 * MS);
    let mut controller = TrialController::new(1000 * MS)
        .with_quiesce(no_quiesce)
        .with_estimate(Some(500));

    let m = measure(&mut controller, &mut adapter).unwrap();

    assert_eq!(m.refinements, 1);
    assert_eq!(adapter.calls, vec![500]);

    // the next trial on the same controller starts from the updated estimate
    measure(&mut controller, &mut adapter).unwrap();
    assert_eq!(adapter.calls, vec![500, 500]);
}

#[test]
fn zero_elapsed_doubles_repetitions() {
    let mut adapter = CoarseTimer {
        resolution_reps: 8,
        nanos_per_call: 100 * MS,
        calls: Vec::new(),
    };
    let mut controller = TrialController::new(1000 * MS).with_quiesce(no_quiesce);

    let m = measure(&mut controller, &mut adapter).unwrap();

    assert_eq!(&adapter.calls[..4], &[1, 2, 4, 8]);
    assert!(m.elapsed_nanos >= 900 * MS);
}

#[test]
fn stalled_projection_hits_the_refinement_cap() {
    let mut controller = TrialController::new(1000 * MS).with_quiesce(no_quiesce);

    let err = measure(&mut controller, &mut FlatCost).unwrap_err();

    assert_eq!(
        err,
        TrialError::Unstable {
            iterations: MAX_REFINEMENTS,
            repetitions: MAX_REPETITIONS,
        }
    );
}

#[test]
fn exhausted_budget_stops_the_trial() {
    let mut adapter = ConstantCost::new(2 * MS);
    let mut controller = TrialController::new(1000 * MS)
        .with_quiesce(no_quiesce)
        .with_budget(1500 * MS);

    measure(&mut controller, &mut adapter).unwrap();
    assert_eq!(controller.spent_nanos(), 1002 * MS);

    // second trial starts under budget and finishes over it
    measure(&mut controller, &mut adapter).unwrap();

    let err = measure(&mut controller, &mut adapter).unwrap_err();
    assert!(matches!(err, TrialError::BudgetExhausted { .. }));
}
