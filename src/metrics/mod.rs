//! Summary statistics over raw trial results
//!
//! Metrics are always recomputed from stored trials; they are never persisted.

use crate::benchmark::TrialResult;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot summarise an empty sample set")]
pub struct EmptySampleError;

/// Throughput statistics, in operations per second.
#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct EvaluationMetrics {
    pub mean: f64,
    pub stdev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub samples: usize,
}

/// Summarises the throughput of `results`.
///
/// The mean is accumulated on values normalised by the maximum so that
/// samples spanning many orders of magnitude neither overflow nor lose the
/// small ones. The standard deviation is the two-pass population form.
pub fn evaluate(results: &[TrialResult]) -> Result<EvaluationMetrics, EmptySampleError> {
    if results.is_empty() {
        return Err(EmptySampleError);
    }

    let mut ops: Vec<f64> = results.iter().map(|r| r.ops_per_sec).collect();
    ops.sort_by(|a, b| a.total_cmp(b));

    let n = ops.len();
    let min = ops[0];
    let max = ops[n - 1];
    let median = ops[n / 2];

    if max == 0.0 {
        return Ok(EvaluationMetrics {
            mean: 0.0,
            stdev: 0.0,
            min,
            max,
            median,
            samples: n,
        });
    }

    let mean_ratio = ops.iter().map(|x| x / max).sum::<f64>() / n as f64;
    // rounding can push the mean a hair outside the sample range
    let mean = (max * mean_ratio).clamp(min, max);

    let variance_ratio = ops
        .iter()
        .map(|x| {
            let d = x / max - mean_ratio;
            d * d
        })
        .sum::<f64>()
        / n as f64;

    Ok(EvaluationMetrics {
        mean,
        stdev: max * variance_ratio.sqrt(),
        min,
        max,
        median,
        samples: n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn trials(ops: &[f64]) -> Vec<TrialResult> {
        ops.iter()
            .map(|&ops_per_sec| TrialResult {
                ops_per_sec,
                repetitions: 1,
                elapsed_nanos: 1,
                memory_bytes: 0,
                error: None,
            })
            .collect()
    }

    #[test]
    fn empty_sample_is_an_error() {
        assert_eq!(evaluate(&[]), Err(EmptySampleError));
    }

    #[test]
    fn known_values() {
        let m = evaluate(&trials(&[4.0, 2.0, 8.0, 6.0])).unwrap();
        assert_eq!(m.min, 2.0);
        assert_eq!(m.max, 8.0);
        assert_eq!(m.median, 6.0);
        assert!((m.mean - 5.0).abs() < 1e-12);
        assert!((m.stdev - 5.0f64.sqrt()).abs() < 1e-12);
        assert_eq!(m.samples, 4);
    }

    #[test]
    fn single_sample_has_zero_spread() {
        let m = evaluate(&trials(&[123.0])).unwrap();
        assert_eq!(m.mean, 123.0);
        assert_eq!(m.median, 123.0);
        assert_eq!(m.stdev, 0.0);
    }

    #[test]
    fn wide_dynamic_range_does_not_overflow() {
        let m = evaluate(&trials(&[1e300, 1e300, 1e-3])).unwrap();
        assert!(m.mean.is_finite());
        assert!(m.mean > 6e299 && m.mean < 7e299);
    }

    proptest! {
        #[test]
        fn order_statistics_bracket_the_centre(ops in prop::collection::vec(0.0f64..1e12, 1..64)) {
            let m = evaluate(&trials(&ops)).unwrap();
            prop_assert!(m.min <= m.median && m.median <= m.max);
            prop_assert!(m.min <= m.mean && m.mean <= m.max);
            prop_assert!(m.stdev >= 0.0);
        }

        #[test]
        fn evaluation_is_idempotent(ops in prop::collection::vec(0.0f64..1e9, 1..32)) {
            let samples = trials(&ops);
            prop_assert_eq!(evaluate(&samples), evaluate(&samples));
        }
    }
}
