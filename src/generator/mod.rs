//! Input generation and output verification for each operation

use crate::benchmark::ErrorClass;
use crate::library::native;
use crate::matrix::DenseMatrix;
use crate::operation::{Operation, SCALE_FACTOR};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Builds the inputs of an operation and judges the outputs a library
/// produced for them.
pub trait InputOutputGenerator {
    /// Creates the inputs for a square problem of dimension `size`. The
    /// generator keeps a copy to check results against.
    fn create_inputs(&mut self, size: usize, seed: u64) -> Vec<DenseMatrix>;

    /// Number of matrices a correct implementation writes back.
    fn num_outputs(&self) -> usize;

    /// Classifies `outputs` against the inputs from the last `create_inputs`
    /// call using a relative error threshold.
    fn check_results(&self, outputs: &[DenseMatrix], tolerance: f64) -> ErrorClass;
}

/// Generator for a single [`Operation`].
pub struct OperationGenerator {
    op: Operation,
    inputs: Vec<DenseMatrix>,
}

pub fn generator_for(op: Operation) -> OperationGenerator {
    OperationGenerator { op, inputs: Vec::new() }
}

impl InputOutputGenerator for OperationGenerator {
    fn create_inputs(&mut self, size: usize, seed: u64) -> Vec<DenseMatrix> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.inputs = match self.op {
            Operation::Mult | Operation::Add => vec![
                DenseMatrix::random(size, size, &mut rng),
                DenseMatrix::random(size, size, &mut rng),
            ],
            Operation::Solve => vec![
                DenseMatrix::random(size, size, &mut rng),
                DenseMatrix::random(size, 1, &mut rng),
            ],
            Operation::Chol => vec![DenseMatrix::random_spd(size, &mut rng)],
            Operation::EigSymm => vec![DenseMatrix::random_symmetric(size, &mut rng)],
            Operation::Scale
            | Operation::Transpose
            | Operation::Invert
            | Operation::Det
            | Operation::Lu
            | Operation::Qr
            | Operation::Svd => vec![DenseMatrix::random(size, size, &mut rng)],
        };
        self.inputs.clone()
    }

    fn num_outputs(&self) -> usize {
        match self.op {
            Operation::Lu | Operation::Svd => 3,
            Operation::Qr | Operation::EigSymm => 2,
            _ => 1,
        }
    }

    fn check_results(&self, outputs: &[DenseMatrix], tolerance: f64) -> ErrorClass {
        if self.inputs.is_empty() || outputs.len() != self.num_outputs() {
            return ErrorClass::Unknown;
        }
        if outputs.iter().any(DenseMatrix::has_nan) {
            return ErrorClass::Uncountable;
        }

        match self.residual(outputs) {
            None => ErrorClass::Unknown,
            Some(error) if error.is_nan() => ErrorClass::Uncountable,
            Some(error) if error > tolerance => ErrorClass::LargeError,
            Some(_) => ErrorClass::NoError,
        }
    }
}

impl OperationGenerator {
    /// Relative error of `outputs`, or `None` when their shapes make no sense
    /// for this operation.
    fn residual(&self, outputs: &[DenseMatrix]) -> Option<f64> {
        let a = &self.inputs[0];
        let n = a.rows();
        match self.op {
            Operation::Mult => relative_error(&outputs[0], &a.mul(&self.inputs[1])),
            Operation::Add => relative_error(&outputs[0], &a.add(&self.inputs[1])),
            Operation::Scale => relative_error(&outputs[0], &a.scale(SCALE_FACTOR)),
            Operation::Transpose => relative_error(&outputs[0], &a.transpose()),
            Operation::Solve => {
                let ax = checked_mul(a, &outputs[0])?;
                relative_error(&ax, &self.inputs[1])
            }
            Operation::Invert => {
                let product = checked_mul(a, &outputs[0])?;
                relative_error(&product, &DenseMatrix::identity(n))
            }
            Operation::Det => {
                if outputs[0].shape() != (1, 1) {
                    return None;
                }
                let expected = native::determinant(a).unwrap_or(0.0);
                Some(scalar_error(outputs[0][(0, 0)], expected))
            }
            Operation::Chol => {
                let l = &outputs[0];
                let llt = checked_mul(l, &l.transpose())?;
                relative_error(&llt, a)
            }
            Operation::Lu => {
                let (l, u, p) = (&outputs[0], &outputs[1], &outputs[2]);
                let pa = checked_mul(p, a)?;
                relative_error(&checked_mul(l, u)?, &pa)
            }
            Operation::Qr => {
                let qr = checked_mul(&outputs[0], &outputs[1])?;
                relative_error(&qr, a)
            }
            Operation::Svd => {
                let (u, s, v) = (&outputs[0], &outputs[1], &outputs[2]);
                let us = checked_mul(u, s)?;
                relative_error(&checked_mul(&us, &v.transpose())?, a)
            }
            Operation::EigSymm => {
                let (v, d) = (&outputs[0], &outputs[1]);
                let av = checked_mul(a, v)?;
                relative_error(&av, &checked_mul(v, d)?)
            }
        }
    }
}

fn checked_mul(a: &DenseMatrix, b: &DenseMatrix) -> Option<DenseMatrix> {
    (a.cols() == b.rows()).then(|| a.mul(b))
}

/// `‖actual - expected‖ / ‖expected‖`, falling back to the absolute error
/// when the expected value is zero.
fn relative_error(actual: &DenseMatrix, expected: &DenseMatrix) -> Option<f64> {
    if actual.shape() != expected.shape() {
        return None;
    }
    let diff = actual.sub(expected).frobenius_norm();
    let norm = expected.frobenius_norm();
    Some(if norm == 0.0 { diff } else { diff / norm })
}

fn scalar_error(actual: f64, expected: f64) -> f64 {
    if expected == 0.0 {
        actual.abs()
    } else {
        ((actual - expected) / expected).abs()
    }
}
