//! Operations under test and the adapter calling convention
//!
//! An [`OperationAdapter`] is what the trial controller times. Libraries do not
//! implement it directly: they expose one kernel function per supported
//! [`Operation`] and [`KernelAdapter`] turns any kernel into an adapter.

use crate::matrix::DenseMatrix;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hint::black_box;
use std::str::FromStr;
use std::time::Instant;

/// The linear-algebra operations the harness knows how to generate and check.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Mult,
    Add,
    Scale,
    Transpose,
    Solve,
    Invert,
    Det,
    Chol,
    Lu,
    Qr,
    Svd,
    EigSymm,
}

impl Operation {
    pub const ALL: [Operation; 12] = [
        Operation::Mult,
        Operation::Add,
        Operation::Scale,
        Operation::Transpose,
        Operation::Solve,
        Operation::Invert,
        Operation::Det,
        Operation::Chol,
        Operation::Lu,
        Operation::Qr,
        Operation::Svd,
        Operation::EigSymm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Mult => "mult",
            Operation::Add => "add",
            Operation::Scale => "scale",
            Operation::Transpose => "transpose",
            Operation::Solve => "solve",
            Operation::Invert => "invert",
            Operation::Det => "det",
            Operation::Chol => "chol",
            Operation::Lu => "lu",
            Operation::Qr => "qr",
            Operation::Svd => "svd",
            Operation::EigSymm => "eig_symm",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| format!("unknown operation '{}'", s))
    }
}

/// Factor used by the scale operation.
pub const SCALE_FACTOR: f64 = 2.5;

/// Uniform calling convention for a timed operation.
pub trait OperationAdapter {
    /// Called once before the first trial.
    fn configure(&mut self) {}

    /// Runs the operation `trial_count` times on `inputs` and returns the
    /// elapsed nanoseconds of the loop. The result of the last repetition is
    /// written into `outputs`; conversions happen outside the timed region.
    fn process(&mut self, inputs: &[DenseMatrix], outputs: &mut Vec<DenseMatrix>, trial_count: u64) -> u64;

    /// Library name, for logging.
    fn name(&self) -> &str;
}

/// One library's implementation of one operation, on its own matrix type.
/// Returns `None` when the library reports a numerical failure (singular
/// input, non-convergence).
pub type Kernel<M> = fn(&[M]) -> Option<Vec<M>>;

/// A linear-algebra library as seen by the harness: how to move matrices in
/// and out of its native type, and which operations it can run.
pub trait MatrixLibrary {
    type Matrix;

    fn name(&self) -> &'static str;

    fn import(&self, m: &DenseMatrix) -> Self::Matrix;

    fn export(&self, m: &Self::Matrix) -> DenseMatrix;

    /// Capability table. `None` means the library does not offer `op`.
    fn kernel(&self, op: Operation) -> Option<Kernel<Self::Matrix>>;
}

/// Adapter driving a single library kernel.
pub struct KernelAdapter<L: MatrixLibrary> {
    library: L,
    kernel: Kernel<L::Matrix>,
}

impl<L: MatrixLibrary> KernelAdapter<L> {
    pub fn new(library: L, op: Operation) -> Option<Self> {
        let kernel = library.kernel(op)?;
        Some(Self { library, kernel })
    }
}

impl<L: MatrixLibrary> OperationAdapter for KernelAdapter<L> {
    fn process(&mut self, inputs: &[DenseMatrix], outputs: &mut Vec<DenseMatrix>, trial_count: u64) -> u64 {
        let native: Vec<L::Matrix> = inputs.iter().map(|m| self.library.import(m)).collect();
        let mut last = None;

        let start = Instant::now();
        for _ in 0..trial_count {
            last = black_box((self.kernel)(black_box(native.as_slice())));
        }
        let elapsed = start.elapsed().as_nanos() as u64;

        outputs.clear();
        if let Some(results) = last {
            outputs.extend(results.iter().map(|m| self.library.export(m)));
        }
        elapsed
    }

    fn name(&self) -> &str {
        self.library.name()
    }
}
