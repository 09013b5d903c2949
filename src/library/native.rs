//! Hand-written baseline library
//!
//! Works directly on [`DenseMatrix`], so import/export are plain copies. Covers
//! the basic operations and the LU/Cholesky family; the iterative
//! decompositions (QR, SVD, eigen) are left to real libraries.

use crate::matrix::DenseMatrix;
use crate::operation::{Kernel, MatrixLibrary, Operation, SCALE_FACTOR};

/// Pivots smaller than this are treated as singular.
const SINGULAR_EPS: f64 = 1e-300;

pub struct NativeLibrary;

impl MatrixLibrary for NativeLibrary {
    type Matrix = DenseMatrix;

    fn name(&self) -> &'static str {
        "native"
    }

    fn import(&self, m: &DenseMatrix) -> DenseMatrix {
        m.clone()
    }

    fn export(&self, m: &DenseMatrix) -> DenseMatrix {
        m.clone()
    }

    fn kernel(&self, op: Operation) -> Option<Kernel<DenseMatrix>> {
        let kernel: Kernel<DenseMatrix> = match op {
            Operation::Mult => |m| Some(vec![m[0].mul(&m[1])]),
            Operation::Add => |m| Some(vec![m[0].add(&m[1])]),
            Operation::Scale => |m| Some(vec![m[0].scale(SCALE_FACTOR)]),
            Operation::Transpose => |m| Some(vec![m[0].transpose()]),
            Operation::Solve => |m| Some(vec![solve(&m[0], &m[1])?]),
            Operation::Invert => |m| Some(vec![invert(&m[0])?]),
            Operation::Det => |m| {
                let det = determinant(&m[0])?;
                DenseMatrix::from_row_major(1, 1, vec![det]).map(|d| vec![d])
            },
            Operation::Chol => |m| Some(vec![cholesky(&m[0])?]),
            Operation::Lu => |m| {
                let lu = LuDecomposition::new(&m[0])?;
                Some(vec![lu.lower(), lu.upper(), lu.permutation()])
            },
            Operation::Qr | Operation::Svd | Operation::EigSymm => return None,
        };
        Some(kernel)
    }
}

/// Doolittle LU with partial pivoting, packed in one matrix:
/// `P·A = L·U` with a unit diagonal on `L`.
pub struct LuDecomposition {
    packed: DenseMatrix,
    pivots: Vec<usize>,
    swaps: usize,
}

impl LuDecomposition {
    /// Returns `None` for non-square or singular input.
    pub fn new(a: &DenseMatrix) -> Option<Self> {
        if !a.is_square() {
            return None;
        }
        let n = a.rows();
        let mut packed = a.clone();
        let mut pivots: Vec<usize> = (0..n).collect();
        let mut swaps = 0;

        for k in 0..n {
            let (pivot_row, pivot_abs) = (k..n)
                .map(|i| (i, packed[(i, k)].abs()))
                .fold((k, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
            if pivot_abs < SINGULAR_EPS {
                return None;
            }
            if pivot_row != k {
                swap_rows(&mut packed, k, pivot_row);
                pivots.swap(k, pivot_row);
                swaps += 1;
            }

            let pivot = packed[(k, k)];
            for i in k + 1..n {
                let factor = packed[(i, k)] / pivot;
                packed[(i, k)] = factor;
                if factor == 0.0 {
                    continue;
                }
                for j in k + 1..n {
                    packed[(i, j)] -= factor * packed[(k, j)];
                }
            }
        }

        Some(Self { packed, pivots, swaps })
    }

    pub fn lower(&self) -> DenseMatrix {
        let n = self.packed.rows();
        let mut l = DenseMatrix::identity(n);
        for i in 0..n {
            for j in 0..i {
                l[(i, j)] = self.packed[(i, j)];
            }
        }
        l
    }

    pub fn upper(&self) -> DenseMatrix {
        let n = self.packed.rows();
        let mut u = DenseMatrix::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                u[(i, j)] = self.packed[(i, j)];
            }
        }
        u
    }

    pub fn permutation(&self) -> DenseMatrix {
        let n = self.pivots.len();
        let mut p = DenseMatrix::zeros(n, n);
        for (row, &source) in self.pivots.iter().enumerate() {
            p[(row, source)] = 1.0;
        }
        p
    }

    pub fn determinant(&self) -> f64 {
        let n = self.packed.rows();
        let diag: f64 = (0..n).map(|i| self.packed[(i, i)]).product();
        if self.swaps % 2 == 0 {
            diag
        } else {
            -diag
        }
    }

    /// Solves `A·X = B` column by column.
    pub fn solve(&self, b: &DenseMatrix) -> Option<DenseMatrix> {
        let n = self.packed.rows();
        if b.rows() != n {
            return None;
        }
        let mut x = DenseMatrix::zeros(n, b.cols());
        let mut column = vec![0.0; n];

        for c in 0..b.cols() {
            for (i, &source) in self.pivots.iter().enumerate() {
                column[i] = b[(source, c)];
            }
            // forward substitution, unit diagonal
            for i in 0..n {
                let mut sum = column[i];
                for j in 0..i {
                    sum -= self.packed[(i, j)] * column[j];
                }
                column[i] = sum;
            }
            // back substitution
            for i in (0..n).rev() {
                let mut sum = column[i];
                for j in i + 1..n {
                    sum -= self.packed[(i, j)] * column[j];
                }
                column[i] = sum / self.packed[(i, i)];
            }
            for i in 0..n {
                x[(i, c)] = column[i];
            }
        }
        Some(x)
    }
}

fn swap_rows(m: &mut DenseMatrix, a: usize, b: usize) {
    let cols = m.cols();
    let data = m.as_mut_slice();
    for j in 0..cols {
        data.swap(a * cols + j, b * cols + j);
    }
}

pub fn solve(a: &DenseMatrix, b: &DenseMatrix) -> Option<DenseMatrix> {
    LuDecomposition::new(a)?.solve(b)
}

pub fn invert(a: &DenseMatrix) -> Option<DenseMatrix> {
    LuDecomposition::new(a)?.solve(&DenseMatrix::identity(a.rows()))
}

/// Determinant via LU. A singular matrix yields `Some(0.0)`; only non-square
/// input yields `None`.
pub fn determinant(a: &DenseMatrix) -> Option<f64> {
    if !a.is_square() {
        return None;
    }
    Some(LuDecomposition::new(a).map_or(0.0, |lu| lu.determinant()))
}

/// Cholesky–Banachiewicz. Returns the lower factor, or `None` when the input
/// is not symmetric positive definite.
pub fn cholesky(a: &DenseMatrix) -> Option<DenseMatrix> {
    if !a.is_square() {
        return None;
    }
    let n = a.rows();
    let mut l = DenseMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[(i, j)];
            for k in 0..j {
                sum -= l[(i, k)] * l[(j, k)];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[(i, i)] = sum.sqrt();
            } else {
                l[(i, j)] = sum / l[(j, j)];
            }
        }
    }
    Some(l)
}
