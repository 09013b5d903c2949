use crate::matrix::DenseMatrix;
use crate::operation::{Kernel, MatrixLibrary, Operation, SCALE_FACTOR};
use ::nalgebra::DMatrix;

/// `nalgebra::DMatrix` and its decompositions.
pub struct NalgebraLibrary;

impl MatrixLibrary for NalgebraLibrary {
    type Matrix = DMatrix<f64>;

    fn name(&self) -> &'static str {
        "nalgebra"
    }

    fn import(&self, m: &DenseMatrix) -> DMatrix<f64> {
        DMatrix::from_row_slice(m.rows(), m.cols(), m.as_slice())
    }

    fn export(&self, m: &DMatrix<f64>) -> DenseMatrix {
        let mut out = DenseMatrix::zeros(m.nrows(), m.ncols());
        for i in 0..m.nrows() {
            for j in 0..m.ncols() {
                out[(i, j)] = m[(i, j)];
            }
        }
        out
    }

    fn kernel(&self, op: Operation) -> Option<Kernel<DMatrix<f64>>> {
        let kernel: Kernel<DMatrix<f64>> = match op {
            Operation::Mult => |m| Some(vec![&m[0] * &m[1]]),
            Operation::Add => |m| Some(vec![&m[0] + &m[1]]),
            Operation::Scale => |m| Some(vec![&m[0] * SCALE_FACTOR]),
            Operation::Transpose => |m| Some(vec![m[0].transpose()]),
            Operation::Solve => |m| Some(vec![m[0].clone().lu().solve(&m[1])?]),
            Operation::Invert => |m| Some(vec![m[0].clone().try_inverse()?]),
            Operation::Det => |m| Some(vec![DMatrix::from_element(1, 1, m[0].determinant())]),
            Operation::Chol => |m| Some(vec![m[0].clone().cholesky()?.unpack()]),
            Operation::Lu => |m| {
                let n = m[0].nrows();
                let (p, l, u) = m[0].clone().lu().unpack();
                let mut permutation = DMatrix::<f64>::identity(n, n);
                p.permute_rows(&mut permutation);
                Some(vec![l, u, permutation])
            },
            Operation::Qr => |m| {
                let qr = m[0].clone().qr();
                Some(vec![qr.q(), qr.r()])
            },
            Operation::Svd => |m| {
                let svd = m[0].clone().svd(true, true);
                let s = DMatrix::from_diagonal(&svd.singular_values);
                Some(vec![svd.u?, s, svd.v_t?.transpose()])
            },
            Operation::EigSymm => |m| {
                let eig = m[0].clone().symmetric_eigen();
                let d = DMatrix::from_diagonal(&eig.eigenvalues);
                Some(vec![eig.eigenvectors, d])
            },
        };
        Some(kernel)
    }
}
