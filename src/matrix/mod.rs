//! Common dense matrix representation
//!
//! Every library under test receives its inputs as `DenseMatrix` values and
//! hands its results back in the same form. The handful of operations defined
//! here are only used to build inputs and to verify outputs, never timed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

/// Row-major `f64` matrix
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DenseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl DenseMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    pub fn identity(n: usize) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            m[(i, i)] = 1.0;
        }
        m
    }

    /// Builds a matrix from row-major data. Returns `None` when the length
    /// does not match the shape.
    pub fn from_row_major(rows: usize, cols: usize, data: Vec<f64>) -> Option<Self> {
        if data.len() != rows * cols {
            return None;
        }
        Some(Self { rows, cols, data })
    }

    pub fn from_diagonal(values: &[f64]) -> Self {
        let mut m = Self::zeros(values.len(), values.len());
        for (i, &v) in values.iter().enumerate() {
            m[(i, i)] = v;
        }
        m
    }

    /// Uniformly distributed entries in `[-1, 1)`.
    pub fn random(rows: usize, cols: usize, rng: &mut StdRng) -> Self {
        let data = (0..rows * cols).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Self { rows, cols, data }
    }

    pub fn random_seeded(rows: usize, cols: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::random(rows, cols, &mut rng)
    }

    /// Symmetric matrix with entries in `[-1, 1)`.
    pub fn random_symmetric(n: usize, rng: &mut StdRng) -> Self {
        let mut m = Self::zeros(n, n);
        for i in 0..n {
            for j in i..n {
                let v = rng.gen_range(-1.0..1.0);
                m[(i, j)] = v;
                m[(j, i)] = v;
            }
        }
        m
    }

    /// Symmetric positive definite matrix: `AᵀA + nI`.
    pub fn random_spd(n: usize, rng: &mut StdRng) -> Self {
        let a = Self::random(n, n, rng);
        let mut spd = a.transpose().mul(&a);
        for i in 0..n {
            spd[(i, i)] += n as f64;
        }
        spd
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn is_square(&self) -> bool {
        self.rows == self.cols
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Row-major backing storage.
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn transpose(&self) -> Self {
        let mut t = Self::zeros(self.cols, self.rows);
        for i in 0..self.rows {
            for j in 0..self.cols {
                t[(j, i)] = self[(i, j)];
            }
        }
        t
    }

    /// Matrix product, i-k-j loop order so the inner loop walks both operands
    /// contiguously.
    pub fn mul(&self, rhs: &Self) -> Self {
        assert_eq!(self.cols, rhs.rows, "inner dimensions must agree");
        let mut out = Self::zeros(self.rows, rhs.cols);
        for i in 0..self.rows {
            let out_row = &mut out.data[i * rhs.cols..(i + 1) * rhs.cols];
            for k in 0..self.cols {
                let a = self.data[i * self.cols + k];
                if a == 0.0 {
                    continue;
                }
                let rhs_row = &rhs.data[k * rhs.cols..(k + 1) * rhs.cols];
                for (o, &b) in out_row.iter_mut().zip(rhs_row) {
                    *o += a * b;
                }
            }
        }
        out
    }

    pub fn add(&self, rhs: &Self) -> Self {
        assert_eq!(self.shape(), rhs.shape(), "shapes must agree");
        let data = self.data.iter().zip(&rhs.data).map(|(a, b)| a + b).collect();
        Self { rows: self.rows, cols: self.cols, data }
    }

    pub fn sub(&self, rhs: &Self) -> Self {
        assert_eq!(self.shape(), rhs.shape(), "shapes must agree");
        let data = self.data.iter().zip(&rhs.data).map(|(a, b)| a - b).collect();
        Self { rows: self.rows, cols: self.cols, data }
    }

    pub fn scale(&self, factor: f64) -> Self {
        let data = self.data.iter().map(|v| v * factor).collect();
        Self { rows: self.rows, cols: self.cols, data }
    }

    pub fn frobenius_norm(&self) -> f64 {
        self.data.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn has_nan(&self) -> bool {
        self.data.iter().any(|v| v.is_nan())
    }
}

impl Index<(usize, usize)> for DenseMatrix {
    type Output = f64;

    #[inline(always)]
    fn index(&self, (i, j): (usize, usize)) -> &f64 {
        &self.data[i * self.cols + j]
    }
}

impl IndexMut<(usize, usize)> for DenseMatrix {
    #[inline(always)]
    fn index_mut(&mut self, (i, j): (usize, usize)) -> &mut f64 {
        &mut self.data[i * self.cols + j]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mul_matches_hand_computed_product() {
        let a = DenseMatrix::from_row_major(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = DenseMatrix::from_row_major(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = a.mul(&b);
        assert_eq!(c.as_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn same_seed_same_matrix() {
        let a = DenseMatrix::random_seeded(4, 4, 17);
        let b = DenseMatrix::random_seeded(4, 4, 17);
        assert_eq!(a, b);
        assert_ne!(a, DenseMatrix::random_seeded(4, 4, 18));
    }

    #[test]
    fn spd_is_symmetric_with_dominant_diagonal() {
        let mut rng = StdRng::seed_from_u64(3);
        let m = DenseMatrix::random_spd(5, &mut rng);
        assert_eq!(m, m.transpose());
        for i in 0..5 {
            assert!(m[(i, i)] >= 5.0);
        }
    }

    #[test]
    fn rejects_mismatched_shape() {
        assert!(DenseMatrix::from_row_major(2, 2, vec![1.0; 3]).is_none());
    }
}
