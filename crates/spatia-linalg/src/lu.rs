//! LU factorization with partial pivoting for small dense complex systems.
//!
//! The systems solved here are at most a few dozen unknowns (channels times
//! filter taps), one per (batch, subband) cell. Cells are independent, so the
//! batched entry point spreads them over the rayon pool.

use std::f64::consts::PI;

use ndarray::{Array2, Array4, ArrayView2, ArrayView4, s};
use num_complex::Complex64;
use rayon::prelude::*;

use crate::LinalgError;

/// LU factors `P A = L U` of a square matrix.
///
/// `L` has a unit diagonal and is stored below the diagonal of `factors`,
/// `U` on and above it.
#[derive(Debug, Clone)]
pub struct Lu {
    factors: Array2<Complex64>,
    /// Row swapped with row `k` at elimination step `k`.
    swaps: Vec<usize>,
    /// `+1` or `-1`, the parity of the row permutation.
    sign: f64,
}

impl Lu {
    /// Factors `a`.
    ///
    /// A pivot whose magnitude does not exceed `n · ε · max|a_ij|` is treated
    /// as zero and the matrix is reported as singular.
    pub fn factor(a: ArrayView2<'_, Complex64>) -> Result<Self, LinalgError> {
        let (rows, cols) = a.dim();
        if rows != cols {
            return Err(LinalgError::DimensionMismatch {
                expected: (rows, rows),
                actual: (rows, cols),
            });
        }
        if a.iter().any(|v| !v.is_finite()) {
            return Err(LinalgError::NonFinite);
        }
        let n = rows;
        let scale = a.iter().fold(0.0_f64, |acc, v| acc.max(v.norm()));
        let tolerance = scale * n as f64 * f64::EPSILON;

        let mut lu = a.to_owned();
        let mut swaps = vec![0; n];
        let mut sign = 1.0;

        for k in 0..n {
            let (pivot_row, pivot_abs) = (k..n)
                .map(|i| (i, lu[[i, k]].norm()))
                .fold((k, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
            if pivot_abs <= tolerance {
                return Err(LinalgError::Singular { column: k });
            }
            swaps[k] = pivot_row;
            if pivot_row != k {
                for j in 0..n {
                    lu.swap([k, j], [pivot_row, j]);
                }
                sign = -sign;
            }

            let pivot = lu[[k, k]];
            for i in k + 1..n {
                let factor = lu[[i, k]] / pivot;
                lu[[i, k]] = factor;
                for j in k + 1..n {
                    let upper = lu[[k, j]];
                    lu[[i, j]] -= factor * upper;
                }
            }
        }

        Ok(Self {
            factors: lu,
            swaps,
            sign,
        })
    }

    /// Order of the factored matrix.
    pub fn order(&self) -> usize {
        self.factors.nrows()
    }

    /// Solves `A X = B` for `X`.
    pub fn solve(&self, b: ArrayView2<'_, Complex64>) -> Result<Array2<Complex64>, LinalgError> {
        let n = self.order();
        let (rows, cols) = b.dim();
        if rows != n {
            return Err(LinalgError::DimensionMismatch {
                expected: (n, cols),
                actual: (rows, cols),
            });
        }

        let mut x = b.to_owned();
        for (k, &p) in self.swaps.iter().enumerate() {
            if p != k {
                for j in 0..cols {
                    x.swap([k, j], [p, j]);
                }
            }
        }

        // Forward substitution with the unit lower factor.
        for i in 0..n {
            for k in 0..i {
                let l = self.factors[[i, k]];
                for j in 0..cols {
                    let v = x[[k, j]];
                    x[[i, j]] -= l * v;
                }
            }
        }

        // Back substitution with the upper factor.
        for i in (0..n).rev() {
            for k in i + 1..n {
                let u = self.factors[[i, k]];
                for j in 0..cols {
                    let v = x[[k, j]];
                    x[[i, j]] -= u * v;
                }
            }
            let d = self.factors[[i, i]];
            for j in 0..cols {
                x[[i, j]] /= d;
            }
        }

        Ok(x)
    }

    /// Inverse of the factored matrix.
    pub fn inverse(&self) -> Result<Array2<Complex64>, LinalgError> {
        self.solve(Array2::eye(self.order()).view())
    }

    /// Natural logarithm of the determinant (principal branch).
    ///
    /// For a Hermitian positive definite matrix the imaginary part is zero up
    /// to rounding and the real part is `ln det A`.
    pub fn log_det(&self) -> Complex64 {
        let mut log_det: Complex64 = self.factors.diag().iter().map(|d| d.ln()).sum();
        if self.sign < 0.0 {
            log_det += Complex64::new(0.0, PI);
        }
        log_det
    }
}

/// Solves `A X = B` for a single square system.
pub fn solve(
    a: ArrayView2<'_, Complex64>,
    b: ArrayView2<'_, Complex64>,
) -> Result<Array2<Complex64>, LinalgError> {
    Lu::factor(a)?.solve(b)
}

/// A cell of a batched solve that could not be solved.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFailure {
    pub batch: usize,
    pub cell: usize,
    pub error: LinalgError,
}

/// Result of [`solve_batched`].
#[derive(Debug, Clone)]
pub struct BatchedSolution {
    /// Solutions indexed `(batch, cell, row, column)`; zero for failed cells.
    pub solution: Array4<Complex64>,
    /// Cells whose system could not be solved, in row-major order.
    pub failures: Vec<CellFailure>,
}

/// Solves the independent systems `A[b, c] X[b, c] = B[b, c]` of a
/// `(batch, cell)` grid in parallel.
///
/// A failure in one cell does not affect the others; failed cells are left
/// at zero and listed in [`BatchedSolution::failures`]. Only operand shapes
/// that disagree for the whole grid are reported as an error.
pub fn solve_batched(
    a: ArrayView4<'_, Complex64>,
    b: ArrayView4<'_, Complex64>,
) -> Result<BatchedSolution, LinalgError> {
    let (batch_size, num_cells, n, n2) = a.dim();
    let (b_batch, b_cells, b_rows, num_rhs) = b.dim();
    if n != n2 {
        return Err(LinalgError::DimensionMismatch {
            expected: (n, n),
            actual: (n, n2),
        });
    }
    if (b_batch, b_cells, b_rows) != (batch_size, num_cells, n) {
        return Err(LinalgError::DimensionMismatch {
            expected: (n, num_rhs),
            actual: (b_rows, num_rhs),
        });
    }

    let results: Vec<Result<Array2<Complex64>, LinalgError>> = (0..batch_size * num_cells)
        .into_par_iter()
        .map(|idx| {
            let (i, c) = (idx / num_cells, idx % num_cells);
            solve(a.slice(s![i, c, .., ..]), b.slice(s![i, c, .., ..]))
        })
        .collect();

    let mut solution = Array4::zeros((batch_size, num_cells, n, num_rhs));
    let mut failures = Vec::new();
    for (idx, result) in results.into_iter().enumerate() {
        let (batch, cell) = (idx / num_cells, idx % num_cells);
        match result {
            Ok(x) => solution.slice_mut(s![batch, cell, .., ..]).assign(&x),
            Err(error) => failures.push(CellFailure { batch, cell, error }),
        }
    }

    Ok(BatchedSolution { solution, failures })
}
