//! Hermitian-transpose products.

use ndarray::{Array2, ArrayView1, ArrayView2};
use num_complex::Complex64;

/// Conjugate transpose `Aᴴ`.
pub fn conj_transpose(a: ArrayView2<'_, Complex64>) -> Array2<Complex64> {
    a.t().mapv(|v| v.conj())
}

/// Hermitian part `(A + Aᴴ) / 2`.
pub fn hermitian_part(a: ArrayView2<'_, Complex64>) -> Array2<Complex64> {
    let ah = conj_transpose(a);
    (&a + &ah).mapv(|v| v * 0.5)
}

/// Weighted Gram product `Xᴴ diag(w) Y`.
///
/// `x` is `(frames, k)`, `y` is `(frames, m)` and `weight` has one
/// non-negative entry per frame; the result is `(k, m)`.
pub fn weighted_gram(
    x: ArrayView2<'_, Complex64>,
    weight: ArrayView1<'_, f64>,
    y: ArrayView2<'_, Complex64>,
) -> Array2<Complex64> {
    debug_assert_eq!(x.nrows(), weight.len());
    debug_assert_eq!(y.nrows(), weight.len());
    let weighted = Array2::from_shape_fn(y.dim(), |(n, j)| y[[n, j]] * weight[n]);
    conj_transpose(x).dot(&weighted)
}

/// Quadratic form `xᴴ A x`.
pub fn quadratic_form(x: ArrayView1<'_, Complex64>, a: ArrayView2<'_, Complex64>) -> Complex64 {
    let ax = a.dot(&x);
    x.iter().zip(ax.iter()).map(|(xi, axi)| xi.conj() * axi).sum()
}
