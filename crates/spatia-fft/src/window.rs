//! Analysis windows.

use std::f64::consts::TAU;

/// Periodic Hann window of length `n`: `0.5 - 0.5 cos(2πi / n)`.
///
/// Periodic (rather than symmetric) windows overlap-add to a constant at
/// hops of `n / 2` and `n / 4`.
pub(crate) fn hann_periodic(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (TAU * i as f64 / n as f64).cos())
        .collect()
}
