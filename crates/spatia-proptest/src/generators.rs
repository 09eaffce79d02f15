//! Seeded tensor generators and proptest strategies.

use std::f64::consts::FRAC_1_SQRT_2;

use ndarray::{Array, Array2, Dimension, ShapeBuilder};
use num_complex::Complex64;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

/// Deterministic generator for reproducible test data.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// Circularly symmetric complex Gaussian samples with unit variance.
pub fn complex_gaussian<Sh, D>(rng: &mut impl Rng, shape: Sh) -> Array<Complex64, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    Array::from_shape_simple_fn(shape, || {
        let re: f64 = rng.sample(StandardNormal);
        let im: f64 = rng.sample(StandardNormal);
        Complex64::new(re, im) * FRAC_1_SQRT_2
    })
}

/// Standard normal real samples.
pub fn real_gaussian<Sh, D>(rng: &mut impl Rng, shape: Sh) -> Array<f64, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    Array::from_shape_simple_fn(shape, || rng.sample(StandardNormal))
}

/// Uniform samples in `[0, 1)`.
pub fn uniform<Sh, D>(rng: &mut impl Rng, shape: Sh) -> Array<f64, D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    Array::from_shape_simple_fn(shape, || rng.random::<f64>())
}

/// Valid lengths for a padded batch. The first element always spans the
/// full `num_frames` so the padded tensor is as short as possible.
pub fn random_lengths(rng: &mut impl Rng, batch_size: usize, num_frames: usize) -> Vec<usize> {
    (0..batch_size)
        .map(|b| {
            if b == 0 || num_frames <= 1 {
                num_frames
            } else {
                rng.random_range(1..=num_frames)
            }
        })
        .collect()
}

/// Well-conditioned Hermitian positive definite matrix `G Gᴴ + n I`.
pub fn hermitian_positive_definite(rng: &mut impl Rng, n: usize) -> Array2<Complex64> {
    let g: Array2<Complex64> = complex_gaussian(rng, (n, n));
    let gh = g.t().mapv(|v| v.conj());
    let mut a = g.dot(&gh);
    for i in 0..n {
        a[[i, i]] += Complex64::new(n as f64, 0.0);
    }
    a
}

/// Small `(batch, channel, subband, frame)` shape for property tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, test_strategy::Arbitrary)]
pub struct TensorShape {
    #[strategy(1..=3usize)]
    pub batch: usize,
    #[strategy(1..=4usize)]
    pub channels: usize,
    #[strategy(1..=9usize)]
    pub subbands: usize,
    #[strategy(1..=24usize)]
    pub frames: usize,
}

impl TensorShape {
    /// The shape as an ndarray pattern.
    pub fn dim(&self) -> (usize, usize, usize, usize) {
        (self.batch, self.channels, self.subbands, self.frames)
    }
}
