//! Per-(batch, feature) normalization over the channel and frame axes.
//!
//! Statistics are accumulated over `(channel, frame)` for every
//! `(batch, feature)` pair of a `(batch, channel, feature, frame)` tensor,
//! using only the valid frames when lengths are given. The normalization
//! itself is applied to every frame, padded ones included.

use ndarray::{Array2, Array4, ArrayView4, Axis, s};

use crate::length::valid_frames;

/// Mean over `(channel, valid frame)` for every `(batch, feature)` pair.
///
/// Batch elements without valid frames get a zero mean.
pub fn mean_channel_time(x: ArrayView4<'_, f64>, lengths: Option<&[usize]>) -> Array2<f64> {
    let (batch_size, num_channels, num_features, num_frames) = x.dim();
    let mut mean = Array2::zeros((batch_size, num_features));
    for b in 0..batch_size {
        let len = valid_frames(lengths, b, num_frames);
        if len == 0 || num_channels == 0 {
            continue;
        }
        let valid = x.slice(s![b, .., .., ..len]);
        let sum = valid.sum_axis(Axis(2)).sum_axis(Axis(0));
        mean.row_mut(b)
            .assign(&(sum / (num_channels * len) as f64));
    }
    mean
}

/// Subtracts the `(channel, frame)` mean.
pub fn normalize_mean(x: &mut Array4<f64>, lengths: Option<&[usize]>) {
    let mean = mean_channel_time(x.view(), lengths);
    for ((b, _, f, _), v) in x.indexed_iter_mut() {
        *v -= mean[[b, f]];
    }
}

/// Subtracts the `(channel, frame)` mean and divides by the RMS of the
/// centered values, floored at `sqrt(eps)`.
pub fn normalize_mean_var(x: &mut Array4<f64>, lengths: Option<&[usize]>, eps: f64) {
    normalize_mean(x, lengths);
    let var = mean_channel_time(x.mapv(|v| v * v).view(), lengths);
    let inv_std = var.mapv(|v| v.max(eps).sqrt().recip());
    for ((b, _, f, _), v) in x.indexed_iter_mut() {
        *v *= inv_std[[b, f]];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn ramp(shape: (usize, usize, usize, usize)) -> Array4<f64> {
        Array4::from_shape_fn(shape, |(b, c, f, n)| {
            (b as f64 + 1.0) * (c as f64 - 0.5 * f as f64) + (n as f64 * 0.37).sin()
        })
    }

    #[test]
    fn mean_normalization_zeroes_mean() {
        let mut x = ramp((2, 3, 4, 9));
        normalize_mean(&mut x, None);
        let mean = mean_channel_time(x.view(), None);
        for &m in &mean {
            assert!(m.abs() < 1e-12, "residual mean {m}");
        }
    }

    #[test]
    fn mean_var_normalization_gives_unit_rms() {
        let mut x = ramp((2, 3, 4, 9));
        normalize_mean_var(&mut x, None, 1e-8);
        let power = mean_channel_time(x.mapv(|v| v * v).view(), None);
        for &p in &power {
            assert!((p - 1.0).abs() < 1e-10, "power {p}");
        }
    }

    #[test]
    fn statistics_ignore_padded_frames() {
        let mut x = ramp((2, 2, 3, 8));
        // Garbage in the padding must not leak into the statistics.
        x.slice_mut(s![0, .., .., 5..]).fill(1e6);
        let lengths = [5, 8];
        let mean = mean_channel_time(x.view(), Some(&lengths));
        let reference = mean_channel_time(x.slice(s![0..1, .., .., ..5]), None);
        for f in 0..3 {
            assert!((mean[[0, f]] - reference[[0, f]]).abs() < 1e-12);
        }
    }

    #[test]
    fn empty_sequence_has_zero_mean() {
        let x = ramp((1, 2, 3, 4));
        let mean = mean_channel_time(x.view(), Some(&[0]));
        assert!(mean.iter().all(|&m| m == 0.0));
    }
}
