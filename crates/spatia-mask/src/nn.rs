//! Small dense layers used by the flexible-channel estimator.
//!
//! Activations are laid out `(stream, feature, frame)`, where a stream is an
//! input channel or the reduced channel. Every layer maps the feature axis
//! of each `(stream, frame)` column independently, so the number of streams
//! can change from one call to the next.

mod attention;
mod linear;

use ndarray::{Array3, ArrayView3, ArrayViewMut1, Axis, s};

pub(crate) use attention::MultiHeadAttention;
pub(crate) use linear::Linear;

#[inline]
pub(crate) fn relu(x: f64) -> f64 {
    x.max(0.0)
}

#[inline]
pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Softmax along a vector, in place.
pub(crate) fn softmax(mut values: ArrayViewMut1<'_, f64>) {
    let max = values.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
    values.mapv_inplace(|v| (v - max).exp());
    let sum = values.sum();
    values.mapv_inplace(|v| v / sum);
}

/// Zeroes every frame at or past `length`.
pub(crate) fn zero_padding(activations: &mut Array3<f64>, length: usize) {
    let num_frames = activations.len_of(Axis(2));
    if length < num_frames {
        activations.slice_mut(s![.., .., length..]).fill(0.0);
    }
}

/// Average across streams, keeping a single stream.
pub(crate) fn stream_mean(activations: ArrayView3<'_, f64>) -> Array3<f64> {
    let num_streams = activations.len_of(Axis(0)).max(1) as f64;
    (activations.sum_axis(Axis(0)) / num_streams).insert_axis(Axis(0))
}
