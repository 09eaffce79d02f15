//! Multi-head self-attention across streams.

use ndarray::{Array2, Array3, ArrayView3, Axis};
use rand::Rng;

use super::{Linear, softmax};

/// Scaled dot-product self-attention where, for every frame, the streams
/// attend to each other. The result does not depend on the order of the
/// streams beyond following it.
#[derive(Debug, Clone)]
pub(crate) struct MultiHeadAttention {
    num_heads: usize,
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
}

impl MultiHeadAttention {
    /// `dimension` must be a multiple of `num_heads`.
    pub(crate) fn init<R: Rng>(rng: &mut R, dimension: usize, num_heads: usize) -> Self {
        debug_assert!(num_heads > 0 && dimension % num_heads == 0);
        Self {
            num_heads,
            query: Linear::init(rng, dimension, dimension, true),
            key: Linear::init(rng, dimension, dimension, true),
            value: Linear::init(rng, dimension, dimension, true),
            output: Linear::init(rng, dimension, dimension, true),
        }
    }

    /// Maps `(stream, dimension, frame)` to the same shape.
    pub(crate) fn forward(&self, input: ArrayView3<'_, f64>) -> Array3<f64> {
        let q = self.query.forward_streams(input);
        let k = self.key.forward_streams(input);
        let v = self.value.forward_streams(input);

        let (num_streams, dimension, num_frames) = q.dim();
        let head_dim = dimension / self.num_heads;
        let scale = 1.0 / (head_dim as f64).sqrt();

        let mut attended = Array3::zeros((num_streams, dimension, num_frames));
        for n in 0..num_frames {
            for h in 0..self.num_heads {
                let features = h * head_dim..(h + 1) * head_dim;
                let mut weights = Array2::from_shape_fn((num_streams, num_streams), |(i, j)| {
                    features
                        .clone()
                        .map(|d| q[[i, d, n]] * k[[j, d, n]])
                        .sum::<f64>()
                        * scale
                });
                for row in weights.axis_iter_mut(Axis(0)) {
                    softmax(row);
                }
                for i in 0..num_streams {
                    for d in features.clone() {
                        attended[[i, d, n]] =
                            (0..num_streams).map(|j| weights[[i, j]] * v[[j, d, n]]).sum();
                    }
                }
            }
        }

        self.output.forward_streams(attended.view())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;
    use spatia_proptest::comparison::assert_array_near;
    use spatia_proptest::generators::{real_gaussian, seeded_rng};

    #[test]
    fn single_stream_passes_values_through() {
        let mut rng = seeded_rng(11);
        let attention = MultiHeadAttention::init(&mut rng, 8, 2);
        let x: Array3<f64> = real_gaussian(&mut rng, (1, 8, 6));
        let y = attention.forward(x.view());
        let expected = attention
            .output
            .forward_streams(attention.value.forward_streams(x.view()).view());
        assert_array_near(&y, &expected, 1e-12);
    }

    #[test]
    fn permuting_streams_permutes_output() {
        let mut rng = seeded_rng(12);
        let attention = MultiHeadAttention::init(&mut rng, 8, 4);
        let x: Array3<f64> = real_gaussian(&mut rng, (3, 8, 5));
        let reversed = x.slice(s![..;-1, .., ..]).to_owned();

        let y = attention.forward(x.view());
        let y_reversed = attention.forward(reversed.view());
        assert_array_near(&y_reversed, &y.slice(s![..;-1, .., ..]), 1e-12);
    }
}
