//! Per-stream temporal context.

use ndarray::{Array1, Array2, Array3, ArrayView3};
use rand::Rng;

use crate::nn::{Linear, relu, zero_padding};

const KERNEL_SIZE: usize = 3;

/// Pointwise projection, a depthwise convolution along frames and a second
/// pointwise projection, with a residual connection when the feature count
/// is unchanged.
///
/// Frames at or past the valid length are zeroed before the convolution and
/// on the output, so padding never leaks into valid frames.
#[derive(derive_more::Debug, Clone)]
pub(crate) struct TemporalBlock {
    input: Linear,
    /// `(features, KERNEL_SIZE)`, centered on the current frame.
    #[debug(skip)]
    depthwise: Array2<f64>,
    #[debug(skip)]
    depthwise_bias: Array1<f64>,
    output: Linear,
}

impl TemporalBlock {
    pub(crate) fn init<R: Rng>(rng: &mut R, in_features: usize, features: usize) -> Self {
        let bound = 1.0 / (KERNEL_SIZE as f64).sqrt();
        let input = Linear::init(rng, in_features, features, true);
        let depthwise = Array2::from_shape_simple_fn((features, KERNEL_SIZE), || {
            rng.random_range(-bound..bound)
        });
        let depthwise_bias =
            Array1::from_shape_simple_fn(features, || rng.random_range(-bound..bound));
        let output = Linear::init(rng, features, features, true);
        Self {
            input,
            depthwise,
            depthwise_bias,
            output,
        }
    }

    pub(crate) fn in_features(&self) -> usize {
        self.input.in_features()
    }

    pub(crate) fn features(&self) -> usize {
        self.output.out_features()
    }

    /// Maps `(stream, in_features, frame)` to `(stream, features, frame)`.
    pub(crate) fn forward(&self, input: ArrayView3<'_, f64>, length: usize) -> Array3<f64> {
        let mut hidden = self.input.forward_streams(input).mapv(relu);
        zero_padding(&mut hidden, length);

        let (num_streams, features, num_frames) = hidden.dim();
        let half = KERNEL_SIZE / 2;
        let convolved = Array3::from_shape_fn((num_streams, features, num_frames), |(m, d, n)| {
            let taps: f64 = (0..KERNEL_SIZE)
                .filter_map(|k| {
                    let frame = (n + k).checked_sub(half)?;
                    (frame < num_frames).then(|| self.depthwise[[d, k]] * hidden[[m, d, frame]])
                })
                .sum();
            relu(taps + self.depthwise_bias[d])
        });

        let mut output = self.output.forward_streams(convolved.view());
        if self.in_features() == self.features() {
            output += &input;
        }
        zero_padding(&mut output, length);
        output
    }
}
