//! Cross-channel blocks and channel reduction.
//!
//! Both operate on `(stream, feature, frame)` activations of one batch
//! element. A [`ChannelBlock`] keeps the number of streams; a
//! [`ChannelReduction`] collapses them into one.

use ndarray::{Array3, ArrayView3, Axis, s};
use rand::Rng;

use crate::config::{ChannelBlockType, ChannelReductionType};
use crate::nn::{Linear, MultiHeadAttention, relu, softmax, stream_mean};

/// Per-channel transform concatenated with a cross-channel summary.
///
/// Each half has `out_features / 2` features; the transformed channel fills
/// the first half and the summary, broadcast back to every channel, the
/// second.
#[derive(Debug, Clone)]
pub(crate) enum ChannelBlock {
    TransformAverageConcatenate {
        transform: Linear,
        average: Linear,
    },
    TransformAttendConcatenate {
        transform: Linear,
        attend: Linear,
        attention: MultiHeadAttention,
    },
}

impl ChannelBlock {
    /// `out_features` must be even and, for attention, `out_features / 2`
    /// a multiple of `num_heads`.
    pub(crate) fn init<R: Rng>(
        rng: &mut R,
        block_type: ChannelBlockType,
        in_features: usize,
        out_features: usize,
        num_heads: usize,
    ) -> Self {
        let half = out_features / 2;
        match block_type {
            ChannelBlockType::TransformAverageConcatenate => Self::TransformAverageConcatenate {
                transform: Linear::init(rng, in_features, half, false),
                average: Linear::init(rng, in_features, half, false),
            },
            ChannelBlockType::TransformAttendConcatenate => Self::TransformAttendConcatenate {
                transform: Linear::init(rng, in_features, half, false),
                attend: Linear::init(rng, in_features, half, false),
                attention: MultiHeadAttention::init(rng, half, num_heads),
            },
        }
    }

    pub(crate) fn forward(&self, input: ArrayView3<'_, f64>) -> Array3<f64> {
        let (transform, summary) = match self {
            Self::TransformAverageConcatenate { transform, average } => {
                let mean = stream_mean(input);
                (transform, average.forward_streams(mean.view()).mapv(relu))
            }
            Self::TransformAttendConcatenate {
                transform,
                attend,
                attention,
            } => {
                let attended = attend.forward_streams(input).mapv(relu);
                (transform, attention.forward(attended.view()))
            }
        };
        let transformed = transform.forward_streams(input).mapv(relu);

        let (num_streams, half, num_frames) = transformed.dim();
        let mut output = Array3::zeros((num_streams, 2 * half, num_frames));
        output.slice_mut(s![.., ..half, ..]).assign(&transformed);
        // A single summary stream broadcasts across channels.
        output.slice_mut(s![.., half.., ..]).assign(&summary);
        output
    }
}

/// Collapses the channel axis into a single stream.
#[derive(Debug, Clone)]
pub(crate) enum ChannelReduction {
    Average,
    /// Per-frame softmax over channels of a learned score.
    Attention { score: Linear, weight: Linear },
}

impl ChannelReduction {
    pub(crate) fn init<R: Rng>(
        rng: &mut R,
        reduction_type: ChannelReductionType,
        features: usize,
    ) -> Self {
        match reduction_type {
            ChannelReductionType::Average => Self::Average,
            ChannelReductionType::Attention => Self::Attention {
                score: Linear::init(rng, features, 2 * features, true),
                weight: Linear::init(rng, 2 * features, 1, false),
            },
        }
    }

    /// Maps `(channel, feature, frame)` to `(1, feature, frame)`.
    pub(crate) fn forward(&self, input: ArrayView3<'_, f64>) -> Array3<f64> {
        match self {
            Self::Average => stream_mean(input),
            Self::Attention { score, weight } => {
                let energy = score.forward_streams(input).mapv(f64::tanh);
                // (channel, frame) after dropping the singleton feature axis.
                let mut weights = weight
                    .forward_streams(energy.view())
                    .index_axis_move(Axis(1), 0);
                for frame in weights.axis_iter_mut(Axis(1)) {
                    softmax(frame);
                }
                let (num_channels, num_features, num_frames) = input.dim();
                Array3::from_shape_fn((1, num_features, num_frames), |(_, d, n)| {
                    (0..num_channels)
                        .map(|c| weights[[c, n]] * input[[c, d, n]])
                        .sum()
                })
            }
        }
    }
}
