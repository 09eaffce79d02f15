//! Neural mask estimator for a variable number of channels.

use ndarray::{Array3, Array4, ArrayView3, ArrayView4, Axis};
use num_complex::Complex64;
use rand::Rng;
use rayon::prelude::*;
use spatia_common::length::valid_frames;
use spatia_common::{Mask, Result};
use tracing::debug;

use crate::channel::{ChannelBlock, ChannelReduction};
use crate::config::FlexConfig;
use crate::features::SpectrogramToMultichannelFeatures;
use crate::nn::{Linear, sigmoid};
use crate::temporal::TemporalBlock;

/// One step of the processing pipeline.
#[derive(Debug, Clone)]
enum Stage {
    Channel(ChannelBlock),
    Reduce(ChannelReduction),
    Temporal(TemporalBlock),
}

impl Stage {
    fn forward(&self, input: ArrayView3<'_, f64>, length: usize) -> Array3<f64> {
        match self {
            Self::Channel(block) => block.forward(input),
            Self::Reduce(reduction) => reduction.forward(input),
            Self::Temporal(block) => block.forward(input, length),
        }
    }
}

/// Estimates `num_outputs` masks from a spectrogram with any number of
/// channels.
///
/// Every block runs a cross-channel stage followed by a per-channel temporal
/// stage. Channels are reduced to a single stream before block
/// `channel_reduction_position`; blocks from there on only run the temporal
/// stage. A sigmoid projection of the reduced stream gives the masks.
///
/// The stage sequence is fixed at construction. Parameters are drawn from
/// the generator passed to [`new`](Self::new), so a seeded generator gives a
/// reproducible estimator.
#[derive(Debug, Clone)]
pub struct MaskEstimatorFlexChannels {
    num_outputs: usize,
    num_subbands: usize,
    num_blocks: usize,
    reduction_position: usize,
    features: SpectrogramToMultichannelFeatures,
    stages: Vec<Stage>,
    output: Linear,
}

impl MaskEstimatorFlexChannels {
    /// Validates `config` and draws every parameter from `rng`.
    pub fn new<R: Rng>(config: FlexConfig, rng: &mut R) -> Result<Self> {
        config.validate()?;
        let features = SpectrogramToMultichannelFeatures::new(config.features.clone())?;
        let reduction_position = config.channel_reduction_position.resolve(config.num_blocks)?;
        let dimension = config.block_dimension;

        let mut stages = Vec::with_capacity(2 * config.num_blocks + 1);
        let mut in_features = features.num_features();
        for n in 0..config.num_blocks {
            if n == reduction_position {
                stages.push(Stage::Reduce(ChannelReduction::init(
                    rng,
                    config.channel_reduction_type,
                    in_features,
                )));
            }
            if n < reduction_position {
                stages.push(Stage::Channel(ChannelBlock::init(
                    rng,
                    config.channel_block_type,
                    in_features,
                    dimension,
                    config.num_heads,
                )));
                in_features = dimension;
            }
            stages.push(Stage::Temporal(TemporalBlock::init(
                rng,
                in_features,
                dimension,
            )));
            in_features = dimension;
        }
        if reduction_position == config.num_blocks {
            stages.push(Stage::Reduce(ChannelReduction::init(
                rng,
                config.channel_reduction_type,
                dimension,
            )));
        }

        let num_subbands = config.num_subbands();
        let output = Linear::init(rng, dimension, config.num_outputs * num_subbands, true);
        debug!(
            num_blocks = config.num_blocks,
            reduction_position,
            channel_block_type = %config.channel_block_type,
            channel_reduction_type = %config.channel_reduction_type,
            "built flexible-channel mask estimator"
        );

        Ok(Self {
            num_outputs: config.num_outputs,
            num_subbands,
            num_blocks: config.num_blocks,
            reduction_position,
            features,
            stages,
            output,
        })
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    pub fn num_subbands(&self) -> usize {
        self.num_subbands
    }

    pub fn num_blocks(&self) -> usize {
        self.num_blocks
    }

    /// Block index before which channels are reduced; equal to
    /// [`num_blocks`](Self::num_blocks) when reducing after the last block.
    pub fn reduction_position(&self) -> usize {
        self.reduction_position
    }

    /// Estimates masks `(batch, output, subband, frame)` for `input`
    /// `(batch, channel, subband, frame)`; `lengths` are passed through.
    pub fn forward(
        &self,
        input: ArrayView4<'_, Complex64>,
        lengths: Option<&[usize]>,
    ) -> Result<(Mask, Option<Vec<usize>>)> {
        let (features, lengths) = self.features.forward(input, lengths)?;
        let (batch_size, num_channels, _, num_frames) = input.dim();

        let masks = (0..batch_size)
            .into_par_iter()
            .map(|b| {
                let length = valid_frames(lengths.as_deref(), b, num_frames);
                let mut activations = features.index_axis(Axis(0), b).to_owned();
                for stage in &self.stages {
                    activations = stage.forward(activations.view(), length);
                }
                let logits = self.output.forward(activations.index_axis(Axis(0), 0));
                Array3::from_shape_fn(
                    (self.num_outputs, self.num_subbands, num_frames),
                    |(o, f, n)| sigmoid(logits[[o * self.num_subbands + f, n]]),
                )
            })
            .collect::<Vec<_>>();

        let mut mask = Array4::zeros((batch_size, self.num_outputs, self.num_subbands, num_frames));
        for (mut out, estimate) in mask.outer_iter_mut().zip(&masks) {
            out.assign(estimate);
        }

        debug!(batch_size, num_channels, num_frames, "estimated masks");
        Ok((mask, lengths))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;
    use spatia_common::Error;
    use spatia_proptest::comparison::assert_array_near;
    use spatia_proptest::generators::{complex_gaussian, random_lengths, seeded_rng};

    use crate::config::{ChannelBlockType, ChannelReductionType, ReductionPosition};

    fn small_config(num_outputs: usize, num_subbands: usize, num_blocks: usize) -> FlexConfig {
        FlexConfig {
            block_dimension: 16,
            num_heads: 2,
            ..FlexConfig::new(num_outputs, num_subbands, num_blocks)
        }
    }

    #[test]
    fn mask_shape_for_every_topology() {
        let mut rng = seeded_rng(51);
        let (batch_size, num_frames) = (4, 50);
        for position in [
            ReductionPosition::First,
            ReductionPosition::Block(1),
            ReductionPosition::Last,
        ] {
            for reduction_type in [ChannelReductionType::Average, ChannelReductionType::Attention]
            {
                for block_type in [
                    ChannelBlockType::TransformAverageConcatenate,
                    ChannelBlockType::TransformAttendConcatenate,
                ] {
                    for num_subbands in [32, 65] {
                        for num_outputs in [1, 2] {
                            for num_blocks in [1, 5] {
                                let config = FlexConfig {
                                    channel_reduction_position: position,
                                    channel_reduction_type: reduction_type,
                                    channel_block_type: block_type,
                                    ..small_config(num_outputs, num_subbands, num_blocks)
                                };
                                let estimator =
                                    MaskEstimatorFlexChannels::new(config, &mut rng).unwrap();
                                // One estimator serves every channel count.
                                for num_channels in [1, 4] {
                                    let x = complex_gaussian(
                                        &mut rng,
                                        (batch_size, num_channels, num_subbands, num_frames),
                                    );
                                    let lengths = random_lengths(&mut rng, batch_size, num_frames);
                                    let (mask, mask_lengths) =
                                        estimator.forward(x.view(), Some(&lengths)).unwrap();
                                    assert_eq!(
                                        mask.dim(),
                                        (batch_size, num_outputs, num_subbands, num_frames)
                                    );
                                    assert_eq!(mask_lengths, Some(lengths));
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn masks_are_bounded() {
        let mut rng = seeded_rng(52);
        let estimator = MaskEstimatorFlexChannels::new(small_config(2, 17, 2), &mut rng).unwrap();
        let x = complex_gaussian(&mut rng, (2, 3, 17, 12));
        let (mask, lengths) = estimator.forward(x.view(), None).unwrap();
        assert!(lengths.is_none());
        assert!(mask.iter().all(|&m| (0.0..=1.0).contains(&m)));
    }

    #[test]
    fn channel_order_does_not_matter() {
        let mut rng = seeded_rng(53);
        for reduction_type in [ChannelReductionType::Average, ChannelReductionType::Attention] {
            let config = FlexConfig {
                channel_reduction_type: reduction_type,
                ..small_config(1, 9, 3)
            };
            let estimator = MaskEstimatorFlexChannels::new(config, &mut rng).unwrap();
            let x = complex_gaussian(&mut rng, (1, 3, 9, 10));
            let reversed = x.slice(s![.., ..;-1, .., ..]).to_owned();
            let (mask, _) = estimator.forward(x.view(), None).unwrap();
            let (mask_reversed, _) = estimator.forward(reversed.view(), None).unwrap();
            assert_array_near(&mask_reversed, &mask, 1e-10);
        }
    }

    #[test]
    fn valid_frames_ignore_padding() {
        let mut rng = seeded_rng(54);
        let estimator = MaskEstimatorFlexChannels::new(small_config(1, 9, 2), &mut rng).unwrap();
        let x = complex_gaussian(&mut rng, (1, 2, 9, 16));
        let mut padded = x.clone();
        padded
            .slice_mut(s![.., .., .., 10..])
            .mapv_inplace(|v| v * 50.0);
        let lengths = [10];
        let (mask, _) = estimator.forward(x.view(), Some(&lengths)).unwrap();
        let (mask_padded, _) = estimator.forward(padded.view(), Some(&lengths)).unwrap();
        assert_array_near(
            &mask_padded.slice(s![.., .., .., ..10]),
            &mask.slice(s![.., .., .., ..10]),
            1e-10,
        );
    }

    #[test]
    fn same_seed_same_estimator() {
        let config = small_config(2, 9, 2);
        let a = MaskEstimatorFlexChannels::new(config.clone(), &mut seeded_rng(7)).unwrap();
        let b = MaskEstimatorFlexChannels::new(config, &mut seeded_rng(7)).unwrap();
        let x = complex_gaussian(&mut seeded_rng(8), (1, 2, 9, 6));
        assert_eq!(
            a.forward(x.view(), None).unwrap().0,
            b.forward(x.view(), None).unwrap().0
        );
    }

    #[test]
    fn reduction_position_is_resolved() {
        let mut rng = seeded_rng(55);
        for (position, expected) in [
            (ReductionPosition::First, 0),
            (ReductionPosition::Block(2), 2),
            (ReductionPosition::Last, 3),
        ] {
            let config = FlexConfig {
                channel_reduction_position: position,
                ..small_config(1, 9, 3)
            };
            let estimator = MaskEstimatorFlexChannels::new(config, &mut rng).unwrap();
            assert_eq!(estimator.reduction_position(), expected);
            assert_eq!(estimator.num_blocks(), 3);
        }
    }

    #[test]
    fn rejects_bad_configuration_and_input() {
        let mut rng = seeded_rng(56);
        let err = MaskEstimatorFlexChannels::new(
            FlexConfig {
                channel_reduction_position: ReductionPosition::Block(4),
                ..small_config(1, 9, 3)
            },
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidConfiguration { .. }));

        let estimator = MaskEstimatorFlexChannels::new(small_config(1, 9, 1), &mut rng).unwrap();
        let x = complex_gaussian(&mut rng, (1, 2, 8, 6));
        assert!(matches!(
            estimator.forward(x.view(), None),
            Err(Error::ShapeMismatch(_))
        ));
    }
}
