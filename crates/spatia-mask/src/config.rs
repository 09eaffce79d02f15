//! Feature extractor and mask estimator configuration.

use std::fmt;
use std::str::FromStr;

use spatia_common::{Error, Result};

use crate::features::{MagReduction, Normalization};

/// Settings of [`SpectrogramToMultichannelFeatures`](crate::SpectrogramToMultichannelFeatures).
///
/// Enumerated options are stored by name so that configurations produced
/// elsewhere can be carried as-is; they are checked by the extractor.
/// Normalization names are validated on construction, the magnitude
/// reduction name on every call.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureConfig {
    /// Number of subbands of the input spectrogram (default: 257).
    pub num_subbands: usize,
    /// Expected number of input channels; `None` accepts any (default: `None`).
    pub num_input_channels: Option<usize>,
    /// Reduction of the magnitude across channels: `rms`, `mean_abs` or
    /// `abs_mean`; `None` keeps every channel (default: `None`).
    pub mag_reduction: Option<String>,
    /// Exponent applied to the (reduced) magnitude (default: `None`).
    pub mag_power: Option<f64>,
    /// Magnitude normalization: `mean` or `mean_var` (default: `None`).
    pub mag_normalization: Option<String>,
    /// Append inter-channel phase differences (default: `false`).
    pub use_ipd: bool,
    /// IPD normalization: `mean` or `mean_var` (default: `None`).
    pub ipd_normalization: Option<String>,
    /// Variance floor of `mean_var` normalization (default: 1e-8).
    pub eps: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            num_subbands: 257,
            num_input_channels: None,
            mag_reduction: None,
            mag_power: None,
            mag_normalization: None,
            use_ipd: false,
            ipd_normalization: None,
            eps: 1e-8,
        }
    }
}

impl FeatureConfig {
    /// Magnitude-only features for `num_subbands` subbands, otherwise defaults.
    pub fn new(num_subbands: usize) -> Self {
        Self {
            num_subbands,
            ..Default::default()
        }
    }

    /// Fixes the channel count; required by [`num_channels`] when the
    /// magnitude is not reduced.
    ///
    /// [`num_channels`]: crate::SpectrogramToMultichannelFeatures::num_channels
    pub fn with_num_input_channels(mut self, num_input_channels: usize) -> Self {
        self.num_input_channels = Some(num_input_channels);
        self
    }

    /// Reduces the magnitude across channels.
    pub fn with_mag_reduction(mut self, reduction: MagReduction) -> Self {
        self.mag_reduction = Some(reduction.to_string());
        self
    }

    /// Raises the magnitude to `power`.
    pub fn with_mag_power(mut self, power: f64) -> Self {
        self.mag_power = Some(power);
        self
    }

    /// Normalizes the magnitude features.
    pub fn with_mag_normalization(mut self, normalization: Normalization) -> Self {
        self.mag_normalization = Some(normalization.to_string());
        self
    }

    /// Enables IPD features with the given normalization.
    pub fn with_ipd(mut self, normalization: Option<Normalization>) -> Self {
        self.use_ipd = true;
        self.ipd_normalization = normalization.map(|n| n.to_string());
        self
    }
}

/// Channel block topology of the flexible-channel estimator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelBlockType {
    /// Per-channel transform concatenated with the transformed channel average.
    TransformAverageConcatenate,
    /// Per-channel transform concatenated with self-attention across channels.
    #[default]
    TransformAttendConcatenate,
}

impl FromStr for ChannelBlockType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transform_average_concatenate" => Ok(Self::TransformAverageConcatenate),
            "transform_attend_concatenate" => Ok(Self::TransformAttendConcatenate),
            other => Err(Error::unsupported("channel_block_type", other)),
        }
    }
}

impl fmt::Display for ChannelBlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::TransformAverageConcatenate => "transform_average_concatenate",
            Self::TransformAttendConcatenate => "transform_attend_concatenate",
        })
    }
}

/// How the channel axis is collapsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelReductionType {
    /// Plain average across channels.
    Average,
    /// Learned attention pooling across channels.
    #[default]
    Attention,
}

impl FromStr for ChannelReductionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "average" => Ok(Self::Average),
            "attention" => Ok(Self::Attention),
            other => Err(Error::unsupported("channel_reduction_type", other)),
        }
    }
}

impl fmt::Display for ChannelReductionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Average => "average",
            Self::Attention => "attention",
        })
    }
}

/// Where the channel reduction happens in the block stack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReductionPosition {
    /// Before the first block; every block sees a single stream.
    First,
    /// Before block `n`; blocks `0..n` are multichannel.
    Block(usize),
    /// After the last block.
    #[default]
    Last,
}

impl ReductionPosition {
    /// Maps a signed block index, where `-1` means after the last block.
    pub fn from_index(index: isize) -> Result<Self> {
        match index {
            -1 => Ok(Self::Last),
            0 => Ok(Self::First),
            n if n > 0 => Ok(Self::Block(n.unsigned_abs())),
            n => Err(Error::invalid(
                "channel_reduction_position",
                format!("must be -1 or a block index, got {n}"),
            )),
        }
    }

    /// Block index before which channels are reduced.
    pub fn resolve(self, num_blocks: usize) -> Result<usize> {
        match self {
            Self::First => Ok(0),
            Self::Last => Ok(num_blocks),
            Self::Block(n) if n <= num_blocks => Ok(n),
            Self::Block(n) => Err(Error::invalid(
                "channel_reduction_position",
                format!("block {n} is past the last of {num_blocks} blocks"),
            )),
        }
    }
}

/// Settings of [`MaskEstimatorFlexChannels`](crate::MaskEstimatorFlexChannels).
#[derive(Debug, Clone, PartialEq)]
pub struct FlexConfig {
    /// Number of estimated masks (default: 1).
    pub num_outputs: usize,
    /// Number of processing blocks (default: 5).
    pub num_blocks: usize,
    /// Position of the channel reduction (default: after the last block).
    pub channel_reduction_position: ReductionPosition,
    /// Channel reduction strategy (default: attention).
    pub channel_reduction_type: ChannelReductionType,
    /// Channel block topology (default: transform-attend-concatenate).
    pub channel_block_type: ChannelBlockType,
    /// Hidden feature dimension of every block; must be even (default: 128).
    pub block_dimension: usize,
    /// Attention heads of transform-attend-concatenate blocks; must divide
    /// `block_dimension / 2` (default: 4).
    pub num_heads: usize,
    /// Front-end features (default: `abs_mean` magnitude with IPD).
    pub features: FeatureConfig,
}

impl Default for FlexConfig {
    fn default() -> Self {
        Self {
            num_outputs: 1,
            num_blocks: 5,
            channel_reduction_position: ReductionPosition::Last,
            channel_reduction_type: ChannelReductionType::Attention,
            channel_block_type: ChannelBlockType::TransformAttendConcatenate,
            block_dimension: 128,
            num_heads: 4,
            features: FeatureConfig::default()
                .with_mag_reduction(MagReduction::AbsMean)
                .with_ipd(None),
        }
    }
}

impl FlexConfig {
    /// Default topology with the given output count, subbands and blocks.
    pub fn new(num_outputs: usize, num_subbands: usize, num_blocks: usize) -> Self {
        let mut config = Self {
            num_outputs,
            num_blocks,
            ..Default::default()
        };
        config.features.num_subbands = num_subbands;
        config
    }

    /// Subbands of the input spectrogram, taken from the feature settings.
    pub fn num_subbands(&self) -> usize {
        self.features.num_subbands
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_outputs == 0 {
            return Err(Error::invalid("num_outputs", "must be positive"));
        }
        if self.num_blocks == 0 {
            return Err(Error::invalid("num_blocks", "must be positive"));
        }
        if self.block_dimension < 2 || self.block_dimension % 2 != 0 {
            return Err(Error::invalid(
                "block_dimension",
                format!("must be even and positive, got {}", self.block_dimension),
            ));
        }
        if self.num_heads == 0 || (self.block_dimension / 2) % self.num_heads != 0 {
            return Err(Error::invalid(
                "num_heads",
                format!(
                    "{} heads do not divide the attention dimension {}",
                    self.num_heads,
                    self.block_dimension / 2
                ),
            ));
        }
        self.channel_reduction_position.resolve(self.num_blocks)?;
        Ok(())
    }
}

/// Settings of [`MaskEstimatorGss`](crate::MaskEstimatorGss).
#[derive(Debug, Clone, PartialEq)]
pub struct GssConfig {
    /// Number of EM iterations (default: 10).
    pub num_iterations: usize,
    /// Regularization and division floor (default: 1e-8).
    pub eps: f64,
}

impl Default for GssConfig {
    fn default() -> Self {
        Self {
            num_iterations: 10,
            eps: 1e-8,
        }
    }
}

impl GssConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.num_iterations == 0 {
            return Err(Error::invalid("num_iterations", "must be positive"));
        }
        if !(self.eps > 0.0 && self.eps.is_finite()) {
            return Err(Error::invalid(
                "eps",
                format!("must be positive, got {}", self.eps),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_defaults() {
        let config = FeatureConfig::default();
        assert_eq!(config.num_subbands, 257);
        assert!(config.num_input_channels.is_none());
        assert!(config.mag_reduction.is_none());
        assert!(config.mag_power.is_none());
        assert!(config.mag_normalization.is_none());
        assert!(!config.use_ipd);
        assert!(config.ipd_normalization.is_none());
        assert_eq!(config.eps, 1e-8);
    }

    #[test]
    fn feature_builders_store_names() {
        let config = FeatureConfig::new(65)
            .with_mag_reduction(MagReduction::Rms)
            .with_mag_normalization(Normalization::MeanVar)
            .with_ipd(Some(Normalization::Mean));
        assert_eq!(config.num_subbands, 65);
        assert_eq!(config.mag_reduction.as_deref(), Some("rms"));
        assert_eq!(config.mag_normalization.as_deref(), Some("mean_var"));
        assert!(config.use_ipd);
        assert_eq!(config.ipd_normalization.as_deref(), Some("mean"));
    }

    #[test]
    fn flex_defaults() {
        let config = FlexConfig::default();
        assert_eq!(config.num_outputs, 1);
        assert_eq!(config.num_blocks, 5);
        assert_eq!(config.channel_reduction_position, ReductionPosition::Last);
        assert_eq!(config.channel_reduction_type, ChannelReductionType::Attention);
        assert_eq!(
            config.channel_block_type,
            ChannelBlockType::TransformAttendConcatenate
        );
        assert_eq!(config.block_dimension, 128);
        assert_eq!(config.num_heads, 4);
        assert_eq!(config.features.mag_reduction.as_deref(), Some("abs_mean"));
        assert!(config.features.use_ipd);
        config.validate().unwrap();
    }

    #[test]
    fn flex_rejects_invalid_topologies() {
        let cases = [
            FlexConfig {
                num_blocks: 0,
                ..Default::default()
            },
            FlexConfig {
                num_outputs: 0,
                ..Default::default()
            },
            FlexConfig {
                block_dimension: 127,
                ..Default::default()
            },
            FlexConfig {
                num_heads: 3,
                ..Default::default()
            },
            FlexConfig {
                channel_reduction_position: ReductionPosition::Block(6),
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfiguration { .. })),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn reduction_positions() {
        assert_eq!(ReductionPosition::from_index(-1).unwrap(), ReductionPosition::Last);
        assert_eq!(ReductionPosition::from_index(0).unwrap(), ReductionPosition::First);
        assert_eq!(
            ReductionPosition::from_index(2).unwrap(),
            ReductionPosition::Block(2)
        );
        assert!(ReductionPosition::from_index(-2).is_err());

        assert_eq!(ReductionPosition::First.resolve(3).unwrap(), 0);
        assert_eq!(ReductionPosition::Last.resolve(3).unwrap(), 3);
        assert_eq!(ReductionPosition::Block(3).resolve(3).unwrap(), 3);
        assert!(ReductionPosition::Block(4).resolve(3).is_err());
    }

    #[test]
    fn names_round_trip_and_unknown_names_fail() {
        for block in [
            ChannelBlockType::TransformAverageConcatenate,
            ChannelBlockType::TransformAttendConcatenate,
        ] {
            assert_eq!(block.to_string().parse::<ChannelBlockType>().unwrap(), block);
        }
        assert!(matches!(
            "mean".parse::<ChannelReductionType>(),
            Err(Error::UnsupportedConfiguration { .. })
        ));
    }

    #[test]
    fn gss_defaults() {
        let config = GssConfig::default();
        assert_eq!(config.num_iterations, 10);
        assert_eq!(config.eps, 1e-8);
        config.validate().unwrap();
        assert!(
            GssConfig {
                num_iterations: 0,
                ..Default::default()
            }
            .validate()
            .is_err()
        );
    }
}
