#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

mod pipeline;
mod ssl_masking;

pub use spatia_common as common;
pub use spatia_fft as fft;
pub use spatia_linalg as linalg;
pub use spatia_mask as mask;
pub use spatia_wpe as wpe;

// Public re-exports.
pub use pipeline::{DereverbPipeline, PipelineConfig};
pub use spatia_common::{Activity, Audio, Error, Features, Mask, Result, Spectrogram};
pub use spatia_fft::{AudioToSpectrogram, SpectrogramToAudio, StftConfig};
pub use spatia_mask::{
    ChannelBlockType, ChannelReductionType, FeatureConfig, FlexConfig, GssConfig, MagReduction,
    MaskEstimatorFlexChannels, MaskEstimatorGss, MaskReferenceChannel, Normalization,
    ReductionPosition, SpectrogramToMultichannelFeatures, activity_from_bool,
};
pub use spatia_wpe::{
    DereverbConfig, MaskBasedDereverbWpe, SolveFailurePolicy, WpeConfig, WpeFilter,
};
pub use ssl_masking::{PatchMasking, PatchMaskingConfig};
