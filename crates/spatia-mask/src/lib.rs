#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

mod channel;
mod config;
mod features;
mod flex;
mod gss;
mod nn;
mod reference;
mod temporal;

pub use config::{
    ChannelBlockType, ChannelReductionType, FeatureConfig, FlexConfig, GssConfig,
    ReductionPosition,
};
pub use features::{MagReduction, Normalization, SpectrogramToMultichannelFeatures};
pub use flex::MaskEstimatorFlexChannels;
pub use gss::{MaskEstimatorGss, activity_from_bool};
pub use reference::MaskReferenceChannel;
