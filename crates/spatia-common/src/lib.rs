#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

mod error;
pub mod length;
pub mod normalize;
pub mod util;

use ndarray::{Array3, Array4};
use num_complex::Complex64;

pub use error::{Error, Result};

/// Complex spectrogram indexed `(batch, channel, subband, frame)`.
pub type Spectrogram = Array4<Complex64>;

/// Real feature tensor indexed `(batch, feature_channel, feature, frame)`.
pub type Features = Array4<f64>;

/// Real mask in `[0, 1]` indexed `(batch, output, subband, frame)`.
pub type Mask = Array4<f64>;

/// Source activity indexed `(batch, output, frame)`.
pub type Activity = Array3<f64>;

/// Time-domain audio indexed `(batch, channel, sample)`.
pub type Audio = Array3<f64>;
