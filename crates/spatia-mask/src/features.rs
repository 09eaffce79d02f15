//! Magnitude and inter-channel phase difference features.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array3, Array4, ArrayView4, Axis, concatenate};
use num_complex::Complex64;
use spatia_common::length::check_lengths;
use spatia_common::normalize::{normalize_mean, normalize_mean_var};
use spatia_common::util::wrap_phase;
use spatia_common::{Error, Features, Result};

use crate::config::FeatureConfig;

/// Reduction of the magnitude across channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MagReduction {
    /// `sqrt(mean_c |x|²)`
    Rms,
    /// `mean_c |x|`
    MeanAbs,
    /// `|mean_c x|`
    AbsMean,
}

impl FromStr for MagReduction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rms" => Ok(Self::Rms),
            "mean_abs" => Ok(Self::MeanAbs),
            "abs_mean" => Ok(Self::AbsMean),
            other => Err(Error::unsupported("mag_reduction", other)),
        }
    }
}

impl fmt::Display for MagReduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rms => "rms",
            Self::MeanAbs => "mean_abs",
            Self::AbsMean => "abs_mean",
        })
    }
}

/// Per-(batch, feature) normalization over channels and valid frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// Subtract the mean.
    Mean,
    /// Subtract the mean and divide by the standard deviation.
    MeanVar,
}

impl Normalization {
    fn parse(option: &'static str, name: Option<&str>) -> Result<Option<Self>> {
        name.map(|name| {
            name.parse::<Self>()
                .map_err(|_| Error::unsupported(option, name))
        })
        .transpose()
    }

    fn apply(self, x: &mut Array4<f64>, lengths: Option<&[usize]>, eps: f64) {
        match self {
            Self::Mean => normalize_mean(x, lengths),
            Self::MeanVar => normalize_mean_var(x, lengths, eps),
        }
    }
}

impl FromStr for Normalization {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(Self::Mean),
            "mean_var" => Ok(Self::MeanVar),
            other => Err(Error::unsupported("normalization", other)),
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mean => "mean",
            Self::MeanVar => "mean_var",
        })
    }
}

/// Spectrogram `(batch, channel, subband, frame)` to real features.
///
/// The output is `(batch, feature_channel, feature, frame)`. Without IPD it
/// holds the magnitude: one feature channel if it is reduced across
/// channels, otherwise one per input channel. With IPD the magnitude is
/// broadcast to every input channel and the phase differences are appended
/// along the feature axis, giving `2 · num_subbands` features.
#[derive(Debug, Clone)]
pub struct SpectrogramToMultichannelFeatures {
    config: FeatureConfig,
    mag_normalization: Option<Normalization>,
    ipd_normalization: Option<Normalization>,
}

impl SpectrogramToMultichannelFeatures {
    /// Parses the normalization options and validates `config`.
    ///
    /// Options that depend on the channel count are checked on the first
    /// `forward` call instead.
    pub fn new(config: FeatureConfig) -> Result<Self> {
        let mag_normalization =
            Normalization::parse("mag_normalization", config.mag_normalization.as_deref())?;
        let ipd_normalization =
            Normalization::parse("ipd_normalization", config.ipd_normalization.as_deref())?;
        if config.num_subbands == 0 {
            return Err(Error::invalid("num_subbands", "must be positive"));
        }
        if let Some(power) = config.mag_power
            && !(power > 0.0 && power.is_finite())
        {
            return Err(Error::invalid(
                "mag_power",
                format!("must be positive, got {power}"),
            ));
        }
        if !(config.eps > 0.0 && config.eps.is_finite()) {
            return Err(Error::invalid(
                "eps",
                format!("must be positive, got {}", config.eps),
            ));
        }
        Ok(Self {
            config,
            mag_normalization,
            ipd_normalization,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Number of features per channel and frame.
    pub fn num_features(&self) -> usize {
        if self.config.use_ipd {
            2 * self.config.num_subbands
        } else {
            self.config.num_subbands
        }
    }

    /// Number of output feature channels.
    ///
    /// One when the magnitude is reduced and IPD is off, the configured
    /// input channel count otherwise. Fails when that count is not set.
    pub fn num_channels(&self) -> Result<usize> {
        let num_input_channels = self
            .config
            .num_input_channels
            .ok_or(Error::MissingConfiguration("num_input_channels"))?;
        if !self.config.use_ipd && self.config.mag_reduction.is_some() {
            Ok(1)
        } else {
            Ok(num_input_channels)
        }
    }

    /// Computes the features; `lengths` are passed through.
    ///
    /// Normalization statistics only use frames below the valid length.
    pub fn forward(
        &self,
        input: ArrayView4<'_, Complex64>,
        lengths: Option<&[usize]>,
    ) -> Result<(Features, Option<Vec<usize>>)> {
        let (batch_size, num_channels, num_subbands, num_frames) = input.dim();
        if num_subbands != self.config.num_subbands {
            return Err(Error::ShapeMismatch(format!(
                "expected {} subbands, got {num_subbands}",
                self.config.num_subbands
            )));
        }
        if num_channels == 0 {
            return Err(Error::ShapeMismatch("input has no channels".into()));
        }
        if let Some(expected) = self.config.num_input_channels
            && expected != num_channels
        {
            return Err(Error::ShapeMismatch(format!(
                "expected {expected} channels, got {num_channels}"
            )));
        }
        if let Some(lengths) = lengths {
            check_lengths(lengths, batch_size, num_frames)?;
        }
        let reduction = self
            .config
            .mag_reduction
            .as_deref()
            .map(str::parse::<MagReduction>)
            .transpose()?;

        let mut magnitude = match reduction {
            None => input.mapv(|v| v.norm()),
            Some(MagReduction::Rms) => input
                .mapv(|v| v.norm_sqr())
                .mean_axis(Axis(1))
                .map(|p| p.mapv(f64::sqrt).insert_axis(Axis(1)))
                .ok_or_else(|| Error::ShapeMismatch("input has no channels".into()))?,
            Some(MagReduction::MeanAbs) => input
                .mapv(|v| v.norm())
                .mean_axis(Axis(1))
                .map(|m| m.insert_axis(Axis(1)))
                .ok_or_else(|| Error::ShapeMismatch("input has no channels".into()))?,
            Some(MagReduction::AbsMean) => channel_mean(input)
                .mapv(|v| v.norm())
                .insert_axis(Axis(1)),
        };
        if let Some(power) = self.config.mag_power {
            magnitude.mapv_inplace(|m| m.powf(power));
        }
        if let Some(normalization) = self.mag_normalization {
            normalization.apply(&mut magnitude, lengths, self.config.eps);
        }

        if !self.config.use_ipd {
            return Ok((magnitude, lengths.map(<[usize]>::to_vec)));
        }

        let mean = channel_mean(input);
        let mut ipd = Array4::from_shape_fn(input.dim(), |(b, c, f, n)| {
            wrap_phase(input[[b, c, f, n]].arg() - mean[[b, f, n]].arg())
        });
        if let Some(normalization) = self.ipd_normalization {
            normalization.apply(&mut ipd, lengths, self.config.eps);
        }

        let magnitude = magnitude
            .broadcast(input.dim())
            .ok_or_else(|| Error::ShapeMismatch("cannot broadcast magnitude".into()))?
            .to_owned();
        let features = concatenate(Axis(2), &[magnitude.view(), ipd.view()])
            .map_err(|e| Error::ShapeMismatch(e.to_string()))?;
        Ok((features, lengths.map(<[usize]>::to_vec)))
    }
}

/// Average across channels, `(batch, subband, frame)`.
fn channel_mean(input: ArrayView4<'_, Complex64>) -> Array3<Complex64> {
    let num_channels = input.len_of(Axis(1)) as f64;
    input.sum_axis(Axis(1)).mapv(|v| v / num_channels)
}
