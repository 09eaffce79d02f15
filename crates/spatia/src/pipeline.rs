//! Time-domain dereverberation built from the spectral components.

use ndarray::{Array3, ArrayView3, Axis, s};
use spatia_common::length::check_lengths;
use spatia_common::{Audio, Result};
use spatia_fft::{AudioToSpectrogram, SpectrogramToAudio, StftConfig};
use spatia_wpe::{DereverbConfig, MaskBasedDereverbWpe};
use tracing::debug;

/// Settings of [`DereverbPipeline`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    /// Analysis and synthesis transform, shared by both directions.
    pub stft: StftConfig,
    /// WPE settings applied in the STFT domain.
    pub dereverb: DereverbConfig,
}

/// STFT, mask-free WPE dereverberation and inverse STFT.
#[derive(Debug)]
pub struct DereverbPipeline {
    analysis: AudioToSpectrogram,
    dereverb: MaskBasedDereverbWpe,
    synthesis: SpectrogramToAudio,
}

impl DereverbPipeline {
    /// Builds the three stages, validating each configuration.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Ok(Self {
            analysis: AudioToSpectrogram::new(config.stft.clone())?,
            dereverb: MaskBasedDereverbWpe::new(config.dereverb)?,
            synthesis: SpectrogramToAudio::new(config.stft)?,
        })
    }

    /// Transform used on the way in; its frame counts apply to the WPE stage.
    pub fn analysis(&self) -> &AudioToSpectrogram {
        &self.analysis
    }

    pub fn dereverb(&self) -> &MaskBasedDereverbWpe {
        &self.dereverb
    }

    /// Dereverberates `(batch, channel, sample)` audio.
    ///
    /// The output has the input's shape; samples past the last full hop are
    /// zero. `lengths` are valid sample counts and are returned unchanged.
    pub fn process(
        &self,
        audio: ArrayView3<'_, f64>,
        lengths: Option<&[usize]>,
    ) -> Result<(Audio, Option<Vec<usize>>)> {
        let (batch_size, num_channels, num_samples) = audio.dim();
        if let Some(lengths) = lengths {
            check_lengths(lengths, batch_size, num_samples)?;
        }

        let (spec, frame_lengths) = self.analysis.forward(audio, lengths)?;
        let (dereverberated, _) = self
            .dereverb
            .forward(spec.view(), frame_lengths.as_deref(), None)?;
        let (synthesized, _) = self
            .synthesis
            .forward(dereverberated.view(), frame_lengths.as_deref())?;

        let mut output = Array3::zeros((batch_size, num_channels, num_samples));
        let copied = synthesized.len_of(Axis(2)).min(num_samples);
        output
            .slice_mut(s![.., .., ..copied])
            .assign(&synthesized.slice(s![.., .., ..copied]));
        if let Some(lengths) = lengths {
            for (b, &length) in lengths.iter().enumerate() {
                output.slice_mut(s![b, .., length..]).fill(0.0);
            }
        }

        debug!(batch_size, num_channels, num_samples, "dereverberated audio");
        Ok((output, lengths.map(<[usize]>::to_vec)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spatia_proptest::generators::{real_gaussian, seeded_rng};

    #[test]
    fn preserves_shape_and_lengths() {
        let pipeline = DereverbPipeline::new(PipelineConfig {
            stft: StftConfig {
                fft_length: 64,
                hop_length: 16,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();
        let audio: Array3<f64> = real_gaussian(&mut seeded_rng(91), (2, 2, 1000));
        let lengths = [1000, 700];
        let (output, out_lengths) = pipeline.process(audio.view(), Some(&lengths)).unwrap();
        assert_eq!(output.dim(), audio.dim());
        assert_eq!(out_lengths.as_deref(), Some(&lengths[..]));
        assert!(output.iter().all(|v| v.is_finite()));
        assert!(output.slice(s![1, .., 700..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn rejects_invalid_stft() {
        let config = PipelineConfig {
            stft: StftConfig {
                hop_length: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(DereverbPipeline::new(config).is_err());
    }
}
