//! Patch masking for self-supervised pretraining.

use ndarray::{ArrayView4, s};
use num_complex::Complex64;
use rand::Rng;
use rand::seq::index;
use spatia_common::length::{check_lengths, valid_frames};
use spatia_common::{Error, Result, Spectrogram};
use tracing::debug;

/// Settings of [`PatchMasking`].
#[derive(Debug, Clone, PartialEq)]
pub struct PatchMaskingConfig {
    /// Width of a patch in frames (default: 48).
    pub patch_size: usize,
    /// Expected fraction of valid frames to zero, in `[0, 1]` (default: 0.7).
    pub mask_fraction: f64,
}

impl Default for PatchMaskingConfig {
    fn default() -> Self {
        Self {
            patch_size: 48,
            mask_fraction: 0.7,
        }
    }
}

impl PatchMaskingConfig {
    /// Unvalidated settings; [`PatchMasking::new`] checks them.
    pub fn new(patch_size: usize, mask_fraction: f64) -> Self {
        Self {
            patch_size,
            mask_fraction,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.patch_size == 0 {
            return Err(Error::invalid("patch_size", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.mask_fraction) {
            return Err(Error::invalid(
                "mask_fraction",
                format!("must be in [0, 1], got {}", self.mask_fraction),
            ));
        }
        Ok(())
    }
}

/// Zeroes whole patches of frames across every channel and subband.
///
/// The valid frames of each sequence are tiled into patches of
/// `patch_size` frames (the last one possibly shorter) and
/// `ceil(length · mask_fraction / patch_size)` of them are drawn without
/// replacement. Padding frames are never touched.
///
/// Masking only happens in training mode, which is the initial mode; in
/// evaluation mode [`forward`](Self::forward) returns the input unchanged.
#[derive(Debug, Clone)]
pub struct PatchMasking {
    config: PatchMaskingConfig,
    training: bool,
}

impl PatchMasking {
    /// Validates `config`. The augmenter starts in training mode.
    pub fn new(config: PatchMaskingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            training: true,
        })
    }

    pub fn config(&self) -> &PatchMaskingConfig {
        &self.config
    }

    /// Enables masking.
    pub fn train(&mut self) {
        self.training = true;
    }

    /// Disables masking; `forward` then returns its input unchanged.
    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Masks `input` `(batch, channel, subband, frame)`, drawing patches
    /// from `rng`.
    pub fn forward<R: Rng>(
        &self,
        input: ArrayView4<'_, Complex64>,
        lengths: Option<&[usize]>,
        rng: &mut R,
    ) -> Result<Spectrogram> {
        let (batch_size, _, _, num_frames) = input.dim();
        if let Some(lengths) = lengths {
            check_lengths(lengths, batch_size, num_frames)?;
        }
        let mut output = input.to_owned();
        if !self.training {
            return Ok(output);
        }

        let patch_size = self.config.patch_size;
        let mut masked_frames = 0;
        for b in 0..batch_size {
            let length = valid_frames(lengths, b, num_frames);
            let num_patches = length.div_ceil(patch_size);
            let masked_length = (length as f64 * self.config.mask_fraction).ceil() as usize;
            let num_masked = masked_length.div_ceil(patch_size).min(num_patches);

            for patch in index::sample(rng, num_patches, num_masked) {
                let start = patch * patch_size;
                let end = (start + patch_size).min(length);
                output
                    .slice_mut(s![b, .., .., start..end])
                    .fill(Complex64::new(0.0, 0.0));
                masked_frames += end - start;
            }
        }

        debug!(batch_size, num_frames, masked_frames, "applied patch masking");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;
    use spatia_proptest::generators::{complex_gaussian, seeded_rng};

    #[test]
    fn defaults() {
        let config = PatchMaskingConfig::default();
        assert_eq!(config.patch_size, 48);
        assert_eq!(config.mask_fraction, 0.7);
        let masking = PatchMasking::new(config).unwrap();
        assert!(masking.is_training());
    }

    #[test]
    fn rejects_invalid_configuration() {
        for config in [
            PatchMaskingConfig::new(0, 0.5),
            PatchMaskingConfig::new(4, -0.1),
            PatchMaskingConfig::new(4, 1.5),
            PatchMaskingConfig::new(4, f64::NAN),
        ] {
            assert!(matches!(
                PatchMasking::new(config),
                Err(Error::InvalidConfiguration { .. })
            ));
        }
    }

    #[test]
    fn masks_whole_patches_inside_valid_length() {
        let mut rng = seeded_rng(81);
        let masking = PatchMasking::new(PatchMaskingConfig::new(4, 0.5)).unwrap();
        let x = complex_gaussian(&mut rng, (2, 2, 3, 40));
        let lengths = [40, 22];
        let y = masking.forward(x.view(), Some(&lengths), &mut rng).unwrap();

        for (b, &length) in lengths.iter().enumerate() {
            // Frames are zeroed across every channel and subband or not at all.
            let zeroed: Vec<usize> = (0..40)
                .filter(|&n| y.slice(s![b, .., .., n]).iter().all(|v| v.norm() == 0.0))
                .collect();
            for &n in &zeroed {
                assert!(n < length);
            }
            assert_eq!(zeroed.len().div_ceil(4), (length / 2).div_ceil(4));
            for n in length..40 {
                assert_eq!(y.slice(s![b, .., .., n]), x.slice(s![b, .., .., n]));
            }
        }
    }

    #[test]
    fn zero_fraction_keeps_input() {
        let mut rng = seeded_rng(82);
        let masking = PatchMasking::new(PatchMaskingConfig::new(5, 0.0)).unwrap();
        let x = complex_gaussian(&mut rng, (1, 1, 4, 30));
        let y = masking.forward(x.view(), None, &mut rng).unwrap();
        assert_eq!(y, x);
    }

    #[test]
    fn evaluation_mode_is_identity() {
        let mut rng = seeded_rng(83);
        let mut masking = PatchMasking::new(PatchMaskingConfig::new(2, 1.0)).unwrap();
        masking.eval();
        assert!(!masking.is_training());
        let x = complex_gaussian(&mut rng, (2, 2, 3, 10));
        assert_eq!(masking.forward(x.view(), None, &mut rng).unwrap(), x);

        masking.train();
        let y = masking.forward(x.view(), None, &mut rng).unwrap();
        assert!(y.iter().all(|v| v.norm() == 0.0));
    }

    #[test]
    fn rejects_long_lengths() {
        let masking = PatchMasking::new(PatchMaskingConfig::default()).unwrap();
        let x = Array4::<Complex64>::zeros((1, 1, 2, 5));
        assert!(matches!(
            masking.forward(x.view(), Some(&[6]), &mut seeded_rng(84)),
            Err(Error::ShapeMismatch(_))
        ));
    }
}
