//! STFT configuration.

use spatia_common::{Error, Result};

/// Short-time Fourier transform settings shared by analysis and synthesis.
#[derive(Debug, Clone, PartialEq)]
pub struct StftConfig {
    /// FFT size and window length in samples; must be even (default: 512).
    pub fft_length: usize,
    /// Frame advance in samples, `1..=fft_length` (default: 256).
    pub hop_length: usize,
    /// Exponent applied to the magnitude of each bin, phase kept (default: 1.0).
    pub magnitude_power: f64,
    /// Linear scale applied after the magnitude power (default: 1.0).
    pub scale: f64,
}

impl Default for StftConfig {
    fn default() -> Self {
        Self {
            fft_length: 512,
            hop_length: 256,
            magnitude_power: 1.0,
            scale: 1.0,
        }
    }
}

impl StftConfig {
    /// Number of one-sided subbands, `fft_length / 2 + 1`.
    pub fn num_subbands(&self) -> usize {
        self.fft_length / 2 + 1
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.fft_length == 0 || self.fft_length % 2 != 0 {
            return Err(Error::invalid(
                "fft_length",
                format!("must be even and positive, got {}", self.fft_length),
            ));
        }
        if self.hop_length == 0 || self.hop_length > self.fft_length {
            return Err(Error::invalid(
                "hop_length",
                format!(
                    "must be in 1..={}, got {}",
                    self.fft_length, self.hop_length
                ),
            ));
        }
        if !(self.magnitude_power > 0.0 && self.magnitude_power.is_finite()) {
            return Err(Error::invalid(
                "magnitude_power",
                format!("must be positive, got {}", self.magnitude_power),
            ));
        }
        if !(self.scale > 0.0 && self.scale.is_finite()) {
            return Err(Error::invalid(
                "scale",
                format!("must be positive, got {}", self.scale),
            ));
        }
        Ok(())
    }
}
