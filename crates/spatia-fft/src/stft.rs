//! Batched multichannel STFT / ISTFT.
//!
//! Frames are centered: the signal is padded with `fft_length / 2` zeros on
//! both sides, so frame `n` is centered on sample `n · hop_length` and a
//! signal of `T` samples yields `1 + T / hop_length` frames.

use std::sync::Arc;

use ndarray::{Array2, Array3, Array4, ArrayView1, ArrayView2, ArrayView3, ArrayView4, Axis, s};
use num_complex::Complex64;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use spatia_common::length::check_lengths;
use spatia_common::{Audio, Error, Result, Spectrogram};
use tracing::debug;

use crate::config::StftConfig;
use crate::window::hann_periodic;

/// Window-sum values below this are treated as uncovered samples.
const WINDOW_SUM_FLOOR: f64 = 1e-11;

/// Time-domain audio to complex spectrogram.
#[derive(derive_more::Debug)]
pub struct AudioToSpectrogram {
    config: StftConfig,
    window: Vec<f64>,
    #[debug(skip)]
    fft: Arc<dyn Fft<f64>>,
}

impl AudioToSpectrogram {
    /// Validates `config` and plans the forward FFT.
    pub fn new(config: StftConfig) -> Result<Self> {
        config.validate()?;
        let fft = FftPlanner::new().plan_fft_forward(config.fft_length);
        let window = hann_periodic(config.fft_length);
        Ok(Self {
            config,
            window,
            fft,
        })
    }

    pub fn config(&self) -> &StftConfig {
        &self.config
    }

    /// One-sided bins per frame, `fft_length / 2 + 1`.
    pub fn num_subbands(&self) -> usize {
        self.config.num_subbands()
    }

    /// Number of frames produced for `num_samples` samples.
    pub fn num_frames(&self, num_samples: usize) -> usize {
        1 + num_samples / self.config.hop_length
    }

    /// Transforms `(batch, channel, sample)` audio.
    ///
    /// `lengths` are valid sample counts; the returned lengths are valid
    /// frame counts `1 + length / hop_length`. Frames at or past the valid
    /// frame count are zeroed.
    pub fn forward(
        &self,
        audio: ArrayView3<'_, f64>,
        lengths: Option<&[usize]>,
    ) -> Result<(Spectrogram, Option<Vec<usize>>)> {
        let (batch_size, num_channels, num_samples) = audio.dim();
        if let Some(lengths) = lengths {
            check_lengths(lengths, batch_size, num_samples)?;
        }
        let num_frames = self.num_frames(num_samples);
        let num_subbands = self.num_subbands();
        let out_lengths: Option<Vec<usize>> =
            lengths.map(|lengths| lengths.iter().map(|&len| self.num_frames(len)).collect());

        let channels: Vec<_> = (0..batch_size * num_channels)
            .into_par_iter()
            .map(|idx| {
                let (b, c) = (idx / num_channels, idx % num_channels);
                let valid = out_lengths.as_ref().map_or(num_frames, |l| l[b]);
                self.analyze_channel(audio.slice(s![b, c, ..]), num_frames, valid)
            })
            .collect();

        let mut spec = Array4::zeros((batch_size, num_channels, num_subbands, num_frames));
        for (idx, channel) in channels.into_iter().enumerate() {
            let (b, c) = (idx / num_channels, idx % num_channels);
            spec.slice_mut(s![b, c, .., ..]).assign(&channel);
        }

        debug!(
            batch_size,
            num_channels, num_subbands, num_frames, "computed spectrogram"
        );
        Ok((spec, out_lengths))
    }

    /// `(subband, frame)` spectrum of one channel; frames from `valid` on
    /// stay zero.
    fn analyze_channel(
        &self,
        signal: ArrayView1<'_, f64>,
        num_frames: usize,
        valid: usize,
    ) -> Array2<Complex64> {
        let n_fft = self.config.fft_length;
        let hop = self.config.hop_length;
        let pad = n_fft / 2;
        let num_samples = signal.len();
        let num_subbands = self.num_subbands();

        let mut out = Array2::zeros((num_subbands, num_frames));
        let mut buffer = vec![Complex64::new(0.0, 0.0); n_fft];
        for n in 0..valid.min(num_frames) {
            let start = n * hop;
            for (i, (slot, &w)) in buffer.iter_mut().zip(&self.window).enumerate() {
                // Padded index start + i maps to sample start + i - pad.
                let t = (start + i).checked_sub(pad).filter(|&t| t < num_samples);
                *slot = Complex64::new(t.map_or(0.0, |t| signal[t] * w), 0.0);
            }
            self.fft.process(&mut buffer);
            for (k, &bin) in buffer[..num_subbands].iter().enumerate() {
                out[[k, n]] = compress(bin, self.config.magnitude_power) * self.config.scale;
            }
        }
        out
    }
}

/// Complex spectrogram back to time-domain audio.
#[derive(derive_more::Debug)]
pub struct SpectrogramToAudio {
    config: StftConfig,
    window: Vec<f64>,
    #[debug(skip)]
    ifft: Arc<dyn Fft<f64>>,
}

impl SpectrogramToAudio {
    /// Validates `config` and plans the inverse FFT.
    pub fn new(config: StftConfig) -> Result<Self> {
        config.validate()?;
        let ifft = FftPlanner::new().plan_fft_inverse(config.fft_length);
        let window = hann_periodic(config.fft_length);
        Ok(Self {
            config,
            window,
            ifft,
        })
    }

    pub fn config(&self) -> &StftConfig {
        &self.config
    }

    /// Number of samples produced for `num_frames` frames.
    pub fn num_samples(&self, num_frames: usize) -> usize {
        num_frames.saturating_sub(1) * self.config.hop_length
    }

    /// Inverts a `(batch, channel, subband, frame)` spectrogram.
    ///
    /// `lengths` are valid frame counts; the returned lengths are valid
    /// sample counts `(length - 1) · hop_length`.
    pub fn forward(
        &self,
        spec: ArrayView4<'_, Complex64>,
        lengths: Option<&[usize]>,
    ) -> Result<(Audio, Option<Vec<usize>>)> {
        let (batch_size, num_channels, num_subbands, num_frames) = spec.dim();
        if num_subbands != self.config.num_subbands() {
            return Err(Error::ShapeMismatch(format!(
                "expected {} subbands for fft_length {}, got {num_subbands}",
                self.config.num_subbands(),
                self.config.fft_length
            )));
        }
        if let Some(lengths) = lengths {
            check_lengths(lengths, batch_size, num_frames)?;
        }
        let num_samples = self.num_samples(num_frames);

        let channels: Vec<Vec<f64>> = (0..batch_size * num_channels)
            .into_par_iter()
            .map(|idx| {
                let (b, c) = (idx / num_channels, idx % num_channels);
                self.synthesize_channel(spec.slice(s![b, c, .., ..]), num_samples)
            })
            .collect();

        let mut audio = Array3::zeros((batch_size, num_channels, num_samples));
        for (idx, channel) in channels.into_iter().enumerate() {
            let (b, c) = (idx / num_channels, idx % num_channels);
            audio
                .slice_mut(s![b, c, ..])
                .assign(&ArrayView1::from(&channel[..]));
        }

        let out_lengths =
            lengths.map(|lengths| lengths.iter().map(|&len| self.num_samples(len)).collect());
        debug!(batch_size, num_channels, num_samples, "synthesized audio");
        Ok((audio, out_lengths))
    }

    fn synthesize_channel(
        &self,
        spec: ArrayView2<'_, Complex64>,
        num_samples: usize,
    ) -> Vec<f64> {
        let n_fft = self.config.fft_length;
        let hop = self.config.hop_length;
        let pad = n_fft / 2;
        let num_frames = spec.len_of(Axis(1));
        let inv_power = self.config.magnitude_power.recip();

        let padded_len = n_fft + num_frames.saturating_sub(1) * hop;
        let mut accum = vec![0.0; padded_len];
        let mut window_sum = vec![0.0; padded_len];
        let mut buffer = vec![Complex64::new(0.0, 0.0); n_fft];

        for n in 0..num_frames {
            for (k, &bin) in spec.column(n).iter().enumerate() {
                let mut bin = compress(bin / self.config.scale, inv_power);
                if k == 0 || k == n_fft / 2 {
                    bin.im = 0.0;
                }
                buffer[k] = bin;
                if k != 0 && k != n_fft / 2 {
                    buffer[n_fft - k] = bin.conj();
                }
            }
            self.ifft.process(&mut buffer);

            let start = n * hop;
            for (i, (&x, &w)) in buffer.iter().zip(&self.window).enumerate() {
                accum[start + i] += x.re / n_fft as f64 * w;
                window_sum[start + i] += w * w;
            }
        }

        (pad..pad + num_samples)
            .map(|t| {
                if window_sum[t] > WINDOW_SUM_FLOOR {
                    accum[t] / window_sum[t]
                } else {
                    0.0
                }
            })
            .collect()
    }
}

/// `|x|^p · e^{j∠x}`.
#[inline]
fn compress(x: Complex64, power: f64) -> Complex64 {
    if power == 1.0 {
        return x;
    }
    let norm = x.norm();
    if norm == 0.0 {
        x
    } else {
        x * norm.powf(power - 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use spatia_proptest::comparison::{assert_array_near, assert_complex_array_near};
    use spatia_proptest::generators::{random_lengths, real_gaussian, seeded_rng};
    use test_strategy::proptest;

    fn config(fft_length: usize, hop_length: usize) -> StftConfig {
        StftConfig {
            fft_length,
            hop_length,
            ..Default::default()
        }
    }

    #[test]
    fn output_shape_and_lengths() {
        let stft = AudioToSpectrogram::new(config(64, 16)).unwrap();
        let audio = Array3::<f64>::zeros((2, 3, 100));
        let (spec, lengths) = stft.forward(audio.view(), Some(&[100, 40])).unwrap();
        assert_eq!(spec.dim(), (2, 3, 33, 7));
        assert_eq!(lengths, Some(vec![7, 3]));
    }

    #[test]
    fn sinusoid_peaks_in_its_bin() {
        let n_fft = 64;
        let stft = AudioToSpectrogram::new(config(n_fft, 16)).unwrap();
        let bin = 5;
        let audio = Array3::from_shape_fn((1, 1, 512), |(_, _, t)| {
            (std::f64::consts::TAU * bin as f64 * t as f64 / n_fft as f64).cos()
        });
        let (spec, _) = stft.forward(audio.view(), None).unwrap();
        let frame = spec.slice(s![0, 0, .., 16]);
        let peak = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().total_cmp(&b.1.norm()))
            .map(|(k, _)| k);
        assert_eq!(peak, Some(bin));
    }

    #[test]
    fn padded_frames_are_zeroed() {
        let stft = AudioToSpectrogram::new(config(32, 8)).unwrap();
        let audio = real_gaussian(&mut seeded_rng(1), (2, 1, 80));
        let (spec, lengths) = stft.forward(audio.view(), Some(&[80, 24])).unwrap();
        let lengths = lengths.unwrap();
        assert_eq!(lengths[1], 4);
        assert!(spec.slice(s![1, .., .., 4..]).iter().all(|v| v.norm() == 0.0));
        assert!(spec.slice(s![1, .., .., ..4]).iter().any(|v| v.norm() > 0.0));
    }

    #[test]
    fn magnitude_power_and_scale() {
        let plain = AudioToSpectrogram::new(config(32, 8)).unwrap();
        let compressed = AudioToSpectrogram::new(StftConfig {
            magnitude_power: 0.5,
            scale: 2.0,
            ..config(32, 8)
        })
        .unwrap();
        let audio = real_gaussian(&mut seeded_rng(2), (1, 2, 64));
        let (x, _) = plain.forward(audio.view(), None).unwrap();
        let (y, _) = compressed.forward(audio.view(), None).unwrap();
        let expected = x.mapv(|v| {
            let norm = v.norm();
            if norm == 0.0 { v } else { v / norm.sqrt() * 2.0 }
        });
        assert_complex_array_near(&y, &expected, 1e-10);
    }

    #[test]
    fn round_trip_reconstructs_signal() {
        for (n_fft, hop) in [(64, 16), (32, 16), (48, 12)] {
            let cfg = StftConfig {
                magnitude_power: 0.7,
                scale: 0.5,
                ..config(n_fft, hop)
            };
            let stft = AudioToSpectrogram::new(cfg.clone()).unwrap();
            let istft = SpectrogramToAudio::new(cfg).unwrap();
            let num_samples = hop * 20;
            let audio = real_gaussian(&mut seeded_rng(n_fft as u64), (2, 2, num_samples));
            let (spec, lengths) = stft
                .forward(audio.view(), Some(&[num_samples, num_samples]))
                .unwrap();
            let (recon, recon_lengths) = istft.forward(spec.view(), lengths.as_deref()).unwrap();
            assert_eq!(recon.dim(), audio.dim());
            assert_eq!(recon_lengths, Some(vec![num_samples, num_samples]));
            assert_array_near(&recon, &audio, 1e-9);
        }
    }

    #[proptest(cases = 32)]
    fn round_trip_over_random_shapes_and_lengths(
        #[strategy(1..=3usize)] batch_size: usize,
        #[strategy(1..=3usize)] num_channels: usize,
        #[strategy(0..3usize)] layout: usize,
        #[strategy(4..=24usize)] num_hops: usize,
        seed: u64,
    ) {
        let (n_fft, hop) = [(64, 16), (32, 16), (48, 12)][layout];
        let cfg = config(n_fft, hop);
        let stft = AudioToSpectrogram::new(cfg.clone()).unwrap();
        let istft = SpectrogramToAudio::new(cfg).unwrap();

        let num_samples = hop * num_hops;
        let mut rng = seeded_rng(seed);
        let audio = real_gaussian(&mut rng, (batch_size, num_channels, num_samples));
        let lengths = random_lengths(&mut rng, batch_size, num_samples);
        let (spec, frame_lengths) = stft.forward(audio.view(), Some(&lengths)).unwrap();
        let (recon, _) = istft.forward(spec.view(), frame_lengths.as_deref()).unwrap();
        prop_assert_eq!(recon.dim(), audio.dim());

        // Samples whose every covering frame is valid come back exactly.
        for (b, &length) in lengths.iter().enumerate() {
            let exact = length.saturating_sub(n_fft / 2);
            assert_array_near(
                &recon.slice(s![b, .., ..exact]),
                &audio.slice(s![b, .., ..exact]),
                1e-9,
            );
        }
    }

    #[test]
    fn inverse_rejects_wrong_subband_count() {
        let istft = SpectrogramToAudio::new(config(32, 8)).unwrap();
        let spec = Array4::<Complex64>::zeros((1, 1, 16, 4));
        assert!(matches!(
            istft.forward(spec.view(), None),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn rejects_overlong_lengths() {
        let stft = AudioToSpectrogram::new(config(32, 8)).unwrap();
        let audio = Array3::<f64>::zeros((1, 1, 40));
        assert!(matches!(
            stft.forward(audio.view(), Some(&[41])),
            Err(Error::ShapeMismatch(_))
        ));
    }
}
