//! One WPE filtering step.
//!
//! For every (batch, subband) cell the predicted reverberant component of
//! frame `t` is a linear combination of the frames `t - D - L + 1 ..= t - D`
//! of all channels, where `L` is the filter length and `D` the prediction
//! delay. The prediction filter minimizes the weighted prediction error
//!
//! ```text
//! Q = X̃ᴴ diag(w) X̃,   R = X̃ᴴ diag(w) X,   Q G = R,   U = X̃ G
//! ```
//!
//! and the dereverberated output is `X - U`.
//!
//! The flattened design matrix `X̃` has `C · L` columns in channel-major
//! order: column `c · L + l` holds channel `c` at tap `l`, and tap `l`
//! carries frame `t - D - (L - 1 - l)`. Tap `0` is the oldest frame, tap
//! `L - 1` the frame at lag `D`.

use ndarray::{Array2, Array3, Array4, Array5, ArrayView3, ArrayView4, ArrayView5, Axis, s};
use num_complex::Complex64;
use rayon::prelude::*;
use spatia_common::length::{check_lengths, valid_frames};
use spatia_common::{Error, Result, Spectrogram};
use spatia_linalg::{solve_batched, weighted_gram};
use tracing::{debug, warn};

use crate::config::{SolveFailurePolicy, WpeConfig};

/// Weighted prediction error filter.
#[derive(Debug, Clone)]
pub struct WpeFilter {
    config: WpeConfig,
}

impl WpeFilter {
    /// Validates `config`; see [`WpeConfig`] for the accepted ranges.
    pub fn new(config: WpeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The settings this filter was built with.
    pub fn config(&self) -> &WpeConfig {
        &self.config
    }

    /// Taps per channel, `L`.
    pub fn filter_length(&self) -> usize {
        self.config.filter_length
    }

    /// Frames between the predicted frame and the newest tap, `D`.
    pub fn prediction_delay(&self) -> usize {
        self.config.prediction_delay
    }

    /// Delayed history tensor `(batch, channel, subband, frame, tap)`.
    ///
    /// `[b, c, f, n, l]` holds `input[b, c, f, n - D - (L - 1 - l)]`, or zero
    /// when that frame precedes the start of the sequence.
    pub fn convtensor(
        input: ArrayView4<'_, Complex64>,
        filter_length: usize,
        delay: usize,
    ) -> Array5<Complex64> {
        let (batch_size, num_channels, num_subbands, num_frames) = input.dim();
        let shift = filter_length.saturating_sub(1) + delay;
        Array5::from_shape_fn(
            (batch_size, num_channels, num_subbands, num_frames, filter_length),
            |(b, c, f, n, l)| match (n + l).checked_sub(shift) {
                Some(t) => input[[b, c, f, t]],
                None => Complex64::new(0.0, 0.0),
            },
        )
    }

    /// Flattens a convolutional tensor into the design matrices
    /// `(batch, subband, frame, channel · tap)` in channel-major order.
    pub fn permute_convtensor(tilde: ArrayView5<'_, Complex64>) -> Array4<Complex64> {
        let (batch_size, num_channels, num_subbands, num_frames, filter_length) = tilde.dim();
        Array4::from_shape_fn(
            (
                batch_size,
                num_subbands,
                num_frames,
                num_channels * filter_length,
            ),
            |(b, f, n, k)| tilde[[b, k / filter_length, f, n, k % filter_length]],
        )
    }

    /// Weighted correlations of every (batch, subband) cell.
    ///
    /// `input` is `(batch, channel, subband, frame)`, `weight` is
    /// `(batch, subband, frame)` and `tilde` the flattened design matrices
    /// `(batch, subband, frame, channel · tap)`. Frames at or past the valid
    /// length get zero weight. Returns `Q` `(batch, subband, C·L, C·L)` and
    /// `R` `(batch, subband, C·L, C)`.
    pub fn estimate_correlations(
        &self,
        input: ArrayView4<'_, Complex64>,
        weight: ArrayView3<'_, f64>,
        tilde: ArrayView4<'_, Complex64>,
        lengths: Option<&[usize]>,
    ) -> Result<(Array4<Complex64>, Array4<Complex64>)> {
        let (batch_size, num_channels, num_subbands, num_frames) = input.dim();
        if weight.dim() != (batch_size, num_subbands, num_frames) {
            return Err(Error::ShapeMismatch(format!(
                "weight has shape {:?}, expected {:?}",
                weight.dim(),
                (batch_size, num_subbands, num_frames)
            )));
        }
        let (tb, tf, tn, num_taps) = tilde.dim();
        if (tb, tf, tn) != (batch_size, num_subbands, num_frames) {
            return Err(Error::ShapeMismatch(format!(
                "design matrices have shape {:?}, expected ({batch_size}, {num_subbands}, {num_frames}, _)",
                tilde.dim()
            )));
        }
        if let Some(lengths) = lengths {
            check_lengths(lengths, batch_size, num_frames)?;
        }

        let cells: Vec<(Array2<Complex64>, Array2<Complex64>)> = (0..batch_size * num_subbands)
            .into_par_iter()
            .map(|idx| {
                let (b, f) = (idx / num_subbands, idx % num_subbands);
                let len = valid_frames(lengths, b, num_frames);
                let mut w = weight.slice(s![b, f, ..]).to_owned();
                w.slice_mut(s![len..]).fill(0.0);
                let x_tilde = tilde.slice(s![b, f, .., ..]);
                // (frame, channel)
                let x = input.slice(s![b, .., f, ..]).reversed_axes();
                (
                    weighted_gram(x_tilde, w.view(), x_tilde),
                    weighted_gram(x_tilde, w.view(), x),
                )
            })
            .collect();

        let mut q = Array4::zeros((batch_size, num_subbands, num_taps, num_taps));
        let mut r = Array4::zeros((batch_size, num_subbands, num_taps, num_channels));
        for (idx, (q_cell, r_cell)) in cells.into_iter().enumerate() {
            let (b, f) = (idx / num_subbands, idx % num_subbands);
            q.slice_mut(s![b, f, .., ..]).assign(&q_cell);
            r.slice_mut(s![b, f, .., ..]).assign(&r_cell);
        }
        Ok((q, r))
    }

    /// Solves `Q G = R` in every (batch, subband) cell.
    ///
    /// With `diag_reg` set, `Q` is loaded with `(diag_reg · Re tr Q + eps) I`
    /// first. Returns the filter `(batch, output_channel, subband, C·L)`.
    pub fn estimate_filter(
        &self,
        q: ArrayView4<'_, Complex64>,
        r: ArrayView4<'_, Complex64>,
    ) -> Result<Array4<Complex64>> {
        let (batch_size, num_subbands, num_taps, num_cols) = q.dim();
        let (rb, rf, r_rows, num_channels) = r.dim();
        if num_taps != num_cols || (rb, rf, r_rows) != (batch_size, num_subbands, num_taps) {
            return Err(Error::ShapeMismatch(format!(
                "Q has shape {:?} and R has shape {:?}",
                q.dim(),
                r.dim()
            )));
        }

        let mut q = q.to_owned();
        if let Some(diag_reg) = self.config.diag_reg {
            for mut batch in q.outer_iter_mut() {
                for mut cell in batch.outer_iter_mut() {
                    let trace: f64 = cell.diag().iter().map(|v| v.re).sum();
                    let loading = diag_reg * trace + self.config.eps;
                    cell.diag_mut().iter_mut().for_each(|v| v.re += loading);
                }
            }
        }

        let solved = solve_batched(q.view(), r).map_err(|e| Error::ShapeMismatch(e.to_string()))?;
        if let Some(failure) = solved.failures.first() {
            match self.config.failure_policy {
                SolveFailurePolicy::Propagate => {
                    return Err(Error::NumericalFailure(format!(
                        "cannot solve for the prediction filter of batch {} subband {}: {}",
                        failure.batch, failure.cell, failure.error
                    )));
                }
                SolveFailurePolicy::IdentityFilter => {
                    warn!(
                        num_failed = solved.failures.len(),
                        first_batch = failure.batch,
                        first_subband = failure.cell,
                        "correlation matrix not invertible, using identity filter"
                    );
                }
            }
        }

        // (batch, subband, tap, channel) -> (batch, channel, subband, tap)
        Ok(solved
            .solution
            .permuted_axes([0, 3, 1, 2])
            .as_standard_layout()
            .into_owned())
    }

    /// Predicted reverberant component `U` `(batch, channel, subband, frame)`
    /// with `U[b, m, f, n] = Σ_k tilde[b, f, n, k] · filter[b, m, f, k]`.
    pub fn apply_filter(
        &self,
        filter: ArrayView4<'_, Complex64>,
        tilde: ArrayView4<'_, Complex64>,
    ) -> Result<Array4<Complex64>> {
        let (batch_size, num_channels, num_subbands, num_taps) = filter.dim();
        let (tb, tf, num_frames, tk) = tilde.dim();
        if (tb, tf, tk) != (batch_size, num_subbands, num_taps) {
            return Err(Error::ShapeMismatch(format!(
                "filter has shape {:?} and design matrices {:?}",
                filter.dim(),
                tilde.dim()
            )));
        }

        let cells: Vec<Array2<Complex64>> = (0..batch_size * num_subbands)
            .into_par_iter()
            .map(|idx| {
                let (b, f) = (idx / num_subbands, idx % num_subbands);
                // (frame, tap) x (tap, channel)
                tilde
                    .slice(s![b, f, .., ..])
                    .dot(&filter.slice(s![b, .., f, ..]).t())
            })
            .collect();

        let mut u = Array4::zeros((batch_size, num_channels, num_subbands, num_frames));
        for (idx, cell) in cells.into_iter().enumerate() {
            let (b, f) = (idx / num_subbands, idx % num_subbands);
            u.slice_mut(s![b, .., f, ..]).assign(&cell.t());
        }
        Ok(u)
    }

    /// One WPE step on `input` `(batch, channel, subband, frame)`.
    ///
    /// `power` has the shape of `input` and holds the current estimate of the
    /// desired signal power; the frame weights are `1 / (mean_c power + eps)`.
    /// Frames at or past the valid length are zeroed in the output and the
    /// lengths are passed through.
    pub fn forward(
        &self,
        input: ArrayView4<'_, Complex64>,
        power: ArrayView4<'_, f64>,
        lengths: Option<&[usize]>,
    ) -> Result<(Spectrogram, Option<Vec<usize>>)> {
        if power.dim() != input.dim() {
            return Err(Error::ShapeMismatch(format!(
                "power has shape {:?}, input {:?}",
                power.dim(),
                input.dim()
            )));
        }
        let (batch_size, num_channels, num_subbands, num_frames) = input.dim();
        if let Some(lengths) = lengths {
            check_lengths(lengths, batch_size, num_frames)?;
        }

        let weight: Array3<f64> = power
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array3::zeros((batch_size, num_subbands, num_frames)))
            .mapv(|p| 1.0 / (p + self.config.eps));

        let tilde = Self::permute_convtensor(
            Self::convtensor(
                input,
                self.config.filter_length,
                self.config.prediction_delay,
            )
            .view(),
        );
        let (q, r) = self.estimate_correlations(input, weight.view(), tilde.view(), lengths)?;
        let filter = self.estimate_filter(q.view(), r.view())?;
        let undesired = self.apply_filter(filter.view(), tilde.view())?;

        let mut output = &input - &undesired;
        if let Some(lengths) = lengths {
            for (b, &len) in lengths.iter().enumerate() {
                output
                    .slice_mut(s![b, .., .., len..])
                    .fill(Complex64::new(0.0, 0.0));
            }
        }

        debug!(
            batch_size,
            num_channels,
            num_subbands,
            num_frames,
            filter_length = self.config.filter_length,
            prediction_delay = self.config.prediction_delay,
            "applied WPE filter"
        );
        Ok((output, lengths.map(<[usize]>::to_vec)))
    }
}
