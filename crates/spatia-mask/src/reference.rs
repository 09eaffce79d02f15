//! Masking of a single reference channel.

use ndarray::{Array4, ArrayView4, Axis};
use num_complex::Complex64;
use spatia_common::length::check_lengths;
use spatia_common::util::db_to_mag;
use spatia_common::{Error, Result, Spectrogram};

/// Multiplies the reference channel by every mask.
///
/// Masks are clamped to `[db_to_mag(min_db), db_to_mag(max_db)]`, which by
/// default is `[1e-10, 1]`.
#[derive(Debug, Clone)]
pub struct MaskReferenceChannel {
    ref_channel: usize,
    mask_min: f64,
    mask_max: f64,
}

impl MaskReferenceChannel {
    /// Masks channel `ref_channel` with masks clamped to `[1e-10, 1]`.
    pub fn new(ref_channel: usize) -> Self {
        Self {
            ref_channel,
            mask_min: db_to_mag(-200.0),
            mask_max: db_to_mag(0.0),
        }
    }

    /// Sets the clamp range in dB.
    pub fn with_mask_range(mut self, min_db: f64, max_db: f64) -> Result<Self> {
        if min_db.is_nan() || max_db.is_nan() || min_db > max_db {
            return Err(Error::invalid(
                "mask_min_db",
                format!("must not exceed mask_max_db ({min_db} > {max_db})"),
            ));
        }
        self.mask_min = db_to_mag(min_db);
        self.mask_max = db_to_mag(max_db);
        Ok(self)
    }

    /// Index of the masked input channel.
    pub fn ref_channel(&self) -> usize {
        self.ref_channel
    }

    /// Applies `mask` `(batch, output, subband, frame)` to the reference
    /// channel of `input` `(batch, channel, subband, frame)`, giving one
    /// output spectrogram per mask. `lengths` are passed through.
    pub fn forward(
        &self,
        input: ArrayView4<'_, Complex64>,
        lengths: Option<&[usize]>,
        mask: ArrayView4<'_, f64>,
    ) -> Result<(Spectrogram, Option<Vec<usize>>)> {
        let (batch_size, num_channels, num_subbands, num_frames) = input.dim();
        if self.ref_channel >= num_channels {
            return Err(Error::ShapeMismatch(format!(
                "reference channel {} out of range for {num_channels} channels",
                self.ref_channel
            )));
        }
        let (mask_batch, num_outputs, mask_subbands, mask_frames) = mask.dim();
        if (mask_batch, mask_subbands, mask_frames) != (batch_size, num_subbands, num_frames) {
            return Err(Error::ShapeMismatch(format!(
                "mask has shape {:?}, input {:?}",
                mask.dim(),
                input.dim()
            )));
        }
        if let Some(lengths) = lengths {
            check_lengths(lengths, batch_size, num_frames)?;
        }

        let reference = input.index_axis(Axis(1), self.ref_channel);
        let output = Array4::from_shape_fn(
            (batch_size, num_outputs, num_subbands, num_frames),
            |(b, o, f, n)| {
                reference[[b, f, n]] * mask[[b, o, f, n]].clamp(self.mask_min, self.mask_max)
            },
        );
        Ok((output, lengths.map(<[usize]>::to_vec)))
    }
}
