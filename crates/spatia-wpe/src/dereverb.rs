//! Iterative mask-based WPE dereverberation.

use ndarray::{ArrayView4, Zip};
use num_complex::Complex64;
use spatia_common::util::db_to_mag;
use spatia_common::{Error, Result, Spectrogram};
use tracing::debug;

use crate::config::DereverbConfig;
use crate::filter::WpeFilter;

/// Runs [`WpeFilter`] for a fixed number of iterations.
///
/// Every iteration filters the original observation; only the weights
/// change. They come from the power of the previous iteration's output, and
/// on the first iteration the magnitude is optionally gated by a mask
/// clamped to `[db_to_mag(mask_min_db), db_to_mag(mask_max_db)]`.
#[derive(Debug, Clone)]
pub struct MaskBasedDereverbWpe {
    filter: WpeFilter,
    num_iterations: usize,
    mask_min: f64,
    mask_max: f64,
}

impl MaskBasedDereverbWpe {
    /// Validates both the iteration settings and the filter settings.
    pub fn new(config: DereverbConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            filter: WpeFilter::new(config.wpe)?,
            num_iterations: config.num_iterations,
            mask_min: db_to_mag(config.mask_min_db),
            mask_max: db_to_mag(config.mask_max_db),
        })
    }

    /// The filter applied at every iteration.
    pub fn filter(&self) -> &WpeFilter {
        &self.filter
    }

    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    /// Dereverberates `input` `(batch, channel, subband, frame)`.
    ///
    /// `mask`, when given, must have the shape of `input`. The output has the
    /// shape of the input and the lengths are returned unchanged.
    pub fn forward(
        &self,
        input: ArrayView4<'_, Complex64>,
        lengths: Option<&[usize]>,
        mask: Option<ArrayView4<'_, f64>>,
    ) -> Result<(Spectrogram, Option<Vec<usize>>)> {
        if let Some(mask) = &mask
            && mask.dim() != input.dim()
        {
            return Err(Error::ShapeMismatch(format!(
                "mask has shape {:?}, input {:?}",
                mask.dim(),
                input.dim()
            )));
        }

        let mut output = input.to_owned();
        for iteration in 0..self.num_iterations {
            let mut magnitude = output.mapv(|v| v.norm());
            if iteration == 0
                && let Some(mask) = &mask
            {
                Zip::from(&mut magnitude)
                    .and(mask)
                    .for_each(|m, &g| *m *= g.clamp(self.mask_min, self.mask_max));
            }
            let power = magnitude.mapv(|m| m * m);
            let (filtered, _) = self.filter.forward(input, power.view(), lengths)?;
            output = filtered;
            debug!(iteration, "dereverberation iteration done");
        }

        Ok((output, lengths.map(<[usize]>::to_vec)))
    }
}
