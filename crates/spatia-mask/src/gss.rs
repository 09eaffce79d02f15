//! Guided source separation masks.
//!
//! Each source is modeled per subband by a complex angular central Gaussian
//! whose spatial covariance is learned with EM from the unit-normalized
//! multichannel observations. The source activity acts as a prior: a source
//! never receives mass on frames where it is inactive.

use ndarray::{Array1, Array2, Array4, ArrayView2, ArrayView3, ArrayView4, Axis, s};
use num_complex::Complex64;
use rayon::prelude::*;
use spatia_common::{Activity, Error, Mask, Result};
use spatia_linalg::{Lu, hermitian_part, quadratic_form};
use tracing::debug;

use crate::config::GssConfig;

/// Converts a boolean activity `(batch, output, frame)` to weights in
/// `{0, 1}`.
pub fn activity_from_bool(activity: ArrayView3<'_, bool>) -> Activity {
    activity.mapv(|active| if active { 1.0 } else { 0.0 })
}

/// Mask estimator without learned parameters.
///
/// The output is deterministic and does not depend on the number of input
/// channels beyond the statistics themselves.
#[derive(Debug, Clone)]
pub struct MaskEstimatorGss {
    config: GssConfig,
}

impl MaskEstimatorGss {
    /// Fails on zero iterations or a non-positive `eps`.
    pub fn new(config: GssConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &GssConfig {
        &self.config
    }

    /// Estimates masks `(batch, output, subband, frame)` for `input`
    /// `(batch, channel, subband, frame)` given `activity`
    /// `(batch, output, frame)` with non-negative entries.
    ///
    /// On every frame with at least one active source the masks sum to one;
    /// on frames without active sources they are zero.
    pub fn forward(
        &self,
        input: ArrayView4<'_, Complex64>,
        activity: ArrayView3<'_, f64>,
    ) -> Result<Mask> {
        let (batch_size, num_channels, num_subbands, num_frames) = input.dim();
        let (activity_batch, num_outputs, activity_frames) = activity.dim();
        if activity_batch != batch_size || activity_frames != num_frames {
            return Err(Error::ShapeMismatch(format!(
                "activity has shape {:?}, expected ({batch_size}, _, {num_frames})",
                activity.dim()
            )));
        }
        if num_outputs == 0 {
            return Err(Error::ShapeMismatch("activity has no outputs".into()));
        }
        if num_channels == 0 {
            return Err(Error::ShapeMismatch("input has no channels".into()));
        }
        if activity.iter().any(|&a| !(a >= 0.0 && a.is_finite())) {
            return Err(Error::invalid("activity", "must be finite and non-negative"));
        }

        let cells = (0..batch_size * num_subbands)
            .into_par_iter()
            .map(|idx| {
                let (b, f) = (idx / num_subbands, idx % num_subbands);
                self.estimate_cell(
                    input.slice(s![b, .., f, ..]),
                    activity.index_axis(Axis(0), b),
                )
                .map_err(|reason| {
                    Error::NumericalFailure(format!("batch {b}, subband {f}: {reason}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut mask = Array4::zeros((batch_size, num_outputs, num_subbands, num_frames));
        for (idx, cell) in cells.iter().enumerate() {
            let (b, f) = (idx / num_subbands, idx % num_subbands);
            mask.slice_mut(s![b, .., f, ..]).assign(cell);
        }

        debug!(
            batch_size,
            num_channels,
            num_subbands,
            num_outputs,
            num_iterations = self.config.num_iterations,
            "estimated GSS masks"
        );
        Ok(mask)
    }

    /// EM for one `(batch, subband)` cell. `observation` is
    /// `(channel, frame)`, `activity` is `(output, frame)`; returns the
    /// posteriors `(output, frame)`.
    fn estimate_cell(
        &self,
        observation: ArrayView2<'_, Complex64>,
        activity: ArrayView2<'_, f64>,
    ) -> Result<Array2<f64>, String> {
        let eps = self.config.eps;
        let (num_channels, num_frames) = observation.dim();
        let (num_outputs, _) = activity.dim();
        let dimension = num_channels as f64;

        let mut unit = observation.to_owned();
        for mut frame in unit.axis_iter_mut(Axis(1)) {
            let norm = frame.iter().map(|v| v.norm_sqr()).sum::<f64>().sqrt();
            frame.mapv_inplace(|v| v / (norm + eps));
        }

        let mut posterior = Array2::from_shape_fn((num_outputs, num_frames), |(o, n)| {
            let total: f64 = activity.column(n).sum();
            activity[[o, n]] / (total + eps)
        });
        // Identity covariance gives `zᴴ B⁻¹ z = 1` for unit vectors.
        let mut quadratic = Array2::<f64>::ones((num_outputs, num_frames));
        let mut log_pdf = Array2::<f64>::zeros((num_outputs, num_frames));

        for _ in 0..self.config.num_iterations {
            let weight = posterior
                .mean_axis(Axis(1))
                .unwrap_or_else(|| Array1::zeros(num_outputs));

            for o in 0..num_outputs {
                let gamma = posterior.row(o);
                let mass = gamma.sum();
                let mut covariance = Array2::<Complex64>::zeros((num_channels, num_channels));
                for n in 0..num_frames {
                    let scale = dimension * gamma[n] / quadratic[[o, n]] / (mass + eps);
                    if scale == 0.0 {
                        continue;
                    }
                    let z = unit.column(n);
                    for i in 0..num_channels {
                        for j in 0..num_channels {
                            covariance[[i, j]] += z[i] * z[j].conj() * scale;
                        }
                    }
                }
                let mut covariance = hermitian_part(covariance.view());
                for i in 0..num_channels {
                    covariance[[i, i]] += eps;
                }

                let lu = Lu::factor(covariance.view()).map_err(|e| e.to_string())?;
                let inverse = lu.inverse().map_err(|e| e.to_string())?;
                let log_det = lu.log_det().re;
                for n in 0..num_frames {
                    let q = quadratic_form(unit.column(n), inverse.view()).re.max(eps);
                    quadratic[[o, n]] = q;
                    log_pdf[[o, n]] = -dimension * q.ln() - log_det;
                }
            }

            for n in 0..num_frames {
                let peak = (0..num_outputs)
                    .filter(|&o| activity[[o, n]] > 0.0)
                    .map(|o| log_pdf[[o, n]])
                    .fold(f64::NEG_INFINITY, f64::max);
                if peak == f64::NEG_INFINITY {
                    posterior.column_mut(n).fill(0.0);
                    continue;
                }
                let mut column = posterior.column_mut(n);
                for o in 0..num_outputs {
                    column[o] = if activity[[o, n]] > 0.0 {
                        weight[o] * activity[[o, n]] * (log_pdf[[o, n]] - peak).exp()
                    } else {
                        0.0
                    };
                }
                let total = column.sum();
                if total > 0.0 {
                    column.mapv_inplace(|g| g / total);
                }
            }
        }

        if posterior.iter().any(|g| !g.is_finite()) {
            return Err("posterior is not finite".into());
        }
        Ok(posterior)
    }
}
