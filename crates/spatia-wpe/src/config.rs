//! WPE and dereverberation configuration.

use spatia_common::{Error, Result};

/// What to do with a (batch, subband) cell whose correlation matrix cannot
/// be inverted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SolveFailurePolicy {
    /// Use a zero prediction filter for the cell, so its output equals its
    /// input, and log a warning.
    #[default]
    IdentityFilter,
    /// Fail the whole call with [`Error::NumericalFailure`].
    Propagate,
}

/// Settings of a single WPE filtering step.
#[derive(Debug, Clone, PartialEq)]
pub struct WpeConfig {
    /// Number of past frames per channel used for prediction (default: 10).
    pub filter_length: usize,
    /// Frames between the predicted frame and the most recent tap (default: 3).
    pub prediction_delay: usize,
    /// Diagonal loading relative to the trace of `Q`; `None` disables
    /// regularization (default: `Some(1e-8)`).
    pub diag_reg: Option<f64>,
    /// Floor added to powers and to the diagonal loading (default: 1e-8).
    pub eps: f64,
    /// Handling of cells that cannot be solved (default: identity filter).
    pub failure_policy: SolveFailurePolicy,
}

impl Default for WpeConfig {
    fn default() -> Self {
        Self {
            filter_length: 10,
            prediction_delay: 3,
            diag_reg: Some(1e-8),
            eps: 1e-8,
            failure_policy: SolveFailurePolicy::IdentityFilter,
        }
    }
}

impl WpeConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.filter_length == 0 {
            return Err(Error::invalid("filter_length", "must be positive"));
        }
        if let Some(diag_reg) = self.diag_reg
            && !(diag_reg >= 0.0 && diag_reg.is_finite())
        {
            return Err(Error::invalid(
                "diag_reg",
                format!("must be non-negative, got {diag_reg}"),
            ));
        }
        if !(self.eps > 0.0 && self.eps.is_finite()) {
            return Err(Error::invalid(
                "eps",
                format!("must be positive, got {}", self.eps),
            ));
        }
        Ok(())
    }
}

/// Settings of the iterative mask-based dereverberation.
#[derive(Debug, Clone, PartialEq)]
pub struct DereverbConfig {
    /// Filter settings used by every iteration.
    pub wpe: WpeConfig,
    /// Number of filter re-estimations (default: 1).
    pub num_iterations: usize,
    /// Lower clamp of the input mask in dB (default: -200).
    pub mask_min_db: f64,
    /// Upper clamp of the input mask in dB (default: 0).
    pub mask_max_db: f64,
}

impl Default for DereverbConfig {
    fn default() -> Self {
        Self {
            wpe: WpeConfig::default(),
            num_iterations: 1,
            mask_min_db: -200.0,
            mask_max_db: 0.0,
        }
    }
}

impl DereverbConfig {
    pub(crate) fn validate(&self) -> Result<()> {
        self.wpe.validate()?;
        if self.num_iterations == 0 {
            return Err(Error::invalid("num_iterations", "must be positive"));
        }
        if self.mask_min_db.is_nan()
            || self.mask_max_db.is_nan()
            || self.mask_min_db > self.mask_max_db
        {
            return Err(Error::invalid(
                "mask_min_db",
                format!(
                    "must not exceed mask_max_db ({} > {})",
                    self.mask_min_db, self.mask_max_db
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let wpe = WpeConfig::default();
        assert_eq!(wpe.filter_length, 10);
        assert_eq!(wpe.prediction_delay, 3);
        assert_eq!(wpe.diag_reg, Some(1e-8));
        assert_eq!(wpe.eps, 1e-8);
        assert_eq!(wpe.failure_policy, SolveFailurePolicy::IdentityFilter);

        let dereverb = DereverbConfig::default();
        assert_eq!(dereverb.num_iterations, 1);
        assert_eq!(dereverb.mask_min_db, -200.0);
        assert_eq!(dereverb.mask_max_db, 0.0);
        dereverb.validate().unwrap();
    }

    #[test]
    fn rejects_invalid_values() {
        let zero_taps = WpeConfig {
            filter_length: 0,
            ..Default::default()
        };
        assert!(matches!(
            zero_taps.validate(),
            Err(Error::InvalidConfiguration {
                parameter: "filter_length",
                ..
            })
        ));

        let negative_reg = WpeConfig {
            diag_reg: Some(-1.0),
            ..Default::default()
        };
        assert!(negative_reg.validate().is_err());

        let no_iterations = DereverbConfig {
            num_iterations: 0,
            ..Default::default()
        };
        assert!(no_iterations.validate().is_err());

        let inverted_clamp = DereverbConfig {
            mask_min_db: 10.0,
            ..Default::default()
        };
        assert!(inverted_clamp.validate().is_err());
    }
}
