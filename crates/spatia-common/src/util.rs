//! Scalar helpers.

use std::f64::consts::{PI, TAU};

/// Converts a level in dB to a linear magnitude: `10^(db / 20)`.
pub fn db_to_mag(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Wraps a phase into `(-pi, pi]`.
#[inline]
pub fn wrap_phase(phase: f64) -> f64 {
    phase - TAU * ((phase - PI) / TAU).ceil()
}
