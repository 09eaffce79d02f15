//! Tolerance-based comparison of numeric outputs.
//!
//! Reports the worst element and how many elements are out of tolerance,
//! which is more useful than a bare `assert!` when a kernel drifts.

use ndarray::{ArrayBase, Data, Dimension};
use num_complex::Complex64;

/// Summary of an element-wise comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    /// Largest absolute difference.
    pub max_abs_diff: f64,
    /// Flat (logical order) index of the largest difference.
    pub max_diff_index: usize,
    /// Number of elements whose difference exceeds the tolerance.
    pub num_over_tolerance: usize,
    /// Number of compared elements.
    pub total: usize,
}

impl ComparisonResult {
    fn from_distances(distances: impl Iterator<Item = f64>, tolerance: f64) -> Self {
        let mut result = Self {
            max_abs_diff: 0.0,
            max_diff_index: 0,
            num_over_tolerance: 0,
            total: 0,
        };
        for (i, d) in distances.enumerate() {
            // NaN counts as out of tolerance.
            if d.is_nan() || d > result.max_abs_diff {
                result.max_abs_diff = if d.is_nan() { f64::INFINITY } else { d };
                result.max_diff_index = i;
            }
            if d.is_nan() || d > tolerance {
                result.num_over_tolerance += 1;
            }
            result.total += 1;
        }
        result
    }

    /// `true` when no element exceeded the tolerance.
    pub fn is_within_tolerance(&self) -> bool {
        self.num_over_tolerance == 0
    }
}

/// Compares two equally long slices element by element.
pub fn compare_f64(actual: &[f64], expected: &[f64], tolerance: f64) -> ComparisonResult {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    ComparisonResult::from_distances(
        actual.iter().zip(expected).map(|(a, e)| (a - e).abs()),
        tolerance,
    )
}

/// Asserts `|actual - expected| <= tolerance`.
#[track_caller]
pub fn assert_f64_near(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected}, got {actual} (tolerance {tolerance})"
    );
}

/// Asserts two real arrays of the same shape agree within `tolerance`.
#[track_caller]
pub fn assert_array_near<S1, S2, D>(
    actual: &ArrayBase<S1, D>,
    expected: &ArrayBase<S2, D>,
    tolerance: f64,
) where
    S1: Data<Elem = f64>,
    S2: Data<Elem = f64>,
    D: Dimension,
{
    assert_eq!(actual.shape(), expected.shape(), "shape mismatch");
    let result = ComparisonResult::from_distances(
        actual.iter().zip(expected.iter()).map(|(a, e)| (a - e).abs()),
        tolerance,
    );
    assert!(
        result.is_within_tolerance(),
        "{} of {} elements out of tolerance {tolerance}; worst at flat index {}: |diff| = {}",
        result.num_over_tolerance,
        result.total,
        result.max_diff_index,
        result.max_abs_diff
    );
}

/// Asserts two complex arrays of the same shape agree within `tolerance`
/// (distance measured as `|a - e|`).
#[track_caller]
pub fn assert_complex_array_near<S1, S2, D>(
    actual: &ArrayBase<S1, D>,
    expected: &ArrayBase<S2, D>,
    tolerance: f64,
) where
    S1: Data<Elem = Complex64>,
    S2: Data<Elem = Complex64>,
    D: Dimension,
{
    assert_eq!(actual.shape(), expected.shape(), "shape mismatch");
    let result = ComparisonResult::from_distances(
        actual.iter().zip(expected.iter()).map(|(a, e)| (a - e).norm()),
        tolerance,
    );
    assert!(
        result.is_within_tolerance(),
        "{} of {} elements out of tolerance {tolerance}; worst at flat index {}: |diff| = {}",
        result.num_over_tolerance,
        result.total,
        result.max_diff_index,
        result.max_abs_diff
    );
}
