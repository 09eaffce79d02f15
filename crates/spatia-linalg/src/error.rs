//! Linear algebra errors.

/// Errors reported by the factorization and solve routines.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinalgError {
    /// No usable pivot was found in the given column.
    #[error("matrix is singular (no pivot in column {column})")]
    Singular { column: usize },
    /// The matrix contains NaN or infinite entries.
    #[error("matrix contains non-finite values")]
    NonFinite,
    /// Operand shapes are incompatible.
    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
}
