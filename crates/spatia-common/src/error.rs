//! Error type shared by all front-end components.

/// Errors returned by the front-end components.
///
/// Configuration errors are raised as early as the component can detect
/// them: at construction for options that are fully known up front, at the
/// first `forward` call for options that depend on the input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// An enumerated option holds a value the component does not implement.
    #[error("unsupported {option}: `{value}`")]
    UnsupportedConfiguration {
        /// Name of the option.
        option: &'static str,
        /// The rejected value.
        value: String,
    },
    /// A property was queried before the configuration it depends on was set.
    #[error("missing configuration: {0} is not set")]
    MissingConfiguration(&'static str),
    /// A hyperparameter is out of its valid range.
    #[error("invalid {parameter}: {reason}")]
    InvalidConfiguration {
        /// Name of the hyperparameter.
        parameter: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
    /// Input dimensions disagree with the configuration or with each other.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    /// A numerical routine failed (singular system, non-finite values).
    #[error("numerical failure: {0}")]
    NumericalFailure(String),
}

impl Error {
    /// [`Error::UnsupportedConfiguration`] for `option` set to `value`.
    pub fn unsupported(option: &'static str, value: impl Into<String>) -> Self {
        Self::UnsupportedConfiguration {
            option,
            value: value.into(),
        }
    }

    /// [`Error::InvalidConfiguration`] for `parameter`, with the reason it
    /// was rejected.
    pub fn invalid(parameter: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            parameter,
            reason: reason.into(),
        }
    }
}

/// Result alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;
