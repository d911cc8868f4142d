//! Statistics error types.

/// Statistics error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StatsError {
    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// A sample was NaN or infinite.
    #[error("non-finite sample: {value}")]
    NonFinite {
        /// The rejected value.
        value: f64,
    },

    /// A t-digest weight was not a positive finite number.
    #[error("invalid weight: {weight}")]
    InvalidWeight {
        /// The rejected weight.
        weight: f64,
    },

    /// A new metric series would exceed the configured maximum.
    #[error("metric series limit reached: {max}")]
    SeriesLimit {
        /// Configured maximum.
        max: usize,
    },
}

/// Result type for statistics operations.
pub type StatsResult<T> = Result<T, StatsError>;
