//! Timer error types.

/// Error returned by a scheduled callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Timing wheel error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// Timer ids must be non-empty.
    #[error("timer id must not be empty")]
    EmptyId,

    /// The wheel already holds its maximum number of timers.
    #[error("timer capacity exceeded: {pending} pending (max {max})")]
    CapacityExceeded {
        /// Timers currently pending.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Repeating timers need a period of at least one tick.
    #[error("interval must be at least one tick")]
    InvalidInterval,

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },
}

/// Result type for timing wheel operations.
pub type TimerResult<T> = Result<T, TimerError>;
