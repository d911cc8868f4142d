//! Flow control error types.

/// Flow control error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// All admission slots are in use.
    #[error("at capacity: {in_flight} in flight (limit {limit})")]
    AtCapacity {
        /// Operations currently in flight.
        in_flight: u32,
        /// Current admission limit.
        limit: u32,
    },

    /// A permit was released twice or never issued.
    #[error("unknown permit {permit_id}")]
    UnknownPermit {
        /// The permit id.
        permit_id: u64,
    },

    /// Auto-tune was requested while a run is already active.
    #[error("auto-tune already in progress")]
    TuningInProgress,
}

/// Result type for flow control operations.
pub type FlowResult<T> = Result<T, FlowError>;
