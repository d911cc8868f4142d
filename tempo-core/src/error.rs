//! Error types for shared Tempo primitives.

/// Errors raised by `tempo-core` primitives.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Too many listeners registered on a single registry.
    #[error("listener limit reached: {count} registered (max {max})")]
    ListenerLimit {
        /// Listeners currently registered.
        count: usize,
        /// Maximum allowed.
        max: usize,
    },
}

/// Result type for `tempo-core` operations.
pub type CoreResult<T> = Result<T, CoreError>;
