//! Configuration store error types.

/// Configuration store error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The validator rejected the candidate configuration.
    #[error("validation failed: {message}")]
    Validation {
        /// Validator message.
        message: String,
    },

    /// The requested version is not (or no longer) in history.
    #[error("version {version} not found in history")]
    VersionNotFound {
        /// The requested version.
        version: u64,
    },

    /// A partial update was not a JSON object or did not produce a valid
    /// configuration shape.
    #[error("invalid patch: {message}")]
    InvalidPatch {
        /// Error message.
        message: String,
    },

    /// The current snapshot could not be serialized.
    #[error("serialization failed: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// Invalid store settings.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type for configuration store operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
