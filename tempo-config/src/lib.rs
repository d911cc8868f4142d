//! Versioned configuration for Tempo.
//!
//! [`VersionedConfig`] keeps tunables as immutable snapshots behind an `Arc`,
//! validates every change with a host-supplied validator, and retains a
//! bounded history for rollback.
//!
//! # Example
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//! use tempo_config::VersionedConfig;
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Limits {
//!     max_concurrency: u32,
//! }
//!
//! let mut config = VersionedConfig::new(Limits { max_concurrency: 8 }, |l: &Limits| {
//!     if l.max_concurrency == 0 {
//!         return Err("max_concurrency must be positive".to_string());
//!     }
//!     Ok(())
//! })
//! .unwrap();
//!
//! config.update(json!({"max_concurrency": 16})).unwrap();
//! assert_eq!(config.apply_pending().unwrap(), Some(2));
//! assert_eq!(config.get().max_concurrency, 16);
//!
//! config.rollback(None).unwrap();
//! assert_eq!(config.get().max_concurrency, 8);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod error;
pub mod merge;
pub mod versioned;

pub use error::{ConfigError, ConfigResult};
pub use merge::{lookup, merge_patch};
pub use versioned::{
    ChangeSource, ConfigEvent, HistoryEntry, StoreSettings, Validator, VersionedConfig,
};
