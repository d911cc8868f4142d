//! Streaming statistics for Tempo.
//!
//! Bounded-memory estimators for signals a scheduler watches:
//!
//! - **[`Ewma`]**: exponentially weighted mean and variance with z-score
//!   anomaly detection and a ±2σ forecast band.
//! - **[`TDigest`]**: mergeable percentile sketch with accurate tails.
//! - **[`BloomFilter`]**: probabilistic set membership with no false negatives.
//! - **[`DuplicateDetector`]**: Bloom filter in front of a bounded exact store.
//! - **[`MetricsCollector`]**: labeled series, each with an EWMA and a t-digest.
//!
//! Every structure is single-owner and synchronous; wrap it in a lock to share
//! it across tasks.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod bloom;
pub mod collector;
pub mod dedup;
pub mod error;
pub mod ewma;
pub mod tdigest;

pub use bloom::{BloomFilter, BloomStats};
pub use collector::{CollectorConfig, MetricEvent, MetricKey, MetricSnapshot, MetricsCollector};
pub use dedup::{DedupConfig, DedupStats, DuplicateDetector};
pub use error::{StatsError, StatsResult};
pub use ewma::{AnomalyVerdict, Ewma, EwmaConfig, EwmaStats, Prediction};
pub use tdigest::{Percentiles, TDigest, TDigestStats};
