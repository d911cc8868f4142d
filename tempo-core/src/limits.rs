//! Resource limits shared across Tempo crates.
//!
//! Following TigerStyle: put limits on everything. Configuration validation in
//! each crate checks against these bounds so that no structure grows without an
//! explicit ceiling.

/// Maximum number of levels in a timing wheel.
pub const WHEEL_LEVELS_MAX: usize = 8;

/// Maximum number of slots per timing wheel level.
pub const WHEEL_SIZE_MAX: usize = 4096;

/// Maximum number of timers pending in a single wheel.
pub const TIMERS_MAX: usize = 1_000_000;

/// Maximum number of listeners on a single registry.
pub const LISTENERS_MAX: usize = 64;

/// Maximum number of distinct labeled series in a metrics collector.
pub const METRIC_SERIES_MAX: usize = 10_000;

/// Maximum number of retained configuration versions.
pub const CONFIG_HISTORY_MAX: usize = 1_000;

/// Minimum t-digest compression parameter.
pub const TDIGEST_COMPRESSION_MIN: f64 = 10.0;

/// Maximum t-digest compression parameter.
pub const TDIGEST_COMPRESSION_MAX: f64 = 10_000.0;

/// Upper bound on the sample cap of a PID auto-tune run.
pub const TUNING_SAMPLES_MAX: u32 = 100_000;

/// Maximum number of ids retained by a duplicate detector's exact store.
pub const DEDUP_TRACKED_MAX: usize = 10_000_000;

/// Maximum number of bits in a Bloom filter (256 MiB).
pub const BLOOM_BITS_MAX: usize = 1 << 31;
