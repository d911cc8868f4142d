//! Reusable inputs for Tempo property checks and scenarios.
//!
//! Generators take an explicit seed so every failing run can be replayed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds that have historically found bugs.
    pub const REGRESSION_SEEDS: &[u64] = &[
        42,
        12345,
        0xDEAD_BEEF,
        999,
        7777,
        0x1337,
        0xCAFE_BABE,
        1,
        u64::MAX,
        0,
    ];

    /// Number of random seeds to test in CI.
    pub const CI_SEED_COUNT: u32 = 100;
}

/// Latency workload shapes.
pub mod latency {
    use super::{Rng, SeedableRng, StdRng};

    /// Uniform latencies in `[0, max_ms)`.
    #[must_use]
    pub fn uniform(seed: u64, count: usize, max_ms: f64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count).map(|_| rng.gen_range(0.0..max_ms)).collect()
    }

    /// Latencies around `base_ms` with occasional spikes of `spike_factor`.
    #[must_use]
    pub fn spiky(seed: u64, count: usize, base_ms: f64, spike_probability: f64, spike_factor: f64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                let jitter = rng.gen_range(0.9..1.1);
                if rng.gen_bool(spike_probability) {
                    base_ms * spike_factor * jitter
                } else {
                    base_ms * jitter
                }
            })
            .collect()
    }
}

/// Installs a fmt subscriber writing through the test harness.
///
/// Safe to call from every test; only the first call installs it. The filter
/// follows `RUST_LOG` and defaults to `warn`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    // Already installed by an earlier test.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Returns a seeded RNG for a scenario step.
#[must_use]
pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Returns `seeds::CI_SEED_COUNT` seeds drawn from `master`, so a sweep that
/// fails can be replayed by the seed it reports.
#[must_use]
pub fn sweep_seeds(master: u64) -> Vec<u64> {
    let mut rng = rng(master);
    (0..seeds::CI_SEED_COUNT).map(|_| rng.gen()).collect()
}
