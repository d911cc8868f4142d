//! Duplicate detection for message ids.
//!
//! A Bloom filter answers "definitely new" cheaply. A positive answer is
//! confirmed against a bounded FIFO store of exact ids, so a false positive
//! never turns a fresh id into a duplicate. The oldest ids are evicted once the
//! store is full; after eviction an id is no longer recognised.
//!
//! The filter is sized for twice the exact store. Once it has absorbed that
//! many ids it is rebuilt from the store, which keeps its false-positive rate
//! near the configured target.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tempo_core::limits::DEDUP_TRACKED_MAX;
use tracing::debug;

use crate::bloom::{BloomFilter, BloomStats};
use crate::error::{StatsError, StatsResult};

/// Configuration for a duplicate detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Ids retained in the exact store.
    pub max_tracked: usize,

    /// Target Bloom filter false-positive rate.
    pub false_positive_rate: f64,
}

impl DedupConfig {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(max_tracked: usize, false_positive_rate: f64) -> Self {
        Self {
            max_tracked,
            false_positive_rate,
        }
    }

    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self::new(100, 0.01)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::InvalidConfig` if a field is out of range.
    pub fn validate(&self) -> StatsResult<()> {
        if self.max_tracked == 0 || self.max_tracked > DEDUP_TRACKED_MAX {
            return Err(StatsError::InvalidConfig {
                message: format!(
                    "max_tracked {} must be in [1, {DEDUP_TRACKED_MAX}]",
                    self.max_tracked
                ),
            });
        }
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(StatsError::InvalidConfig {
                message: format!(
                    "false_positive_rate {} must be in (0, 1)",
                    self.false_positive_rate
                ),
            });
        }
        Ok(())
    }

    const fn filter_capacity(&self) -> usize {
        self.max_tracked.saturating_mul(2)
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self::new(100_000, 0.01)
    }
}

/// Duplicate detector statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DedupStats {
    /// Ids checked.
    pub checked: u64,
    /// Ids reported as duplicates.
    pub duplicates: u64,
    /// Filter hits not confirmed by the exact store.
    pub false_positives: u64,
    /// Ids evicted from the exact store.
    pub evictions: u64,
    /// Filter rebuilds.
    pub rebuilds: u64,
    /// Ids currently retained.
    pub tracked: usize,
    /// Filter statistics.
    pub filter: BloomStats,
}

/// Bloom-fronted duplicate detector with a bounded exact store.
#[derive(Debug, Clone)]
pub struct DuplicateDetector {
    config: DedupConfig,
    filter: BloomFilter,
    exact: HashSet<String>,
    order: VecDeque<String>,
    filter_items: usize,
    checked: u64,
    duplicates: u64,
    false_positives: u64,
    evictions: u64,
    rebuilds: u64,
}

impl DuplicateDetector {
    /// Creates a detector.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: DedupConfig) -> StatsResult<Self> {
        config.validate()?;
        Ok(Self {
            filter: BloomFilter::with_capacity(config.filter_capacity(), config.false_positive_rate)?,
            exact: HashSet::with_capacity(config.max_tracked),
            order: VecDeque::with_capacity(config.max_tracked),
            config,
            filter_items: 0,
            checked: 0,
            duplicates: 0,
            false_positives: 0,
            evictions: 0,
            rebuilds: 0,
        })
    }

    /// Returns true if `id` was seen before (and is still retained); otherwise
    /// records it and returns false.
    pub fn check_and_add(&mut self, id: &str) -> bool {
        self.checked += 1;

        if self.filter.test(id) {
            if self.exact.contains(id) {
                self.duplicates += 1;
                return true;
            }
            self.false_positives += 1;
        }

        self.track(id);
        false
    }

    /// Returns true if `id` is retained, without recording it.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.filter.test(id) && self.exact.contains(id)
    }

    /// Returns detector statistics.
    #[must_use]
    pub fn stats(&self) -> DedupStats {
        DedupStats {
            checked: self.checked,
            duplicates: self.duplicates,
            false_positives: self.false_positives,
            evictions: self.evictions,
            rebuilds: self.rebuilds,
            tracked: self.exact.len(),
            filter: self.filter.stats(),
        }
    }

    /// Forgets every id.
    pub fn clear(&mut self) {
        self.filter.clear();
        self.exact.clear();
        self.order.clear();
        self.filter_items = 0;
        self.checked = 0;
        self.duplicates = 0;
        self.false_positives = 0;
        self.evictions = 0;
        self.rebuilds = 0;
    }

    fn track(&mut self, id: &str) {
        if self.order.len() >= self.config.max_tracked {
            if let Some(oldest) = self.order.pop_front() {
                self.exact.remove(&oldest);
                self.evictions += 1;
            }
        }
        self.exact.insert(id.to_owned());
        self.order.push_back(id.to_owned());

        self.filter.add(id);
        self.filter_items += 1;
        if self.filter_items >= self.config.filter_capacity() {
            self.rebuild_filter();
        }
    }

    fn rebuild_filter(&mut self) {
        self.filter.clear();
        for id in &self.order {
            self.filter.add(id);
        }
        self.filter_items = self.order.len();
        self.rebuilds += 1;
        debug!(
            retained = self.filter_items,
            rebuilds = self.rebuilds,
            "Duplicate filter rebuilt from exact store"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> DuplicateDetector {
        DuplicateDetector::new(DedupConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_first_sighting_is_new() {
        let mut d = detector();
        assert!(!d.check_and_add("msg-1"));
        assert!(d.check_and_add("msg-1"));
        assert!(d.contains("msg-1"));
        assert!(!d.contains("msg-2"));

        let stats = d.stats();
        assert_eq!(stats.checked, 2);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.tracked, 1);
    }

    #[test]
    fn test_oldest_ids_evicted() {
        let mut d = detector();
        for i in 0..150 {
            assert!(!d.check_and_add(&format!("msg-{i}")));
        }
        let stats = d.stats();
        assert_eq!(stats.tracked, 100);
        assert_eq!(stats.evictions, 50);

        assert!(!d.contains("msg-0"));
        assert!(d.contains("msg-149"));
        // An evicted id is treated as new again.
        assert!(!d.check_and_add("msg-0"));
    }

    #[test]
    fn test_filter_rebuilt_after_capacity() {
        let mut d = detector();
        for i in 0..200 {
            d.check_and_add(&format!("msg-{i}"));
        }
        let stats = d.stats();
        assert_eq!(stats.rebuilds, 1);
        assert_eq!(stats.filter.items_added, 100);

        // Retained ids survive the rebuild.
        for i in 100..200 {
            assert!(d.check_and_add(&format!("msg-{i}")), "msg-{i} lost");
        }
    }

    #[test]
    fn test_fresh_ids_never_duplicates() {
        let mut d = detector();
        for i in 0..10_000 {
            assert!(!d.check_and_add(&format!("unique-{i}")));
        }
        assert_eq!(d.stats().duplicates, 0);
    }

    #[test]
    fn test_clear() {
        let mut d = detector();
        d.check_and_add("a");
        d.clear();
        assert!(!d.contains("a"));
        assert_eq!(d.stats().tracked, 0);
        assert!(!d.check_and_add("a"));
    }

    #[test]
    fn test_invalid_config() {
        assert!(DuplicateDetector::new(DedupConfig::new(0, 0.01)).is_err());
        assert!(DuplicateDetector::new(DedupConfig::new(10, 1.5)).is_err());
    }
}
