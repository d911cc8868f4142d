//! Labeled metrics collector.
//!
//! Each `(name, labels)` pair owns one series: an EWMA for anomaly detection
//! and a t-digest for percentiles. Labels are sorted into a [`MetricKey`], so
//! label order at the call site does not matter.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tempo_core::limits::METRIC_SERIES_MAX;
use tempo_core::{CoreResult, ListenerId, Listeners};
use tracing::{debug, warn};

use crate::error::{StatsError, StatsResult};
use crate::ewma::{AnomalyVerdict, Ewma, EwmaConfig, EwmaStats};
use crate::tdigest::{Percentiles, TDigest};

/// Identity of a metric series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MetricKey {
    name: String,
    labels: BTreeMap<String, String>,
}

impl MetricKey {
    /// Creates a key; label order is irrelevant.
    #[must_use]
    pub fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_owned(),
            labels: labels
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        }
    }

    /// Returns the metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the labels, sorted by key.
    #[must_use]
    pub const fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.labels.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (i, (k, v)) in self.labels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

/// Configuration for a metrics collector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// EWMA settings for every series.
    pub ewma: EwmaConfig,

    /// T-digest compression for every series.
    pub compression: f64,

    /// Maximum number of series.
    pub max_series: usize,
}

impl CollectorConfig {
    /// Creates a configuration for testing.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            ewma: EwmaConfig::for_testing(),
            compression: 100.0,
            max_series: 10,
        }
    }

    /// Sets the series limit.
    #[must_use]
    pub const fn with_max_series(mut self, max_series: usize) -> Self {
        self.max_series = max_series;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::InvalidConfig` if a field is out of range.
    pub fn validate(&self) -> StatsResult<()> {
        self.ewma.validate()?;
        TDigest::new(self.compression)?;
        if self.max_series == 0 || self.max_series > METRIC_SERIES_MAX {
            return Err(StatsError::InvalidConfig {
                message: format!(
                    "max_series {} must be in [1, {METRIC_SERIES_MAX}]",
                    self.max_series
                ),
            });
        }
        Ok(())
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            ewma: EwmaConfig::default(),
            compression: TDigest::DEFAULT_COMPRESSION,
            max_series: 1_000,
        }
    }
}

/// Events emitted by the collector.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    /// A sample exceeded its series' anomaly threshold.
    Anomaly {
        /// Series the sample belongs to.
        key: MetricKey,
        /// The sample.
        value: f64,
        /// Distance from the mean in standard deviations.
        z_score: f64,
        /// Series mean before the sample.
        mean: f64,
    },
}

/// Point-in-time view of one series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSnapshot {
    /// Series identity.
    pub key: MetricKey,
    /// Most recent sample.
    pub last: f64,
    /// EWMA statistics.
    pub ewma: EwmaStats,
    /// Percentiles.
    pub percentiles: Percentiles,
}

#[derive(Debug)]
struct Series {
    ewma: Ewma,
    digest: TDigest,
    last: f64,
}

/// Collector of labeled metric series.
#[derive(Debug)]
pub struct MetricsCollector {
    config: CollectorConfig,
    series: HashMap<MetricKey, Series>,
    listeners: Listeners<MetricEvent>,
}

impl MetricsCollector {
    /// Creates a collector.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: CollectorConfig) -> StatsResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            series: HashMap::new(),
            listeners: Listeners::new(),
        })
    }

    /// Records a sample into the `(name, labels)` series, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::NonFinite` for a non-finite sample and
    /// `StatsError::SeriesLimit` if a new series would exceed `max_series`.
    pub fn record(
        &mut self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> StatsResult<AnomalyVerdict> {
        if !value.is_finite() {
            return Err(StatsError::NonFinite { value });
        }
        let key = MetricKey::new(name, labels);
        let max_series = self.config.max_series;
        let series_count = self.series.len();

        let series = match self.series.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if series_count >= max_series {
                    warn!(key = %key, max = max_series, "Metric series limit reached");
                    return Err(StatsError::SeriesLimit { max: max_series });
                }
                debug!(key = %key, "Metric series created");
                entry.insert(Series {
                    ewma: Ewma::new(self.config.ewma)?,
                    digest: TDigest::new(self.config.compression)?,
                    last: value,
                })
            }
        };
        let mean = series.ewma.stats().mean;
        let verdict = series.ewma.record(value)?;
        series.digest.add(value, 1.0)?;
        series.last = value;

        if verdict.is_anomaly {
            debug!(key = %key, value, z_score = verdict.z_score, "Metric anomaly");
            self.listeners.emit(&MetricEvent::Anomaly {
                key,
                value,
                z_score: verdict.z_score,
                mean,
            });
        }
        Ok(verdict)
    }

    /// Returns a snapshot of one series.
    #[must_use]
    pub fn snapshot(&self, name: &str, labels: &[(&str, &str)]) -> Option<MetricSnapshot> {
        let key = MetricKey::new(name, labels);
        let series = self.series.get(&key)?;
        Some(MetricSnapshot {
            last: series.last,
            ewma: series.ewma.stats(),
            percentiles: series.digest.percentiles(),
            key,
        })
    }

    /// Returns the percentiles of one series.
    #[must_use]
    pub fn percentiles(&self, name: &str, labels: &[(&str, &str)]) -> Option<Percentiles> {
        self.series
            .get(&MetricKey::new(name, labels))
            .map(|s| s.digest.percentiles())
    }

    /// Returns every series key, sorted.
    #[must_use]
    pub fn series(&self) -> Vec<MetricKey> {
        let mut keys: Vec<_> = self.series.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drops one series. Returns true if it existed.
    pub fn remove(&mut self, name: &str, labels: &[(&str, &str)]) -> bool {
        self.series.remove(&MetricKey::new(name, labels)).is_some()
    }

    /// Drops every series.
    pub fn reset(&mut self) {
        self.series.clear();
    }

    /// Registers an observer for anomaly events.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener limit is reached.
    pub fn subscribe<F>(&mut self, listener: F) -> CoreResult<ListenerId>
    where
        F: FnMut(&MetricEvent) + Send + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Removes an observer.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}
