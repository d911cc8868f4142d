//! T-digest for streaming percentiles.
//!
//! Centroids `(mean, weight)` are kept sorted by mean. A new value merges into
//! its nearest centroid only while the merged weight stays under
//!
//! ```text
//! cap(q) = 4 · N · q · (1 − q) / compression
//! ```
//!
//! where `q` is the centroid's quantile position. The cap shrinks toward both
//! tails, so extreme percentiles are resolved by small centroids.
//!
//! Percentiles interpolate linearly between centroid centres; below the first
//! centre the curve runs to the tracked minimum, above the last to the maximum.

use serde::Serialize;
use tempo_core::limits::{TDIGEST_COMPRESSION_MAX, TDIGEST_COMPRESSION_MIN};
use tracing::trace;

use crate::error::{StatsError, StatsResult};

/// Standard percentile set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Percentiles {
    /// 50th percentile.
    pub p50: f64,
    /// 75th percentile.
    pub p75: f64,
    /// 90th percentile.
    pub p90: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
    /// 99.9th percentile.
    pub p999: f64,
}

/// Digest statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TDigestStats {
    /// Total weight added.
    pub count: f64,
    /// Live centroids.
    pub centroids: usize,
    /// Smallest value seen.
    pub min: Option<f64>,
    /// Largest value seen.
    pub max: Option<f64>,
    /// Compression parameter.
    pub compression: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Centroid {
    mean: f64,
    weight: f64,
}

impl Centroid {
    fn absorb(&mut self, mean: f64, weight: f64) {
        self.weight += weight;
        self.mean += (mean - self.mean) * weight / self.weight;
    }
}

/// Streaming quantile estimator.
#[derive(Debug, Clone)]
pub struct TDigest {
    compression: f64,
    centroids: Vec<Centroid>,
    total_weight: f64,
    min: f64,
    max: f64,
    compress_threshold: usize,
}

impl TDigest {
    /// Default compression parameter.
    pub const DEFAULT_COMPRESSION: f64 = 100.0;

    /// Creates an empty digest.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::InvalidConfig` if `compression` is outside
    /// `[TDIGEST_COMPRESSION_MIN, TDIGEST_COMPRESSION_MAX]`.
    pub fn new(compression: f64) -> StatsResult<Self> {
        if !(TDIGEST_COMPRESSION_MIN..=TDIGEST_COMPRESSION_MAX).contains(&compression) {
            return Err(StatsError::InvalidConfig {
                message: format!(
                    "compression {compression} must be in [{TDIGEST_COMPRESSION_MIN}, {TDIGEST_COMPRESSION_MAX}]"
                ),
            });
        }
        Ok(Self {
            compression,
            centroids: Vec::new(),
            total_weight: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            compress_threshold: base_threshold(compression),
        })
    }

    /// Returns the compression parameter.
    #[must_use]
    pub const fn compression(&self) -> f64 {
        self.compression
    }

    /// Returns true if nothing has been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }

    /// Adds `value` with `weight` (use 1.0 for a single observation).
    ///
    /// # Errors
    ///
    /// Returns `StatsError::NonFinite` for a non-finite value and
    /// `StatsError::InvalidWeight` for a weight that is not positive and finite.
    pub fn add(&mut self, value: f64, weight: f64) -> StatsResult<()> {
        if !value.is_finite() {
            return Err(StatsError::NonFinite { value });
        }
        if !(weight.is_finite() && weight > 0.0) {
            return Err(StatsError::InvalidWeight { weight });
        }
        self.insert(value, weight);
        Ok(())
    }

    /// Returns the value at percentile `p` (clamped to `[0, 100]`), or `None`
    /// when empty.
    #[must_use]
    pub fn percentile(&self, p: f64) -> Option<f64> {
        if self.centroids.is_empty() || p.is_nan() {
            return None;
        }
        let target = p.clamp(0.0, 100.0) / 100.0 * self.total_weight;

        let mut prev = (0.0, self.min);
        for point in self.curve().skip(1) {
            if target <= point.0 {
                return Some(interpolate(prev, point, target));
            }
            prev = point;
        }
        Some(self.max)
    }

    /// Returns the fraction of weight at or below `value`, in `[0, 1]`, or
    /// `None` when empty.
    #[must_use]
    pub fn quantile(&self, value: f64) -> Option<f64> {
        if self.centroids.is_empty() || value.is_nan() {
            return None;
        }
        if value < self.min {
            return Some(0.0);
        }
        if value > self.max {
            return Some(1.0);
        }
        if self.min == self.max {
            return Some(0.5);
        }

        let mut prev = (0.0, self.min);
        for point in self.curve().skip(1) {
            if value <= point.1 {
                let rank = if point.1 > prev.1 {
                    prev.0 + (point.0 - prev.0) * (value - prev.1) / (point.1 - prev.1)
                } else {
                    (prev.0 + point.0) / 2.0
                };
                return Some((rank / self.total_weight).clamp(0.0, 1.0));
            }
            prev = point;
        }
        Some(1.0)
    }

    /// Returns the standard percentile set (all zero when empty).
    #[must_use]
    pub fn percentiles(&self) -> Percentiles {
        let at = |p| self.percentile(p).unwrap_or(0.0);
        Percentiles {
            p50: at(50.0),
            p75: at(75.0),
            p90: at(90.0),
            p95: at(95.0),
            p99: at(99.0),
            p999: at(99.9),
        }
    }

    /// Folds `other` into this digest, preserving total weight.
    pub fn merge(&mut self, other: &Self) {
        if other.is_empty() {
            return;
        }
        for c in &other.centroids {
            self.insert(c.mean, c.weight);
        }
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Returns digest statistics.
    #[must_use]
    pub fn stats(&self) -> TDigestStats {
        let bounds = (!self.is_empty()).then_some((self.min, self.max));
        TDigestStats {
            count: self.total_weight,
            centroids: self.centroids.len(),
            min: bounds.map(|b| b.0),
            max: bounds.map(|b| b.1),
            compression: self.compression,
        }
    }

    /// Forgets all data.
    pub fn reset(&mut self) {
        self.centroids.clear();
        self.total_weight = 0.0;
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
        self.compress_threshold = base_threshold(self.compression);
    }

    fn insert(&mut self, value: f64, weight: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.total_weight += weight;

        let idx = self.centroids.partition_point(|c| c.mean < value);
        let nearest = match (idx.checked_sub(1), self.centroids.get(idx)) {
            (Some(below), Some(above)) => {
                if value - self.centroids[below].mean <= above.mean - value {
                    Some(below)
                } else {
                    Some(idx)
                }
            }
            (Some(below), None) => Some(below),
            (None, Some(_)) => Some(idx),
            (None, None) => None,
        };

        if let Some(n) = nearest {
            let before: f64 = self.centroids[..n].iter().map(|c| c.weight).sum();
            let centroid = self.centroids[n];
            let q = (before + (centroid.weight + weight) / 2.0) / self.total_weight;
            if centroid.weight + weight <= self.cap(q) {
                self.centroids[n].absorb(value, weight);
                return;
            }
        }

        self.centroids.insert(idx, Centroid { mean: value, weight });
        if self.centroids.len() > self.compress_threshold {
            self.compress();
        }
    }

    /// Greedily re-merges adjacent centroids under the size cap.
    fn compress(&mut self) {
        let before = self.centroids.len();
        let mut merged: Vec<Centroid> = Vec::with_capacity(before);
        let mut cumulative = 0.0;

        for c in std::mem::take(&mut self.centroids) {
            if let Some(last) = merged.last_mut() {
                let q = (cumulative + (last.weight + c.weight) / 2.0) / self.total_weight;
                if last.weight + c.weight <= self.cap(q) {
                    last.absorb(c.mean, c.weight);
                    continue;
                }
                cumulative += last.weight;
            }
            merged.push(c);
        }

        self.centroids = merged;
        self.compress_threshold = base_threshold(self.compression).max(2 * self.centroids.len());
        trace!(
            before,
            after = self.centroids.len(),
            next_threshold = self.compress_threshold,
            "t-digest compressed"
        );
    }

    fn cap(&self, q: f64) -> f64 {
        4.0 * self.total_weight * q * (1.0 - q) / self.compression
    }

    /// `(cumulative rank, value)` points: min, each centroid centre, max.
    fn curve(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        let mut cumulative = 0.0;
        let centres = self.centroids.iter().map(move |c| {
            let centre = cumulative + c.weight / 2.0;
            cumulative += c.weight;
            (centre, c.mean)
        });
        std::iter::once((0.0, self.min))
            .chain(centres)
            .chain(std::iter::once((self.total_weight, self.max)))
    }
}

impl Default for TDigest {
    fn default() -> Self {
        Self {
            compression: Self::DEFAULT_COMPRESSION,
            centroids: Vec::new(),
            total_weight: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            compress_threshold: base_threshold(Self::DEFAULT_COMPRESSION),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Compression is bounded.
fn base_threshold(compression: f64) -> usize {
    (3.0 * compression) as usize
}

fn interpolate(a: (f64, f64), b: (f64, f64), x: f64) -> f64 {
    if b.0 <= a.0 {
        return b.1;
    }
    let t = ((x - a.0) / (b.0 - a.0)).clamp(0.0, 1.0);
    t.mul_add(b.1 - a.1, a.1)
}
