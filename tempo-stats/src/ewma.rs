//! Exponentially weighted moving average with anomaly detection.
//!
//! Each sample updates an exponentially weighted mean and variance:
//!
//! ```text
//! diff      = x - mean
//! mean     += alpha * diff
//! variance  = (1 - alpha) * (variance + alpha * diff²)
//! ```
//!
//! A sample is anomalous when `|diff| / σ` exceeds the threshold, with σ taken
//! from the variance *before* the sample is folded in.

use serde::{Deserialize, Serialize};

use crate::error::{StatsError, StatsResult};

/// Configuration for an EWMA tracker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EwmaConfig {
    /// Smoothing factor in `(0, 1]`. Larger values react faster.
    pub alpha: f64,

    /// Z-score above which a sample is anomalous.
    pub threshold: f64,
}

impl EwmaConfig {
    /// Creates a configuration.
    #[must_use]
    pub const fn new(alpha: f64, threshold: f64) -> Self {
        Self { alpha, threshold }
    }

    /// Creates a configuration for testing: fast smoothing, 3σ threshold.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self::new(0.5, 3.0)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::InvalidConfig` if alpha is outside `(0, 1]` or the
    /// threshold is not positive.
    pub fn validate(&self) -> StatsResult<()> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(StatsError::InvalidConfig {
                message: format!("alpha {} must be in (0, 1]", self.alpha),
            });
        }
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            return Err(StatsError::InvalidConfig {
                message: format!("threshold {} must be positive", self.threshold),
            });
        }
        Ok(())
    }
}

impl Default for EwmaConfig {
    fn default() -> Self {
        Self::new(0.1, 3.0)
    }
}

/// Result of recording a sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnomalyVerdict {
    /// Whether the z-score exceeded the threshold.
    pub is_anomaly: bool,
    /// Distance from the mean in standard deviations.
    pub z_score: f64,
}

/// A ±2σ band around the current mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Prediction {
    /// `mean - 2σ`.
    pub low: f64,
    /// The mean.
    pub mid: f64,
    /// `mean + 2σ`.
    pub high: f64,
}

/// EWMA statistics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EwmaStats {
    /// Smoothed mean.
    pub mean: f64,
    /// Smoothed variance.
    pub variance: f64,
    /// Square root of the variance.
    pub std_dev: f64,
    /// Samples recorded.
    pub count: u64,
    /// Samples flagged anomalous.
    pub anomalies: u64,
}

/// EWMA mean/variance tracker.
#[derive(Debug, Clone)]
pub struct Ewma {
    config: EwmaConfig,
    mean: f64,
    variance: f64,
    count: u64,
    anomalies: u64,
}

impl Ewma {
    /// Creates a tracker.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: EwmaConfig) -> StatsResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            mean: 0.0,
            variance: 0.0,
            count: 0,
            anomalies: 0,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &EwmaConfig {
        &self.config
    }

    /// Records a sample. The first sample seeds the mean and is never anomalous.
    ///
    /// # Errors
    ///
    /// Returns `StatsError::NonFinite` for NaN or infinite samples; state is
    /// unchanged.
    pub fn record(&mut self, value: f64) -> StatsResult<AnomalyVerdict> {
        if !value.is_finite() {
            return Err(StatsError::NonFinite { value });
        }

        if self.count == 0 {
            self.mean = value;
            self.variance = 0.0;
            self.count = 1;
            return Ok(AnomalyVerdict {
                is_anomaly: false,
                z_score: 0.0,
            });
        }

        let verdict = self.verdict(value);
        let alpha = self.config.alpha;
        let diff = value - self.mean;
        self.mean = alpha.mul_add(diff, self.mean);
        self.variance = (1.0 - alpha) * (alpha * diff).mul_add(diff, self.variance);
        self.count += 1;
        if verdict.is_anomaly {
            self.anomalies += 1;
        }
        Ok(verdict)
    }

    /// Returns whether `value` would be flagged, without recording it.
    #[must_use]
    pub fn is_anomalous(&self, value: f64) -> bool {
        value.is_finite() && self.count > 0 && self.verdict(value).is_anomaly
    }

    /// Returns a ±2σ band around the current mean.
    #[must_use]
    pub fn predict(&self) -> Prediction {
        let spread = 2.0 * self.variance.sqrt();
        Prediction {
            low: self.mean - spread,
            mid: self.mean,
            high: self.mean + spread,
        }
    }

    /// Returns current statistics.
    #[must_use]
    pub fn stats(&self) -> EwmaStats {
        EwmaStats {
            mean: self.mean,
            variance: self.variance,
            std_dev: self.variance.sqrt(),
            count: self.count,
            anomalies: self.anomalies,
        }
    }

    /// Forgets all samples.
    pub fn reset(&mut self) {
        self.mean = 0.0;
        self.variance = 0.0;
        self.count = 0;
        self.anomalies = 0;
    }

    fn verdict(&self, value: f64) -> AnomalyVerdict {
        let z_score = if self.variance > 0.0 {
            (value - self.mean).abs() / self.variance.sqrt()
        } else {
            0.0
        };
        AnomalyVerdict {
            is_anomaly: z_score > self.config.threshold,
            z_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ewma() -> Ewma {
        Ewma::new(EwmaConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_first_sample_seeds() {
        let mut e = ewma();
        let verdict = e.record(1_000.0).unwrap();
        assert!(!verdict.is_anomaly);
        assert_eq!(verdict.z_score, 0.0);
        assert_eq!(e.stats().mean, 1_000.0);
        assert_eq!(e.stats().variance, 0.0);
    }

    #[test]
    fn test_update_rule() {
        let mut e = ewma();
        e.record(10.0).unwrap();
        e.record(12.0).unwrap();
        // diff 2: mean 11, variance 0.5 * (0 + 0.5 * 4) = 1.
        let stats = e.stats();
        assert!((stats.mean - 11.0).abs() < 1e-12);
        assert!((stats.variance - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_variance_never_anomalous() {
        let mut e = ewma();
        e.record(10.0).unwrap();
        e.record(10.0).unwrap();
        let verdict = e.record(1_000_000.0).unwrap();
        assert!(!verdict.is_anomaly);
        assert_eq!(verdict.z_score, 0.0);
    }

    #[test]
    fn test_spike_flagged() {
        let mut e = ewma();
        e.record(10.0).unwrap();
        e.record(12.0).unwrap(); // mean 11, σ 1.

        assert!(e.is_anomalous(20.0));
        assert!(!e.is_anomalous(12.0));

        let verdict = e.record(20.0).unwrap();
        assert!(verdict.is_anomaly);
        assert!((verdict.z_score - 9.0).abs() < 1e-12);
        assert_eq!(e.stats().anomalies, 1);
    }

    #[test]
    fn test_predict_band() {
        let mut e = ewma();
        e.record(10.0).unwrap();
        e.record(12.0).unwrap();

        let p = e.predict();
        assert!((p.mid - 11.0).abs() < 1e-12);
        assert!((p.low - 9.0).abs() < 1e-12);
        assert!((p.high - 13.0).abs() < 1e-12);
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut e = ewma();
        e.record(5.0).unwrap();
        assert!(matches!(e.record(f64::NAN), Err(StatsError::NonFinite { .. })));
        assert!(!e.is_anomalous(f64::INFINITY));
        assert_eq!(e.stats().count, 1);
    }

    #[test]
    fn test_reset() {
        let mut e = ewma();
        e.record(5.0).unwrap();
        e.record(7.0).unwrap();
        e.reset();
        assert_eq!(e.stats().count, 0);
        assert!(!e.record(100.0).unwrap().is_anomaly);
    }

    #[test]
    fn test_invalid_config() {
        assert!(Ewma::new(EwmaConfig::new(0.0, 3.0)).is_err());
        assert!(Ewma::new(EwmaConfig::new(1.5, 3.0)).is_err());
        assert!(Ewma::new(EwmaConfig::new(0.5, 0.0)).is_err());
    }
}
