//! Adaptive PID concurrency controller.
//!
//! The controller turns latency samples into a concurrency limit. With
//! `error = target - latency`:
//!
//! - **Proportional**: `kp * error` reacts to the current deviation.
//! - **Integral**: `ki * sum(error)`, clamped to `±integral_limit` so a long
//!   overload cannot wind the integral up without bound.
//! - **Derivative**: `kd * (error - last_error)` damps fast swings.
//!
//! The sum of the three terms is added to the current concurrency, rounded, and
//! clamped to `[min_concurrency, max_concurrency]`.
//!
//! # Auto-tune
//!
//! [`PidController::start_auto_tune`] runs a simplified Ziegler–Nichols search:
//! with `ki = kd = 0`, `kp` grows geometrically while latency stays near target
//! until the error changes sign. That gain is the critical gain `Ku`. The next
//! `period_samples` errors give the critical period `Tu` (samples per local
//! maximum), and the final gains come from the classic table:
//! `kp = 0.6 Ku`, `ki = 1.2 Ku / Tu`, `kd = 0.075 Ku Tu`.
//!
//! A run that does not finish within `max_samples` samples restores the gains
//! in effect before it started.

use serde::{Deserialize, Serialize};
use tempo_core::limits::TUNING_SAMPLES_MAX;
use tempo_core::{CoreResult, ListenerId, Listeners};
use tracing::{debug, info, warn};

use crate::error::{FlowError, FlowResult};

/// Proportional, integral and derivative gains.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain.
    pub kp: f64,
    /// Integral gain.
    pub ki: f64,
    /// Derivative gain.
    pub kd: f64,
}

/// Auto-tune parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutoTuneConfig {
    /// Proportional gain the search starts from.
    pub initial_gain: f64,

    /// Factor applied to the gain after each near-target sample (> 1).
    pub gain_step: f64,

    /// Latency counts as near target when `|error| <= band * target`.
    pub band: f64,

    /// Error samples used to estimate the critical period.
    pub period_samples: u32,

    /// Samples after which an unfinished run is abandoned.
    pub max_samples: u32,
}

impl Default for AutoTuneConfig {
    fn default() -> Self {
        Self {
            initial_gain: 0.01,
            gain_step: 1.5,
            band: 0.2,
            period_samples: 10,
            max_samples: 200,
        }
    }
}

/// Configuration for the PID controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidConfig {
    /// Controller gains.
    pub gains: PidGains,

    /// Latency the controller steers toward (milliseconds).
    pub target_latency_ms: f64,

    /// Lower concurrency bound.
    pub min_concurrency: u32,

    /// Upper concurrency bound.
    pub max_concurrency: u32,

    /// Concurrency at construction and after `reset`.
    pub initial_concurrency: u32,

    /// Anti-windup bound on the accumulated error.
    pub integral_limit: f64,

    /// Auto-tune parameters.
    pub auto_tune: AutoTuneConfig,
}

impl PidConfig {
    /// Creates a configuration steering toward `target_latency_ms`.
    #[must_use]
    pub fn new(target_latency_ms: f64, min_concurrency: u32, max_concurrency: u32) -> Self {
        Self {
            gains: PidGains {
                kp: 0.05,
                ki: 0.01,
                kd: 0.02,
            },
            target_latency_ms,
            min_concurrency,
            max_concurrency,
            initial_concurrency: min_concurrency,
            integral_limit: 100.0,
            auto_tune: AutoTuneConfig::default(),
        }
    }

    /// Sets the gains.
    #[must_use]
    pub const fn with_gains(mut self, kp: f64, ki: f64, kd: f64) -> Self {
        self.gains = PidGains { kp, ki, kd };
        self
    }

    /// Sets the initial concurrency.
    #[must_use]
    pub const fn with_initial_concurrency(mut self, concurrency: u32) -> Self {
        self.initial_concurrency = concurrency;
        self
    }

    /// Sets the integral limit.
    #[must_use]
    pub const fn with_integral_limit(mut self, limit: f64) -> Self {
        self.integral_limit = limit;
        self
    }

    /// Sets the auto-tune parameters.
    #[must_use]
    pub const fn with_auto_tune(mut self, auto_tune: AutoTuneConfig) -> Self {
        self.auto_tune = auto_tune;
        self
    }

    /// Creates a configuration for testing: P-only, target 100ms, bounds 1..=50.
    #[must_use]
    pub fn for_testing() -> Self {
        Self::new(100.0, 1, 50)
            .with_gains(0.1, 0.0, 0.0)
            .with_initial_concurrency(10)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` describing the first invalid field.
    pub fn validate(&self) -> FlowResult<()> {
        let invalid = |message: String| Err(FlowError::InvalidConfig { message });

        let PidGains { kp, ki, kd } = self.gains;
        if ![kp, ki, kd].iter().all(|g| g.is_finite() && *g >= 0.0) {
            return invalid(format!("gains must be finite and non-negative: {:?}", self.gains));
        }
        if !(self.target_latency_ms.is_finite() && self.target_latency_ms > 0.0) {
            return invalid(format!(
                "target_latency_ms {} must be positive",
                self.target_latency_ms
            ));
        }
        if self.min_concurrency == 0 || self.min_concurrency > self.max_concurrency {
            return invalid(format!(
                "concurrency bounds [{}, {}] must satisfy 1 <= min <= max",
                self.min_concurrency, self.max_concurrency
            ));
        }
        if !(self.integral_limit.is_finite() && self.integral_limit >= 0.0) {
            return invalid(format!(
                "integral_limit {} must be finite and non-negative",
                self.integral_limit
            ));
        }
        let tune = &self.auto_tune;
        if !(tune.initial_gain.is_finite() && tune.initial_gain > 0.0) {
            return invalid(format!("auto_tune.initial_gain {} must be positive", tune.initial_gain));
        }
        if !(tune.gain_step.is_finite() && tune.gain_step > 1.0) {
            return invalid(format!("auto_tune.gain_step {} must exceed 1", tune.gain_step));
        }
        if !(tune.band.is_finite() && tune.band > 0.0) {
            return invalid(format!("auto_tune.band {} must be positive", tune.band));
        }
        if tune.period_samples < 3 {
            return invalid(format!(
                "auto_tune.period_samples {} must be at least 3",
                tune.period_samples
            ));
        }
        if tune.max_samples <= tune.period_samples || tune.max_samples > TUNING_SAMPLES_MAX {
            return invalid(format!(
                "auto_tune.max_samples {} must be in ({}, {TUNING_SAMPLES_MAX}]",
                tune.max_samples, tune.period_samples
            ));
        }
        Ok(())
    }
}

impl Default for PidConfig {
    fn default() -> Self {
        Self::new(100.0, 1, 100).with_initial_concurrency(10)
    }
}

/// Partial configuration for [`PidController::update_config`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidConfigUpdate {
    /// New proportional gain.
    pub kp: Option<f64>,
    /// New integral gain.
    pub ki: Option<f64>,
    /// New derivative gain.
    pub kd: Option<f64>,
    /// New target latency.
    pub target_latency_ms: Option<f64>,
    /// New lower bound.
    pub min_concurrency: Option<u32>,
    /// New upper bound.
    pub max_concurrency: Option<u32>,
    /// New integral limit.
    pub integral_limit: Option<f64>,
}

/// Auto-tune progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TuningPhase {
    /// No run in progress.
    Idle,
    /// Growing `kp` until the error oscillates.
    SearchingGain,
    /// Sampling the oscillation to estimate its period.
    MeasuringPeriod,
}

/// Events emitted by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum PidEvent {
    /// A sample adjusted (or confirmed) the concurrency.
    Adjusted {
        /// `target - latency`.
        error: f64,
        /// Proportional term.
        proportional: f64,
        /// Integral term.
        integral: f64,
        /// Derivative term.
        derivative: f64,
        /// Resulting concurrency.
        concurrency: u32,
    },
    /// An auto-tune run started.
    TuningStarted {
        /// Gains that will be restored if the run fails.
        prior: PidGains,
    },
    /// An auto-tune run finished and installed new gains.
    TuningCompleted {
        /// Critical gain.
        ku: f64,
        /// Critical period, in samples.
        tu: f64,
        /// Installed gains.
        gains: PidGains,
    },
    /// An auto-tune run was abandoned; prior gains are back in effect.
    TuningFailed {
        /// Samples consumed by the run.
        samples: u32,
    },
}

/// Snapshot of controller state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PidState {
    /// Accumulated (clamped) error.
    pub integral: f64,
    /// Error of the previous sample, if any.
    pub last_error: Option<f64>,
    /// Current concurrency.
    pub concurrency: u32,
    /// Gains in effect.
    pub gains: PidGains,
    /// Auto-tune phase.
    pub tuning: TuningPhase,
    /// Samples processed since construction or reset.
    pub samples: u64,
}

/// State of an active auto-tune run.
#[derive(Debug, Clone)]
struct AutoTune {
    phase: TuningPhase,
    prior: PidGains,
    samples: u32,
    last_error: Option<f64>,
    critical_gain: f64,
    history: Vec<f64>,
}

/// PID controller producing a concurrency limit from latency samples.
#[derive(Debug)]
pub struct PidController {
    config: PidConfig,
    integral: f64,
    last_error: Option<f64>,
    concurrency: u32,
    samples: u64,
    tuning: Option<AutoTune>,
    listeners: Listeners<PidEvent>,
}

impl PidController {
    /// Creates a controller.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: PidConfig) -> FlowResult<Self> {
        config.validate()?;
        let concurrency = config
            .initial_concurrency
            .clamp(config.min_concurrency, config.max_concurrency);
        Ok(Self {
            config,
            integral: 0.0,
            last_error: None,
            concurrency,
            samples: 0,
            tuning: None,
            listeners: Listeners::new(),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PidConfig {
        &self.config
    }

    /// Returns the current concurrency.
    #[must_use]
    pub const fn concurrency(&self) -> u32 {
        self.concurrency
    }

    /// Returns the current tuning phase.
    #[must_use]
    pub fn tuning_phase(&self) -> TuningPhase {
        self.tuning.as_ref().map_or(TuningPhase::Idle, |t| t.phase)
    }

    /// Feeds a latency sample and returns the new concurrency.
    ///
    /// While auto-tune is running the sample is routed to
    /// [`PidController::record_tuning_sample`]. Non-finite samples are ignored.
    pub fn calculate(&mut self, latency_ms: f64) -> u32 {
        if self.tuning.is_some() {
            return self.record_tuning_sample(latency_ms);
        }
        self.step(latency_ms)
    }

    /// Starts an auto-tune run.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::TuningInProgress` if a run is already active.
    pub fn start_auto_tune(&mut self) -> FlowResult<()> {
        if self.tuning.is_some() {
            return Err(FlowError::TuningInProgress);
        }
        let prior = self.config.gains;
        self.config.gains = PidGains {
            kp: self.config.auto_tune.initial_gain,
            ki: 0.0,
            kd: 0.0,
        };
        self.integral = 0.0;
        self.tuning = Some(AutoTune {
            phase: TuningPhase::SearchingGain,
            prior,
            samples: 0,
            last_error: None,
            critical_gain: 0.0,
            history: Vec::with_capacity(self.config.auto_tune.period_samples as usize),
        });
        info!(?prior, "PID auto-tune started");
        self.listeners.emit(&PidEvent::TuningStarted { prior });
        Ok(())
    }

    /// Feeds a latency sample to an active auto-tune run and returns the new
    /// concurrency. Without an active run this behaves like `calculate`.
    pub fn record_tuning_sample(&mut self, latency_ms: f64) -> u32 {
        let Some(mut tune) = self.tuning.take() else {
            return self.step(latency_ms);
        };
        if !latency_ms.is_finite() {
            warn!(latency_ms, "Ignoring non-finite tuning sample");
            self.tuning = Some(tune);
            return self.concurrency;
        }

        let concurrency = self.step(latency_ms);
        let error = self.config.target_latency_ms - latency_ms;
        tune.samples += 1;
        let settings = self.config.auto_tune;

        match tune.phase {
            TuningPhase::SearchingGain => {
                let flipped = tune
                    .last_error
                    .is_some_and(|last| last * error < 0.0);
                if flipped {
                    tune.critical_gain = self.config.gains.kp;
                    tune.phase = TuningPhase::MeasuringPeriod;
                    tune.history.push(error);
                    debug!(ku = tune.critical_gain, "Oscillation detected");
                } else if error.abs() <= settings.band * self.config.target_latency_ms {
                    self.config.gains.kp *= settings.gain_step;
                }
                if error != 0.0 {
                    tune.last_error = Some(error);
                }
            }
            TuningPhase::MeasuringPeriod => tune.history.push(error),
            TuningPhase::Idle => {}
        }

        if tune.phase == TuningPhase::MeasuringPeriod
            && tune.history.len() >= settings.period_samples as usize
        {
            self.finish_tuning(&tune);
        } else if tune.samples >= settings.max_samples {
            self.fail_tuning(&tune);
        } else {
            self.tuning = Some(tune);
        }
        concurrency
    }

    /// Returns a snapshot of controller state.
    #[must_use]
    pub fn state(&self) -> PidState {
        PidState {
            integral: self.integral,
            last_error: self.last_error,
            concurrency: self.concurrency,
            gains: self.config.gains,
            tuning: self.tuning_phase(),
            samples: self.samples,
        }
    }

    /// Clears accumulated state and returns to the initial concurrency.
    /// An active auto-tune run is abandoned and its prior gains restored.
    pub fn reset(&mut self) {
        if let Some(tune) = self.tuning.take() {
            self.config.gains = tune.prior;
        }
        self.integral = 0.0;
        self.last_error = None;
        self.samples = 0;
        self.concurrency = self
            .config
            .initial_concurrency
            .clamp(self.config.min_concurrency, self.config.max_concurrency);
    }

    /// Applies a partial configuration. The current concurrency is clamped to
    /// the new bounds.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::TuningInProgress` if the update sets a gain while
    /// auto-tune owns the gains, and `FlowError::InvalidConfig` if the merged
    /// configuration is invalid. Nothing changes in either case.
    pub fn update_config(&mut self, update: PidConfigUpdate) -> FlowResult<()> {
        let sets_gains = update.kp.is_some() || update.ki.is_some() || update.kd.is_some();
        if sets_gains && self.tuning.is_some() {
            warn!(?update, "Gain update rejected during auto-tune");
            return Err(FlowError::TuningInProgress);
        }
        let mut candidate = self.config.clone();
        if let Some(kp) = update.kp {
            candidate.gains.kp = kp;
        }
        if let Some(ki) = update.ki {
            candidate.gains.ki = ki;
        }
        if let Some(kd) = update.kd {
            candidate.gains.kd = kd;
        }
        if let Some(target) = update.target_latency_ms {
            candidate.target_latency_ms = target;
        }
        if let Some(min) = update.min_concurrency {
            candidate.min_concurrency = min;
        }
        if let Some(max) = update.max_concurrency {
            candidate.max_concurrency = max;
        }
        if let Some(limit) = update.integral_limit {
            candidate.integral_limit = limit;
        }
        candidate.validate()?;

        self.config = candidate;
        self.integral = self
            .integral
            .clamp(-self.config.integral_limit, self.config.integral_limit);
        self.concurrency = self
            .concurrency
            .clamp(self.config.min_concurrency, self.config.max_concurrency);
        debug!(?update, concurrency = self.concurrency, "PID config updated");
        Ok(())
    }

    /// Registers an observer for controller events.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener limit is reached.
    pub fn subscribe<F>(&mut self, listener: F) -> CoreResult<ListenerId>
    where
        F: FnMut(&PidEvent) + Send + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Removes an observer.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// One PID iteration with the gains currently in effect.
    fn step(&mut self, latency_ms: f64) -> u32 {
        if !latency_ms.is_finite() {
            warn!(latency_ms, "Ignoring non-finite latency sample");
            return self.concurrency;
        }
        let PidGains { kp, ki, kd } = self.config.gains;
        let limit = self.config.integral_limit;

        let error = self.config.target_latency_ms - latency_ms;
        self.integral = (self.integral + error).clamp(-limit, limit);
        let derivative = self.last_error.map_or(0.0, |last| error - last);
        self.last_error = Some(error);
        self.samples += 1;

        let proportional = kp * error;
        let integral = ki * self.integral;
        let derivative = kd * derivative;
        let adjusted = (f64::from(self.concurrency) + proportional + integral + derivative).round();

        let min = f64::from(self.config.min_concurrency);
        let max = f64::from(self.config.max_concurrency);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Clamped to u32 bounds.
        let concurrency = adjusted.clamp(min, max) as u32;
        self.concurrency = concurrency;

        self.listeners.emit(&PidEvent::Adjusted {
            error,
            proportional,
            integral,
            derivative,
            concurrency,
        });
        concurrency
    }

    fn finish_tuning(&mut self, tune: &AutoTune) {
        let history = &tune.history;
        let peaks = history
            .windows(3)
            .filter(|w| w[1] > w[0] && w[1] >= w[2])
            .count();
        if peaks == 0 {
            self.fail_tuning(tune);
            return;
        }

        #[allow(clippy::cast_precision_loss)] // Sample counts are small.
        let tu = history.len() as f64 / peaks as f64;
        let ku = tune.critical_gain;
        let gains = PidGains {
            kp: 0.6 * ku,
            ki: 1.2 * ku / tu,
            kd: 0.075 * ku * tu,
        };
        self.config.gains = gains;
        self.integral = 0.0;
        info!(ku, tu, ?gains, samples = tune.samples, "PID auto-tune completed");
        self.listeners.emit(&PidEvent::TuningCompleted { ku, tu, gains });
    }

    fn fail_tuning(&mut self, tune: &AutoTune) {
        self.config.gains = tune.prior;
        self.integral = 0.0;
        warn!(samples = tune.samples, "PID auto-tune did not converge; prior gains restored");
        self.listeners.emit(&PidEvent::TuningFailed {
            samples: tune.samples,
        });
    }
}
