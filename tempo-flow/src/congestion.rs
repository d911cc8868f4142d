//! TCP-style congestion window.
//!
//! The window grows exponentially in slow start, linearly in congestion
//! avoidance, and collapses multiplicatively on failure:
//!
//! ```text
//!                cwnd >= ssthresh                 success
//!   SlowStart ─────────────────────▶ Avoidance ◀──────────── FastRecovery
//!       ▲                                │                        ▲
//!       │            failure             │     3 duplicate acks   │
//!       └────────────────────────────────┴────────────────────────┘
//! ```
//!
//! Round-trip samples feed a Jacobson/Karels estimator for the recommended
//! retransmission timeout.

use serde::{Deserialize, Serialize};
use tempo_core::{CoreResult, ListenerId, Listeners};
use tracing::{debug, warn};

use crate::error::{FlowError, FlowResult};

/// Configuration for the congestion controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CongestionConfig {
    /// Window at construction and after `reset`.
    pub initial_window: f64,

    /// Window floor. Failure drops the window here.
    pub min_window: f64,

    /// Window ceiling.
    pub max_window: f64,

    /// Slow-start threshold at construction.
    pub initial_ssthresh: f64,

    /// Multiplicative decrease factor (0 < factor < 1).
    pub decrease_factor: f64,

    /// Additive increase per window's worth of successes.
    pub increase_step: f64,

    /// Duplicate acknowledgements that trigger fast recovery.
    pub duplicate_ack_threshold: u32,

    /// Timeout before any RTT sample (milliseconds).
    pub initial_rto_ms: f64,

    /// Timeout floor (milliseconds).
    pub min_rto_ms: f64,

    /// Timeout ceiling (milliseconds).
    pub max_rto_ms: f64,
}

impl CongestionConfig {
    /// Creates a configuration with the given window bounds.
    #[must_use]
    pub const fn new(min_window: f64, max_window: f64) -> Self {
        Self {
            initial_window: min_window,
            min_window,
            max_window,
            initial_ssthresh: 64.0,
            decrease_factor: 0.5,
            increase_step: 1.0,
            duplicate_ack_threshold: 3,
            initial_rto_ms: 1_000.0,
            min_rto_ms: 200.0,
            max_rto_ms: 60_000.0,
        }
    }

    /// Sets the initial slow-start threshold.
    #[must_use]
    pub const fn with_initial_ssthresh(mut self, ssthresh: f64) -> Self {
        self.initial_ssthresh = ssthresh;
        self
    }

    /// Sets the multiplicative decrease factor.
    #[must_use]
    pub const fn with_decrease_factor(mut self, factor: f64) -> Self {
        self.decrease_factor = factor;
        self
    }

    /// Sets the timeout bounds.
    #[must_use]
    pub const fn with_rto_bounds(mut self, initial_ms: f64, min_ms: f64, max_ms: f64) -> Self {
        self.initial_rto_ms = initial_ms;
        self.min_rto_ms = min_ms;
        self.max_rto_ms = max_ms;
        self
    }

    /// Creates a configuration for testing: window 1..=100, ssthresh 16.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self::new(1.0, 100.0).with_initial_ssthresh(16.0)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` describing the first invalid field.
    pub fn validate(&self) -> FlowResult<()> {
        let invalid = |message: String| Err(FlowError::InvalidConfig { message });

        if !(self.min_window.is_finite() && self.min_window >= 1.0) {
            return invalid(format!("min_window {} must be at least 1", self.min_window));
        }
        if !(self.max_window.is_finite() && self.max_window >= self.min_window) {
            return invalid(format!(
                "max_window {} must be at least min_window {}",
                self.max_window, self.min_window
            ));
        }
        if !(self.min_window..=self.max_window).contains(&self.initial_window) {
            return invalid(format!(
                "initial_window {} must lie in [{}, {}]",
                self.initial_window, self.min_window, self.max_window
            ));
        }
        if !(self.initial_ssthresh.is_finite() && self.initial_ssthresh >= self.min_window) {
            return invalid(format!(
                "initial_ssthresh {} must be at least min_window",
                self.initial_ssthresh
            ));
        }
        if !(self.decrease_factor > 0.0 && self.decrease_factor < 1.0) {
            return invalid(format!(
                "decrease_factor {} must be in (0, 1)",
                self.decrease_factor
            ));
        }
        if !(self.increase_step.is_finite() && self.increase_step > 0.0) {
            return invalid(format!("increase_step {} must be positive", self.increase_step));
        }
        if self.duplicate_ack_threshold == 0 {
            return invalid("duplicate_ack_threshold must be at least 1".to_string());
        }
        if !(self.min_rto_ms.is_finite()
            && self.min_rto_ms > 0.0
            && self.min_rto_ms <= self.max_rto_ms
            && self.max_rto_ms.is_finite())
        {
            return invalid(format!(
                "rto bounds [{}, {}] must satisfy 0 < min <= max",
                self.min_rto_ms, self.max_rto_ms
            ));
        }
        if !(self.min_rto_ms..=self.max_rto_ms).contains(&self.initial_rto_ms) {
            return invalid(format!(
                "initial_rto_ms {} must lie within the rto bounds",
                self.initial_rto_ms
            ));
        }
        Ok(())
    }
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self::new(1.0, 1_000.0)
    }
}

/// Congestion-control phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CongestionPhase {
    /// Window doubles per success.
    SlowStart,
    /// Window grows by `increase_step / cwnd` per success.
    CongestionAvoidance,
    /// Entered on duplicate acknowledgements; each further one inflates the window.
    FastRecovery,
}

/// Why a phase transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransitionReason {
    /// Slow start reached the threshold.
    ThresholdReached,
    /// A failure collapsed the window.
    Failure,
    /// Enough duplicate acknowledgements arrived.
    DuplicateAcks,
    /// A success ended fast recovery.
    RecoveryComplete,
    /// The controller was reset.
    Reset,
}

/// Emitted on every phase transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CongestionEvent {
    /// Phase before the transition.
    pub from: CongestionPhase,
    /// Phase after the transition.
    pub to: CongestionPhase,
    /// Window after the transition.
    pub window: f64,
    /// Threshold after the transition.
    pub ssthresh: f64,
    /// Cause.
    pub reason: TransitionReason,
}

/// Snapshot of controller state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CongestionState {
    /// Congestion window.
    pub window: f64,
    /// Slow-start threshold.
    pub ssthresh: f64,
    /// Current phase.
    pub phase: CongestionPhase,
    /// Consecutive duplicate acknowledgements.
    pub duplicate_acks: u32,
    /// Smoothed RTT, once a sample has been seen.
    pub smoothed_rtt_ms: Option<f64>,
    /// RTT variance estimate.
    pub rtt_variance_ms: f64,
    /// Recommended retransmission timeout.
    pub timeout_ms: f64,
    /// Successes recorded.
    pub total_successes: u64,
    /// Failures recorded.
    pub total_failures: u64,
}

/// Jacobson/Karels smoothing weights.
const RTT_ALPHA: f64 = 0.125;
const RTT_BETA: f64 = 0.25;

/// TCP-style congestion controller.
#[derive(Debug)]
pub struct CongestionController {
    config: CongestionConfig,
    window: f64,
    ssthresh: f64,
    phase: CongestionPhase,
    duplicate_acks: u32,
    smoothed_rtt: Option<f64>,
    rtt_variance: f64,
    total_successes: u64,
    total_failures: u64,
    listeners: Listeners<CongestionEvent>,
}

impl CongestionController {
    /// Creates a controller in slow start.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: CongestionConfig) -> FlowResult<Self> {
        config.validate()?;
        Ok(Self {
            window: config.initial_window,
            ssthresh: config.initial_ssthresh,
            config,
            phase: CongestionPhase::SlowStart,
            duplicate_acks: 0,
            smoothed_rtt: None,
            rtt_variance: 0.0,
            total_successes: 0,
            total_failures: 0,
            listeners: Listeners::new(),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CongestionConfig {
        &self.config
    }

    /// Returns the congestion window.
    #[must_use]
    pub const fn window(&self) -> f64 {
        self.window
    }

    /// Returns the slow-start threshold.
    #[must_use]
    pub const fn ssthresh(&self) -> f64 {
        self.ssthresh
    }

    /// Returns the current phase.
    #[must_use]
    pub const fn phase(&self) -> CongestionPhase {
        self.phase
    }

    /// Returns the window as a whole number of permits (at least 1).
    #[must_use]
    pub fn permits(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Window is in [1, max].
        let permits = self.window.floor() as u32;
        permits.max(1)
    }

    /// Returns the recommended retransmission timeout in milliseconds.
    #[must_use]
    pub fn recommended_timeout_ms(&self) -> f64 {
        self.smoothed_rtt.map_or(self.config.initial_rto_ms, |srtt| {
            (srtt + 4.0 * self.rtt_variance).clamp(self.config.min_rto_ms, self.config.max_rto_ms)
        })
    }

    /// Records a success, optionally with its round-trip time, and returns the
    /// new window.
    pub fn on_success(&mut self, rtt_ms: Option<f64>) -> f64 {
        if let Some(rtt) = rtt_ms {
            self.observe_rtt(rtt);
        }
        self.total_successes += 1;
        self.duplicate_acks = 0;

        match self.phase {
            CongestionPhase::SlowStart => {
                self.window = (self.window * 2.0).min(self.config.max_window);
                if self.window >= self.ssthresh {
                    self.transition(
                        CongestionPhase::CongestionAvoidance,
                        TransitionReason::ThresholdReached,
                    );
                }
            }
            CongestionPhase::CongestionAvoidance => {
                self.window =
                    (self.window + self.config.increase_step / self.window).min(self.config.max_window);
            }
            CongestionPhase::FastRecovery => {
                self.window = self.ssthresh.clamp(self.config.min_window, self.config.max_window);
                self.transition(
                    CongestionPhase::CongestionAvoidance,
                    TransitionReason::RecoveryComplete,
                );
            }
        }
        self.window
    }

    /// Records a failure and returns the new window.
    pub fn on_failure(&mut self) -> f64 {
        self.total_failures += 1;
        self.duplicate_acks = 0;
        self.ssthresh = (self.window * self.config.decrease_factor).max(self.config.min_window);
        self.window = self.config.min_window;
        debug!(ssthresh = self.ssthresh, "Congestion failure; window collapsed");
        self.transition(CongestionPhase::SlowStart, TransitionReason::Failure);
        self.window
    }

    /// Records a duplicate acknowledgement and returns the new window.
    pub fn on_duplicate_ack(&mut self) -> f64 {
        self.duplicate_acks = self.duplicate_acks.saturating_add(1);

        if self.phase == CongestionPhase::FastRecovery {
            self.window = (self.window + 1.0).min(self.config.max_window);
        } else if self.duplicate_acks >= self.config.duplicate_ack_threshold {
            self.ssthresh = (self.window * self.config.decrease_factor).max(self.config.min_window);
            self.window = (self.ssthresh + 3.0).min(self.config.max_window);
            self.transition(CongestionPhase::FastRecovery, TransitionReason::DuplicateAcks);
        }
        self.window
    }

    /// Returns a snapshot of controller state.
    #[must_use]
    pub fn state(&self) -> CongestionState {
        CongestionState {
            window: self.window,
            ssthresh: self.ssthresh,
            phase: self.phase,
            duplicate_acks: self.duplicate_acks,
            smoothed_rtt_ms: self.smoothed_rtt,
            rtt_variance_ms: self.rtt_variance,
            timeout_ms: self.recommended_timeout_ms(),
            total_successes: self.total_successes,
            total_failures: self.total_failures,
        }
    }

    /// Returns to the initial window, threshold and phase, and forgets RTT history.
    pub fn reset(&mut self) {
        self.window = self.config.initial_window;
        self.ssthresh = self.config.initial_ssthresh;
        self.duplicate_acks = 0;
        self.smoothed_rtt = None;
        self.rtt_variance = 0.0;
        self.total_successes = 0;
        self.total_failures = 0;
        if self.phase != CongestionPhase::SlowStart {
            self.transition(CongestionPhase::SlowStart, TransitionReason::Reset);
        }
    }

    /// Registers an observer for phase transitions.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener limit is reached.
    pub fn subscribe<F>(&mut self, listener: F) -> CoreResult<ListenerId>
    where
        F: FnMut(&CongestionEvent) + Send + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Removes an observer.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn observe_rtt(&mut self, rtt: f64) {
        if !(rtt.is_finite() && rtt >= 0.0) {
            warn!(rtt, "Ignoring invalid RTT sample");
            return;
        }
        match self.smoothed_rtt {
            None => {
                self.smoothed_rtt = Some(rtt);
                self.rtt_variance = rtt / 2.0;
            }
            Some(srtt) => {
                self.rtt_variance =
                    (1.0 - RTT_BETA).mul_add(self.rtt_variance, RTT_BETA * (srtt - rtt).abs());
                self.smoothed_rtt = Some((1.0 - RTT_ALPHA).mul_add(srtt, RTT_ALPHA * rtt));
            }
        }
    }

    fn transition(&mut self, to: CongestionPhase, reason: TransitionReason) {
        let from = self.phase;
        self.phase = to;
        debug!(
            from = ?from,
            to = ?to,
            window = self.window,
            ssthresh = self.ssthresh,
            reason = ?reason,
            "Congestion phase transition"
        );
        self.listeners.emit(&CongestionEvent {
            from,
            to,
            window: self.window,
            ssthresh: self.ssthresh,
            reason,
        });
    }
}
