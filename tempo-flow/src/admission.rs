//! Admission gate combining the PID and congestion signals.
//!
//! The gate admits at most `min(pid concurrency, congestion permits)`
//! operations at once. Completions feed both controllers: latency goes to
//! the PID loop, the outcome to the congestion window.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::congestion::{CongestionConfig, CongestionController, CongestionPhase};
use crate::error::{FlowError, FlowResult};
use crate::pid::{PidConfig, PidController};

/// Configuration for the admission controller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// PID controller configuration.
    pub pid: PidConfig,

    /// Congestion controller configuration.
    pub congestion: CongestionConfig,
}

impl AdmissionConfig {
    /// Creates a configuration for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            pid: PidConfig::for_testing(),
            congestion: CongestionConfig::for_testing(),
        }
    }

    /// Validates both component configurations.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` if either is invalid.
    pub fn validate(&self) -> FlowResult<()> {
        self.pid.validate()?;
        self.congestion.validate()
    }
}

/// A granted admission slot.
///
/// Return it through [`AdmissionController::record_completion`] when the
/// operation ends, or through [`AdmissionController::release`] when it is
/// abandoned without an outcome. A permit that is dropped instead keeps its
/// slot until [`AdmissionController::reclaim_stale`] or `reset` frees it.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a permit holds an admission slot until completion is recorded"]
pub struct Permit {
    id: u64,
    issued_at_us: u64,
}

impl Permit {
    /// Returns the permit id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns when the permit was issued.
    #[must_use]
    pub const fn issued_at_us(&self) -> u64 {
        self.issued_at_us
    }
}

/// How an admitted operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Completed normally; its latency is fed to both controllers.
    Success,
    /// Failed or timed out.
    Failure,
    /// Completed but was reported as a duplicate acknowledgement.
    Duplicate,
}

/// Admission statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionStats {
    /// Current admission limit.
    pub limit: u32,
    /// Operations in flight.
    pub in_flight: u32,
    /// PID concurrency.
    pub pid_concurrency: u32,
    /// Congestion window.
    pub congestion_window: f64,
    /// Congestion phase.
    pub phase: CongestionPhase,
    /// Permits granted.
    pub total_admitted: u64,
    /// Requests rejected at capacity.
    pub total_rejected: u64,
    /// Completions recorded as success.
    pub total_succeeded: u64,
    /// Completions recorded as failure.
    pub total_failed: u64,
    /// Permits returned without an outcome, explicitly or by reclaim.
    pub total_released: u64,
}

/// Admission controller.
#[derive(Debug)]
pub struct AdmissionController {
    pid: PidController,
    congestion: CongestionController,
    in_flight: HashMap<u64, u64>,
    next_permit_id: u64,
    total_admitted: u64,
    total_rejected: u64,
    total_succeeded: u64,
    total_failed: u64,
    total_released: u64,
}

impl AdmissionController {
    /// Creates an admission controller.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: AdmissionConfig) -> FlowResult<Self> {
        config.validate()?;
        Ok(Self {
            pid: PidController::new(config.pid)?,
            congestion: CongestionController::new(config.congestion)?,
            in_flight: HashMap::new(),
            next_permit_id: 0,
            total_admitted: 0,
            total_rejected: 0,
            total_succeeded: 0,
            total_failed: 0,
            total_released: 0,
        })
    }

    /// Returns the current admission limit.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.pid.concurrency().min(self.congestion.permits())
    }

    /// Returns the number of operations in flight.
    #[must_use]
    pub fn in_flight(&self) -> u32 {
        u32::try_from(self.in_flight.len()).unwrap_or(u32::MAX)
    }

    /// Returns the PID controller.
    #[must_use]
    pub const fn pid(&self) -> &PidController {
        &self.pid
    }

    /// Returns the PID controller mutably, for subscriptions and auto-tune.
    pub fn pid_mut(&mut self) -> &mut PidController {
        &mut self.pid
    }

    /// Returns the congestion controller.
    #[must_use]
    pub const fn congestion(&self) -> &CongestionController {
        &self.congestion
    }

    /// Returns the congestion controller mutably, for subscriptions.
    pub fn congestion_mut(&mut self) -> &mut CongestionController {
        &mut self.congestion
    }

    /// Attempts to admit an operation.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::AtCapacity` if the limit is reached.
    pub fn try_acquire(&mut self, current_time_us: u64) -> FlowResult<Permit> {
        let limit = self.limit();
        let in_flight = self.in_flight();
        if in_flight >= limit {
            self.total_rejected += 1;
            return Err(FlowError::AtCapacity { in_flight, limit });
        }

        let id = self.next_permit_id;
        self.next_permit_id += 1;
        self.in_flight.insert(id, current_time_us);
        self.total_admitted += 1;
        Ok(Permit {
            id,
            issued_at_us: current_time_us,
        })
    }

    /// Releases a permit and feeds the outcome to both controllers. Returns
    /// the new admission limit.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::UnknownPermit` if the permit was not issued by this
    /// controller or was issued before the last `reset`.
    pub fn record_completion(
        &mut self,
        permit: Permit,
        outcome: Outcome,
        current_time_us: u64,
    ) -> FlowResult<u32> {
        let Some(issued_at_us) = self.in_flight.remove(&permit.id) else {
            return Err(FlowError::UnknownPermit {
                permit_id: permit.id,
            });
        };

        #[allow(clippy::cast_precision_loss)] // Microsecond latencies fit in f64.
        let latency_ms = current_time_us.saturating_sub(issued_at_us) as f64 / 1_000.0;

        match outcome {
            Outcome::Success => {
                self.total_succeeded += 1;
                self.pid.calculate(latency_ms);
                self.congestion.on_success(Some(latency_ms));
            }
            Outcome::Failure => {
                self.total_failed += 1;
                self.congestion.on_failure();
            }
            Outcome::Duplicate => {
                self.congestion.on_duplicate_ack();
            }
        }

        let limit = self.limit();
        debug!(
            permit_id = permit.id,
            outcome = ?outcome,
            latency_ms,
            limit,
            "Admission completion recorded"
        );
        Ok(limit)
    }

    /// Frees a permit's slot without feeding either controller. Use it when
    /// an admitted operation is abandoned before it produced an outcome.
    /// Returns the admission limit.
    ///
    /// # Errors
    ///
    /// Returns `FlowError::UnknownPermit` if the permit was not issued by this
    /// controller or was issued before the last `reset`.
    pub fn release(&mut self, permit: Permit) -> FlowResult<u32> {
        if self.in_flight.remove(&permit.id).is_none() {
            return Err(FlowError::UnknownPermit {
                permit_id: permit.id,
            });
        }
        self.total_released += 1;
        debug!(permit_id = permit.id, "Admission permit released");
        Ok(self.limit())
    }

    /// Frees every slot whose permit was issued at least `max_age_us` before
    /// `current_time_us`. Completing a reclaimed permit later returns
    /// `FlowError::UnknownPermit`. Returns the number of slots freed.
    pub fn reclaim_stale(&mut self, current_time_us: u64, max_age_us: u64) -> usize {
        let before = self.in_flight.len();
        self.in_flight
            .retain(|_, issued_at_us| current_time_us.saturating_sub(*issued_at_us) < max_age_us);
        let reclaimed = before - self.in_flight.len();
        if reclaimed > 0 {
            self.total_released += reclaimed as u64;
            warn!(reclaimed, max_age_us, "Reclaimed stale admission slots");
        }
        reclaimed
    }

    /// Returns admission statistics.
    #[must_use]
    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            limit: self.limit(),
            in_flight: self.in_flight(),
            pid_concurrency: self.pid.concurrency(),
            congestion_window: self.congestion.window(),
            phase: self.congestion.phase(),
            total_admitted: self.total_admitted,
            total_rejected: self.total_rejected,
            total_succeeded: self.total_succeeded,
            total_failed: self.total_failed,
            total_released: self.total_released,
        }
    }

    /// Resets both controllers and forgets in-flight permits.
    pub fn reset(&mut self) {
        self.pid.reset();
        self.congestion.reset();
        self.in_flight.clear();
        self.total_admitted = 0;
        self.total_rejected = 0;
        self.total_succeeded = 0;
        self.total_failed = 0;
        self.total_released = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> AdmissionController {
        AdmissionController::new(AdmissionConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_limit_is_minimum_of_signals() {
        let gate = controller();
        // PID starts at 10, congestion window at 1.
        assert_eq!(gate.limit(), 1);
    }

    #[test]
    fn test_rejects_at_capacity() {
        let mut gate = controller();
        let permit = gate.try_acquire(0).unwrap();

        let err = gate.try_acquire(0).unwrap_err();
        assert_eq!(err, FlowError::AtCapacity { in_flight: 1, limit: 1 });
        assert_eq!(gate.stats().total_rejected, 1);

        gate.record_completion(permit, Outcome::Success, 50_000)
            .unwrap();
        assert_eq!(gate.in_flight(), 0);
    }

    #[test]
    fn test_success_grows_limit() {
        let mut gate = controller();
        let mut now = 0;
        for _ in 0..4 {
            let permit = gate.try_acquire(now).unwrap();
            now += 50_000; // 50ms, under the 100ms target.
            gate.record_completion(permit, Outcome::Success, now).unwrap();
        }
        // Congestion window 1 -> 16; PID 10 -> 30.
        assert_eq!(gate.congestion().window(), 16.0);
        assert_eq!(gate.pid().concurrency(), 30);
        assert_eq!(gate.limit(), 16);
    }

    #[test]
    fn test_failure_collapses_limit() {
        let mut gate = controller();
        for _ in 0..4 {
            let permit = gate.try_acquire(0).unwrap();
            gate.record_completion(permit, Outcome::Success, 50_000).unwrap();
        }
        let permit = gate.try_acquire(0).unwrap();
        let limit = gate.record_completion(permit, Outcome::Failure, 0).unwrap();

        assert_eq!(limit, 1);
        assert_eq!(gate.stats().total_failed, 1);
    }

    #[test]
    fn test_unknown_permit_rejected() {
        let mut gate = controller();
        let permit = gate.try_acquire(0).unwrap();
        gate.reset();

        let err = gate.record_completion(permit, Outcome::Success, 10).unwrap_err();
        assert_eq!(err, FlowError::UnknownPermit { permit_id: 0 });
    }

    #[test]
    fn test_duplicate_outcome_reaches_congestion() {
        let mut gate = controller();
        let permit = gate.try_acquire(0).unwrap();
        gate.record_completion(permit, Outcome::Duplicate, 10).unwrap();
        assert_eq!(gate.congestion().state().duplicate_acks, 1);
        assert_eq!(gate.pid().state().samples, 0);
    }

    #[test]
    fn test_release_frees_slot_without_feedback() {
        let mut gate = controller();
        let permit = gate.try_acquire(0).unwrap();

        assert_eq!(gate.release(permit).unwrap(), 1);
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.congestion().window(), 1.0);
        assert_eq!(gate.pid().state().samples, 0);
        assert_eq!(gate.stats().total_released, 1);

        // The slot is usable again.
        let permit = gate.try_acquire(1_000).unwrap();
        let stale = Permit {
            id: permit.id,
            issued_at_us: 0,
        };
        gate.release(permit).unwrap();
        assert_eq!(
            gate.release(stale),
            Err(FlowError::UnknownPermit { permit_id: 1 })
        );
    }

    #[test]
    fn test_dropped_permit_reclaimed_when_stale() {
        let mut gate = controller();
        {
            let _dropped = gate.try_acquire(0).unwrap();
        }
        assert_eq!(
            gate.try_acquire(1_000),
            Err(FlowError::AtCapacity { in_flight: 1, limit: 1 })
        );

        assert_eq!(gate.reclaim_stale(1_000, 5_000), 0);
        assert_eq!(gate.reclaim_stale(5_000, 5_000), 1);
        assert_eq!(gate.in_flight(), 0);
        assert_eq!(gate.stats().total_released, 1);

        let permit = gate.try_acquire(6_000).unwrap();
        assert_eq!(permit.id(), 1);
        gate.release(permit).unwrap();
    }

    #[test]
    fn test_reset() {
        let mut gate = controller();
        let _permit = gate.try_acquire(0).unwrap();
        gate.reset();

        let stats = gate.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.total_admitted, 0);
        assert_eq!(stats.limit, 1);
    }
}
