//! Property checkers for Tempo components.
//!
//! Each checker drives one component with a seeded random workload and
//! returns the first invariant violation it observes. Tests run them over
//! [`REGRESSION_SEEDS`](crate::scenarios::seeds::REGRESSION_SEEDS).

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempo_config::{StoreSettings, VersionedConfig};
use tempo_flow::{
    AdmissionConfig, AdmissionController, CongestionConfig, CongestionController,
    CongestionPhase, Outcome, PidConfig, PidController,
};
use tempo_stats::{BloomFilter, DedupConfig, DuplicateDetector, TDigest};
use tempo_timer::{TimerCallback, TimingWheel, TimingWheelConfig};

use crate::scenarios::rng;

// ============================================================================
// Property Violation Types
// ============================================================================

/// A violated invariant.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyViolation {
    /// A timer fired before its delay elapsed.
    TimerEarly {
        /// Timer id.
        id: String,
        /// First tick it may fire on.
        due: u64,
        /// Tick it fired on.
        fired: u64,
    },
    /// A timer fired after its due tick.
    TimerLate {
        /// Timer id.
        id: String,
        /// Tick it was due on.
        due: u64,
        /// Tick it fired on.
        fired: u64,
    },
    /// A one-shot timer fired twice.
    TimerFiredTwice {
        /// Timer id.
        id: String,
    },
    /// A timer never fired.
    TimerMissing {
        /// Timer id.
        id: String,
    },
    /// A cancelled timer's callback ran.
    CancelledTimerFired {
        /// Timer id.
        id: String,
    },
    /// `cancel` reported success for a timer that was not pending.
    PhantomCancel {
        /// Timer id.
        id: String,
    },
    /// The id index disagrees with the slot contents.
    ArenaInconsistent {
        /// Tick at which the mismatch was seen.
        tick: u64,
    },
    /// PID output left its bounds.
    PidOutOfBounds {
        /// Output.
        value: u32,
        /// Lower bound.
        min: u32,
        /// Upper bound.
        max: u32,
    },
    /// A Bloom filter missed an added item.
    BloomFalseNegative {
        /// Item index in the workload.
        item: usize,
    },
    /// A higher percentile returned a smaller value.
    TDigestNotMonotone {
        /// Percentile where the decrease happened.
        p: f64,
        /// Value at `p`.
        value: f64,
        /// Value at the previous percentile.
        previous: f64,
    },
    /// The median estimate is too far from the exact median.
    TDigestMedianOff {
        /// Estimate.
        estimate: f64,
        /// Exact median.
        exact: f64,
    },
    /// A slow-start success did not double the window (up to the ceiling).
    SlowStartTooSlow {
        /// Window before.
        before: f64,
        /// Window after.
        after: f64,
    },
    /// A failure did not collapse the window or set the threshold correctly.
    FailureNotCollapsed {
        /// Window before.
        before: f64,
        /// Window after.
        after: f64,
        /// Threshold after.
        ssthresh: f64,
    },
    /// An apply did not bump the version exactly once.
    ConfigVersionJump {
        /// Expected version.
        expected: u64,
        /// Actual version.
        actual: u64,
    },
    /// The store's snapshot differs from the model.
    ConfigMismatch {
        /// Version at which the mismatch was seen.
        version: u64,
    },
    /// The duplicate detector disagreed with the exact FIFO model.
    DedupMismatch {
        /// Id checked.
        id: String,
        /// Model answer.
        expected: bool,
    },
    /// Admission limit above one of its inputs.
    AdmissionAboveInput {
        /// Admission limit.
        limit: u32,
        /// PID concurrency.
        pid: u32,
        /// Congestion permits.
        permits: u32,
    },
    /// The structure under test could not be built or seeded.
    Setup {
        /// What was being set up.
        component: &'static str,
        /// Error it returned.
        message: String,
    },
}

impl fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TimerEarly { id, due, fired } => {
                write!(f, "timer {id} fired at tick {fired}, before due tick {due}")
            }
            Self::TimerLate { id, due, fired } => {
                write!(f, "timer {id} fired at tick {fired}, after due tick {due}")
            }
            Self::TimerFiredTwice { id } => write!(f, "timer {id} fired twice"),
            Self::TimerMissing { id } => write!(f, "timer {id} never fired"),
            Self::CancelledTimerFired { id } => write!(f, "cancelled timer {id} fired"),
            Self::PhantomCancel { id } => write!(f, "cancel({id}) succeeded but it was not pending"),
            Self::ArenaInconsistent { tick } => write!(f, "slot index inconsistent at tick {tick}"),
            Self::PidOutOfBounds { value, min, max } => {
                write!(f, "PID output {value} outside [{min}, {max}]")
            }
            Self::BloomFalseNegative { item } => write!(f, "Bloom filter lost item {item}"),
            Self::TDigestNotMonotone { p, value, previous } => {
                write!(f, "percentile({p}) = {value} < previous {previous}")
            }
            Self::TDigestMedianOff { estimate, exact } => {
                write!(f, "median estimate {estimate} too far from {exact}")
            }
            Self::SlowStartTooSlow { before, after } => {
                write!(f, "slow-start success moved window {before} -> {after}")
            }
            Self::FailureNotCollapsed {
                before,
                after,
                ssthresh,
            } => write!(
                f,
                "failure moved window {before} -> {after} with ssthresh {ssthresh}"
            ),
            Self::ConfigVersionJump { expected, actual } => {
                write!(f, "config version {actual}, expected {expected}")
            }
            Self::ConfigMismatch { version } => {
                write!(f, "config snapshot differs from model at version {version}")
            }
            Self::DedupMismatch { id, expected } => {
                write!(f, "duplicate detector answered {} for {id}", !expected)
            }
            Self::AdmissionAboveInput {
                limit,
                pid,
                permits,
            } => write!(f, "admission limit {limit} above pid {pid} or permits {permits}"),
            Self::Setup { component, message } => write!(f, "{component} setup failed: {message}"),
        }
    }
}

/// Result of a property check.
pub type PropertyResult = Result<(), PropertyViolation>;

fn setup<E: fmt::Display>(component: &'static str) -> impl FnOnce(E) -> PropertyViolation {
    move |err| PropertyViolation::Setup {
        component,
        message: err.to_string(),
    }
}

// ============================================================================
// Timing Wheel
// ============================================================================

/// Schedules `timers` one-shot timers with random delays in `0..=max_delay`,
/// interleaved with ticks, and checks each fires exactly once on its due tick.
///
/// # Errors
///
/// Returns the first violation observed.
pub fn check_wheel_liveness(
    seed: u64,
    config: TimingWheelConfig,
    timers: usize,
    max_delay: u64,
) -> PropertyResult {
    let mut rng = rng(seed);
    let mut wheel = TimingWheel::new(config).map_err(setup("timing wheel"))?;
    let mut due: HashMap<String, u64> = HashMap::new();
    let mut fired: HashSet<String> = HashSet::new();
    let mut scheduled = 0;

    let step_limit = timers as u64 * 4 + max_delay + 8;
    for _ in 0..step_limit {
        while scheduled < timers && rng.gen_bool(0.5) {
            let id = format!("t{scheduled}");
            let delay = rng.gen_range(0..=max_delay);
            wheel
                .schedule(id.as_str(), delay, None)
                .map_err(setup("timer schedule"))?;
            due.insert(id, wheel.current_tick() + delay.max(1));
            scheduled += 1;
        }

        for id in wheel.tick() {
            let id = id.as_str().to_owned();
            let now = wheel.current_tick();
            let expected = due.get(&id).copied().unwrap_or(0);
            if now < expected {
                return Err(PropertyViolation::TimerEarly {
                    id,
                    due: expected,
                    fired: now,
                });
            }
            if now > expected {
                return Err(PropertyViolation::TimerLate {
                    id,
                    due: expected,
                    fired: now,
                });
            }
            if !fired.insert(id.clone()) {
                return Err(PropertyViolation::TimerFiredTwice { id });
            }
        }
        if !wheel.index_is_consistent() {
            return Err(PropertyViolation::ArenaInconsistent {
                tick: wheel.current_tick(),
            });
        }
        if scheduled == timers && wheel.pending_count() == 0 {
            break;
        }
    }

    match due.keys().find(|id| !fired.contains(*id)) {
        Some(id) => Err(PropertyViolation::TimerMissing { id: id.clone() }),
        None => Ok(()),
    }
}

/// Schedules timers with callbacks, cancels a random subset before expiry,
/// and checks no cancelled callback runs and no bogus cancel succeeds.
///
/// # Errors
///
/// Returns the first violation observed.
pub fn check_wheel_cancellation(seed: u64, timers: usize) -> PropertyResult {
    let mut rng = rng(seed);
    let mut wheel = TimingWheel::new(TimingWheelConfig::for_testing())
        .map_err(setup("timing wheel"))?;
    let ran: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

    for n in 0..timers {
        let id = format!("c{n}");
        let sink = Arc::clone(&ran);
        let name = id.clone();
        let callback: TimerCallback = Box::new(move || {
            if let Ok(mut ran) = sink.lock() {
                ran.insert(name);
            }
            Ok(())
        });
        wheel
            .schedule(id.as_str(), rng.gen_range(1..300), Some(callback))
            .map_err(setup("timer schedule"))?;
    }

    let mut cancelled = HashSet::new();
    let mut expired = HashSet::new();
    while wheel.pending_count() > 0 {
        if rng.gen_bool(0.3) {
            let id = format!("c{}", rng.gen_range(0..timers));
            let was_pending = wheel.is_scheduled(&id);
            let result = wheel.cancel(&id);
            if result && !was_pending {
                return Err(PropertyViolation::PhantomCancel { id });
            }
            if result {
                cancelled.insert(id);
            }
        }
        expired.extend(wheel.tick().into_iter().map(|id| id.as_str().to_owned()));
        if !wheel.index_is_consistent() {
            return Err(PropertyViolation::ArenaInconsistent {
                tick: wheel.current_tick(),
            });
        }
    }

    // Fired and cancelled ids are no longer pending.
    for id in expired.iter().chain(cancelled.iter()) {
        if wheel.cancel(id) {
            return Err(PropertyViolation::PhantomCancel { id: id.clone() });
        }
    }
    let ran = ran.lock().map(|r| r.clone()).unwrap_or_default();
    match cancelled.iter().find(|id| ran.contains(*id)) {
        Some(id) => Err(PropertyViolation::CancelledTimerFired { id: id.clone() }),
        None => Ok(()),
    }
}

// ============================================================================
// Flow Control
// ============================================================================

/// Feeds random latencies (including non-finite ones) to a PID controller
/// with random bounds and checks every output stays within them.
///
/// # Errors
///
/// Returns the first out-of-bounds output.
pub fn check_pid_bounded(seed: u64, samples: usize) -> PropertyResult {
    let mut rng = rng(seed);
    let min = rng.gen_range(1..20);
    let max = rng.gen_range(min..min + 200);
    let config = PidConfig::new(rng.gen_range(10.0..500.0), min, max)
        .with_gains(rng.gen_range(0.0..2.0), rng.gen_range(0.0..0.5), rng.gen_range(0.0..1.0))
        .with_initial_concurrency(rng.gen_range(min..=max));
    let mut pid = PidController::new(config).map_err(setup("PID controller"))?;

    for i in 0..samples {
        let latency = match i % 97 {
            0 => f64::NAN,
            1 => f64::INFINITY,
            _ => rng.gen_range(0.0..5_000.0),
        };
        let value = pid.calculate(latency);
        if value < min || value > max {
            return Err(PropertyViolation::PidOutOfBounds { value, min, max });
        }
    }
    Ok(())
}

/// Drives a congestion controller with random successes, failures and
/// duplicate acknowledgements, checking slow-start growth and failure collapse.
///
/// # Errors
///
/// Returns the first violation observed.
pub fn check_aimd(seed: u64, events: usize) -> PropertyResult {
    let mut rng = rng(seed);
    let config = CongestionConfig::new(1.0, 256.0).with_initial_ssthresh(rng.gen_range(2.0..128.0));
    let mut cc = CongestionController::new(config.clone()).map_err(setup("congestion controller"))?;

    for _ in 0..events {
        let before = cc.window();
        match rng.gen_range(0..10) {
            0..=5 => {
                let in_slow_start = cc.phase() == CongestionPhase::SlowStart;
                let after = cc.on_success(Some(rng.gen_range(1.0..200.0)));
                if in_slow_start && after < (before * 2.0).min(config.max_window) {
                    return Err(PropertyViolation::SlowStartTooSlow { before, after });
                }
            }
            6 | 7 => {
                let after = cc.on_failure();
                let ssthresh = cc.ssthresh();
                let expected = (before * config.decrease_factor).max(config.min_window);
                if (after - config.min_window).abs() > f64::EPSILON
                    || (ssthresh - expected).abs() > 1e-9
                {
                    return Err(PropertyViolation::FailureNotCollapsed {
                        before,
                        after,
                        ssthresh,
                    });
                }
            }
            _ => {
                cc.on_duplicate_ack();
            }
        }
    }
    Ok(())
}

/// Runs random admissions and completions and checks the admission limit
/// never exceeds either controller's output.
///
/// # Errors
///
/// Returns the first violation observed.
pub fn check_admission_limit(seed: u64, steps: usize) -> PropertyResult {
    let mut rng = rng(seed);
    let mut gate = AdmissionController::new(AdmissionConfig::for_testing())
        .map_err(setup("admission controller"))?;
    let mut permits = VecDeque::new();
    let mut now_us = 0_u64;

    for _ in 0..steps {
        now_us += rng.gen_range(100..50_000);
        if rng.gen_bool(0.6) {
            if let Ok(permit) = gate.try_acquire(now_us) {
                permits.push_back(permit);
            }
        } else if let Some(permit) = permits.pop_front() {
            let outcome = match rng.gen_range(0..10) {
                0 => Outcome::Failure,
                1 => Outcome::Duplicate,
                _ => Outcome::Success,
            };
            let _ = gate.record_completion(permit, outcome, now_us);
        }

        let limit = gate.limit();
        let pid = gate.pid().concurrency();
        let cwnd = gate.congestion().permits();
        if limit > pid || limit > cwnd {
            return Err(PropertyViolation::AdmissionAboveInput {
                limit,
                pid,
                permits: cwnd,
            });
        }
    }
    Ok(())
}

// ============================================================================
// Statistics
// ============================================================================

/// Adds `items` random byte strings to a Bloom filter sized for half as many
/// and checks every one still tests positive.
///
/// # Errors
///
/// Returns the first missing item.
pub fn check_bloom_no_false_negatives(seed: u64, items: usize) -> PropertyResult {
    let mut rng = rng(seed);
    let mut filter = BloomFilter::with_capacity((items / 2).max(1), 0.01)
        .map_err(setup("Bloom filter"))?;
    let workload: Vec<Vec<u8>> = (0..items)
        .map(|_| {
            let len = rng.gen_range(0..24);
            (0..len).map(|_| rng.gen()).collect()
        })
        .collect();

    for item in &workload {
        filter.add(item);
    }
    match workload.iter().position(|item| !filter.test(item)) {
        Some(item) => Err(PropertyViolation::BloomFalseNegative { item }),
        None => Ok(()),
    }
}

/// Feeds `samples` uniform values to a t-digest and checks percentiles are
/// monotone and the median is within 2% of the exact one (relative to range).
///
/// # Errors
///
/// Returns the first violation observed.
pub fn check_tdigest(seed: u64, samples: usize) -> PropertyResult {
    let mut rng = rng(seed);
    let mut digest = TDigest::default();
    let mut values: Vec<f64> = (0..samples).map(|_| rng.gen_range(0.0..1_000.0)).collect();
    for &v in &values {
        let _ = digest.add(v, 1.0);
    }

    let mut previous = f64::NEG_INFINITY;
    for step in 0..=200 {
        let p = f64::from(step) / 2.0;
        let value = digest.percentile(p).unwrap_or(0.0);
        if value < previous {
            return Err(PropertyViolation::TDigestNotMonotone { p, value, previous });
        }
        previous = value;
    }

    values.sort_by(f64::total_cmp);
    let exact = values[values.len() / 2];
    let estimate = digest.percentile(50.0).unwrap_or(0.0);
    if (estimate - exact).abs() > 20.0 {
        return Err(PropertyViolation::TDigestMedianOff { estimate, exact });
    }
    Ok(())
}

/// Checks a duplicate detector against an exact bounded-FIFO model over a
/// small id universe, so ids repeat and get evicted.
///
/// # Errors
///
/// Returns the first disagreement.
pub fn check_dedup(seed: u64, checks: usize) -> PropertyResult {
    let mut rng = rng(seed);
    let config = DedupConfig::new(rng.gen_range(8..64), 0.05);
    let mut detector = DuplicateDetector::new(config).map_err(setup("duplicate detector"))?;
    let mut retained: VecDeque<String> = VecDeque::new();

    for _ in 0..checks {
        let id = format!("id-{}", rng.gen_range(0..200));
        let expected = retained.contains(&id);
        if detector.check_and_add(&id) != expected {
            return Err(PropertyViolation::DedupMismatch { id, expected });
        }
        if !expected {
            if retained.len() >= config.max_tracked {
                retained.pop_front();
            }
            retained.push_back(id);
        }
    }
    Ok(())
}

// ============================================================================
// Configuration
// ============================================================================

/// Tunables used by the configuration checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tunables {
    /// Concurrency ceiling.
    pub max_concurrency: u32,
    /// Queue depth.
    pub queue_depth: u32,
    /// Nested retry settings.
    pub retry: RetryTunables,
}

/// Nested part of [`Tunables`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryTunables {
    /// Attempts before giving up.
    pub attempts: u32,
    /// Backoff between attempts.
    pub backoff_ms: u64,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            queue_depth: 128,
            retry: RetryTunables {
                attempts: 3,
                backoff_ms: 100,
            },
        }
    }
}

/// Rejects zero concurrency and more than ten attempts.
///
/// # Errors
///
/// Returns a message naming the invalid field.
pub fn validate_tunables(t: &Tunables) -> Result<(), String> {
    if t.max_concurrency == 0 {
        return Err("max_concurrency must be positive".to_string());
    }
    if t.retry.attempts > 10 {
        return Err(format!("retry.attempts {} exceeds 10", t.retry.attempts));
    }
    Ok(())
}

/// Stages random batches of valid updates, applies each batch, and checks
/// one version bump per batch with the merged result; then rolls back to a
/// random retained version and checks the snapshot matches exactly.
///
/// # Errors
///
/// Returns the first violation observed.
pub fn check_config_atomicity(seed: u64, batches: usize) -> PropertyResult {
    let mut rng = rng(seed);
    let mut store = VersionedConfig::with_settings(
        Tunables::default(),
        validate_tunables,
        StoreSettings::new(5),
    )
    .map_err(setup("config store"))?;
    let mut model = Tunables::default();
    let mut snapshots: HashMap<u64, Tunables> = HashMap::from([(1, model.clone())]);

    for _ in 0..batches {
        let version = store.version();
        for _ in 0..rng.gen_range(1..5) {
            let patch = match rng.gen_range(0..3) {
                0 => {
                    model.max_concurrency = rng.gen_range(1..100);
                    json!({ "max_concurrency": model.max_concurrency })
                }
                1 => {
                    model.queue_depth = rng.gen_range(0..1_000);
                    json!({ "queue_depth": model.queue_depth })
                }
                _ => {
                    model.retry.attempts = rng.gen_range(0..=10);
                    json!({ "retry": { "attempts": model.retry.attempts } })
                }
            };
            let _ = store.update(patch);
        }
        // An invalid update is rejected without disturbing what is staged.
        let _ = store.update(json!({ "max_concurrency": 0 }));

        let applied = store.apply_pending().ok().flatten();
        if applied != Some(version + 1) || store.version() != version + 1 {
            return Err(PropertyViolation::ConfigVersionJump {
                expected: version + 1,
                actual: store.version(),
            });
        }
        if *store.get() != model {
            return Err(PropertyViolation::ConfigMismatch {
                version: store.version(),
            });
        }
        snapshots.insert(store.version(), model.clone());
    }

    let retained: Vec<u64> = store.history().iter().map(|e| e.version).collect();
    let target = retained[rng.gen_range(0..retained.len())];
    if store.rollback(Some(target)).is_err() {
        return Err(PropertyViolation::ConfigMismatch { version: target });
    }
    match snapshots.get(&target) {
        Some(expected) if *store.get() == *expected => Ok(()),
        _ => Err(PropertyViolation::ConfigMismatch { version: target }),
    }
}
