//! Flow control property and scenario tests.

// Test-specific lint allowances.
#![allow(clippy::float_cmp)]
#![allow(clippy::uninlined_format_args)]

use tempo_flow::{
    AdmissionConfig, AdmissionController, CongestionConfig, CongestionController,
    CongestionPhase, FlowError, Outcome, PidConfig, PidController,
};

use crate::properties::{check_admission_limit, check_aimd, check_pid_bounded};
use crate::scenarios::{init_tracing, latency, seeds::REGRESSION_SEEDS, sweep_seeds};

// ============================================================================
// Seeded Properties
// ============================================================================

#[test]
fn test_pid_bounded_seeds() {
    init_tracing();
    for &seed in REGRESSION_SEEDS {
        if let Err(v) = check_pid_bounded(seed, 1_000) {
            panic!("seed {seed}: {v}");
        }
    }
}

#[test]
fn test_pid_bounded_seed_sweep() {
    for seed in sweep_seeds(0x5EED) {
        if let Err(v) = check_pid_bounded(seed, 200) {
            panic!("seed {seed}: {v}");
        }
    }
}

#[test]
fn test_aimd_seeds() {
    for &seed in REGRESSION_SEEDS {
        if let Err(v) = check_aimd(seed, 2_000) {
            panic!("seed {seed}: {v}");
        }
    }
}

#[test]
fn test_admission_limit_seeds() {
    for &seed in REGRESSION_SEEDS {
        if let Err(v) = check_admission_limit(seed, 2_000) {
            panic!("seed {seed}: {v}");
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_congestion_three_duplicate_acks_enter_fast_recovery() {
    let mut cc = CongestionController::new(CongestionConfig::for_testing()).unwrap();
    for expected in [2.0, 4.0, 8.0] {
        assert_eq!(cc.on_success(None), expected);
    }
    assert_eq!(cc.phase(), CongestionPhase::SlowStart);

    cc.on_duplicate_ack();
    cc.on_duplicate_ack();
    assert_eq!(cc.phase(), CongestionPhase::SlowStart);
    let window = cc.on_duplicate_ack();

    assert_eq!(cc.phase(), CongestionPhase::FastRecovery);
    assert_eq!(cc.ssthresh(), 4.0);
    assert_eq!(window, cc.ssthresh() + 3.0);

    // Recovery deflates to the threshold.
    assert_eq!(cc.on_success(None), 4.0);
    assert_eq!(cc.phase(), CongestionPhase::CongestionAvoidance);
}

#[test]
fn test_pid_tracks_latency_regime() {
    let config = PidConfig::new(100.0, 1, 100)
        .with_gains(0.05, 0.01, 0.0)
        .with_initial_concurrency(50);
    let mut pid = PidController::new(config).unwrap();

    for sample in latency::spiky(42, 200, 300.0, 0.05, 5.0) {
        pid.calculate(sample);
    }
    assert_eq!(pid.concurrency(), 1, "sustained slow latencies drive to the floor");

    for _ in 0..200 {
        pid.calculate(10.0);
    }
    assert_eq!(pid.concurrency(), 100, "sustained fast latencies drive to the ceiling");
}

#[test]
fn test_admission_grows_then_collapses_on_failure() {
    init_tracing();
    let mut gate = AdmissionController::new(AdmissionConfig::for_testing()).unwrap();
    assert_eq!(gate.limit(), 1);

    let mut now_us = 0;
    for _ in 0..10 {
        let mut permits = Vec::new();
        while let Ok(permit) = gate.try_acquire(now_us) {
            permits.push(permit);
        }
        now_us += 10_000;
        for permit in permits {
            gate.record_completion(permit, Outcome::Success, now_us).unwrap();
        }
    }
    assert_eq!(gate.pid().concurrency(), 50);
    assert!(gate.limit() >= 16, "limit {}", gate.limit());
    assert_eq!(gate.stats().phase, CongestionPhase::CongestionAvoidance);

    let failing = gate.try_acquire(now_us).unwrap();
    let slow = gate.try_acquire(now_us).unwrap();
    assert_eq!(gate.record_completion(failing, Outcome::Failure, now_us).unwrap(), 1);
    assert_eq!(gate.stats().phase, CongestionPhase::SlowStart);
    assert_eq!(
        gate.try_acquire(now_us),
        Err(FlowError::AtCapacity {
            in_flight: 1,
            limit: 1
        })
    );

    // Permits issued before the collapse still complete normally.
    now_us += 10_000;
    assert_eq!(gate.record_completion(slow, Outcome::Success, now_us).unwrap(), 2);
    let stats = gate.stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.total_failed, 1);
    assert_eq!(stats.total_rejected, 11);
}
