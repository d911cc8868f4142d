//! Timing wheel property and scenario tests.

// Test-specific lint allowances.
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::uninlined_format_args)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempo_timer::{TimerDriver, TimerEvent, TimingWheel, TimingWheelConfig};

use crate::properties::{check_wheel_cancellation, check_wheel_liveness, PropertyViolation};
use crate::scenarios::{init_tracing, seeds::REGRESSION_SEEDS};

fn ids(fired: &[tempo_timer::TimerId]) -> Vec<&str> {
    fired.iter().map(tempo_timer::TimerId::as_str).collect()
}

// ============================================================================
// Seeded Properties
// ============================================================================

#[test]
fn test_wheel_liveness_seeds() {
    init_tracing();
    for &seed in REGRESSION_SEEDS {
        if let Err(v) = check_wheel_liveness(seed, TimingWheelConfig::for_testing(), 200, 500) {
            panic!("seed {seed}: {v}");
        }
    }
}

#[test]
fn test_wheel_liveness_default_geometry_seeds() {
    for &seed in REGRESSION_SEEDS {
        if let Err(v) = check_wheel_liveness(seed, TimingWheelConfig::default(), 300, 5_000) {
            panic!("seed {seed}: {v}");
        }
    }
}

#[test]
fn test_wheel_liveness_beyond_span_seeds() {
    // 4 slots x 2 levels covers 16 ticks; longer delays park at the top level.
    let config = TimingWheelConfig::new(4, 2);
    for &seed in REGRESSION_SEEDS {
        if let Err(v) = check_wheel_liveness(seed, config.clone(), 50, 100) {
            panic!("seed {seed}: {v}");
        }
    }
}

#[test]
fn test_wheel_liveness_reports_setup_failure() {
    let result = check_wheel_liveness(42, TimingWheelConfig::new(1, 3), 10, 10);
    assert!(
        matches!(result, Err(PropertyViolation::Setup { component: "timing wheel", .. })),
        "{result:?}"
    );
}

#[test]
fn test_wheel_cancellation_seeds() {
    for &seed in REGRESSION_SEEDS {
        if let Err(v) = check_wheel_cancellation(seed, 100) {
            panic!("seed {seed}: {v}");
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_wheel_three_timers_fire_in_order() {
    let mut wheel = TimingWheel::new(TimingWheelConfig::default()).unwrap();
    wheel.schedule_after("a", Duration::from_millis(30), None).unwrap();
    wheel.schedule_after("b", Duration::from_millis(60), None).unwrap();
    wheel.schedule_after("c", Duration::from_millis(90), None).unwrap();

    let mut fired = Vec::new();
    for _ in 0..50 {
        fired.extend(wheel.tick());
    }
    assert_eq!(ids(&fired), vec!["a"]);

    for _ in 50..100 {
        fired.extend(wheel.tick());
    }
    assert_eq!(ids(&fired), vec!["a", "b", "c"]);
    assert_eq!(wheel.pending_count(), 0);
}

#[test]
fn test_wheel_events_report_fire_tick() {
    let mut wheel = TimingWheel::new(TimingWheelConfig::for_testing()).unwrap();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    wheel
        .subscribe(move |e: &TimerEvent| sink.lock().unwrap().push(e.clone()))
        .unwrap();

    wheel.schedule("far", 100, None).unwrap();
    wheel.schedule("near", 3, None).unwrap();
    for _ in 0..100 {
        wheel.tick();
    }

    let ticks: Vec<(String, u64)> = events
        .lock()
        .unwrap()
        .iter()
        .map(|e| match e {
            TimerEvent::Fired { id, tick } | TimerEvent::CallbackFailed { id, tick, .. } => {
                (id.as_str().to_owned(), *tick)
            }
        })
        .collect();
    assert_eq!(ticks, vec![("near".to_owned(), 3), ("far".to_owned(), 100)]);
}

#[test]
fn test_wheel_reschedule_replaces_pending() {
    let mut wheel = TimingWheel::new(TimingWheelConfig::for_testing()).unwrap();
    wheel.schedule("job", 5, None).unwrap();
    wheel.schedule("job", 20, None).unwrap();
    assert_eq!(wheel.pending_count(), 1);

    let mut fired = Vec::new();
    for _ in 0..20 {
        fired.extend(wheel.tick().into_iter().map(|id| (id, wheel.current_tick())));
    }
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].1, 20);
}

#[tokio::test(start_paused = true)]
async fn test_driver_forwards_expired_ids() {
    init_tracing();
    let config = TimingWheelConfig::for_testing().with_tick_duration(Duration::from_millis(10));
    let wheel = Arc::new(Mutex::new(TimingWheel::new(config).unwrap()));
    {
        let mut wheel = wheel.lock().unwrap();
        wheel.schedule_after("flush", Duration::from_millis(50), None).unwrap();
        wheel.schedule_after("retry", Duration::from_millis(120), None).unwrap();
    }

    let (driver, mut expired) = TimerDriver::start(Arc::clone(&wheel), 8);
    assert!(driver.is_running());

    let first = tokio::time::timeout(Duration::from_secs(1), expired.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.as_str(), "flush");
    assert!(wheel.lock().unwrap().current_tick() >= 5);

    let second = tokio::time::timeout(Duration::from_secs(1), expired.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.as_str(), "retry");

    driver.stop().await;
    assert_eq!(wheel.lock().unwrap().pending_count(), 0);
}
