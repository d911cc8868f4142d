//! Versioned configuration property and scenario tests.

// Test-specific lint allowances.
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::uninlined_format_args)]

use std::sync::{Arc, Mutex};

use serde_json::json;
use tempo_config::{ChangeSource, ConfigError, ConfigEvent, StoreSettings, VersionedConfig};
use tempo_flow::{PidConfig, PidConfigUpdate, PidController};

use crate::properties::{check_config_atomicity, validate_tunables, Tunables};
use crate::scenarios::{init_tracing, seeds::REGRESSION_SEEDS};

fn store() -> VersionedConfig<Tunables> {
    VersionedConfig::with_settings(Tunables::default(), validate_tunables, StoreSettings::for_testing())
        .unwrap()
}

// ============================================================================
// Seeded Properties
// ============================================================================

#[test]
fn test_config_atomicity_seeds() {
    init_tracing();
    for &seed in REGRESSION_SEEDS {
        if let Err(v) = check_config_atomicity(seed, 20) {
            panic!("seed {seed}: {v}");
        }
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_config_rejected_update_leaves_staged_batch() {
    let mut config = store();
    config.update(json!({"max_concurrency": 32})).unwrap();
    config.update(json!({"retry": {"backoff_ms": 250}})).unwrap();

    let rejected = config.update(json!({"retry": {"attempts": 11}}));
    assert!(matches!(rejected, Err(ConfigError::Validation { .. })));

    assert_eq!(config.apply_pending().unwrap(), Some(2));
    let current = config.get();
    assert_eq!(current.max_concurrency, 32);
    assert_eq!(current.retry.backoff_ms, 250);
    assert_eq!(current.retry.attempts, 3);
}

#[test]
fn test_config_events_and_history_eviction() {
    let mut config = store();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    config
        .subscribe(move |e: &ConfigEvent| sink.lock().unwrap().push(e.clone()))
        .unwrap();

    for depth in [200, 300, 400] {
        config.update_immediate(json!({"queue_depth": depth})).unwrap();
    }
    assert_eq!(config.version(), 4);

    // Version 1 was evicted from a three-entry history.
    assert_eq!(
        config.rollback(Some(1)),
        Err(ConfigError::VersionNotFound { version: 1 })
    );
    assert_eq!(config.rollback(Some(2)).unwrap(), 5);
    assert_eq!(config.get().queue_depth, 200);

    let versions: Vec<u64> = config.history().iter().map(|e| e.version).collect();
    assert_eq!(versions, vec![3, 4, 5]);
    assert_eq!(
        config.history()[2].source,
        ChangeSource::Rollback { target: 2 }
    );

    let events = events.lock().unwrap();
    assert_eq!(
        events.last(),
        Some(&ConfigEvent::RolledBack {
            from: 4,
            target: 2,
            version: 5
        })
    );
}

#[test]
fn test_config_drives_pid_retune() {
    // Host flow: a config change is applied, then pushed into a live controller.
    let mut config = store();
    let mut pid = PidController::new(PidConfig::for_testing()).unwrap();

    config.update(json!({"max_concurrency": 20})).unwrap();
    config.apply_pending().unwrap();

    let limit = u32::try_from(config.get_value("max_concurrency").unwrap().as_u64().unwrap()).unwrap();
    pid.update_config(PidConfigUpdate {
        max_concurrency: Some(limit),
        ..PidConfigUpdate::default()
    })
    .unwrap();

    for _ in 0..100 {
        pid.calculate(1.0);
    }
    assert_eq!(pid.concurrency(), 20);
}
