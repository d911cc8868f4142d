//! Hierarchical timing wheel for Tempo.
//!
//! This crate schedules deferred work for a host application. It provides:
//!
//! - **[`TimingWheel`]**: `levels` wheels of `wheel_size` slots, where a slot on
//!   level *k* spans `wheel_size^k` ticks. Scheduling and cancellation are O(1);
//!   entries migrate to finer levels as their expiry approaches.
//! - **[`TimerDriver`]**: a tokio task that ticks a shared wheel at the
//!   configured cadence and forwards expired ids over a bounded channel.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        TimingWheel                           │
//! │                                                              │
//! │  level 2  [ slot 0 | slot 1 | ... ]  (wheel_size² ticks)     │
//! │              │ cascade                                       │
//! │              ▼                                               │
//! │  level 1  [ slot 0 | slot 1 | ... ]  (wheel_size ticks)      │
//! │              │ cascade                                       │
//! │              ▼                                               │
//! │  level 0  [ slot 0 | slot 1 | ... ]  (1 tick) ──▶ expired    │
//! │                                                              │
//! │  SlotArena index: id ──▶ (level, slot, position)             │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Deterministic Time
//!
//! The wheel has no clock of its own. Time advances only through
//! [`TimingWheel::tick`], so tests can drive it step by step.
//!
//! # Example
//!
//! ```rust
//! use tempo_timer::{TimerId, TimingWheel, TimingWheelConfig};
//!
//! let mut wheel = TimingWheel::new(TimingWheelConfig::for_testing()).unwrap();
//! wheel.schedule("job-1", 3, None).unwrap();
//!
//! assert!(wheel.tick().is_empty());
//! assert!(wheel.tick().is_empty());
//! assert_eq!(wheel.tick(), vec![TimerId::from("job-1")]);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod driver;
pub mod error;
mod slots;
pub mod wheel;

pub use driver::TimerDriver;
pub use error::{CallbackError, TimerError, TimerResult};
pub use wheel::{
    CallbackFailure, ExpiredBatch, TimerCallback, TimerEvent, TimerId, TimingWheel,
    TimingWheelConfig, WheelStats,
};
