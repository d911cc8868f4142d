//! Adaptive concurrency control for Tempo.
//!
//! This crate decides how much work a host may run at once. It includes:
//!
//! - **PID controller**: steers concurrency toward a latency target, with a
//!   Ziegler–Nichols auto-tune for its gains.
//! - **Congestion controller**: a TCP-style window (slow start, congestion
//!   avoidance, fast recovery) with an RTT-based timeout estimate.
//! - **Admission controller**: admits operations up to the smaller of the two
//!   limits and feeds completions back into both.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    AdmissionController                      │
//! │                                                             │
//! │   latency ──▶ ┌───────────────┐                             │
//! │               │ PidController │──▶ concurrency ─┐           │
//! │               └───────────────┘                 ├─▶ min ──▶ limit
//! │   outcome ──▶ ┌──────────────────────┐          │           │
//! │               │ CongestionController │──▶ cwnd ─┘           │
//! │               └──────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # DST Compatibility
//!
//! Nothing here reads a clock. Latencies arrive as samples and the admission
//! gate takes `current_time_us` as a parameter.
//!
//! # Example
//!
//! ```rust
//! use tempo_flow::{AdmissionConfig, AdmissionController, Outcome};
//!
//! let mut gate = AdmissionController::new(AdmissionConfig::for_testing()).unwrap();
//!
//! let permit = gate.try_acquire(0).unwrap();
//! // ... run the operation ...
//! let limit = gate.record_completion(permit, Outcome::Success, 40_000).unwrap();
//! assert!(limit >= 1);
//! ```

#![warn(missing_docs)]

pub mod admission;
pub mod congestion;
pub mod error;
pub mod pid;

pub use admission::{AdmissionConfig, AdmissionController, AdmissionStats, Outcome, Permit};
pub use congestion::{
    CongestionConfig, CongestionController, CongestionEvent, CongestionPhase, CongestionState,
    TransitionReason,
};
pub use error::{FlowError, FlowResult};
pub use pid::{
    AutoTuneConfig, PidConfig, PidConfigUpdate, PidController, PidEvent, PidGains, PidState,
    TuningPhase,
};
