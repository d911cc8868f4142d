//! Tempo Tests - seeded property checks and cross-crate scenarios.
//!
//! Unit tests live inline in each crate under `#[cfg(test)]`. This crate holds
//! the tests that drive components with randomized, reproducible workloads or
//! wire several crates together.
//!
//! ## Test Organization
//!
//! - `timer_tests`: timing wheel liveness, cancellation and the tick driver
//! - `flow_tests`: PID boundedness, AIMD behavior, admission limits
//! - `stats_tests`: Bloom, t-digest, duplicate detector and collector checks
//! - `config_tests`: staged-update atomicity and rollback
//!
//! **Support Modules**:
//! - `properties`: property checkers returning the first [`PropertyViolation`]
//! - `scenarios`: seeds, workload generators and tracing setup
//!
//! ## Naming Conventions
//!
//! - Seeded property tests: `test_<component>_<property>_seeds`
//! - Scenario tests: `test_<component>_<scenario>`
//!
//! [`PropertyViolation`]: properties::PropertyViolation

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod properties;
pub mod scenarios;

#[cfg(test)]
mod config_tests;
#[cfg(test)]
mod flow_tests;
#[cfg(test)]
mod timer_tests;
