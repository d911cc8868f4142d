//! Tempo Core - shared building blocks for the Tempo control plane.
//!
//! Every Tempo component (timing wheel, PID controller, congestion controller,
//! statistics, configuration store) is a plain single-owner structure. This
//! crate holds the few pieces they share:
//!
//! - [`Listeners`]: a per-component observer registry. Components emit typed
//!   events to the listeners the host registered; there is no global bus.
//! - [`limits`]: explicit upper bounds for every resource a component may grow.
//!
//! # Design Principles (TigerStyle)
//!
//! - **Explicit limits**: every collection has a bounded maximum
//! - **No globals**: the host owns one instance per logical domain
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
pub mod limits;
mod listeners;

pub use error::{CoreError, CoreResult};
pub use listeners::{ListenerId, Listeners};
