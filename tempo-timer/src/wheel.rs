//! Hierarchical timing wheel.
//!
//! The wheel keeps `levels` rings of `wheel_size` slots. A slot on level *k*
//! covers `wheel_size^k` ticks, so level 0 resolves single ticks and the
//! outermost level spans `wheel_size^levels` ticks in total.
//!
//! Scheduling picks the finest level whose range covers the remaining delay and
//! drops the entry straight into the slot holding its expiry. On each tick the
//! current level-0 slot expires, and whenever the tick crosses a level-*k*
//! boundary the matching level-*k* slot is emptied: due entries expire, the rest
//! cascade down to a finer level. An entry cascades at most `levels - 1` times.
//!
//! Delays longer than the wheel span are parked in the outermost level's
//! farthest slot and re-placed each time that slot comes around, so they still
//! expire on their exact tick.

use std::borrow::Borrow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tempo_core::limits::{TIMERS_MAX, WHEEL_LEVELS_MAX, WHEEL_SIZE_MAX};
use tempo_core::{CoreResult, ListenerId, Listeners};
use tracing::{debug, warn};

use crate::error::{CallbackError, TimerError, TimerResult};
use crate::slots::SlotArena;

/// Identifier of a scheduled timer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(String);

impl TimerId {
    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TimerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for TimerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for TimerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for TimerId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Work attached to a timer, run once when it expires.
///
/// Under [`crate::TimerDriver`] callbacks run after the wheel's lock is
/// released, so a callback may lock the shared wheel to reschedule or cancel.
/// A callback run by [`TimingWheel::tick`] on a wheel the caller has locked
/// must not lock it again.
pub type TimerCallback = Box<dyn FnOnce() -> Result<(), CallbackError> + Send>;

/// Configuration for a timing wheel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingWheelConfig {
    /// Slots per level.
    pub wheel_size: usize,

    /// Number of levels.
    pub levels: usize,

    /// Wall-clock length of one tick, used by the driver and `schedule_after`.
    pub tick_duration: Duration,

    /// Maximum number of pending timers.
    pub max_timers: usize,
}

impl TimingWheelConfig {
    /// Creates a configuration with the given geometry.
    #[must_use]
    pub const fn new(wheel_size: usize, levels: usize) -> Self {
        Self {
            wheel_size,
            levels,
            tick_duration: Duration::from_millis(1),
            max_timers: 100_000,
        }
    }

    /// Sets the tick duration.
    #[must_use]
    pub const fn with_tick_duration(mut self, tick_duration: Duration) -> Self {
        self.tick_duration = tick_duration;
        self
    }

    /// Sets the maximum number of pending timers.
    #[must_use]
    pub const fn with_max_timers(mut self, max_timers: usize) -> Self {
        self.max_timers = max_timers;
        self
    }

    /// Creates a small configuration for testing (8 slots, 3 levels, 512 ticks).
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            wheel_size: 8,
            levels: 3,
            tick_duration: Duration::from_millis(1),
            max_timers: 1_000,
        }
    }

    /// Total number of ticks covered by the wheel.
    #[must_use]
    pub fn span(&self) -> Option<u64> {
        let size = u64::try_from(self.wheel_size).ok()?;
        let levels = u32::try_from(self.levels).ok()?;
        size.checked_pow(levels)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `TimerError::InvalidConfig` if any field is out of range.
    pub fn validate(&self) -> TimerResult<()> {
        if self.wheel_size < 2 || self.wheel_size > WHEEL_SIZE_MAX {
            return Err(TimerError::InvalidConfig {
                message: format!(
                    "wheel_size {} must be in [2, {WHEEL_SIZE_MAX}]",
                    self.wheel_size
                ),
            });
        }
        if self.levels == 0 || self.levels > WHEEL_LEVELS_MAX {
            return Err(TimerError::InvalidConfig {
                message: format!("levels {} must be in [1, {WHEEL_LEVELS_MAX}]", self.levels),
            });
        }
        if self.span().is_none() {
            return Err(TimerError::InvalidConfig {
                message: format!(
                    "wheel span {}^{} overflows u64",
                    self.wheel_size, self.levels
                ),
            });
        }
        if self.tick_duration.is_zero() {
            return Err(TimerError::InvalidConfig {
                message: "tick_duration must be positive".to_string(),
            });
        }
        if self.max_timers == 0 || self.max_timers > TIMERS_MAX {
            return Err(TimerError::InvalidConfig {
                message: format!(
                    "max_timers {} must be in [1, {TIMERS_MAX}]",
                    self.max_timers
                ),
            });
        }
        Ok(())
    }
}

impl Default for TimingWheelConfig {
    fn default() -> Self {
        Self::new(256, 4)
    }
}

/// A timer held by the wheel.
pub(crate) struct TimerEntry {
    pub(crate) id: TimerId,
    pub(crate) expire_at: u64,
    /// Scheduling order, used to break ties between entries expiring together.
    pub(crate) seq: u64,
    /// Period of a repeating marker.
    pub(crate) interval: Option<u64>,
    pub(crate) callback: Option<TimerCallback>,
}

impl TimerEntry {
    /// Creates a callback-less entry.
    #[cfg(test)]
    pub(crate) fn marker(id: TimerId, expire_at: u64, seq: u64) -> Self {
        Self {
            id,
            expire_at,
            seq,
            interval: None,
            callback: None,
        }
    }
}

impl fmt::Debug for TimerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerEntry")
            .field("id", &self.id)
            .field("expire_at", &self.expire_at)
            .field("seq", &self.seq)
            .field("interval", &self.interval)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// Events emitted while ticking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    /// A timer expired.
    Fired {
        /// The timer.
        id: TimerId,
        /// Tick at which it expired.
        tick: u64,
    },
    /// A timer's callback returned an error or panicked.
    CallbackFailed {
        /// The timer.
        id: TimerId,
        /// Tick at which it expired.
        tick: u64,
        /// Error or panic message.
        message: String,
    },
}

/// A callback that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackFailure {
    /// The timer.
    pub id: TimerId,
    /// Tick at which it expired.
    pub tick: u64,
    /// Error or panic message.
    pub message: String,
}

/// Timers that expired on one tick, with their callbacks not yet run.
#[must_use = "callbacks in the batch run only through `run_callbacks`"]
pub struct ExpiredBatch {
    tick: u64,
    ids: Vec<TimerId>,
    callbacks: Vec<(TimerId, TimerCallback)>,
}

impl ExpiredBatch {
    /// Returns the tick the batch expired on.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Returns the expired ids in firing order.
    pub fn ids(&self) -> &[TimerId] {
        &self.ids
    }

    /// Runs the pending callbacks in firing order, each in isolation. Returns
    /// the failures; calling it again runs nothing.
    pub fn run_callbacks(&mut self) -> Vec<CallbackFailure> {
        let tick = self.tick;
        self.callbacks
            .drain(..)
            .filter_map(|(id, callback)| {
                run_isolated(callback)
                    .err()
                    .map(|message| CallbackFailure { id, tick, message })
            })
            .collect()
    }

    /// Consumes the batch and returns the expired ids.
    pub fn into_ids(self) -> Vec<TimerId> {
        self.ids
    }
}

impl fmt::Debug for ExpiredBatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpiredBatch")
            .field("tick", &self.tick)
            .field("ids", &self.ids)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

/// Statistics about a timing wheel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WheelStats {
    /// Current tick.
    pub current_tick: u64,
    /// Timers pending.
    pub pending: usize,
    /// Timers scheduled since creation or reset.
    pub total_scheduled: u64,
    /// Expirations reported by `tick`.
    pub total_fired: u64,
    /// Timers removed by `cancel`.
    pub total_cancelled: u64,
    /// Entries moved to a finer level.
    pub total_cascaded: u64,
    /// Callbacks that returned an error or panicked.
    pub callback_failures: u64,
}

/// Hierarchical timing wheel.
///
/// Not thread-safe by itself; share it behind a mutex (see [`crate::TimerDriver`]).
#[derive(Debug)]
pub struct TimingWheel {
    config: TimingWheelConfig,

    /// Slot duration per level: `wheel_size^level`.
    granularity: Vec<u64>,

    /// Slot storage plus id index.
    slots: SlotArena,

    /// Current tick.
    now: u64,

    /// Next scheduling sequence number.
    next_seq: u64,

    stats: WheelStats,

    listeners: Listeners<TimerEvent>,
}

impl TimingWheel {
    /// Creates a new timing wheel at tick 0.
    ///
    /// # Errors
    ///
    /// Returns `TimerError::InvalidConfig` if the configuration is invalid.
    pub fn new(config: TimingWheelConfig) -> TimerResult<Self> {
        config.validate()?;

        let size = config.wheel_size as u64;
        let mut granularity = Vec::with_capacity(config.levels);
        let mut g = 1_u64;
        for _ in 0..config.levels {
            granularity.push(g);
            g = g.saturating_mul(size);
        }

        Ok(Self {
            slots: SlotArena::new(config.levels, config.wheel_size),
            granularity,
            config,
            now: 0,
            next_seq: 0,
            stats: WheelStats::default(),
            listeners: Listeners::new(),
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &TimingWheelConfig {
        &self.config
    }

    /// Returns the current tick.
    #[must_use]
    pub const fn current_tick(&self) -> u64 {
        self.now
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if a timer with this id is pending.
    #[must_use]
    pub fn is_scheduled(&self, id: &str) -> bool {
        self.slots.contains(id)
    }

    /// Returns the absolute tick at which a pending timer expires.
    #[must_use]
    pub fn expiry_of(&self, id: &str) -> Option<u64> {
        self.slots.get(id).map(|entry| entry.expire_at)
    }

    /// Returns the level a pending timer currently sits on.
    #[must_use]
    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.slots.location(id).map(|location| location.level)
    }

    /// Schedules a timer to expire `delay_ticks` ticks from now.
    ///
    /// A delay of 0 expires on the next tick. Scheduling an id that is already
    /// pending replaces the earlier timer.
    ///
    /// # Errors
    ///
    /// Returns `TimerError::EmptyId` for an empty id and
    /// `TimerError::CapacityExceeded` if the wheel is full. No state changes on
    /// error.
    pub fn schedule(
        &mut self,
        id: impl Into<TimerId>,
        delay_ticks: u64,
        callback: Option<TimerCallback>,
    ) -> TimerResult<()> {
        let id = id.into();
        self.check_admission(&id)?;

        let expire_at = self.now.saturating_add(delay_ticks.max(1));
        let entry = TimerEntry {
            id,
            expire_at,
            seq: self.take_seq(),
            interval: None,
            callback,
        };
        debug!(id = %entry.id, expire_at, "Scheduled timer");
        self.stats.total_scheduled += 1;
        self.insert(entry);
        Ok(())
    }

    /// Schedules a repeating marker reported by `tick` every `every_ticks` ticks
    /// until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `TimerError::InvalidInterval` for a zero period, plus the errors
    /// of [`TimingWheel::schedule`].
    pub fn schedule_interval(&mut self, id: impl Into<TimerId>, every_ticks: u64) -> TimerResult<()> {
        if every_ticks == 0 {
            return Err(TimerError::InvalidInterval);
        }
        let id = id.into();
        self.check_admission(&id)?;

        let entry = TimerEntry {
            id,
            expire_at: self.now.saturating_add(every_ticks),
            seq: self.take_seq(),
            interval: Some(every_ticks),
            callback: None,
        };
        debug!(id = %entry.id, every_ticks, "Scheduled interval");
        self.stats.total_scheduled += 1;
        self.insert(entry);
        Ok(())
    }

    /// Schedules a timer after a wall-clock delay, rounded up to whole ticks.
    ///
    /// # Errors
    ///
    /// Same as [`TimingWheel::schedule`].
    pub fn schedule_after(
        &mut self,
        id: impl Into<TimerId>,
        delay: Duration,
        callback: Option<TimerCallback>,
    ) -> TimerResult<()> {
        let tick_nanos = self.config.tick_duration.as_nanos();
        let ticks = delay.as_nanos().div_ceil(tick_nanos);
        let ticks = u64::try_from(ticks).unwrap_or(u64::MAX);
        self.schedule(id, ticks, callback)
    }

    /// Cancels a pending timer. Returns `false` if it was not pending.
    pub fn cancel(&mut self, id: &str) -> bool {
        if self.slots.remove(id).is_some() {
            self.stats.total_cancelled += 1;
            debug!(id, "Cancelled timer");
            true
        } else {
            false
        }
    }

    /// Advances time by one tick.
    ///
    /// Returns the ids of every timer that expired on this tick, ordered by
    /// scheduling order. Callbacks run in isolation: a callback that errors or
    /// panics is reported through `TimerEvent::CallbackFailed` and does not
    /// stop the remaining expirations.
    pub fn tick(&mut self) -> Vec<TimerId> {
        let mut batch = self.advance();
        let failures = batch.run_callbacks();
        self.report_failures(failures);
        batch.into_ids()
    }

    /// Advances time by one tick without running callbacks.
    ///
    /// The returned batch owns the expired callbacks. A host that shares the
    /// wheel behind a lock calls [`ExpiredBatch::run_callbacks`] after
    /// releasing it, so callbacks may lock the wheel again to reschedule, and
    /// then hands any failures back through [`TimingWheel::report_failures`].
    pub fn advance(&mut self) -> ExpiredBatch {
        self.now += 1;
        let now = self.now;
        let size = self.config.wheel_size as u64;
        let mut due = Vec::new();

        for level in (1..self.config.levels).rev() {
            let g = self.granularity[level];
            if now % g != 0 {
                continue;
            }
            #[allow(clippy::cast_possible_truncation)] // Bounded by wheel_size.
            let slot = ((now / g) % size) as usize;
            for entry in self.slots.drain_slot(level, slot) {
                if entry.expire_at <= now {
                    due.push(entry);
                } else {
                    self.stats.total_cascaded += 1;
                    self.insert(entry);
                }
            }
        }

        #[allow(clippy::cast_possible_truncation)] // Bounded by wheel_size.
        let slot = (now % size) as usize;
        for entry in self.slots.drain_slot(0, slot) {
            if entry.expire_at <= now {
                due.push(entry);
            } else {
                self.insert(entry);
            }
        }

        let mut batch = ExpiredBatch {
            tick: now,
            ids: Vec::with_capacity(due.len()),
            callbacks: Vec::new(),
        };
        due.sort_by_key(|entry| (entry.expire_at, entry.seq));

        for mut entry in due {
            self.stats.total_fired += 1;
            if let Some(callback) = entry.callback.take() {
                batch.callbacks.push((entry.id.clone(), callback));
            }
            if !self.listeners.is_empty() {
                self.listeners.emit(&TimerEvent::Fired {
                    id: entry.id.clone(),
                    tick: now,
                });
            }
            batch.ids.push(entry.id.clone());

            if let Some(every) = entry.interval {
                entry.expire_at = now.saturating_add(every);
                entry.seq = self.take_seq();
                self.insert(entry);
            }
        }
        batch
    }

    /// Records callback failures from an [`ExpiredBatch`] in the stats and
    /// emits `TimerEvent::CallbackFailed` for each.
    pub fn report_failures(&mut self, failures: Vec<CallbackFailure>) {
        for failure in failures {
            self.stats.callback_failures += 1;
            warn!(
                id = %failure.id,
                tick = failure.tick,
                error = %failure.message,
                "Timer callback failed"
            );
            self.listeners.emit(&TimerEvent::CallbackFailed {
                id: failure.id,
                tick: failure.tick,
                message: failure.message,
            });
        }
    }

    /// Drops every pending timer and rewinds to tick 0. Listeners are kept.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.now = 0;
        self.next_seq = 0;
        self.stats = WheelStats::default();
    }

    /// Returns statistics about the wheel.
    #[must_use]
    pub fn stats(&self) -> WheelStats {
        WheelStats {
            current_tick: self.now,
            pending: self.slots.len(),
            ..self.stats
        }
    }

    /// Registers an observer for timer events.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener limit is reached.
    pub fn subscribe<F>(&mut self, listener: F) -> CoreResult<ListenerId>
    where
        F: FnMut(&TimerEvent) + Send + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Removes an observer.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Checks that the id index agrees with slot contents.
    #[must_use]
    pub fn index_is_consistent(&self) -> bool {
        self.slots.is_consistent()
    }

    fn check_admission(&self, id: &TimerId) -> TimerResult<()> {
        if id.as_str().is_empty() {
            return Err(TimerError::EmptyId);
        }
        let pending = self.slots.len();
        if pending >= self.config.max_timers && !self.slots.contains(id.as_str()) {
            return Err(TimerError::CapacityExceeded {
                pending,
                max: self.config.max_timers,
            });
        }
        Ok(())
    }

    const fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Places an entry on the finest level whose range covers its remaining
    /// delay. `expire_at` must be in the future.
    fn insert(&mut self, entry: TimerEntry) {
        let size = self.config.wheel_size as u64;
        let remaining = entry.expire_at.saturating_sub(self.now);
        let top = self.config.levels - 1;

        let (level, slot) = match (0..self.config.levels)
            .find(|&level| remaining < self.granularity[level].saturating_mul(size))
        {
            Some(level) => (level, (entry.expire_at / self.granularity[level]) % size),
            // Beyond the span: park in the slot visited last.
            None => (top, (self.now / self.granularity[top]) % size),
        };

        #[allow(clippy::cast_possible_truncation)] // Bounded by wheel_size.
        let slot = slot as usize;
        self.slots.insert(level, slot, entry);
    }
}

/// Runs a callback, converting both errors and panics into a message.
fn run_isolated(callback: TimerCallback) -> Result<(), String> {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(payload
            .downcast_ref::<&str>()
            .map(|msg| (*msg).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "callback panicked".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    fn wheel() -> TimingWheel {
        TimingWheel::new(TimingWheelConfig::for_testing()).unwrap()
    }

    fn tick_until(wheel: &mut TimingWheel, ticks: u64) -> Vec<(u64, TimerId)> {
        let mut fired = Vec::new();
        for _ in 0..ticks {
            for id in wheel.tick() {
                fired.push((wheel.current_tick(), id));
            }
        }
        fired
    }

    fn counter_callback(counter: &Arc<AtomicU32>) -> Option<TimerCallback> {
        let counter = Arc::clone(counter);
        Some(Box::new(move || -> Result<(), CallbackError> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
    }

    fn failing_callback(message: &'static str) -> Option<TimerCallback> {
        Some(Box::new(move || -> Result<(), CallbackError> {
            Err(message.into())
        }))
    }

    fn panicking_callback(message: &'static str) -> Option<TimerCallback> {
        Some(Box::new(move || -> Result<(), CallbackError> {
            panic!("{message}")
        }))
    }

    #[test]
    fn test_zero_delay_fires_next_tick() {
        let mut wheel = wheel();
        wheel.schedule("a", 0, None).unwrap();

        assert_eq!(wheel.tick(), vec![TimerId::from("a")]);
        assert_eq!(wheel.pending_count(), 0);
    }

    #[test]
    fn test_fires_on_exact_tick_across_levels() {
        let mut wheel = wheel(); // 8 slots x 3 levels = 512 ticks.
        for delay in [1_u64, 7, 8, 9, 63, 64, 65, 100, 511] {
            wheel.schedule(format!("t{delay}"), delay, None).unwrap();
        }

        let fired = tick_until(&mut wheel, 512);
        for (tick, id) in &fired {
            assert_eq!(id.as_str(), format!("t{tick}"));
        }
        assert_eq!(fired.len(), 9);
        assert_eq!(wheel.pending_count(), 0);
    }

    #[test]
    fn test_schedule_uses_coarse_level() {
        let mut wheel = wheel();
        wheel.schedule("near", 5, None).unwrap();
        wheel.schedule("mid", 20, None).unwrap();
        wheel.schedule("far", 200, None).unwrap();

        assert_eq!(wheel.level_of("near"), Some(0));
        assert_eq!(wheel.level_of("mid"), Some(1));
        assert_eq!(wheel.level_of("far"), Some(2));
    }

    #[test]
    fn test_cascade_moves_entry_down() {
        let mut wheel = wheel();
        wheel.schedule("far", 200, None).unwrap();

        tick_until(&mut wheel, 192);
        assert!(wheel.level_of("far").unwrap() < 2);
        assert!(wheel.stats().total_cascaded >= 1);
        assert!(wheel.index_is_consistent());
    }

    #[test]
    fn test_delay_beyond_span_still_fires_on_time() {
        let mut wheel = wheel();
        wheel.schedule("late", 1_300, None).unwrap();
        assert_eq!(wheel.level_of("late"), Some(2));

        let fired = tick_until(&mut wheel, 1_400);
        assert_eq!(fired, vec![(1_300, TimerId::from("late"))]);
    }

    #[test]
    fn test_schedule_mid_stream() {
        let mut wheel = wheel();
        tick_until(&mut wheel, 37);
        wheel.schedule("x", 90, None).unwrap();

        let fired = tick_until(&mut wheel, 200);
        assert_eq!(fired, vec![(127, TimerId::from("x"))]);
    }

    #[test]
    fn test_cancel() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut wheel = wheel();
        wheel.schedule("a", 10, counter_callback(&counter)).unwrap();

        assert!(wheel.cancel("a"));
        assert!(!wheel.cancel("a"));
        assert!(!wheel.cancel("missing"));

        assert!(tick_until(&mut wheel, 20).is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(wheel.stats().total_cancelled, 1);
    }

    #[test]
    fn test_cancel_after_fire_returns_false() {
        let mut wheel = wheel();
        wheel.schedule("a", 1, None).unwrap();
        wheel.tick();
        assert!(!wheel.cancel("a"));
    }

    #[test]
    fn test_callbacks_run_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut wheel = wheel();
        wheel.schedule("a", 3, counter_callback(&counter)).unwrap();

        tick_until(&mut wheel, 50);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_callback_does_not_block_siblings() {
        let counter = Arc::new(AtomicU32::new(0));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let mut wheel = wheel();

        let seen = Arc::clone(&failures);
        wheel
            .subscribe(move |event| {
                if let TimerEvent::CallbackFailed { id, message, .. } = event {
                    seen.lock().unwrap().push((id.clone(), message.clone()));
                }
            })
            .unwrap();

        wheel.schedule("err", 2, failing_callback("boom")).unwrap();
        wheel.schedule("panic", 2, panicking_callback("kaboom")).unwrap();
        wheel.schedule("ok", 2, counter_callback(&counter)).unwrap();

        wheel.tick();
        let fired = wheel.tick();

        assert_eq!(fired, vec![TimerId::from("err"), "panic".into(), "ok".into()]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(wheel.stats().callback_failures, 2);

        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0], (TimerId::from("err"), "boom".to_string()));
        assert_eq!(failures[1], (TimerId::from("panic"), "kaboom".to_string()));
    }

    #[test]
    fn test_same_tick_ordered_by_schedule_order() {
        let mut wheel = wheel();
        wheel.schedule("b", 70, None).unwrap();
        wheel.schedule("a", 70, None).unwrap();
        tick_until(&mut wheel, 10);
        wheel.schedule("c", 60, None).unwrap();

        let fired = tick_until(&mut wheel, 70);
        let ids: Vec<_> = fired.iter().map(|(_, id)| id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_reschedule_replaces() {
        let mut wheel = wheel();
        wheel.schedule("a", 5, None).unwrap();
        wheel.schedule("a", 50, None).unwrap();

        assert_eq!(wheel.pending_count(), 1);
        let fired = tick_until(&mut wheel, 60);
        assert_eq!(fired, vec![(50, TimerId::from("a"))]);
    }

    #[test]
    fn test_interval_repeats_until_cancelled() {
        let mut wheel = wheel();
        wheel.schedule_interval("beat", 10).unwrap();

        let fired = tick_until(&mut wheel, 35);
        let ticks: Vec<_> = fired.iter().map(|(tick, _)| *tick).collect();
        assert_eq!(ticks, vec![10, 20, 30]);

        assert!(wheel.cancel("beat"));
        assert!(tick_until(&mut wheel, 20).is_empty());
    }

    #[test]
    fn test_interval_rejects_zero() {
        let mut wheel = wheel();
        assert_eq!(
            wheel.schedule_interval("beat", 0),
            Err(TimerError::InvalidInterval)
        );
        assert_eq!(wheel.pending_count(), 0);
    }

    #[test]
    fn test_schedule_after_rounds_up() {
        let config = TimingWheelConfig::for_testing().with_tick_duration(Duration::from_millis(10));
        let mut wheel = TimingWheel::new(config).unwrap();
        wheel
            .schedule_after("a", Duration::from_millis(25), None)
            .unwrap();

        assert_eq!(wheel.expiry_of("a"), Some(3));
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut wheel = wheel();
        assert_eq!(wheel.schedule("", 5, None), Err(TimerError::EmptyId));
        assert_eq!(wheel.stats().total_scheduled, 0);
    }

    #[test]
    fn test_capacity_limit() {
        let config = TimingWheelConfig::for_testing().with_max_timers(2);
        let mut wheel = TimingWheel::new(config).unwrap();
        wheel.schedule("a", 5, None).unwrap();
        wheel.schedule("b", 5, None).unwrap();

        assert!(matches!(
            wheel.schedule("c", 5, None),
            Err(TimerError::CapacityExceeded { pending: 2, max: 2 })
        ));
        // Replacing an existing id is still allowed.
        wheel.schedule("a", 9, None).unwrap();
        assert_eq!(wheel.pending_count(), 2);
    }

    #[test]
    fn test_reset() {
        let mut wheel = wheel();
        wheel.schedule("a", 5, None).unwrap();
        tick_until(&mut wheel, 3);

        wheel.reset();
        assert_eq!(wheel.current_tick(), 0);
        assert_eq!(wheel.pending_count(), 0);
        assert!(tick_until(&mut wheel, 10).is_empty());
    }

    #[test]
    fn test_invalid_config() {
        assert!(TimingWheel::new(TimingWheelConfig::new(1, 3)).is_err());
        assert!(TimingWheel::new(TimingWheelConfig::new(8, 0)).is_err());
        assert!(TimingWheel::new(TimingWheelConfig::new(4096, 8)).is_err());
        assert!(TimingWheel::new(
            TimingWheelConfig::for_testing().with_tick_duration(Duration::ZERO)
        )
        .is_err());
    }

    #[test]
    fn test_advance_defers_callbacks() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut wheel = wheel();
        wheel.schedule("a", 1, counter_callback(&counter)).unwrap();
        wheel.schedule("b", 1, failing_callback("boom")).unwrap();

        let mut batch = wheel.advance();
        assert_eq!(batch.tick(), 1);
        assert_eq!(batch.ids(), &[TimerId::from("a"), TimerId::from("b")]);
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // The wheel is free while callbacks run.
        wheel.schedule("c", 2, None).unwrap();
        let failures = batch.run_callbacks();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(batch.run_callbacks().is_empty());
        assert_eq!(
            failures,
            vec![CallbackFailure {
                id: TimerId::from("b"),
                tick: 1,
                message: "boom".to_string(),
            }]
        );

        wheel.report_failures(failures);
        assert_eq!(wheel.stats().callback_failures, 1);
        assert_eq!(batch.into_ids().len(), 2);
        assert!(wheel.is_scheduled("c"));
    }

    #[test]
    fn test_fired_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut wheel = wheel();
        let sink = Arc::clone(&events);
        let listener = wheel
            .subscribe(move |event| sink.lock().unwrap().push(event.clone()))
            .unwrap();

        wheel.schedule("a", 2, None).unwrap();
        tick_until(&mut wheel, 2);
        assert_eq!(
            *events.lock().unwrap(),
            vec![TimerEvent::Fired {
                id: TimerId::from("a"),
                tick: 2
            }]
        );

        assert!(wheel.unsubscribe(listener));
        wheel.schedule("b", 1, None).unwrap();
        wheel.tick();
        assert_eq!(events.lock().unwrap().len(), 1);
    }
}
