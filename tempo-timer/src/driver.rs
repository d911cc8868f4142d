//! Background tick task for a shared timing wheel.
//!
//! The wheel itself is passive. `TimerDriver` owns the one periodic activity in
//! Tempo: a tokio task that advances the wheel every `tick_duration`, runs the
//! expired callbacks with the lock released, and forwards the expired ids to
//! the host over a bounded channel.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::wheel::{TimerId, TimingWheel};

/// Handle to a running tick task.
#[derive(Debug)]
pub struct TimerDriver {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl TimerDriver {
    /// Starts ticking `wheel` at its configured tick duration.
    ///
    /// Returns the driver handle and a receiver of expired timer ids. The
    /// channel holds at most `channel_capacity` ids; when the host falls behind,
    /// ticking waits for room, and `stop` still returns while it waits. If the
    /// receiver is dropped the wheel keeps ticking and running callbacks.
    ///
    /// Callbacks run without the wheel's lock held, so they may lock `wheel`
    /// to reschedule or cancel timers.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(
        wheel: Arc<Mutex<TimingWheel>>,
        channel_capacity: usize,
    ) -> (Self, mpsc::Receiver<TimerId>) {
        let (expired_tx, expired_rx) = mpsc::channel(channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let handle = tokio::spawn(tick_task(wheel, expired_tx, shutdown_rx));
        let driver = Self {
            shutdown_tx,
            handle,
        };
        (driver, expired_rx)
    }

    /// Returns true while the tick task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Stops the tick task and waits for it to exit.
    pub async fn stop(self) {
        // The task may already be gone; a closed channel is fine.
        let _ = self.shutdown_tx.send(()).await;
        if let Err(err) = self.handle.await {
            warn!(error = %err, "Timer tick task did not exit cleanly");
        }
    }
}

async fn tick_task(
    wheel: Arc<Mutex<TimingWheel>>,
    expired_tx: mpsc::Sender<TimerId>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let period = lock(&wheel).config().tick_duration;
    let mut tick_interval = time::interval_at(Instant::now() + period, period);
    tick_interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut forwarding = true;

    info!(period_us = period.as_micros(), "Timer tick task started");

    'ticking: loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                debug!("Timer tick task shutting down");
                break;
            }
            _ = tick_interval.tick() => {
                let mut batch = lock(&wheel).advance();
                let failures = batch.run_callbacks();
                if !failures.is_empty() {
                    lock(&wheel).report_failures(failures);
                }
                if !forwarding {
                    continue;
                }
                for id in batch.into_ids() {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            debug!("Timer tick task shutting down with undelivered ids");
                            break 'ticking;
                        }
                        sent = expired_tx.send(id) => {
                            if sent.is_err() {
                                debug!("Expired-id receiver dropped; ticking without forwarding");
                                forwarding = false;
                                break;
                            }
                        }
                    }
                }
            }
        }
    }

    info!("Timer tick task stopped");
}

/// The guard is never held across a callback or an await, so a poisoned lock
/// still guards a consistent wheel.
fn lock(wheel: &Mutex<TimingWheel>) -> std::sync::MutexGuard<'_, TimingWheel> {
    wheel.lock().unwrap_or_else(PoisonError::into_inner)
}
