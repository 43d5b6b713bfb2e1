//! Operator control state for the engine driver.
//!
//! Shared between the driver loop and whatever surface the operator uses
//! (signals, a console). Stopping ends the driver loop cleanly; halting
//! the world itself goes through [`Engine::stop_world`]. All fields are
//! atomics or [`Notify`] handles, so reads on the driver's hot path take
//! no locks.
//!
//! [`Engine::stop_world`]: crate::runner::Engine::stop_world

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

/// Shared operator control state.
#[derive(Debug)]
pub struct OperatorState {
    /// Whether a stop has been requested.
    stop_requested: AtomicBool,

    /// Wakes the driver when a stop is requested.
    stop_notify: Notify,

    /// Steps run since the driver started.
    steps: AtomicU64,

    /// Wall-clock time the driver started.
    started_at: DateTime<Utc>,
}

impl OperatorState {
    /// Fresh state with no stop requested.
    pub fn new() -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            steps: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    // -----------------------------------------------------------------------
    // Stop
    // -----------------------------------------------------------------------

    /// Request a clean stop.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
        self.stop_notify.notify_waiters();
    }

    /// Whether a stop has been requested.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Resolve once a stop has been requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self.stop_notify.notified();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }

    // -----------------------------------------------------------------------
    // Counters
    // -----------------------------------------------------------------------

    /// Count one completed step.
    pub fn record_step(&self) -> u64 {
        self.steps.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    /// Steps run so far.
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Acquire)
    }

    /// Seconds since the driver started.
    pub fn elapsed_seconds(&self) -> u64 {
        let elapsed = Utc::now()
            .signed_duration_since(self.started_at)
            .num_seconds();
        u64::try_from(elapsed.max(0)).unwrap_or(u64::MAX)
    }
}

impl Default for OperatorState {
    fn default() -> Self {
        Self::new()
    }
}
