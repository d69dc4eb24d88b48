//! Credit-gated single stepping.
//!
//! Instead of running freely, the scheduler processes one event per credit.
//! Credits come from another thread (the [`server`]); the loop consumes them on
//! the thread that owns the scheduler.

pub mod server;

use crate::scheduler::EventScheduler;
use log::{debug, info};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

pub use server::StepServer;

/// How long the loop waits for credits before servicing the scheduler again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Shared credit counter.
#[derive(Debug, Clone, Default)]
pub struct StepBudget {
    inner: Arc<(Mutex<u64>, Condvar)>,
}

impl StepBudget {
    pub fn new() -> Self {
        Self::default()
    }

    fn credits_guard(&self) -> MutexGuard<'_, u64> {
        self.inner
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add `credits` and wake the stepping loop. Returns the new balance.
    pub fn add(&self, credits: u64) -> u64 {
        let mut guard = self.credits_guard();
        *guard = guard.saturating_add(credits);
        self.inner.1.notify_all();
        *guard
    }

    pub fn credits(&self) -> u64 {
        *self.credits_guard()
    }

    /// Consume one credit if there is one.
    pub fn try_take(&self) -> bool {
        let mut guard = self.credits_guard();
        if *guard == 0 {
            return false;
        }
        *guard -= 1;
        true
    }

    /// Block until credits are available or `timeout` elapsed.
    pub fn wait(&self, timeout: Duration) {
        let guard = self.credits_guard();
        let _ = self
            .inner
            .1
            .wait_timeout_while(guard, timeout, |credits| *credits == 0)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
    }
}

pub struct SteppingController {
    budget: StepBudget,
    poll_interval: Duration,
}

impl SteppingController {
    pub fn new(budget: StepBudget) -> Self {
        Self {
            budget,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Replace the free-running loop. Returns the number of events processed.
    ///
    /// Ends when the scheduler is stopped or has no events left, whatever the
    /// remaining credits. Safe points are serviced before every credit is
    /// taken, so signals and queued commands (such as an abort) take effect
    /// while idle and never cost a credit.
    pub fn run<S: EventScheduler + ?Sized>(&self, scheduler: &mut S) -> u64 {
        info!("Single-step mode: waiting for credits");
        scheduler.start();
        let mut processed = 0u64;
        loop {
            scheduler.service();
            if !scheduler.is_running() {
                break;
            }
            if !scheduler.has_pending_events() {
                debug!("No events left, leaving single-step mode");
                break;
            }
            if !self.budget.try_take() {
                self.budget.wait(self.poll_interval);
                continue;
            }
            if scheduler.process_one_event() {
                processed += 1;
            } else {
                // Stopped between the check and the event: nothing ran.
                self.budget.add(1);
            }
        }
        info!("Single-step mode ended after {} events", processed);
        processed
    }
}
