//! End-of-run control: the scheduled shutdown, the abort latch, and the
//! heartbeat mark.

use crate::scheduler::{CommandQueue, EventScheduler, Scheduler, SimTime};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Single-assignment flag. Only the first [`trip`](Self::trip) wins.
#[derive(Debug, Clone, Default)]
pub struct AbortLatch(Arc<AtomicBool>);

impl AbortLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the call that flipped the latch.
    pub fn trip(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_tripped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct ShutdownState {
    executions: AtomicU64,
    aborted: AtomicBool,
}

fn execute_shutdown(scheduler: &mut Scheduler, state: &ShutdownState, aborted: bool) {
    // Runs on the owning thread only.
    if state.executions.load(Ordering::Acquire) > 0 {
        warn!("Shutdown requested again at t={}, ignoring", scheduler.now());
        return;
    }
    state.executions.fetch_add(1, Ordering::AcqRel);
    if aborted {
        state.aborted.store(true, Ordering::Release);
        warn!("Premature abort: shutting down at t={}", scheduler.now());
    } else {
        info!("Maximum simulated time reached at t={}", scheduler.now());
    }
    scheduler.stop();
}

/// Requests a premature abort from any thread or from a signal handler.
///
/// The first request queues one shutdown command for the scheduler; later
/// requests do nothing.
#[derive(Clone)]
pub struct AbortHandle {
    latch: AbortLatch,
    commands: CommandQueue,
    state: Arc<ShutdownState>,
}

impl AbortHandle {
    /// Returns `true` if this call queued the shutdown.
    pub fn request(&self) -> bool {
        if !self.latch.trip() {
            debug!("Abort already requested");
            return false;
        }
        let state = Arc::clone(&self.state);
        self.commands
            .push(Box::new(move |scheduler: &mut Scheduler| execute_shutdown(scheduler, &state, true)));
        true
    }

    pub fn is_requested(&self) -> bool {
        self.latch.is_tripped()
    }
}

pub struct SimControl {
    max_sim_time: SimTime,
    latch: AbortLatch,
    commands: CommandQueue,
    state: Arc<ShutdownState>,
}

impl SimControl {
    pub fn new(scheduler: &Scheduler, max_sim_time: SimTime) -> Self {
        Self {
            max_sim_time,
            latch: AbortLatch::new(),
            commands: scheduler.command_queue(),
            state: Arc::new(ShutdownState::default()),
        }
    }

    /// Schedule the regular shutdown at the maximum simulated time and, if
    /// `mark_interval` is set, a recurring heartbeat.
    pub fn schedule(&self, scheduler: &mut Scheduler, mark_interval: Option<SimTime>) {
        let state = Arc::clone(&self.state);
        scheduler.schedule_at(self.max_sim_time, move |scheduler| {
            execute_shutdown(scheduler, &state, false)
        });
        if let Some(interval) = mark_interval {
            schedule_mark(scheduler, interval);
        }
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            latch: self.latch.clone(),
            commands: self.commands.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn max_sim_time(&self) -> SimTime {
        self.max_sim_time
    }

    /// How many times the shutdown sequence ran.
    pub fn shutdown_count(&self) -> u64 {
        self.state.executions.load(Ordering::Acquire)
    }

    pub fn was_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::Acquire)
    }
}

fn schedule_mark(scheduler: &mut Scheduler, interval: SimTime) {
    scheduler.schedule_in(interval, move |scheduler| {
        debug!("--- MARK --- t={}", scheduler.now());
        schedule_mark(scheduler, interval);
    });
}
