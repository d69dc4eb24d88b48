//! Bridge between OS signals and the host lifecycle.
//!
//! Only terminal diagnostics run in signal context. Every other handler is
//! deferred: delivery sets a flag, and the handler runs on the owning thread
//! when the scheduler reaches a safe point.

pub mod bridge;
pub mod handlers;
pub mod os;

use crate::scheduler::SimTime;

pub use bridge::{SignalBridge, SignalDispatcher, SignalError};
pub use handlers::{AbortSignalHandler, SnapshotHandler, TerminalHandler};

/// Signals whose handlers end the process after diagnostics.
pub const TERMINAL_SIGNALS: [i32; 3] = [libc::SIGSEGV, libc::SIGABRT, libc::SIGINT];
/// Signal that logs a snapshot and resumes.
pub const SNAPSHOT_SIGNAL: i32 = libc::SIGUSR1;
/// Resource-limit signals routed into the premature abort path.
pub const ABORT_SIGNALS: [i32; 2] = [libc::SIGUSR2, libc::SIGXCPU];

/// Where a handler runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerMode {
    /// In signal context, directly from the trampoline.
    Immediate,
    /// On the owning thread at the next safe point.
    Deferred,
}

/// One delivered signal as seen by its handler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delivery {
    pub signal: i32,
    /// Simulated time at dispatch. `None` in signal context.
    pub sim_time: Option<SimTime>,
}

pub trait SignalHandler: Send + Sync {
    fn mode(&self) -> HandlerMode {
        HandlerMode::Deferred
    }

    fn handle(&self, delivery: &Delivery);
}
