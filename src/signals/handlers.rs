//! The host's signal handlers.

use super::os::signal_name;
use super::{Delivery, HandlerMode, SignalHandler};
use crate::lifecycle::sim_control::AbortHandle;
use crate::lifecycle::ExitStatus;
use log::{error, info, warn};
use std::backtrace::Backtrace;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

/// Segfault, abort, interrupt: log, optionally attach a debugger, exit.
///
/// Runs in signal context. Nothing here keeps simulation state consistent;
/// the process does not return from [`handle`](SignalHandler::handle).
pub struct TerminalHandler {
    program: String,
    debugger: Option<String>,
    backtrace: bool,
}

impl TerminalHandler {
    pub fn new(program: impl Into<String>, debugger: Option<String>, backtrace: bool) -> Self {
        Self {
            program: program.into(),
            debugger,
            backtrace,
        }
    }

    /// Shell command that attaches the configured debugger to this process.
    pub fn debugger_command(&self) -> Option<String> {
        self.debugger
            .as_ref()
            .map(|cmd| format!("{} {} {}", cmd, self.program, std::process::id()))
    }
}

impl SignalHandler for TerminalHandler {
    fn mode(&self) -> HandlerMode {
        HandlerMode::Immediate
    }

    fn handle(&self, delivery: &Delivery) {
        error!(
            "Received {} ({}), terminating",
            signal_name(delivery.signal),
            delivery.signal
        );
        if self.backtrace {
            error!("Backtrace:\n{}", Backtrace::force_capture());
        }
        if let Some(command) = self.debugger_command() {
            error!("Attaching debugger: {}", command);
            if let Err(e) = Command::new("sh").arg("-c").arg(&command).status() {
                error!("Failed to start debugger: {}", e);
            }
        }
        // SAFETY: _exit is async-signal-safe and never returns.
        unsafe { libc::_exit(ExitStatus::Error.code()) }
    }
}

/// Logs the simulated time (and a backtrace if enabled), then resumes.
#[derive(Default)]
pub struct SnapshotHandler {
    backtrace: bool,
    snapshots: AtomicU64,
}

impl SnapshotHandler {
    pub fn new(backtrace: bool) -> Self {
        Self {
            backtrace,
            snapshots: AtomicU64::new(0),
        }
    }

    pub fn snapshots(&self) -> u64 {
        self.snapshots.load(Ordering::Acquire)
    }
}

impl SignalHandler for SnapshotHandler {
    fn handle(&self, delivery: &Delivery) {
        self.snapshots.fetch_add(1, Ordering::AcqRel);
        match delivery.sim_time {
            Some(t) => info!("Snapshot on {}: simulated time {}", signal_name(delivery.signal), t),
            None => info!("Snapshot on {}: simulated time unknown", signal_name(delivery.signal)),
        }
        if self.backtrace {
            info!("Backtrace:\n{}", Backtrace::force_capture());
        }
    }
}

/// Resource-limit signals: request the premature abort.
pub struct AbortSignalHandler {
    abort: AbortHandle,
}

impl AbortSignalHandler {
    pub fn new(abort: AbortHandle) -> Self {
        Self { abort }
    }
}

impl SignalHandler for AbortSignalHandler {
    fn handle(&self, delivery: &Delivery) {
        if self.abort.request() {
            warn!(
                "Received {} ({}): resource limit reached, aborting simulation",
                signal_name(delivery.signal),
                delivery.signal
            );
        } else {
            info!("Received {} again, abort already under way", signal_name(delivery.signal));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::sim_control::SimControl;
    use crate::scheduler::{EventScheduler, Scheduler};

    #[test]
    fn test_debugger_command_names_process() {
        let handler = TerminalHandler::new("simhost", Some("gdb -p".to_string()), false);
        let command = handler.debugger_command().unwrap();
        assert!(command.starts_with("gdb -p simhost "));
        assert!(command.ends_with(&std::process::id().to_string()));
        assert_eq!(handler.mode(), HandlerMode::Immediate);
        assert!(TerminalHandler::new("simhost", None, true).debugger_command().is_none());
    }

    #[test]
    fn test_snapshot_resumes() {
        let handler = SnapshotHandler::new(false);
        handler.handle(&Delivery {
            signal: libc::SIGUSR1,
            sim_time: Some(12.0),
        });
        assert_eq!(handler.snapshots(), 1);
        assert_eq!(handler.mode(), HandlerMode::Deferred);
    }

    #[test]
    fn test_abort_handler_collapses_repeats() {
        let mut scheduler = Scheduler::new();
        let control = SimControl::new(&scheduler, 50.0);
        control.schedule(&mut scheduler, None);
        let handler = AbortSignalHandler::new(control.abort_handle());
        for signal in [libc::SIGUSR2, libc::SIGXCPU, libc::SIGUSR2] {
            handler.handle(&Delivery { signal, sim_time: Some(0.0) });
        }
        scheduler.run();
        assert_eq!(control.shutdown_count(), 1);
        assert!(control.was_aborted());
    }
}
