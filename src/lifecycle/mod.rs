//! Host lifecycle: startup, run, shutdown.

pub mod context;
pub mod controller;
pub mod instance;
pub mod sim_control;

pub use context::{Diagnostics, SimulationContext};
pub use controller::{ConfigSource, HostOptions, LifecycleController, RunMode};
pub use instance::HostToken;
pub use sim_control::{AbortHandle, AbortLatch, SimControl};

use std::fmt;

/// Lifecycle states, in the order a successful run visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    Created,
    Initialized,
    Loaded,
    Running,
    ShuttingDown,
    Terminated,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Process exit classes. The numeric codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The run reached its configured end.
    Normal,
    /// Configuration, module loading, or an unhandled fault.
    Error,
    /// Premature abort on a resource-limit signal.
    Aborted,
}

impl ExitStatus {
    pub const fn code(self) -> i32 {
        match self {
            ExitStatus::Normal => 0,
            ExitStatus::Error => 1,
            ExitStatus::Aborted => 2,
        }
    }
}

impl From<ExitStatus> for std::process::ExitCode {
    fn from(status: ExitStatus) -> Self {
        std::process::ExitCode::from(status.code() as u8)
    }
}
