use crate::error::HostError;
use crate::scheduler::Scheduler;
use crate::signals::os;
use crate::utils::probes::Probes;
use log::error;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::backtrace::Backtrace;

/// Backtrace sink of the host logger.
#[derive(Debug, Clone, Copy, Default)]
pub struct Diagnostics {
    backtrace: bool,
}

impl Diagnostics {
    pub fn new(backtrace: bool) -> Self {
        Self { backtrace }
    }

    pub fn backtrace_enabled(&self) -> bool {
        self.backtrace
    }

    /// Log a backtrace of the current thread if backtraces are enabled.
    pub fn log_backtrace(&self, context: &str) {
        if self.backtrace {
            error!("{}\n{}", context, Backtrace::force_capture());
        }
    }
}

/// Process-wide simulation state: clock and scheduler, master RNG, probes,
/// and diagnostics. Created once at initialisation and dropped last.
pub struct SimulationContext {
    pub scheduler: Scheduler,
    pub probes: Probes,
    rng: StdRng,
    diagnostics: Diagnostics,
    stop_on_assure: bool,
}

impl SimulationContext {
    pub fn new(seed: u64, diagnostics: Diagnostics, stop_on_assure: bool) -> Self {
        Self {
            scheduler: Scheduler::new(),
            probes: Probes::new(),
            rng: StdRng::seed_from_u64(seed),
            diagnostics,
            stop_on_assure,
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    /// Independent generator for one consumer, drawn from the master RNG.
    /// The sequence of derived generators depends only on the seed.
    pub fn derive_rng(&mut self) -> StdRng {
        StdRng::seed_from_u64(self.rng.gen())
    }

    /// Check a host invariant. A failed check is logged; with
    /// `stop_on_assure` the process also stops in an attached debugger.
    pub fn assure(&self, condition: bool, message: &str) -> Result<(), HostError> {
        if condition {
            return Ok(());
        }
        error!("Assurance failed: {}", message);
        self.diagnostics.log_backtrace("Backtrace at failed assurance:");
        if self.stop_on_assure {
            if let Err(e) = os::raise(libc::SIGTRAP) {
                error!("Failed to raise SIGTRAP: {}", e);
            }
        }
        Err(HostError::Assurance(message.to_string()))
    }
}
