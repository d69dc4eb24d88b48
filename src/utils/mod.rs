//! Shared utilities: output preparation, status report, probes.

pub mod output;
pub mod probes;
pub mod status;

pub use output::{OutputError, OutputStrategy};
pub use probes::{ProbeSummary, Probes};
pub use status::{RunStatus, StatusError, StatusReport};
