use crate::config_loader::ConfigError;
use crate::lifecycle::{ExitStatus, State};
use crate::module::{ComponentError, LoadError};
use crate::signals::SignalError;
use crate::utils::output::OutputError;
use crate::utils::status::StatusError;
use std::path::PathBuf;

/// Everything that can end a host run other than a normal finish or a
/// premature abort.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("Module {module} failed: {source}")]
    Module {
        module: String,
        source: ComponentError,
    },

    #[error("Entity {entity} failed: {source}")]
    Entity {
        entity: String,
        source: ComponentError,
    },

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("Failed to write fingerprint {path}: {source}")]
    Fingerprint {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error("Another host instance is already active in this process")]
    AlreadyActive,

    #[error("Cannot go from {from} to {to}")]
    InvalidTransition { from: State, to: State },

    #[error("Assurance failed: {0}")]
    Assurance(String),

    #[error("Unhandled fault: {0}")]
    UnhandledFault(String),

    #[error("{failed} self-test(s) failed")]
    SelfTests { failed: usize },
}

impl HostError {
    /// Exit class of this failure. Every host error is an Error exit; the
    /// Aborted class is not an error.
    pub fn exit_status(&self) -> ExitStatus {
        ExitStatus::Error
    }
}
