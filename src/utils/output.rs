//! Output directory preparation.
//!
//! Before a run writes any artifact the output directory is either moved out
//! of the way (kept with a timestamp suffix) or deleted, then recreated.

use chrono::{DateTime, Local};
use log::info;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// How an existing output directory is dealt with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputStrategy {
    /// Rename an existing directory to `<dir>.<mtime>` and start fresh.
    #[default]
    Move,
    /// Remove an existing directory recursively and start fresh.
    Delete,
}

/// Errors raised while preparing the output directory
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("Couldn't access output directory {path}: {source}")]
    Access { path: PathBuf, source: io::Error },

    #[error("Couldn't move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[error("Couldn't remove {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("Couldn't create {path}: {source}")]
    Create { path: PathBuf, source: io::Error },
}

impl OutputStrategy {
    /// Prepare `path` according to the strategy. Returns where an existing
    /// directory was moved to, if anywhere.
    pub fn prepare(self, path: &Path) -> Result<Option<PathBuf>, OutputError> {
        let moved = match self {
            OutputStrategy::Move => move_aside(path)?,
            OutputStrategy::Delete => {
                delete(path)?;
                None
            }
        };
        std::fs::create_dir_all(path).map_err(|source| OutputError::Create {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(moved)
    }
}

fn move_aside(path: &Path) -> Result<Option<PathBuf>, OutputError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        // Nothing to move; the only acceptable access error.
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(OutputError::Access {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let modified: DateTime<Local> = metadata
        .modified()
        .map(DateTime::from)
        .unwrap_or_else(|_| Local::now());
    let stamp = modified.format("%Y-%m-%d-%H:%M:%S").to_string();

    let mut target = suffixed(path, &stamp);
    let mut n = 1;
    while target.exists() {
        target = suffixed(path, &format!("{}-{}", stamp, n));
        n += 1;
    }

    std::fs::rename(path, &target).map_err(|source| OutputError::Move {
        from: path.to_path_buf(),
        to: target.clone(),
        source,
    })?;
    info!("Moved previous output {:?} to {:?}", path, target);
    Ok(Some(target))
}

fn delete(path: &Path) -> Result<(), OutputError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            info!("Removed previous output {:?}", path);
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(OutputError::Remove {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
