use crate::config::{Config, ValidationError};
use log::{debug, info};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

/// Environment variable holding extra configuration directories (colon separated)
pub const CONFIG_PATH_ENV: &str = "SIMHOST_CONFIG_PATH";

/// Errors raised while reading, patching, or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file '{0}' not found in search path")]
    NotFound(String),
    #[error("Failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Invalid patch expression '{expr}': {reason}")]
    Patch { expr: String, reason: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Directories searched for a relative configuration file, in order
pub fn config_search_path() -> Vec<PathBuf> {
    let mut path: Vec<PathBuf> = std::env::var(CONFIG_PATH_ENV)
        .map(|dirs| {
            dirs.split(':')
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .collect()
        })
        .unwrap_or_default();
    path.push(PathBuf::from(concat!("/usr/local/share/", env!("CARGO_PKG_NAME"), "/config")));
    path.push(PathBuf::from("."));
    path
}

/// Resolve `config_path` against the search path. Absolute paths and paths
/// that exist as given are returned unchanged.
pub fn resolve_config_path(config_path: &Path) -> Result<PathBuf, ConfigError> {
    if config_path.is_absolute() || config_path.exists() {
        return Ok(config_path.to_path_buf());
    }
    config_search_path()
        .into_iter()
        .map(|dir| dir.join(config_path))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| ConfigError::NotFound(config_path.display().to_string()))
}

/// Load configuration from a YAML file, apply patches in order, then validate
pub fn load_config(config_path: &Path, patches: &[String]) -> Result<Config, ConfigError> {
    let path = resolve_config_path(config_path)?;
    info!("Loading configuration from: {:?}", path);

    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    let mut document: Value = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;

    for patch in patches {
        apply_patch(&mut document, patch)?;
        info!("Applied configuration patch: {}", patch);
    }

    let config: Config = serde_yaml::from_value(document).map_err(|source| ConfigError::Parse {
        path: path.clone(),
        source,
    })?;

    config.validate()?;
    debug!(
        "Configuration: {} module(s), {} node(s), max_sim_time={}",
        config.modules.len(),
        config.nodes.len(),
        config.simulation.max_sim_time
    );
    Ok(config)
}

/// Apply a `dotted.key=<yaml value>` patch to a configuration document.
///
/// Missing intermediate mappings are created. Numeric segments index into
/// existing lists.
pub fn apply_patch(document: &mut Value, expr: &str) -> Result<(), ConfigError> {
    let patch_error = |reason: &str| ConfigError::Patch {
        expr: expr.to_string(),
        reason: reason.to_string(),
    };

    let (key, raw_value) = expr
        .split_once('=')
        .ok_or_else(|| patch_error("expected key=value"))?;
    let key = key.trim();
    if key.is_empty() || key.split('.').any(str::is_empty) {
        return Err(patch_error("empty key segment"));
    }
    let value: Value =
        serde_yaml::from_str(raw_value.trim()).map_err(|e| patch_error(&e.to_string()))?;

    let mut target = document;
    for segment in key.split('.') {
        if target.is_null() {
            *target = Value::Mapping(Mapping::new());
        }
        target = match target {
            Value::Mapping(map) => map
                .entry(Value::String(segment.to_string()))
                .or_insert(Value::Null),
            Value::Sequence(items) => {
                let index: usize = segment
                    .parse()
                    .map_err(|_| patch_error("list segment must be an index"))?;
                items
                    .get_mut(index)
                    .ok_or_else(|| patch_error("list index out of range"))?
            }
            _ => return Err(patch_error("cannot descend into a scalar")),
        };
    }
    *target = value;
    Ok(())
}
