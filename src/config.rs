use crate::module::ModuleDescriptor;
use crate::utils::output::OutputStrategy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::PathBuf;
use std::time::Duration;

/// Host configuration as read from the YAML configuration file
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub simulation: SimulationConfig,
    /// Plugins to load, in configured order
    #[serde(default)]
    pub modules: Vec<ModuleDescriptor>,
    /// Free-form configuration handed to each plugin, keyed by plugin name
    #[serde(default, skip_serializing_if = "is_null")]
    pub module_config: Value,
    /// Topology entities to construct once modules are loaded
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

fn is_null(value: &Value) -> bool {
    value.is_null()
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        let sim = &self.simulation;
        if !(sim.max_sim_time.is_finite() && sim.max_sim_time > 0.0) {
            return Err(ValidationError::InvalidSimulation(format!(
                "max_sim_time must be a positive number, got {}",
                sim.max_sim_time
            )));
        }
        if let Some(mark) = sim.mark_interval {
            if !(mark.is_finite() && mark > 0.0) {
                return Err(ValidationError::InvalidSimulation(format!(
                    "mark_interval must be positive, got {}",
                    mark
                )));
            }
        }
        if sim.status_file_name.trim().is_empty() {
            return Err(ValidationError::InvalidSimulation(
                "status_file_name cannot be empty".to_string(),
            ));
        }
        if sim.status_write_interval.is_zero() || sim.probe_flush_interval.is_zero() {
            return Err(ValidationError::InvalidSimulation(
                "status_write_interval and probe_flush_interval must be non-zero".to_string(),
            ));
        }

        for module in &self.modules {
            if module.library.trim().is_empty() || module.plugin.trim().is_empty() {
                return Err(ValidationError::InvalidModule(format!(
                    "library and plugin must be set, got '{}'",
                    module
                )));
            }
        }
        if let Some(dup) = first_duplicate(self.modules.iter()) {
            return Err(ValidationError::InvalidModule(format!(
                "module {} is listed more than once",
                dup
            )));
        }

        for node in &self.nodes {
            if node.name.trim().is_empty() {
                return Err(ValidationError::InvalidNode("node name cannot be empty".to_string()));
            }
            if node.module.trim().is_empty() || node.kind.trim().is_empty() {
                return Err(ValidationError::InvalidNode(format!(
                    "node '{}' needs both module and kind",
                    node.name
                )));
            }
        }
        if let Some(dup) = first_duplicate(self.nodes.iter().map(|n| &n.name)) {
            return Err(ValidationError::InvalidNode(format!(
                "node name '{}' is used more than once",
                dup
            )));
        }

        Ok(())
    }

    /// The configuration section handed to plugin `plugin`
    pub fn module_view(&self, plugin: &str) -> ConfigView {
        ConfigView::new(self.module_config.get(plugin).cloned().unwrap_or(Value::Null))
    }
}

fn first_duplicate<T: PartialEq + Clone>(items: impl Iterator<Item = T>) -> Option<T> {
    let mut seen: Vec<T> = Vec::new();
    for item in items {
        if seen.contains(&item) {
            return Some(item);
        }
        seen.push(item);
    }
    None
}

/// Run-wide simulation settings
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    /// Simulated time (seconds) at which the run ends normally
    pub max_sim_time: f64,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_status_file_name")]
    pub status_file_name: String,
    #[serde(default = "default_fingerprint_file_name")]
    pub fingerprint_file_name: String,
    /// Real-time interval between status snapshots
    #[serde(default = "default_status_write_interval", with = "humantime_serde")]
    pub status_write_interval: Duration,
    /// Real-time interval between probe flushes
    #[serde(default = "default_probe_flush_interval", with = "humantime_serde")]
    pub probe_flush_interval: Duration,
    /// Simulated-time interval of the "--- MARK ---" heartbeat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_interval: Option<f64>,
    #[serde(default)]
    pub output_strategy: OutputStrategy,
    /// Emit backtraces through the logger on diagnostic signals
    #[serde(default)]
    pub backtrace: bool,
    /// Refuse to start without at least one module
    #[serde(default = "default_true")]
    pub require_modules: bool,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_status_file_name() -> String {
    "status.txt".to_string()
}

fn default_fingerprint_file_name() -> String {
    "fingerprint.txt".to_string()
}

fn default_status_write_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_probe_flush_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_sim_time: 100.0,
            seed: 0,
            output_dir: default_output_dir(),
            status_file_name: default_status_file_name(),
            fingerprint_file_name: default_fingerprint_file_name(),
            status_write_interval: default_status_write_interval(),
            probe_flush_interval: default_probe_flush_interval(),
            mark_interval: None,
            output_strategy: OutputStrategy::default(),
            backtrace: false,
            require_modules: true,
        }
    }
}

/// A topology entity: which loaded plugin builds it, what kind, and its
/// parameters
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    pub module: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "is_null")]
    pub params: Value,
}

impl NodeConfig {
    pub fn params(&self) -> ConfigView {
        ConfigView::new(self.params.clone())
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid simulation configuration: {0}")]
    InvalidSimulation(String),
    #[error("Invalid module configuration: {0}")]
    InvalidModule(String),
    #[error("Invalid node configuration: {0}")]
    InvalidNode(String),
}

/// Errors from looking up values in a [`ConfigView`]
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Missing configuration key '{0}'")]
    Missing(String),
    #[error("Configuration key '{key}' has the wrong type: {source}")]
    Type {
        key: String,
        source: serde_yaml::Error,
    },
    #[error("Configuration key '{0}' is not a list")]
    NotAList(String),
}

/// Read-only view on a configuration subtree with dotted-key lookup.
///
/// Path segments are separated by `.`; numeric segments index into lists,
/// so `nodes.0.name` is the name of the first node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigView {
    root: Value,
}

impl ConfigView {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return Some(&self.root);
        }
        path.split('.').try_fold(&self.root, |value, segment| match value {
            Value::Sequence(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            Value::Mapping(_) => value.get(segment),
            _ => None,
        })
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lookup(path).is_some_and(|v| !v.is_null())
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, LookupError> {
        let value = self
            .lookup(path)
            .filter(|v| !v.is_null())
            .ok_or_else(|| LookupError::Missing(path.to_string()))?;
        serde_yaml::from_value(value.clone()).map_err(|source| LookupError::Type {
            key: path.to_string(),
            source,
        })
    }

    /// Like [`get`](Self::get) but falls back to `default` when the key is
    /// absent. A present key of the wrong type is still an error.
    pub fn get_or<T: DeserializeOwned>(&self, path: &str, default: T) -> Result<T, LookupError> {
        match self.get(path) {
            Err(LookupError::Missing(_)) => Ok(default),
            other => other,
        }
    }

    /// Length of the list at `path`; a missing key counts as empty.
    pub fn len(&self, path: &str) -> Result<usize, LookupError> {
        match self.lookup(path) {
            None | Some(Value::Null) => Ok(0),
            Some(Value::Sequence(items)) => Ok(items.len()),
            Some(_) => Err(LookupError::NotAList(path.to_string())),
        }
    }

    pub fn view(&self, path: &str) -> ConfigView {
        ConfigView::new(self.lookup(path).cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
simulation:
  max_sim_time: 50.0
  seed: 7
  status_write_interval: "10s"
modules:
  - library: channel
    plugin: channel
  - library: traffic
    plugin: traffic
module_config:
  traffic:
    packet_size: 1500
nodes:
  - name: sink0
    module: channel
    kind: sink
  - name: gen0
    module: traffic
    kind: generator
    params:
      target: sink0
      interval: 0.5
"#;

    #[test]
    fn test_config_parsing() {
        let config: Config = serde_yaml::from_str(YAML).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.simulation.max_sim_time, 50.0);
        assert_eq!(config.simulation.status_write_interval, Duration::from_secs(10));
        assert_eq!(config.simulation.probe_flush_interval, Duration::from_secs(60));
        assert_eq!(config.simulation.output_strategy, OutputStrategy::Move);
        assert!(config.simulation.require_modules);
        assert_eq!(config.modules[1], ModuleDescriptor::new("traffic", "traffic"));
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.module_view("traffic").get::<u64>("packet_size").unwrap(), 1500);
        assert!(!config.module_view("channel").contains("anything"));
    }

    #[test]
    fn test_validation_errors() {
        let mut config: Config = serde_yaml::from_str(YAML).unwrap();
        config.simulation.max_sim_time = 0.0;
        assert!(matches!(config.validate(), Err(ValidationError::InvalidSimulation(_))));

        let mut config: Config = serde_yaml::from_str(YAML).unwrap();
        config.modules.push(ModuleDescriptor::new("channel", "channel"));
        assert!(matches!(config.validate(), Err(ValidationError::InvalidModule(_))));

        let mut config: Config = serde_yaml::from_str(YAML).unwrap();
        config.nodes[1].name = "sink0".to_string();
        assert!(matches!(config.validate(), Err(ValidationError::InvalidNode(_))));

        let mut config: Config = serde_yaml::from_str(YAML).unwrap();
        config.simulation.mark_interval = Some(-1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_view_lookup() {
        let value: Value = serde_yaml::from_str(YAML).unwrap();
        let view = ConfigView::new(value);

        assert_eq!(view.get::<String>("nodes.1.params.target").unwrap(), "sink0");
        assert_eq!(view.get::<f64>("simulation.max_sim_time").unwrap(), 50.0);
        assert_eq!(view.len("nodes").unwrap(), 2);
        assert_eq!(view.len("missing").unwrap(), 0);
        assert!(matches!(view.len("simulation"), Err(LookupError::NotAList(_))));
        assert!(matches!(view.get::<u32>("simulation.nope"), Err(LookupError::Missing(_))));
        assert!(matches!(view.get::<u32>("nodes.0.name"), Err(LookupError::Type { .. })));
        assert_eq!(view.get_or("simulation.nope", 3u32).unwrap(), 3);
        assert_eq!(view.view("nodes.0").get::<String>("kind").unwrap(), "sink");
    }

    #[test]
    fn test_defaults() {
        let yaml = r#"
simulation:
  max_sim_time: 1.0
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.modules.is_empty());
        assert!(config.nodes.is_empty());
        assert_eq!(config.simulation.output_dir, PathBuf::from("output"));
        assert_eq!(config.simulation.status_file_name, "status.txt");
        assert!(config.validate().is_ok());
    }
}
