//! Interfaces a plugin implements, and the world handed to its entities.

use crate::config::{ConfigView, NodeConfig};
use crate::module::descriptor::VersionInfo;
use crate::scheduler::{Scheduler, SimTime};
use crate::utils::probes::Probes;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Error reported by plugin code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ComponentError(pub String);

impl ComponentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<crate::config::LookupError> for ComponentError {
    fn from(e: crate::config::LookupError) -> Self {
        Self(e.to_string())
    }
}

/// Unit of traffic exchanged between entities.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub source: String,
    pub created: SimTime,
    pub size: u64,
}

/// Receiving side of an entity, published under the entity's name.
pub type Endpoint = Rc<dyn Fn(&Packet, SimTime)>;

/// What an entity sees once the whole topology has been constructed.
pub struct World<'a> {
    pub scheduler: &'a mut Scheduler,
    pub probes: &'a Probes,
    endpoints: &'a BTreeMap<String, Endpoint>,
}

impl<'a> World<'a> {
    pub fn new(
        scheduler: &'a mut Scheduler,
        probes: &'a Probes,
        endpoints: &'a BTreeMap<String, Endpoint>,
    ) -> Self {
        Self {
            scheduler,
            probes,
            endpoints,
        }
    }

    pub fn endpoint(&self, name: &str) -> Option<Endpoint> {
        self.endpoints.get(name).cloned()
    }
}

/// A topology entity constructed from a `nodes` entry.
pub trait Entity {
    fn name(&self) -> &str;

    /// Receiving endpoint other entities may deliver to, if any.
    fn endpoint(&self) -> Option<Endpoint> {
        None
    }

    /// Called once, after every entity exists. Initial events are scheduled here.
    fn on_world_created(&mut self, world: &mut World<'_>) -> Result<(), ComponentError>;

    fn on_shutdown(&mut self) {}
}

/// A named check a module ships for test-execution mode.
pub struct SelfTest {
    pub name: String,
    pub check: Box<dyn Fn() -> Result<(), String>>,
}

impl SelfTest {
    pub fn new(name: impl Into<String>, check: impl Fn() -> Result<(), String> + 'static) -> Self {
        Self {
            name: name.into(),
            check: Box::new(check),
        }
    }
}

/// A loaded simulation module.
///
/// Lifecycle, driven by the host: `configure` and `start_up` in load order,
/// `create_entity` for each node naming this module, `shut_down` in reverse
/// load order.
pub trait SimModule {
    fn version(&self) -> &VersionInfo;

    fn configure(&mut self, _config: &ConfigView) -> Result<(), ComponentError> {
        Ok(())
    }

    fn start_up(&mut self) {}

    fn create_entity(&mut self, node: &NodeConfig, _rng: StdRng) -> Result<Box<dyn Entity>, ComponentError> {
        Err(ComponentError::new(format!(
            "module {} does not construct entities (node '{}')",
            self.version().component,
            node.name
        )))
    }

    /// Called once for every loaded module, including modules whose
    /// `configure` failed and modules that never had `start_up` called (a
    /// startup error, or test-execution mode). A panic here is logged and
    /// turns the run into an error; the remaining modules still shut down.
    fn shut_down(&mut self) {}

    fn self_tests(&self) -> Vec<SelfTest> {
        Vec::new()
    }
}
