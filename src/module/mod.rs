//! Simulation modules: descriptors, the component registry, and the loader.

pub mod component;
pub mod descriptor;
pub mod loader;
pub mod registry;

pub use component::{ComponentError, Endpoint, Entity, Packet, SelfTest, SimModule, World};
pub use descriptor::{Comparator, DependencyConstraint, ModuleDescriptor, Version, VersionInfo};
pub use loader::{Fingerprint, LoadError, LoadOutcome, LoadedModule, ModuleLoader};
pub use registry::{CatalogueEntry, ComponentRegistry, Library, ModuleFactory, StaticRegistry};
