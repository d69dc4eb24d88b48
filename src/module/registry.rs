//! Component registry: maps plugin names to module factories.
//!
//! The loader only talks to [`ComponentRegistry`]. [`StaticRegistry`] is the
//! compiled-in implementation: plugins are either statically linked (known
//! up front) or shipped in named libraries that become loadable only once the
//! libraries they link against have been loaded, the way a shared object
//! with undefined symbols fails to open until its dependencies are resident.

use crate::module::component::SimModule;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Builds a fresh module instance.
pub type ModuleFactory = Arc<dyn Fn() -> Box<dyn SimModule> + Send + Sync>;

/// Why a library could not be loaded
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LibraryError {
    #[error("library '{0}' not found")]
    NotFound(String),

    #[error("library '{library}' has undefined symbols from {}", .missing.join(", "))]
    UnresolvedSymbols { library: String, missing: Vec<String> },
}

/// Registry interface consumed by the module loader.
pub trait ComponentRegistry {
    /// Whether `plugin` can be instantiated without loading anything.
    fn is_known(&self, plugin: &str) -> bool;

    /// Make the plugins of `library` known.
    fn load_library(&mut self, library: &str) -> Result<(), LibraryError>;

    fn resolve(&self, plugin: &str) -> Option<ModuleFactory>;

    /// Everything this registry could provide, for `--show-modules`.
    fn catalogue(&self) -> Vec<CatalogueEntry>;
}

/// One line of the module catalogue
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogueEntry {
    pub library: String,
    pub plugins: Vec<String>,
    pub needs: Vec<String>,
    pub loaded: bool,
}

impl fmt::Display for CatalogueEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<16} plugins: {}", self.library, self.plugins.join(", "))?;
        if !self.needs.is_empty() {
            write!(f, "  (needs {})", self.needs.join(", "))?;
        }
        if self.loaded {
            write!(f, "  [loaded]")?;
        }
        Ok(())
    }
}

/// A loadable bundle of plugins.
pub struct Library {
    name: String,
    needs: Vec<String>,
    plugins: Vec<(String, ModuleFactory)>,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            needs: Vec::new(),
            plugins: Vec::new(),
        }
    }

    /// This library only loads after `library` has been loaded.
    pub fn needs(mut self, library: impl Into<String>) -> Self {
        self.needs.push(library.into());
        self
    }

    pub fn plugin(
        mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn SimModule> + Send + Sync + 'static,
    ) -> Self {
        self.plugins.push((name.into(), Arc::new(factory)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Compiled-in registry
#[derive(Default)]
pub struct StaticRegistry {
    libraries: BTreeMap<String, Library>,
    loaded: BTreeSet<String>,
    known: BTreeMap<String, ModuleFactory>,
    load_attempts: usize,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_library(&mut self, library: Library) -> &mut Self {
        self.libraries.insert(library.name.clone(), library);
        self
    }

    /// Register a plugin as statically linked: known without any load step.
    pub fn link_static(
        &mut self,
        plugin: impl Into<String>,
        factory: impl Fn() -> Box<dyn SimModule> + Send + Sync + 'static,
    ) -> &mut Self {
        self.known.insert(plugin.into(), Arc::new(factory));
        self
    }

    /// Number of `load_library` calls so far.
    pub fn load_attempts(&self) -> usize {
        self.load_attempts
    }

    pub fn is_loaded(&self, library: &str) -> bool {
        self.loaded.contains(library)
    }
}

impl ComponentRegistry for StaticRegistry {
    fn is_known(&self, plugin: &str) -> bool {
        self.known.contains_key(plugin)
    }

    fn load_library(&mut self, library: &str) -> Result<(), LibraryError> {
        self.load_attempts += 1;
        if self.loaded.contains(library) {
            return Ok(());
        }
        let lib = self
            .libraries
            .get(library)
            .ok_or_else(|| LibraryError::NotFound(library.to_string()))?;

        let missing: Vec<String> = lib
            .needs
            .iter()
            .filter(|needed| !self.loaded.contains(*needed))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(LibraryError::UnresolvedSymbols {
                library: library.to_string(),
                missing,
            });
        }

        for (plugin, factory) in &lib.plugins {
            self.known.insert(plugin.clone(), factory.clone());
        }
        self.loaded.insert(library.to_string());
        Ok(())
    }

    fn resolve(&self, plugin: &str) -> Option<ModuleFactory> {
        self.known.get(plugin).cloned()
    }

    fn catalogue(&self) -> Vec<CatalogueEntry> {
        let mut entries: Vec<CatalogueEntry> = self
            .libraries
            .values()
            .map(|lib| CatalogueEntry {
                library: lib.name.clone(),
                plugins: lib.plugins.iter().map(|(name, _)| name.clone()).collect(),
                needs: lib.needs.clone(),
                loaded: self.loaded.contains(&lib.name),
            })
            .collect();

        let in_libraries: BTreeSet<&str> = self
            .libraries
            .values()
            .flat_map(|lib| lib.plugins.iter().map(|(name, _)| name.as_str()))
            .collect();
        let linked: Vec<String> = self
            .known
            .keys()
            .filter(|name| !in_libraries.contains(name.as_str()))
            .cloned()
            .collect();
        if !linked.is_empty() {
            entries.push(CatalogueEntry {
                library: "(static)".to_string(),
                plugins: linked,
                needs: Vec::new(),
                loaded: true,
            });
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::descriptor::{Version, VersionInfo};

    struct Dummy(VersionInfo);

    impl SimModule for Dummy {
        fn version(&self) -> &VersionInfo {
            &self.0
        }
    }

    fn dummy(name: &'static str) -> impl Fn() -> Box<dyn SimModule> + Send + Sync {
        move || Box::new(Dummy(VersionInfo::new(name, Version::new(1, 0, 0)))) as Box<dyn SimModule>
    }

    #[test]
    fn test_library_needs_are_enforced() {
        let mut registry = StaticRegistry::new();
        registry
            .add_library(Library::new("base").plugin("base", dummy("base")))
            .add_library(Library::new("app").needs("base").plugin("app", dummy("app")));

        assert!(!registry.is_known("app"));
        assert_eq!(
            registry.load_library("app"),
            Err(LibraryError::UnresolvedSymbols {
                library: "app".to_string(),
                missing: vec!["base".to_string()],
            })
        );
        registry.load_library("base").unwrap();
        registry.load_library("app").unwrap();
        assert!(registry.is_known("app"));
        assert_eq!(registry.resolve("app").unwrap()().version().component, "app");
        assert_eq!(registry.load_attempts(), 3);
    }

    #[test]
    fn test_unknown_library() {
        let mut registry = StaticRegistry::new();
        assert_eq!(
            registry.load_library("ghost"),
            Err(LibraryError::NotFound("ghost".to_string()))
        );
        assert!(registry.resolve("ghost").is_none());
    }

    #[test]
    fn test_static_plugins_are_known() {
        let mut registry = StaticRegistry::new();
        registry.link_static("core", dummy("core"));
        assert!(registry.is_known("core"));

        let catalogue = registry.catalogue();
        assert_eq!(catalogue.len(), 1);
        assert_eq!(catalogue[0].library, "(static)");
        assert_eq!(catalogue[0].plugins, vec!["core".to_string()]);
    }

    #[test]
    fn test_catalogue_display() {
        let mut registry = StaticRegistry::new();
        registry.add_library(Library::new("app").needs("base").plugin("app", dummy("app")));
        let line = registry.catalogue()[0].to_string();
        assert!(line.contains("plugins: app"));
        assert!(line.contains("needs base"));
        assert!(!line.contains("[loaded]"));
    }
}
