//! Fixpoint module loader.
//!
//! Descriptors are tried head-first from a work list. A descriptor whose
//! library fails to load goes to the back of the list; any success resets the
//! failure counter. When as many consecutive failures as there are remaining
//! descriptors have accumulated, a full pass made no progress and loading
//! gives up, naming every descriptor still in the list.

use crate::module::component::SimModule;
use crate::module::descriptor::{DependencyConstraint, ModuleDescriptor, Version, VersionInfo};
use crate::module::registry::ComponentRegistry;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

/// A module instance together with what it was loaded from.
pub struct LoadedModule {
    pub descriptor: ModuleDescriptor,
    pub instance: Box<dyn SimModule>,
    pub version: VersionInfo,
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("descriptor", &self.descriptor)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// A descriptor left over when loading stopped making progress.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedModule {
    pub descriptor: ModuleDescriptor,
    pub reason: String,
}

/// A version constraint no loaded component satisfies.
#[derive(Debug, Clone, PartialEq)]
pub struct UnmetConstraint {
    pub required_by: String,
    pub constraint: DependencyConstraint,
    pub found: Option<Version>,
}

impl fmt::Display for UnmetConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.found {
            Some(version) => write!(
                f,
                "{} requires {}, found {} {}",
                self.required_by, self.constraint, self.constraint.component, version
            ),
            None => write!(
                f,
                "{} requires {}, but {} is not loaded",
                self.required_by, self.constraint, self.constraint.component
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Unresolvable module dependency set:\n{}", render_unresolved(.remaining))]
    Unresolvable { remaining: Vec<UnresolvedModule> },

    #[error("Unmet module version dependencies:\n{}", render_unmet(.unmet))]
    DependencyVersion { unmet: Vec<UnmetConstraint> },
}

fn render_unresolved(remaining: &[UnresolvedModule]) -> String {
    remaining
        .iter()
        .map(|m| format!("  {}: {}", m.descriptor, m.reason))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_unmet(unmet: &[UnmetConstraint]) -> String {
    unmet
        .iter()
        .map(|u| format!("  {}", u))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ordered record of the component versions a run used. The host comes first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    entries: Vec<(String, Version)>,
}

impl Fingerprint {
    pub fn new(host: &VersionInfo, modules: &[LoadedModule]) -> Self {
        let entries = std::iter::once(host)
            .chain(modules.iter().map(|m| &m.version))
            .map(|v| (v.component.clone(), v.version))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[(String, Version)] {
        &self.entries
    }

    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(|(name, version)| format!("{} {}\n", name, version))
            .collect()
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.render())
    }
}

/// Result of a successful load: modules in load order plus their fingerprint.
#[derive(Debug)]
pub struct LoadOutcome {
    pub modules: Vec<LoadedModule>,
    pub fingerprint: Fingerprint,
}

pub struct ModuleLoader<'r, R: ComponentRegistry + ?Sized> {
    registry: &'r mut R,
    host: VersionInfo,
    require_modules: bool,
}

impl<'r, R: ComponentRegistry + ?Sized> ModuleLoader<'r, R> {
    pub fn new(registry: &'r mut R) -> Self {
        Self {
            registry,
            host: VersionInfo::host(),
            require_modules: true,
        }
    }

    /// Version record standing in for the host in the compatibility pass.
    pub fn with_host(mut self, host: VersionInfo) -> Self {
        self.host = host;
        self
    }

    /// Whether an empty descriptor list is a caller bug.
    pub fn require_modules(mut self, required: bool) -> Self {
        self.require_modules = required;
        self
    }

    /// Load every descriptor, then check version constraints.
    ///
    /// # Panics
    ///
    /// If `descriptors` is empty while modules are required. Callers validate
    /// this against configuration first.
    pub fn load(mut self, descriptors: &[ModuleDescriptor]) -> Result<LoadOutcome, LoadError> {
        assert!(
            !(self.require_modules && descriptors.is_empty()),
            "module loader invoked without descriptors while modules are required"
        );

        let mut remaining: VecDeque<(ModuleDescriptor, String)> = VecDeque::new();
        for descriptor in descriptors {
            if remaining.iter().any(|(d, _)| d == descriptor) {
                warn!("Module {} requested more than once, loading it once", descriptor);
                continue;
            }
            remaining.push_back((descriptor.clone(), String::new()));
        }

        let mut modules: Vec<LoadedModule> = Vec::with_capacity(remaining.len());
        let mut failures = 0usize;

        while let Some((descriptor, _)) = remaining.pop_front() {
            match self.instantiate(&descriptor) {
                Ok(instance) => {
                    let version = instance.version().clone();
                    info!("Loaded module {} ({} {})", descriptor, version.component, version.version);
                    modules.push(LoadedModule {
                        descriptor,
                        instance,
                        version,
                    });
                    failures = 0;
                }
                Err(reason) => {
                    debug!("Deferring module {}: {}", descriptor, reason);
                    remaining.push_back((descriptor, reason));
                    failures += 1;
                    if failures >= remaining.len() {
                        return Err(LoadError::Unresolvable {
                            remaining: remaining
                                .into_iter()
                                .map(|(descriptor, reason)| UnresolvedModule { descriptor, reason })
                                .collect(),
                        });
                    }
                }
            }
        }

        check_versions(&self.host, &modules)?;
        let fingerprint = Fingerprint::new(&self.host, &modules);
        Ok(LoadOutcome { modules, fingerprint })
    }

    fn instantiate(&mut self, descriptor: &ModuleDescriptor) -> Result<Box<dyn SimModule>, String> {
        if !self.registry.is_known(&descriptor.plugin) {
            self.registry
                .load_library(&descriptor.library)
                .map_err(|e| e.to_string())?;
        }
        let factory = self.registry.resolve(&descriptor.plugin).ok_or_else(|| {
            format!(
                "library '{}' does not provide plugin '{}'",
                descriptor.library, descriptor.plugin
            )
        })?;
        Ok(factory())
    }
}

/// Check every declared constraint of the host and the loaded modules against
/// the versions actually loaded. All unmet constraints are reported together.
pub fn check_versions(host: &VersionInfo, modules: &[LoadedModule]) -> Result<(), LoadError> {
    let loaded: Vec<&VersionInfo> = std::iter::once(host)
        .chain(modules.iter().map(|m| &m.version))
        .collect();

    let mut unmet = Vec::new();
    for info in &loaded {
        for constraint in &info.requires {
            let found = loaded
                .iter()
                .find(|v| v.component == constraint.component)
                .map(|v| v.version);
            if !found.is_some_and(|version| constraint.is_satisfied_by(version)) {
                unmet.push(UnmetConstraint {
                    required_by: info.component.clone(),
                    constraint: constraint.clone(),
                    found,
                });
            }
        }
    }

    if unmet.is_empty() {
        Ok(())
    } else {
        Err(LoadError::DependencyVersion { unmet })
    }
}
