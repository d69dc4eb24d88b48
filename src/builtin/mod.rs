//! Plugins compiled into the host binary.

pub mod channel;
pub mod traffic;

use crate::module::{Library, SimModule, StaticRegistry};

/// Registry offering the `channel` and `traffic` libraries. `traffic` only
/// loads once `channel` has been loaded.
pub fn builtin_registry() -> StaticRegistry {
    let mut registry = StaticRegistry::new();
    registry
        .add_library(Library::new("channel").plugin("channel", || {
            Box::new(channel::ChannelModule::new()) as Box<dyn SimModule>
        }))
        .add_library(Library::new("traffic").needs("channel").plugin("traffic", || {
            Box::new(traffic::TrafficModule::new()) as Box<dyn SimModule>
        }));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{ModuleDescriptor, ModuleLoader};

    #[test]
    fn test_builtins_load_in_any_order() {
        let mut registry = builtin_registry();
        let outcome = ModuleLoader::new(&mut registry)
            .load(&[ModuleDescriptor::new("traffic", "traffic"), ModuleDescriptor::new("channel", "channel")])
            .unwrap();
        let loaded: Vec<&str> = outcome.modules.iter().map(|m| m.version.component.as_str()).collect();
        assert_eq!(loaded, vec!["channel", "traffic"]);
    }
}
