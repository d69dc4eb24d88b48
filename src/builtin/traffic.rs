//! `traffic` plugin: generators emitting packets into a named sink.

use crate::config::{ConfigView, NodeConfig};
use crate::module::{
    Comparator, ComponentError, DependencyConstraint, Endpoint, Entity, Packet, SelfTest, SimModule, Version, VersionInfo,
    World,
};
use crate::scheduler::{EventScheduler, Scheduler};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;

pub const VERSION: Version = Version::new(1, 0, 0);

/// Interarrival times are drawn uniformly from `[mean * (1 - J), mean * (1 + J)]`.
const JITTER: f64 = 0.5;

pub struct TrafficModule {
    version: VersionInfo,
    packet_size: u64,
}

impl TrafficModule {
    pub fn new() -> Self {
        let needs_channel = DependencyConstraint::new("channel", Comparator::GreaterEq, Version::new(1, 0, 0));
        Self {
            version: VersionInfo::new("traffic", VERSION).requiring(needs_channel),
            packet_size: 1000,
        }
    }
}

impl Default for TrafficModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SimModule for TrafficModule {
    fn version(&self) -> &VersionInfo {
        &self.version
    }

    fn configure(&mut self, config: &ConfigView) -> Result<(), ComponentError> {
        self.packet_size = config.get_or("packet_size", self.packet_size)?;
        if self.packet_size == 0 {
            return Err(ComponentError::new("packet_size must be positive"));
        }
        Ok(())
    }

    fn create_entity(&mut self, node: &NodeConfig, rng: StdRng) -> Result<Box<dyn Entity>, ComponentError> {
        if node.kind != "generator" {
            return Err(ComponentError::new(format!(
                "traffic cannot construct '{}' (node '{}')",
                node.kind, node.name
            )));
        }
        let params = node.params();
        let settings = GeneratorSettings {
            target: params.get("target")?,
            interval: params.get_or("interval", 1.0)?,
            limit: params.get_or("count", None)?,
            packet_size: params.get_or("packet_size", self.packet_size)?,
        };
        if !(settings.interval.is_finite() && settings.interval > 0.0) {
            return Err(ComponentError::new(format!(
                "node '{}': interval must be positive, got {}",
                node.name, settings.interval
            )));
        }
        Ok(Box::new(Generator::new(&node.name, settings, rng)))
    }

    fn self_tests(&self) -> Vec<SelfTest> {
        vec![SelfTest::new("traffic.jitter_within_bounds", || {
            let mut rng = StdRng::seed_from_u64(17);
            for _ in 0..1000 {
                let gap = next_gap(&mut rng, 2.0);
                if !(1.0..=3.0).contains(&gap) {
                    return Err(format!("gap {} outside [1, 3]", gap));
                }
            }
            Ok(())
        })]
    }
}

fn next_gap(rng: &mut StdRng, mean: f64) -> f64 {
    mean * rng.gen_range((1.0 - JITTER)..=(1.0 + JITTER))
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    pub target: String,
    pub interval: f64,
    pub limit: Option<u64>,
    pub packet_size: u64,
}

struct Emission {
    name: String,
    settings: GeneratorSettings,
    rng: StdRng,
    sent: u64,
    target: Option<Endpoint>,
}

/// Emits packets at jittered intervals until its limit or the end of the run.
pub struct Generator {
    name: String,
    state: Rc<RefCell<Emission>>,
}

impl Generator {
    pub fn new(name: &str, settings: GeneratorSettings, rng: StdRng) -> Self {
        Self {
            name: name.to_string(),
            state: Rc::new(RefCell::new(Emission {
                name: name.to_string(),
                settings,
                rng,
                sent: 0,
                target: None,
            })),
        }
    }

    pub fn sent(&self) -> u64 {
        self.state.borrow().sent
    }
}

fn schedule_next(scheduler: &mut Scheduler, state: Rc<RefCell<Emission>>) {
    let gap = {
        let mut emission = state.borrow_mut();
        if emission.settings.limit.is_some_and(|limit| emission.sent >= limit) {
            debug!("Generator {} reached its limit", emission.name);
            return;
        }
        let mean = emission.settings.interval;
        next_gap(&mut emission.rng, mean)
    };
    scheduler.schedule_in(gap, move |scheduler| {
        let now = scheduler.now();
        let (endpoint, packet) = {
            let mut emission = state.borrow_mut();
            emission.sent += 1;
            let packet = Packet {
                source: emission.name.clone(),
                created: now,
                size: emission.settings.packet_size,
            };
            (emission.target.clone(), packet)
        };
        if let Some(endpoint) = endpoint {
            endpoint(&packet, now);
        }
        schedule_next(scheduler, state);
    });
}

impl Entity for Generator {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_world_created(&mut self, world: &mut World<'_>) -> Result<(), ComponentError> {
        let target = self.state.borrow().settings.target.clone();
        let endpoint = world.endpoint(&target).ok_or_else(|| {
            ComponentError::new(format!("generator {}: no endpoint named '{}'", self.name, target))
        })?;
        self.state.borrow_mut().target = Some(endpoint);
        schedule_next(world.scheduler, Rc::clone(&self.state));
        Ok(())
    }

    fn on_shutdown(&mut self) {
        info!("Generator {} sent {} packets", self.name, self.sent());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::channel::Sink;
    use crate::utils::probes::Probes;
    use std::collections::BTreeMap;

    fn settings(limit: Option<u64>) -> GeneratorSettings {
        GeneratorSettings {
            target: "sink0".to_string(),
            interval: 1.0,
            limit,
            packet_size: 64,
        }
    }

    #[test]
    fn test_generator_delivers_up_to_limit() {
        let mut sink = Sink::new("sink0", true);
        let mut endpoints = BTreeMap::new();
        endpoints.insert("sink0".to_string(), sink.endpoint().unwrap());

        let mut scheduler = Scheduler::new();
        let probes = Probes::new();
        let mut generator = Generator::new("gen0", settings(Some(5)), StdRng::seed_from_u64(1));
        {
            let mut world = World::new(&mut scheduler, &probes, &endpoints);
            sink.on_world_created(&mut world).unwrap();
            generator.on_world_created(&mut world).unwrap();
        }

        scheduler.run();
        assert_eq!(generator.sent(), 5);
        assert_eq!(sink.stats().packets, 5);
        assert_eq!(sink.stats().bytes, 5 * 64);
        assert!(scheduler.now() <= 5.0 * 1.5);
    }

    #[test]
    fn test_missing_target_fails() {
        let endpoints = BTreeMap::new();
        let mut scheduler = Scheduler::new();
        let probes = Probes::new();
        let mut generator = Generator::new("gen0", settings(None), StdRng::seed_from_u64(1));
        let mut world = World::new(&mut scheduler, &probes, &endpoints);
        assert!(generator.on_world_created(&mut world).is_err());
    }

    #[test]
    fn test_same_seed_same_arrivals() {
        let arrivals = |seed| {
            let sink = Sink::new("sink0", true);
            let mut endpoints = BTreeMap::new();
            endpoints.insert("sink0".to_string(), sink.endpoint().unwrap());
            let mut scheduler = Scheduler::new();
            let probes = Probes::new();
            let mut generator = Generator::new("gen0", settings(Some(20)), StdRng::seed_from_u64(seed));
            generator
                .on_world_created(&mut World::new(&mut scheduler, &probes, &endpoints))
                .unwrap();
            scheduler.run();
            scheduler.now()
        };
        assert_eq!(arrivals(3), arrivals(3));
        assert_ne!(arrivals(3), arrivals(4));
    }

    #[test]
    fn test_create_entity_reads_params() {
        let yaml = r#"
name: gen0
module: traffic
kind: generator
params:
  target: sink0
  interval: 0.25
  count: 3
"#;
        let node: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        let mut module = TrafficModule::new();
        assert!(module.create_entity(&node, StdRng::seed_from_u64(0)).is_ok());

        let mut bad = node.clone();
        bad.params = serde_yaml::from_str("target: sink0\ninterval: -1").unwrap();
        assert!(module.create_entity(&bad, StdRng::seed_from_u64(0)).is_err());

        let mut no_target = node;
        no_target.params = serde_yaml::Value::Null;
        assert!(module.create_entity(&no_target, StdRng::seed_from_u64(0)).is_err());
    }

    #[test]
    fn test_requires_channel() {
        let module = TrafficModule::new();
        assert_eq!(module.version().requires[0].to_string(), "channel >=1.0.0");
    }

    #[test]
    fn test_module_self_tests_pass() {
        for test in TrafficModule::new().self_tests() {
            assert_eq!((test.check)(), Ok(()), "{}", test.name);
        }
    }
}
