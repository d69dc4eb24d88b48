//! `channel` plugin: sinks that terminate traffic and record delivery delay.

use crate::config::{ConfigView, NodeConfig};
use crate::module::{ComponentError, Endpoint, Entity, Packet, SelfTest, SimModule, Version, VersionInfo, World};
use crate::scheduler::SimTime;
use crate::utils::probes::Probes;
use log::info;
use rand::rngs::StdRng;
use std::cell::RefCell;
use std::rc::Rc;

pub const VERSION: Version = Version::new(1, 0, 0);

pub struct ChannelModule {
    version: VersionInfo,
    record_delay: bool,
}

impl ChannelModule {
    pub fn new() -> Self {
        Self {
            version: VersionInfo::new("channel", VERSION),
            record_delay: true,
        }
    }
}

impl Default for ChannelModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SimModule for ChannelModule {
    fn version(&self) -> &VersionInfo {
        &self.version
    }

    fn configure(&mut self, config: &ConfigView) -> Result<(), ComponentError> {
        self.record_delay = config.get_or("record_delay", true)?;
        Ok(())
    }

    fn create_entity(&mut self, node: &NodeConfig, _rng: StdRng) -> Result<Box<dyn Entity>, ComponentError> {
        match node.kind.as_str() {
            "sink" => Ok(Box::new(Sink::new(&node.name, self.record_delay))),
            other => Err(ComponentError::new(format!(
                "channel cannot construct '{}' (node '{}')",
                other, node.name
            ))),
        }
    }

    fn self_tests(&self) -> Vec<SelfTest> {
        vec![
            SelfTest::new("channel.sink_counts_deliveries", || {
                let sink = Sink::new("probe", false);
                let endpoint = sink.endpoint().ok_or("sink has no endpoint")?;
                let packet = Packet {
                    source: "test".to_string(),
                    created: 0.0,
                    size: 100,
                };
                endpoint(&packet, 1.0);
                endpoint(&packet, 2.0);
                let stats = sink.stats();
                if stats.packets == 2 && stats.bytes == 200 {
                    Ok(())
                } else {
                    Err(format!("expected 2 packets/200 bytes, got {:?}", stats))
                }
            }),
            SelfTest::new("channel.rejects_unknown_kind", || {
                let node = NodeConfig {
                    name: "n".to_string(),
                    module: "channel".to_string(),
                    kind: "router".to_string(),
                    params: serde_yaml::Value::Null,
                };
                let rng = rand::SeedableRng::seed_from_u64(0);
                match ChannelModule::new().create_entity(&node, rng) {
                    Err(_) => Ok(()),
                    Ok(_) => Err("router accepted".to_string()),
                }
            }),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SinkStats {
    pub packets: u64,
    pub bytes: u64,
}

#[derive(Default)]
struct SinkState {
    stats: SinkStats,
    probes: Option<Probes>,
}

/// Terminates traffic: counts what arrives and records its delay.
pub struct Sink {
    name: String,
    record_delay: bool,
    state: Rc<RefCell<SinkState>>,
}

impl Sink {
    pub fn new(name: &str, record_delay: bool) -> Self {
        Self {
            name: name.to_string(),
            record_delay,
            state: Rc::new(RefCell::new(SinkState::default())),
        }
    }

    pub fn stats(&self) -> SinkStats {
        self.state.borrow().stats
    }
}

impl Entity for Sink {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self) -> Option<Endpoint> {
        let state = Rc::clone(&self.state);
        let probe = format!("{}.delay", self.name);
        let record_delay = self.record_delay;
        Some(Rc::new(move |packet: &Packet, now: SimTime| {
            let mut state = state.borrow_mut();
            state.stats.packets += 1;
            state.stats.bytes += packet.size;
            if record_delay {
                if let Some(probes) = &state.probes {
                    probes.put(&probe, now - packet.created);
                }
            }
        }))
    }

    fn on_world_created(&mut self, world: &mut World<'_>) -> Result<(), ComponentError> {
        self.state.borrow_mut().probes = Some(world.probes.clone());
        Ok(())
    }

    fn on_shutdown(&mut self) {
        let stats = self.stats();
        info!("Sink {} received {} packets ({} bytes)", self.name, stats.packets, stats.bytes);
    }
}
