//! # SimHost - Bootstrap and lifecycle host for modular event-driven simulations
//!
//! This library drives a simulation process from startup to exit. It does not
//! simulate anything itself: it loads plugin modules, builds the topology they
//! describe, runs the event scheduler, and bridges OS signals into an orderly
//! shutdown.
//!
//! ## Overview
//!
//! A run moves through a fixed sequence of states:
//!
//! ```text
//! Created -> Initialized -> Loaded -> Running -> ShuttingDown -> Terminated
//! ```
//!
//! - **Initialized**: configuration loaded and patched, output directory
//!   prepared, simulation context and signal handlers in place
//! - **Loaded**: every configured module resolved by the fixpoint loader,
//!   version constraints checked, fingerprint written
//! - **Running**: modules configured, entities constructed, scheduler running
//!   freely or one event per credit in single-step mode
//! - **ShuttingDown**: final status and probes written, entities and modules
//!   shut down in reverse order, default signal dispositions restored
//!
//! A resource-limit signal (`SIGUSR2`, `SIGXCPU`) during Running ends the run
//! early through the premature abort path.
//!
//! ## Architecture
//!
//! - `config`, `config_loader`: YAML configuration, patches, search path
//! - `module`: descriptors, versions, the component registry and the loader
//! - `builtin`: the `channel` and `traffic` plugins compiled into the host
//! - `scheduler`: discrete event scheduler with a thread-safe command queue
//! - `signals`: the signal bridge and the host's handlers
//! - `stepping`: credit-gated stepping and its TCP control server
//! - `lifecycle`: the state machine, simulation context, and end-of-run control
//! - `selftest`: test-execution mode
//! - `utils`: output preparation, status report, probes
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use simhost::builtin::builtin_registry;
//! use simhost::lifecycle::{ConfigSource, HostOptions, HostToken, LifecycleController};
//!
//! let token = HostToken::claim()?;
//! let options = HostOptions::new(ConfigSource::File {
//!     path: "config.yaml".into(),
//!     patches: vec!["simulation.seed=7".to_string()],
//! });
//! let status = LifecycleController::new(token, Box::new(builtin_registry()), options).execute();
//! std::process::exit(status.code());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! simulation:
//!   max_sim_time: 120.0
//!   seed: 42
//!   output_dir: output
//!   status_write_interval: "30s"
//!
//! modules:
//!   - library: traffic
//!     plugin: traffic
//!   - library: channel
//!     plugin: channel
//!
//! nodes:
//!   - name: sink0
//!     module: channel
//!     kind: sink
//!   - name: gen0
//!     module: traffic
//!     kind: generator
//!     params:
//!       target: sink0
//!       interval: 0.5
//! ```
//!
//! ## Exit Codes
//!
//! `0` normal completion, `1` error (configuration, module loading, unhandled
//! fault), `2` premature abort on a resource-limit signal.

pub mod builtin;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod lifecycle;
pub mod module;
pub mod scheduler;
pub mod selftest;
pub mod signals;
pub mod stepping;
pub mod utils;

pub use error::HostError;
pub use lifecycle::{ExitStatus, LifecycleController};
