//! The host state machine.
//!
//! ```text
//! Created -> Initialized -> Loaded -> Running -> ShuttingDown -> Terminated
//!                                        \-- premature abort --/
//! ```
//!
//! Any failure before Running skips straight to the shutdown sequence. The
//! shutdown sequence runs exactly once: final status and probe output, entity
//! shutdown and module shutdown in reverse construction order, signal
//! dispositions restored, and the simulation context dropped last.

use super::context::{Diagnostics, SimulationContext};
use super::instance::HostToken;
use super::sim_control::SimControl;
use super::{ExitStatus, State};
use crate::config::Config;
use crate::config_loader::load_config;
use crate::error::HostError;
use crate::module::{ComponentRegistry, Endpoint, Entity, LoadedModule, ModuleDescriptor, ModuleLoader, World};
use crate::scheduler::{EventScheduler, Scheduler};
use crate::selftest::{host_self_tests, run_self_tests};
use crate::signals::{
    AbortSignalHandler, SignalBridge, SnapshotHandler, TerminalHandler, ABORT_SIGNALS, SNAPSHOT_SIGNAL,
    TERMINAL_SIGNALS,
};
use crate::stepping::{StepBudget, SteppingController};
use crate::utils::status::{RunStatus, StatusReport};
use log::{debug, error, info, warn};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

pub const PROBES_FILE_NAME: &str = "probes.json";

/// Where the configuration comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Read from a YAML file, patches applied in order.
    File { path: PathBuf, patches: Vec<String> },
    /// Already parsed. Validated again at initialisation.
    Loaded(Config),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunMode {
    Simulate,
    /// Run self-tests instead of the simulation. An empty selection runs all.
    SelfTest { selected: Vec<String> },
}

/// Everything the host needs besides the registry.
#[derive(Debug, Clone)]
pub struct HostOptions {
    pub config: ConfigSource,
    /// Appended after the configured modules.
    pub extra_modules: Vec<ModuleDescriptor>,
    pub mode: RunMode,
    pub verbose: bool,
    /// Debugger command attached on terminal signals.
    pub debugger: Option<String>,
    pub stop_on_assure: bool,
    /// Credit source for single-step mode. `None` runs freely.
    pub stepping: Option<StepBudget>,
    /// Program name handed to the debugger.
    pub program: String,
}

impl HostOptions {
    pub fn new(config: ConfigSource) -> Self {
        Self {
            config,
            extra_modules: Vec::new(),
            mode: RunMode::Simulate,
            verbose: false,
            debugger: None,
            stop_on_assure: false,
            stepping: None,
            program: env!("CARGO_PKG_NAME").to_string(),
        }
    }
}

struct Housekeeping {
    status: Rc<RefCell<StatusReport>>,
    probes_path: PathBuf,
}

pub struct LifecycleController {
    state: State,
    options: HostOptions,
    registry: Box<dyn ComponentRegistry>,
    config: Option<Config>,
    entities: Vec<Box<dyn Entity>>,
    modules: Vec<LoadedModule>,
    housekeeping: Option<Housekeeping>,
    control: Option<SimControl>,
    signals: Option<SignalBridge>,
    context: Option<SimulationContext>,
    _token: HostToken,
}

impl LifecycleController {
    pub fn new(token: HostToken, registry: Box<dyn ComponentRegistry>, options: HostOptions) -> Self {
        Self {
            state: State::Created,
            options,
            registry,
            config: None,
            entities: Vec::new(),
            modules: Vec::new(),
            housekeeping: None,
            control: None,
            signals: None,
            context: None,
            _token: token,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn modules(&self) -> &[LoadedModule] {
        &self.modules
    }

    pub fn context(&self) -> Option<&SimulationContext> {
        self.context.as_ref()
    }

    fn transition(&mut self, from: State, to: State) -> Result<(), HostError> {
        if self.state != from {
            return Err(HostError::InvalidTransition { from: self.state, to });
        }
        debug!("Lifecycle: {} -> {}", from, to);
        self.state = to;
        Ok(())
    }

    fn config(&self) -> Result<&Config, HostError> {
        self.config
            .as_ref()
            .ok_or_else(|| HostError::Configuration("configuration not loaded".to_string()))
    }

    /// Created -> Initialized: configuration, output directory, simulation
    /// context, and signal handlers.
    pub fn initialize(&mut self) -> Result<(), HostError> {
        self.transition(State::Created, State::Initialized)?;

        let mut config = match &self.options.config {
            ConfigSource::File { path, patches } => load_config(path, patches)?,
            ConfigSource::Loaded(config) => {
                config
                    .validate()
                    .map_err(crate::config_loader::ConfigError::from)?;
                config.clone()
            }
        };
        config.modules.extend(self.options.extra_modules.iter().cloned());
        if config.modules.is_empty() && config.simulation.require_modules {
            return Err(HostError::Configuration(
                "no modules configured, at least one is required".to_string(),
            ));
        }

        let sim = &config.simulation;
        if let Some(previous) = sim.output_strategy.prepare(&sim.output_dir)? {
            info!("Previous output moved to {:?}", previous);
        }

        let diagnostics = Diagnostics::new(sim.backtrace);
        let context = SimulationContext::new(sim.seed, diagnostics, self.options.stop_on_assure);
        let control = SimControl::new(&context.scheduler, sim.max_sim_time);

        let signals = SignalBridge::new();
        let terminal = Arc::new(TerminalHandler::new(
            self.options.program.clone(),
            self.options.debugger.clone(),
            sim.backtrace,
        ));
        for signal in TERMINAL_SIGNALS {
            signals.register(signal, terminal.clone())?;
        }
        signals.register(SNAPSHOT_SIGNAL, Arc::new(SnapshotHandler::new(sim.backtrace)))?;
        let abort = Arc::new(AbortSignalHandler::new(control.abort_handle()));
        for signal in ABORT_SIGNALS {
            signals.register(signal, abort.clone())?;
        }
        signals.install()?;

        info!(
            "Initialized: max_sim_time={}, seed={}, output={:?}",
            sim.max_sim_time, sim.seed, sim.output_dir
        );
        self.context = Some(context);
        self.control = Some(control);
        self.signals = Some(signals);
        self.config = Some(config);
        Ok(())
    }

    /// Initialized -> Loaded: resolve modules and write the fingerprint.
    pub fn load_modules(&mut self) -> Result<(), HostError> {
        self.transition(State::Initialized, State::Loaded)?;
        let config = self.config()?.clone();

        info!("Loading {} module(s)", config.modules.len());
        let outcome = ModuleLoader::new(&mut *self.registry)
            .require_modules(config.simulation.require_modules)
            .load(&config.modules)?;

        let path = config
            .simulation
            .output_dir
            .join(&config.simulation.fingerprint_file_name);
        outcome
            .fingerprint
            .write(&path)
            .map_err(|source| HostError::Fingerprint { path, source })?;
        self.modules = outcome.modules;
        Ok(())
    }

    /// Loaded -> Running -> (end or abort). Returns Normal or Aborted.
    pub fn run(&mut self) -> Result<ExitStatus, HostError> {
        self.transition(State::Loaded, State::Running)?;
        let config = self.config()?.clone();
        let Self {
            modules,
            entities,
            context,
            control,
            signals,
            housekeeping,
            options,
            ..
        } = self;
        let (Some(context), Some(control), Some(signals)) = (context.as_mut(), control.as_ref(), signals.as_ref())
        else {
            return Err(HostError::UnhandledFault("host not initialized".to_string()));
        };

        for module in modules.iter_mut() {
            let name = module.descriptor.plugin.clone();
            module
                .instance
                .configure(&config.module_view(&name))
                .map_err(|source| HostError::Module { module: name, source })?;
            module.instance.start_up();
        }

        for node in &config.nodes {
            let module = modules
                .iter_mut()
                .find(|m| m.descriptor.plugin == node.module || m.version.component == node.module)
                .ok_or_else(|| {
                    HostError::Configuration(format!(
                        "node '{}' names module '{}', which is not loaded",
                        node.name, node.module
                    ))
                })?;
            let entity = module
                .instance
                .create_entity(node, context.derive_rng())
                .map_err(|source| HostError::Entity {
                    entity: node.name.clone(),
                    source,
                })?;
            debug!("Constructed entity {} ({}/{})", node.name, node.module, node.kind);
            entities.push(entity);
        }

        let endpoints: BTreeMap<String, Endpoint> = entities
            .iter()
            .filter_map(|e| e.endpoint().map(|ep| (e.name().to_string(), ep)))
            .collect();
        {
            let mut world = World::new(&mut context.scheduler, &context.probes, &endpoints);
            for entity in entities.iter_mut() {
                entity
                    .on_world_created(&mut world)
                    .map_err(|source| HostError::Entity {
                        entity: entity.name().to_string(),
                        source,
                    })?;
            }
        }
        info!("World constructed: {} entities", entities.len());

        context.assure(
            !modules.is_empty() || !config.simulation.require_modules,
            "no modules loaded before entering Running",
        )?;

        let sim = &config.simulation;
        control.schedule(&mut context.scheduler, sim.mark_interval);

        let mut status = StatusReport::new(
            &sim.output_dir,
            &sim.status_file_name,
            sim.max_sim_time,
            sim.status_write_interval,
        )
        .with_probes(context.probes.clone());
        status.start(context.scheduler.now())?;
        let status = Rc::new(RefCell::new(status));
        let probes_path = sim.output_dir.join(PROBES_FILE_NAME);
        *housekeeping = Some(Housekeeping {
            status: Rc::clone(&status),
            probes_path: probes_path.clone(),
        });

        let dispatcher = signals.dispatcher();
        context
            .scheduler
            .add_safe_point_hook(Box::new(move |scheduler: &Scheduler| {
                dispatcher.dispatch_pending(Some(scheduler.now()));
            }));
        context
            .scheduler
            .add_safe_point_hook(Box::new(move |scheduler: &Scheduler| {
                status.borrow_mut().periodically(scheduler.now());
            }));
        let probes = context.probes.clone();
        let flush_interval = sim.probe_flush_interval;
        let mut last_flush = Instant::now();
        context
            .scheduler
            .add_safe_point_hook(Box::new(move |_: &Scheduler| {
                if last_flush.elapsed() >= flush_interval {
                    if let Err(e) = probes.flush(&probes_path) {
                        warn!("Failed to flush probes to {:?}: {}", probes_path, e);
                    }
                    last_flush = Instant::now();
                }
            }));

        info!("Running until t={}", sim.max_sim_time);
        let started = Instant::now();
        match &options.stepping {
            Some(budget) => {
                SteppingController::new(budget.clone()).run(&mut context.scheduler);
            }
            None => context.scheduler.run(),
        }
        info!(
            "Simulation stopped at t={} after {} events ({:.2?} wall clock)",
            context.scheduler.now(),
            context.scheduler.processed_events(),
            started.elapsed()
        );

        Ok(if control.was_aborted() {
            ExitStatus::Aborted
        } else {
            ExitStatus::Normal
        })
    }

    /// Test-execution mode, from Loaded.
    pub fn run_self_tests(&mut self, selected: &[String]) -> Result<ExitStatus, HostError> {
        if self.state != State::Loaded {
            return Err(HostError::InvalidTransition {
                from: self.state,
                to: State::ShuttingDown,
            });
        }
        let mut tests = Vec::new();
        for module in &self.modules {
            tests.extend(module.instance.self_tests());
        }
        tests.extend(host_self_tests());

        let report = run_self_tests(tests, selected, self.options.verbose);
        if self.options.verbose {
            println!(
                "{} test(s): {} passed, {} failed",
                report.total(),
                report.passed.len(),
                report.failed.len()
            );
        }
        if report.all_passed() {
            Ok(ExitStatus::Normal)
        } else {
            Err(HostError::SelfTests {
                failed: report.failed.len(),
            })
        }
    }

    /// ShuttingDown -> Terminated. Safe to call from any state; runs once.
    ///
    /// Returns the final exit status: `outcome`, or Error if a plugin
    /// panicked while shutting down.
    pub fn shutdown(&mut self, outcome: ExitStatus) -> ExitStatus {
        if matches!(self.state, State::ShuttingDown | State::Terminated) {
            return outcome;
        }
        debug!("Lifecycle: {} -> {}", self.state, State::ShuttingDown);
        self.state = State::ShuttingDown;

        if let Some(context) = self.context.as_mut() {
            context.scheduler.clear_safe_point_hooks();
        }
        self.finish_outputs(outcome);

        let mut faults = 0;
        while let Some(mut entity) = self.entities.pop() {
            let name = entity.name().to_string();
            debug!("Shutting down entity {}", name);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || entity.on_shutdown())) {
                error!("Entity {} panicked during shutdown: {}", name, panic_message(payload.as_ref()));
                faults += 1;
            }
        }
        while let Some(mut module) = self.modules.pop() {
            let descriptor = module.descriptor.clone();
            debug!("Shutting down module {}", descriptor);
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || module.instance.shut_down())) {
                error!("Module {} panicked during shutdown: {}", descriptor, panic_message(payload.as_ref()));
                faults += 1;
            }
        }

        if let Some(signals) = self.signals.take() {
            signals.uninstall();
        }
        self.control = None;
        self.context = None;
        self.state = State::Terminated;
        info!("Shutdown complete");

        if faults > 0 {
            error!("{} fault(s) during shutdown", faults);
            ExitStatus::Error
        } else {
            outcome
        }
    }

    fn finish_outputs(&mut self, outcome: ExitStatus) {
        let (Some(housekeeping), Some(context)) = (self.housekeeping.take(), self.context.as_ref()) else {
            return;
        };
        let now = context.scheduler.now();
        let run_status = match outcome {
            ExitStatus::Normal => RunStatus::Completed,
            ExitStatus::Aborted | ExitStatus::Error => RunStatus::Aborted,
        };
        if let Err(e) = housekeeping.status.borrow_mut().write(run_status, now) {
            error!("{}", e);
        }
        if let Err(e) = context.probes.flush(&housekeeping.probes_path) {
            error!("Failed to flush probes to {:?}: {}", housekeeping.probes_path, e);
        }
    }

    fn startup(&mut self) -> Result<(), HostError> {
        self.initialize()?;
        self.load_modules()
    }

    /// Run one lifecycle stage, turning a panic into an UnhandledFault.
    fn guarded<T>(&mut self, stage: impl FnOnce(&mut Self) -> Result<T, HostError>) -> Result<T, HostError> {
        panic::catch_unwind(AssertUnwindSafe(|| stage(self)))
            .unwrap_or_else(|payload| Err(HostError::UnhandledFault(panic_message(payload.as_ref()))))
    }

    /// Drive the whole lifecycle and classify the outcome.
    pub fn execute(mut self) -> ExitStatus {
        let result = match self.guarded(Self::startup) {
            Err(e) => Err(e),
            Ok(()) => match self.options.mode.clone() {
                RunMode::Simulate => self.guarded(Self::run),
                RunMode::SelfTest { selected } => self.guarded(|host| host.run_self_tests(&selected)),
            },
        };
        let outcome = result.unwrap_or_else(|e| {
            error!("{}", e);
            e.exit_status()
        });
        let status = self.shutdown(outcome);
        info!("Exit status {:?} ({})", status, status.code());
        status
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        if self.state == State::Terminated {
            return;
        }
        if std::thread::panicking() {
            // No plugin callbacks while unwinding; release in reverse order.
            while self.entities.pop().is_some() {}
            while self.modules.pop().is_some() {}
            self.signals = None;
            self.context = None;
        } else {
            self.shutdown(ExitStatus::Error);
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with unknown payload".to_string())
}
