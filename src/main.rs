use clap::{ArgAction, Parser};
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use log::info;
use simhost::builtin::builtin_registry;
use simhost::config_loader::config_search_path;
use simhost::lifecycle::{ConfigSource, HostOptions, HostToken, LifecycleController, RunMode};
use simhost::module::{ComponentRegistry, ModuleDescriptor};
use simhost::stepping::server::DEFAULT_PORT;
use simhost::stepping::{StepBudget, StepServer};
use simhost::ExitStatus;
use std::path::PathBuf;
use std::process::ExitCode;

/// Bootstrap and lifecycle host for modular event-driven simulations
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, disable_help_flag = true)]
struct Args {
    /// Path to the simulation configuration YAML file
    #[arg(short = 'f', long, default_value = "config.yaml")]
    config_file: PathBuf,

    /// Patch the configuration before loading modules: `dotted.key=value`
    #[arg(short = 'y', long, value_name = "EXPR")]
    patch_config: Vec<String>,

    /// Run self-tests instead of the simulation
    #[arg(short = 't', long)]
    unit_tests: bool,

    /// Run only the named self-test (repeatable)
    #[arg(short = 'T', long, value_name = "NAME")]
    named_unit_tests: Vec<String>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Debugger command run on a fatal signal, given the program and its PID
    #[arg(short = 's', long, value_name = "CMD")]
    attach_debugger_on_segfault: Option<String>,

    /// Raise SIGTRAP when a host assurance fails
    #[arg(short = 'd', long)]
    stop_in_debugger_on_assure: bool,

    /// Print the configuration search path and exit
    #[arg(short = 'P', long)]
    python_path: bool,

    /// Load an additional module: `library:plugin` or `name` (repeatable)
    #[arg(short = 'm', long, value_name = "NAME")]
    load_modules: Vec<String>,

    /// List the available modules and exit
    #[arg(short = 'M', long)]
    show_modules: bool,

    /// Start the step control server
    #[arg(short = 'n', long)]
    networking: bool,

    /// Port of the step control server
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Process one event per credit received over the network
    #[arg(short = 'w', long, requires = "networking")]
    single_step_mode: bool,

    /// Print help
    #[arg(short = '?', long, action = ArgAction::Help)]
    help: Option<bool>,
}

fn main() -> Result<ExitCode> {
    // Initialize error handling
    color_eyre::install()?;

    // Usage errors are configuration errors (exit 1), not clap's default 2,
    // which is reserved for a premature abort.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            e.print()?;
            return Ok(if e.use_stderr() {
                ExitStatus::Error.into()
            } else {
                ExitCode::SUCCESS
            });
        }
    };

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level)).init();

    if args.python_path {
        for dir in config_search_path() {
            println!("{}", dir.display());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let registry = builtin_registry();
    if args.show_modules {
        for entry in registry.catalogue() {
            println!("{}", entry);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let token = HostToken::claim().wrap_err("Failed to claim the simulation host")?;

    let budget = StepBudget::new();
    let _server = if args.networking {
        Some(
            StepServer::spawn(args.port, budget.clone())
                .wrap_err_with(|| format!("Failed to start step control server on port {}", args.port))?,
        )
    } else {
        None
    };

    let mut options = HostOptions::new(ConfigSource::File {
        path: args.config_file,
        patches: args.patch_config,
    });
    options.extra_modules = args
        .load_modules
        .iter()
        .map(|spec| ModuleDescriptor::from_spec(spec))
        .collect();
    options.mode = if args.unit_tests || !args.named_unit_tests.is_empty() {
        RunMode::SelfTest {
            selected: args.named_unit_tests,
        }
    } else {
        RunMode::Simulate
    };
    options.verbose = args.verbose;
    options.debugger = args.attach_debugger_on_segfault;
    options.stop_on_assure = args.stop_in_debugger_on_assure;
    options.stepping = args.single_step_mode.then(|| budget.clone());
    if let Some(program) = std::env::args().next() {
        options.program = program;
    }

    info!("Starting {} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    let status = LifecycleController::new(token, Box::new(registry), options).execute();
    Ok(status.into())
}
