//! Step Maker - main entry point
//!
//! Parses the command line, sets up logging and signal handling, and runs
//! the requested subcommand.

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use stepmaker::cli::{Cli, Commands};
use stepmaker::config_file::{self, RecorderConfig};
use stepmaker::console::{self, ConsoleDisplay, ConsoleSurface};
use stepmaker::control_helper::HelperVm;
use stepmaker::mode_state::{self, Collaborators, StepMaker};
use stepmaker::process_guard::{self, ProcessGuard};
use stepmaker::scheduler::SystemClock;
use stepmaker::step_codec;
use stepmaker::step_files::{self, FileHeader, StepFiles};
use stepmaker::vm_control::{DryRunVm, VmControl};

/// Initialize tracing on stderr; RUST_LOG overrides the default level
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);
    info!("Step Maker starting up");

    match cli.command {
        Commands::ValidateConfig { config } => {
            info!("Validating configuration file: {:?}", config);
            let loaded = RecorderConfig::load_from_file(&config);
            match loaded.and_then(|c| c.validate().map(|_| c)) {
                Ok(c) => {
                    println!("✓ Configuration file is valid: {:?}", c);
                }
                Err(e) => {
                    error!("Configuration validation failed: {:#}", e);
                    eprintln!("✗ Configuration validation failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Check { steps } => {
            if !check_step_file(&steps)? {
                std::process::exit(1);
            }
        }
        Commands::Record {
            steps,
            helper,
            helper_args,
            dry_run,
            params,
            param,
            config,
            tempdir,
            data_dir,
        } => {
            let options = RecordOptions {
                steps,
                helper,
                helper_args,
                dry_run,
                params,
                param,
                config,
                tempdir,
                data_dir,
            };
            run_recorder(options)?;
        }
    }

    Ok(())
}

/// Report every malformed action line. Returns whether the file is clean.
fn check_step_file(path: &Path) -> Result<bool> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read step file {:?}", path))?;
    let errors = step_codec::check_lines(&text);
    let steps = text
        .lines()
        .filter(|line| *line == step_codec::STEP_DELIMITER)
        .count();

    if errors.is_empty() {
        println!("✓ {} step(s), no malformed action lines", steps);
        return Ok(true);
    }
    for e in &errors {
        eprintln!("✗ {}", e);
    }
    eprintln!("{} malformed action line(s) in {}", errors.len(), path.display());
    Ok(false)
}

struct RecordOptions {
    steps: PathBuf,
    helper: Option<PathBuf>,
    helper_args: Vec<String>,
    dry_run: bool,
    params: Option<PathBuf>,
    param: Vec<String>,
    config: Option<PathBuf>,
    tempdir: Option<PathBuf>,
    data_dir: Option<PathBuf>,
}

/// Run an interactive recording session on the console
fn run_recorder(options: RecordOptions) -> Result<()> {
    let stop = match process_guard::init_signal_handlers() {
        Ok(flag) => flag,
        Err(e) => {
            warn!("Failed to initialize signal handlers: {}", e);
            Default::default()
        }
    };
    debug!("Signal handlers initialized");
    let _guard = ProcessGuard::new();

    let config = match &options.config {
        Some(path) => RecorderConfig::load_from_file(path)?,
        None => RecorderConfig::default(),
    };
    config.validate()?;

    let mut params = match &options.params {
        Some(path) => config_file::load_params(path)?,
        None => Default::default(),
    };
    let overrides = options
        .param
        .iter()
        .map(|raw| config_file::parse_param_override(raw))
        .collect::<Result<Vec<_>>>()?;
    params = config_file::merge_params(params, &overrides);
    debug!("{} default variable value(s) loaded", params.len());

    let mut vm: Box<dyn VmControl> = match (&options.helper, options.dry_run) {
        (_, true) => {
            info!("Dry run: VM commands are only logged");
            Box::new(DryRunVm::new())
        }
        (Some(helper), false) => {
            Box::new(HelperVm::with_args(helper, options.helper_args.clone()))
        }
        (None, false) => anyhow::bail!("Either --helper or --dry-run is required"),
    };

    let steps_path = mode_state::preflight(Some(vm.as_mut()), Some(options.steps.as_path()))?;
    let data_dir = options
        .data_dir
        .unwrap_or_else(|| step_files::data_dir_for(&steps_path));
    let files = StepFiles::create(&steps_path, &data_dir, &FileHeader::current())?;

    let temp_dir = options.tempdir.unwrap_or_else(std::env::temp_dir);
    let screendump_path = temp_dir.join(&config.screendump_name);

    let input = console::spawn_line_reader(BufReader::new(io::stdin()));
    let mut surface =
        ConsoleSurface::new(input, Box::new(io::stdout())).with_stop_flag(Arc::clone(&stop));
    let parts = Collaborators {
        vm,
        display: Box::new(ConsoleDisplay::new(Box::new(io::stdout()))),
        clock: Rc::new(SystemClock),
    };

    let mut session = StepMaker::start(&config, screendump_path, files, params, parts)?;
    console::run_console(&mut session, &mut surface, &stop)?;

    println!(
        "✓ Recorded {} step(s) to {}",
        session.step_number() - 1,
        steps_path.display()
    );
    Ok(())
}
