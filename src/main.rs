//! archstrap - main entry point
//!
//! Loads settings, sets up logging and signal handling, then dispatches the
//! subcommand. Fatal errors are reported as one line on stderr pointing at
//! the log, and the process exits non-zero.

use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, bail};
use tracing::{error, info, warn};

use archstrap::cli::{Cli, Commands};
use archstrap::config::Settings;
use archstrap::engine::planner::{self, PartitionPlan, list_candidates};
use archstrap::engine::storage::{describe, disk_operations};
use archstrap::error::ProvisionError;
use archstrap::flow::InstallationSession;
use archstrap::hardware::{self, TcpProbe};
use archstrap::preconditions::PreconditionChecker;
use archstrap::runner::SystemRunner;
use archstrap::stage_config::StageConfigStore;
use archstrap::ui::TuiDialog;
use archstrap::{logging, process_guard};

fn load_settings(cli: &Cli) -> anyhow::Result<Settings> {
    let mut settings = Settings::load(&cli.settings)
        .with_context(|| format!("cannot load settings from {}", cli.settings.display()))?;
    if let Some(log_file) = &cli.log_file {
        settings.log_file = log_file.clone();
    }
    if let Some(stage_config) = &cli.stage_config {
        settings.stage_config = stage_config.clone();
    }
    Ok(settings)
}

/// Main application entry point
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("✗ {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(&settings.log_file) {
        eprintln!("⚠ Logging to stderr only: {:#}", e);
    }
    info!("archstrap {} starting", env!("CARGO_PKG_VERSION"));

    // spawned tools must not outlive us
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }

    match dispatch(&cli, &settings) {
        Ok(()) => {
            info!("archstrap finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let message = diagnostic(&e, &settings.log_file);
            error!("{}", message);
            eprintln!("✗ {}", message);
            ExitCode::FAILURE
        }
    }
}

fn diagnostic(err: &anyhow::Error, log_file: &Path) -> String {
    match err.downcast_ref::<ProvisionError>() {
        Some(e) => e.diagnostic(log_file),
        None => format!("{:#}. See {} for details.", err, log_file.display()),
    }
}

fn dispatch(cli: &Cli, settings: &Settings) -> anyhow::Result<()> {
    match cli.command.clone().unwrap_or(Commands::Install) {
        Commands::Install => run_install(cli, settings),
        Commands::Check => run_check(settings),
        Commands::Disks => run_disks(),
        Commands::Plan { disk, json } => run_plan(settings, &disk, json),
        Commands::Stage => run_stage(settings),
    }
}

fn run_install(cli: &Cli, settings: &Settings) -> anyhow::Result<()> {
    let host = PreconditionChecker::from_settings(settings).verify(settings)?;
    let mut session = InstallationSession::new(
        host,
        settings.clone(),
        cli.settings.clone(),
        TuiDialog::new(),
        SystemRunner::new(),
        TcpProbe::from_settings(settings),
    );
    let result = session.run();
    // restore the terminal before anything is printed
    drop(session);
    Ok(result?)
}

fn run_check(settings: &Settings) -> anyhow::Result<()> {
    let host = PreconditionChecker::from_settings(settings).verify(settings)?;
    println!("✓ Running as root on {} in UEFI mode", settings.expected_distro);
    match host.memory_gb() {
        Some(gb) => println!("✓ Memory: {} GiB", gb),
        None => println!("⚠ Memory: unknown (MemTotal not readable)"),
    }
    for tool in host.missing_tools() {
        println!("⚠ Not found in PATH: {}", tool);
    }
    Ok(())
}

fn run_disks() -> anyhow::Result<()> {
    let disks = list_candidates(&mut SystemRunner::new())?;
    if disks.is_empty() {
        println!("No candidate disks found");
    }
    for disk in disks {
        println!("{:<16} {}", disk.path.display(), disk.label());
    }
    Ok(())
}

fn run_plan(settings: &Settings, disk: &Path, json: bool) -> anyhow::Result<()> {
    let disks = list_candidates(&mut SystemRunner::new())?;
    let Some(device) = disks.iter().find(|d| d.path == disk) else {
        bail!("{} is not a candidate disk (see `archstrap disks`)", disk.display());
    };
    let memory_gb = hardware::system_memory_gb(&settings.meminfo_path).unwrap_or(0);
    let recommendation = planner::recommend(device.size_bytes, memory_gb);
    let plan = PartitionPlan::recommended(
        device,
        memory_gb,
        settings.encrypt.is_yes(),
        settings.filesystem,
    )?;
    let layout = plan.layout()?;

    if json {
        let doc = serde_json::json!({
            "recommendation": recommendation,
            "plan": plan,
            "layout": layout,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!("{}\n", plan.summary());
    print!("{}", layout);
    println!("\nSteps:\n{}", describe(&disk_operations(&plan, &layout, settings)));
    Ok(())
}

fn run_stage(settings: &Settings) -> anyhow::Result<()> {
    let store = StageConfigStore::new(settings.stage_config.clone());
    let stage = store.load()?;
    print!("{}", stage.render());
    Ok(())
}
