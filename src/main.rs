use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

use cadence::cli::Cli;
use cadence::cli::commands::Commands;
use cadence::config::Config;
use cadence::store::{
    EffectStore, Resolution, RunRecord, RunStatus, RunStore, compute_project_hash,
};

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("cadence")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("cadence.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Resolve the store directory for the selected project and open both stores.
fn open_stores(cli: &Cli, config: &Config) -> Result<(RunStore, EffectStore)> {
    let project = match &cli.project {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };

    let hash = compute_project_hash(&project)?;
    let base = config.storage.store_dir.join(hash);
    fs::create_dir_all(&base)
        .with_context(|| format!("Failed to create store directory: {}", base.display()))?;

    let runs = RunStore::open_at(&base)?;
    let effects = EffectStore::open_at(&base)?;
    Ok((runs, effects))
}

fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None | Some(Commands::List { status: None }) => handle_list_command(cli, config, None),
        Some(Commands::List { status }) => handle_list_command(cli, config, status.as_deref()),
        Some(Commands::Status { run_id, detailed }) => {
            handle_status_command(cli, config, run_id, *detailed)
        }
        Some(Commands::Breakpoints { run_id }) => {
            handle_breakpoints_command(cli, config, run_id.as_deref())
        }
        Some(Commands::Approve { id }) => handle_resolve_command(cli, config, id, Resolution::Approved),
        Some(Commands::Reject { id, reason }) => handle_resolve_command(
            cli,
            config,
            id,
            Resolution::Rejected {
                reason: reason.clone(),
            },
        ),
        Some(Commands::Edit { id, payload }) => handle_edit_command(cli, config, id, payload),
        Some(Commands::Cancel { run_id }) => handle_cancel_command(cli, config, run_id),
    }
}

fn status_colored(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Running => status.as_str().cyan(),
        RunStatus::AwaitingBreakpoint => status.as_str().yellow(),
        RunStatus::Completed => status.as_str().green(),
        RunStatus::Failed => status.as_str().red(),
        RunStatus::Cancelled => status.as_str().magenta(),
    }
}

fn parse_status(s: &str) -> Result<RunStatus> {
    match s {
        "running" => Ok(RunStatus::Running),
        "awaiting_breakpoint" => Ok(RunStatus::AwaitingBreakpoint),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        other => Err(eyre::eyre!("Unknown status filter: {}", other)),
    }
}

fn print_run_line(run: &RunRecord) {
    println!(
        "{}  {}  {}  steps={}",
        run.run_id,
        status_colored(run.status),
        run.process,
        run.history.len()
    );
}

fn handle_list_command(cli: &Cli, config: &Config, status: Option<&str>) -> Result<()> {
    info!("Listing runs - status: {:?}", status);
    let (runs, _effects) = open_stores(cli, config)?;

    let records = match status {
        Some(s) => runs.list_runs_by_status(parse_status(s)?)?,
        None => runs.list_runs()?,
    };

    if records.is_empty() {
        println!("{}", "No runs found".dimmed());
        return Ok(());
    }

    for run in &records {
        print_run_line(run);
    }
    Ok(())
}

fn handle_status_command(cli: &Cli, config: &Config, run_id: &str, detailed: bool) -> Result<()> {
    info!("Getting status for run: {} (detailed: {})", run_id, detailed);
    let (runs, effects) = open_stores(cli, config)?;

    let Some(run) = runs.get_run(run_id)? else {
        println!("{} {}", "Run not found:".red(), run_id);
        return Ok(());
    };

    println!("{} {}", "Run:".green(), run.run_id);
    println!("  process:  {}", run.process);
    println!("  status:   {}", status_colored(run.status));
    if let Some(duration) = run.duration_ms() {
        println!("  duration: {}ms", duration);
    }
    if let Some(ref error) = run.error {
        println!("  error:    {}", error.red());
    }

    if detailed {
        println!("  history:");
        for summary in &run.history {
            println!("    {}", serde_json::to_string(summary)?);
        }

        println!("  effects:");
        for effect in effects.list_for_run(run_id)? {
            println!(
                "    {}  {}  {}",
                effect.effect_id,
                effect.status,
                effect.task_name
            );
        }
    }

    Ok(())
}

fn handle_breakpoints_command(cli: &Cli, config: &Config, run_id: Option<&str>) -> Result<()> {
    info!("Listing breakpoints - run: {:?}", run_id);
    let (runs, _effects) = open_stores(cli, config)?;

    let records = match run_id {
        Some(id) => runs
            .list_breakpoints_for_run(id)?
            .into_iter()
            .filter(|bp| !bp.is_resolved())
            .collect(),
        None => runs.list_pending_breakpoints()?,
    };

    if records.is_empty() {
        println!("{}", "No pending breakpoints".dimmed());
        return Ok(());
    }

    for bp in &records {
        println!("{}  {}", bp.id.yellow(), bp.title);
        println!("  {}", bp.question);
        for file in &bp.context_files {
            println!("  context: {}", file.dimmed());
        }
    }
    Ok(())
}

fn handle_resolve_command(cli: &Cli, config: &Config, id: &str, resolution: Resolution) -> Result<()> {
    info!("Resolving breakpoint {} as {}", id, resolution.as_str());
    let (mut runs, _effects) = open_stores(cli, config)?;

    let label = resolution.as_str();
    runs.resolve_breakpoint(id, resolution)?;
    match label {
        "approved" => println!("{} {}", "Approved:".green(), id),
        _ => println!("{} {}", "Rejected:".red(), id),
    }
    println!("{}", "The suspended run picks this up on its next poll".dimmed());
    Ok(())
}

fn handle_edit_command(cli: &Cli, config: &Config, id: &str, payload: &str) -> Result<()> {
    info!("Resolving breakpoint {} with edited payload", id);
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("Payload must be valid JSON")?;

    let (mut runs, _effects) = open_stores(cli, config)?;
    runs.resolve_breakpoint(id, Resolution::Edited { payload })?;
    println!("{} {}", "Edited:".green(), id);
    Ok(())
}

fn handle_cancel_command(cli: &Cli, config: &Config, run_id: &str) -> Result<()> {
    info!("Cancelling run: {}", run_id);
    let (mut runs, _effects) = open_stores(cli, config)?;

    let run = runs.request_cancel(run_id)?;
    println!("{} {}", "Cancelled:".magenta(), run.run_id);
    println!(
        "{}",
        "The runner observes cancellation at its next step boundary".dimmed()
    );
    Ok(())
}

fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).context("Application failed")?;

    Ok(())
}
