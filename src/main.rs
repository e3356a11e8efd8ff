//! topoplan CLI entrypoint.
//!
//! This is the main entrypoint for the topoplan command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use topoplan::backend::SimulatedBackend;
use topoplan::cli::{Cli, Commands, LogFormat, OutputFormatter, StateCommands};
use topoplan::config::{ConfigParser, TopologyConfig, find_config_file};
use topoplan::error::{EXIT_OK, Result};
use topoplan::graph::{build, validate};
use topoplan::reconciler::Reconciler;
use topoplan::state::{LocalStateStore, StateStore};

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let formatter = OutputFormatter::new(cli.output);
    match runtime.block_on(run(cli, formatter)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            emit(&formatter.format_error(&e));
            ExitCode::from(e.exit_code())
        }
    }
}

/// Initializes the logging system. Logs always go to stderr so stdout
/// carries only command output.
fn init_logging(verbose: bool, format: LogFormat) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Main async entry point. Returns the process exit code.
async fn run(cli: Cli, formatter: OutputFormatter) -> Result<u8> {
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Validate => cmd_validate(config_path, formatter),
        Commands::Plan { detailed } => cmd_plan(config_path, detailed, formatter).await,
        Commands::Apply { yes, max_parallel } => {
            cmd_apply(config_path, yes, max_parallel, formatter).await
        }
        Commands::Destroy { yes, dry_run } => cmd_destroy(config_path, yes, dry_run, formatter).await,
        Commands::State { command } => cmd_state(config_path, command, formatter).await,
    }
}

/// Validate the declaration.
fn cmd_validate(config_path: Option<&Path>, formatter: OutputFormatter) -> Result<u8> {
    let (config, _) = load_declaration(config_path)?;

    let graph = build(&config)?;
    validate(&graph)?;
    info!("Declaration is valid: {} resources", graph.len());

    emit(&formatter.format_validation(&config, &graph));
    Ok(EXIT_OK)
}

/// Show the changeset.
async fn cmd_plan(config_path: Option<&Path>, detailed: bool, formatter: OutputFormatter) -> Result<u8> {
    let (config, base_dir) = load_declaration(config_path)?;
    let store = state_store(&config, &base_dir);
    let reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedBackend::new()));

    let changeset = reconciler.plan().await?;
    emit(&formatter.format_plan(&changeset, detailed));
    Ok(EXIT_OK)
}

/// Plan and apply.
async fn cmd_apply(
    config_path: Option<&Path>,
    auto_approve: bool,
    max_parallel: Option<usize>,
    formatter: OutputFormatter,
) -> Result<u8> {
    let (config, base_dir) = load_declaration(config_path)?;
    let store = state_store(&config, &base_dir);
    let mut reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedBackend::new()));
    if let Some(max_parallel) = max_parallel {
        reconciler = reconciler.with_max_parallel(max_parallel);
    }

    let changeset = reconciler.plan().await?;
    emit(&formatter.format_plan(&changeset, false));
    if changeset.is_empty() {
        return Ok(EXIT_OK);
    }

    if !auto_approve && !confirm("Do you want to apply this changeset? [y/N]: ", "y")? {
        emit(&formatter.message("Apply cancelled."));
        return Ok(EXIT_OK);
    }

    let report = reconciler.apply_approved(&changeset).await?;
    emit(&formatter.format_run(&report));
    Ok(report.exit_code())
}

/// Tear down every recorded resource.
async fn cmd_destroy(
    config_path: Option<&Path>,
    auto_approve: bool,
    dry_run: bool,
    formatter: OutputFormatter,
) -> Result<u8> {
    let (config, base_dir) = load_declaration(config_path)?;
    let store = state_store(&config, &base_dir);
    let reconciler = Reconciler::new(&config, &store, Arc::new(SimulatedBackend::new()));

    let changeset = reconciler.plan_destroy().await?;
    emit(&formatter.format_plan(&changeset, false));
    if dry_run || changeset.is_empty() {
        return Ok(EXIT_OK);
    }

    if !auto_approve
        && !confirm(
            "\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ",
            "destroy",
        )?
    {
        emit(&formatter.message("Destroy cancelled."));
        return Ok(EXIT_OK);
    }

    let report = reconciler.destroy_approved(&changeset).await?;
    emit(&formatter.format_run(&report));
    Ok(report.exit_code())
}

/// State management commands.
async fn cmd_state(
    config_path: Option<&Path>,
    command: StateCommands,
    formatter: OutputFormatter,
) -> Result<u8> {
    let (config, base_dir) = load_declaration(config_path)?;
    let store = state_store(&config, &base_dir);

    match command {
        StateCommands::Show => {
            if let Some(snapshot) = store.load().await? {
                emit(&formatter.format_state(&snapshot));
            } else {
                emit(&formatter.message("No state found."));
            }
        }
        StateCommands::Unlock { lock_id, force } => {
            let removed = if force {
                store.force_unlock().await?
            } else if let Some(id) = lock_id {
                let current = store.get_lock_info().await?;
                store.release_lock(&id).await?;
                current.filter(|lock| lock.lock_id == id)
            } else {
                None
            };
            emit(&formatter.format_unlock(removed.as_ref()));
        }
    }

    Ok(EXIT_OK)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Writes command output to stdout.
fn emit(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{text}");
}

/// Asks on stderr and reads one line from stdin.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Resolves the declaration file path.
fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.to_path_buf()))
}

/// Loads the declaration with `.env` and environment overrides applied.
/// Returns it with the directory relative paths resolve against.
fn load_declaration(config_path: Option<&Path>) -> Result<(TopologyConfig, PathBuf)> {
    let config_file = resolve_config_path(config_path)?;
    debug!("Loading declaration from: {}", config_file.display());

    let base_dir = config_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let parser = ConfigParser::new().with_base_path(base_dir.clone());
    parser.load_dotenv()?;
    let config = parser.load_with_env(&config_file)?;

    Ok((config, base_dir))
}

/// Creates the state store for a declaration.
fn state_store(config: &TopologyConfig, base_dir: &Path) -> LocalStateStore {
    config.state.path.as_ref().map_or_else(
        || LocalStateStore::in_dir(base_dir),
        |path| LocalStateStore::with_state_path(base_dir.join(path)),
    )
}
