// crates/script-api-cli/src/main.rs
// ============================================================================
// Module: Script API CLI Entry Point
// Description: Command dispatcher for the script execution control plane.
// Purpose: Turn CLI flags and an optional env file into a running server.
// Dependencies: clap, dotenvy, script-api-config, script-api-server, tokio.
// ============================================================================

//! ## Overview
//! The only subcommand is `serve`. Flags override environment variables,
//! which override the built-in defaults documented on
//! [`script_api_config::Config`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use script_api_config::Config;
use script_api_server::AppState;
use thiserror::Error;

/// Interval between background rescans when `--reload` is set.
const RELOAD_INTERVAL: Duration = Duration::from_secs(2);

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "script-api", disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server.
    Serve(ServeCommand),
}

/// Arguments for the `serve` subcommand.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Root directory scanned for runnable scripts.
    #[arg(long, value_name = "PATH")]
    scripts_path: Option<String>,
    /// Directory holding the run store and logs.
    #[arg(long, value_name = "DIR")]
    state_dir: Option<String>,
    /// Bind host for the HTTP listener.
    #[arg(long, value_name = "HOST")]
    host: Option<String>,
    /// Bind port for the HTTP listener.
    #[arg(long, value_name = "PORT")]
    port: Option<u16>,
    /// Load environment variables from this file before reading config.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
    /// Periodically rescan the scripts root in the background.
    #[arg(long, action = ArgAction::SetTrue)]
    reload: bool,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper; every variant maps to a specific exit code.
#[derive(Debug, Error)]
enum CliError {
    /// The server could not be configured or started: env file unreadable,
    /// scripts root missing, auth enabled without a secret.
    #[error("{0}")]
    Misconfigured(String),
    /// The server failed once it was already serving requests.
    #[error("{0}")]
    ServeFailed(String),
}

impl CliError {
    /// The exit code this error maps to.
    fn exit_code(&self) -> ExitCode {
        match self {
            Self::Misconfigured(_) => ExitCode::from(2),
            Self::ServeFailed(_) => ExitCode::FAILURE,
        }
    }
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let _ = writeln!(std::io::stderr(), "{err}");
            err.exit_code()
        }
    }
}

/// Executes the CLI command dispatcher.
async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Serve(command) => command_serve(command).await,
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command: load config, bootstrap state, serve.
async fn command_serve(command: ServeCommand) -> Result<(), CliError> {
    if let Some(env_file) = &command.env_file {
        dotenvy::from_path(env_file).map_err(|err| CliError::Misconfigured(format!("failed to load env file {env_file:?}: {err}")))?;
    }

    let config = Config::load(command.scripts_path.as_deref(), command.state_dir.as_deref(), command.host.as_deref(), command.port)
        .map_err(|err| CliError::Misconfigured(err.to_string()))?;

    let state = AppState::bootstrap(config).await.map_err(|err| CliError::Misconfigured(err.to_string()))?;

    if command.reload {
        let reload_state = std::sync::Arc::clone(&state);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RELOAD_INTERVAL);
            loop {
                ticker.tick().await;
                reload_state.rescan().await;
            }
        });
    }

    script_api_server::serve(state).await.map_err(|err| CliError::ServeFailed(err.to_string()))
}
