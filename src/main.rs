//! CLI entry point for bookfetch.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

mod app;
mod app_config;
mod cli;
mod commands;

use app::settings::Settings;
use app::terminal;
use cli::{Cli, Command};

/// Process-level outcome mapped onto the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    Success,
    /// Some works failed while others succeeded.
    Partial,
    Failure,
}

impl ProcessExit {
    fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::Partial => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    match run(cli).await.map_err(commands::explain_ledger_contention) {
        Ok(exit) => ExitCode::from(exit.code()),
        Err(err) => {
            error!(error = %err, "bookfetch failed");
            eprintln!("Error: {err:#}");
            ExitCode::from(ProcessExit::Failure.code())
        }
    }
}

async fn run(cli: Cli) -> Result<ProcessExit> {
    let loaded = app_config::load_config(cli.config.as_deref())?;
    let settings = Settings::resolve(&cli, loaded.config.as_ref());

    // Priority: RUST_LOG env var > -q > -v > config verbosity > info
    terminal::init_tracing(settings.log_level);
    debug!(
        config = ?loaded.path,
        output_dir = %settings.output_dir.display(),
        database = %settings.database.display(),
        "settings resolved"
    );

    match &cli.command {
        Command::Search(args) => commands::run_search_command(args, &settings).await?,
        Command::Fetch(args) => {
            return commands::run_fetch_command(args, &settings, cli.quiet).await;
        }
        Command::Stats => commands::run_stats_command(&settings).await?,
        Command::Verify(args) => commands::run_verify_command(args, &settings).await?,
        Command::Loans(args) => commands::run_loans_command(args, &settings).await?,
        Command::Export(args) => commands::run_export_command(args, &settings).await?,
        Command::Duplicates => commands::run_duplicates_command(&settings).await?,
    }
    Ok(ProcessExit::Success)
}
