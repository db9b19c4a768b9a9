use clap::Parser;
use std::process::ExitCode;

// Core modules
mod cli;
mod commands;
mod config;
mod observability;
mod tools;
mod ui;

mod analyzer;
mod domain;
mod error;
mod infrastructure;
mod services;

use cli::{Cli, Commands};
use commands::{backup, list, rollback, run, status, verify, Session};
use error::{exit_status_for, ExitStatus};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging with LOGGING env var support
    // LOGGING=debug,info,warn,error or just LOGGING=debug
    let log_level = std::env::var("LOGGING")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_else(|_| {
            if cli.verbose {
                "debug".to_string()
            } else {
                "info".to_string()
            }
        });

    // Logs go to stderr so `--json` output and events stay parseable
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(false)
        .init();

    match dispatch(cli).await {
        Ok(status) => status.into(),
        Err(e) => {
            ui::print_error(&format!("{:#}", e));
            exit_status_for(&e).into()
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitStatus> {
    let session = Session::load(
        cli.config.as_deref(),
        &cli.environment,
        &cli.policy.to_overrides(),
        cli.emit_events,
    )?;

    match cli.command {
        Commands::List { category, json } => list::execute(&session, category, json).await,
        Commands::Show { name, category } => list::show(&session, name, category).await,
        Commands::Run { name, category, yes } => run::execute(&session, name, category, yes).await,
        Commands::RunAll {
            category,
            continue_on_failure,
            dry_run,
            yes,
        } => run::run_all(&session, category, continue_on_failure, dry_run, yes).await,
        Commands::DryRun { name, category } => run::dry_run(&session, name, category).await,
        Commands::Status { json } => status::execute(&session, json).await,
        Commands::History { name, category, json } => status::history(&session, name, category, json).await,
        Commands::Rollback { name, category, yes } => rollback::execute(&session, name, category, yes).await,
        Commands::Verify { name, category } => verify::execute(&session, name, category).await,
        Commands::Backup { scope } => backup::execute(&session, scope).await,
        Commands::Backups { json } => backup::list(&session, json).await,
        Commands::Restore { backup_id, yes } => backup::restore(&session, backup_id, yes).await,
    }
}
