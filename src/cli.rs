//! CLI definitions for migrate
//!
//! This module contains all CLI argument parsing structures using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::PolicyOverrides;
use crate::services::backup_manager::FULL_SCOPE;

#[derive(Parser)]
#[command(
    name = "migrate",
    version,
    about = "Migration orchestrator for heterogeneous schema migrations",
    long_about = "Discovers script, SQL, ORM, deployment and maintenance migrations,\n\
                  and runs them under an environment policy with backups, verification\n\
                  and automatic rollback."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Migrations config file (searched upwards from the current directory when omitted)
    #[arg(long, global = true, env = "MIGRATION_CONFIG")]
    pub config: Option<PathBuf>,

    /// Target environment: dev, staging or prod
    #[arg(long = "env", global = true, env = "MIGRATION_ENV", default_value = "dev")]
    pub environment: String,

    /// Print structured MIGRATION_EVENT lines for log shippers
    #[arg(long, global = true, env = "MIGRATION_EVENTS")]
    pub emit_events: bool,

    #[command(flatten)]
    pub policy: PolicyArgs,
}

/// Explicit overrides of the environment policy
#[derive(Args, Debug, Clone, Default)]
pub struct PolicyArgs {
    /// Require confirmation and fail closed on backup errors
    #[arg(long, global = true, value_name = "BOOL")]
    pub safe_mode: Option<bool>,

    /// Take a backup before every mutating run (always on in prod)
    #[arg(long, global = true, value_name = "BOOL")]
    pub auto_backup: Option<bool>,

    /// Run the verify entry point after a successful run
    #[arg(long, global = true, value_name = "BOOL")]
    pub verify_after_run: Option<bool>,

    /// Hard timeout per entry point invocation (e.g. 90s, 5m)
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Run migrations declared independent concurrently
    #[arg(long, global = true)]
    pub allow_parallel: bool,

    /// Do not roll back automatically after a failure
    #[arg(long, global = true)]
    pub no_rollback: bool,
}

impl PolicyArgs {
    pub fn to_overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            safe_mode: self.safe_mode,
            auto_backup: self.auto_backup,
            verify_after_run: self.verify_after_run,
            // Sub-second timeouts round up so "500ms" does not become zero
            timeout_seconds: self.timeout.map(|t| (t.as_millis() as u64).div_ceil(1000)),
            allow_parallel: self.allow_parallel.then_some(true),
            rollback_on_failure: self.no_rollback.then_some(false),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// List discovered migrations in execution order
    List {
        /// Only this category (script, sql, orm, deployment, maintenance)
        category: Option<String>,

        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one migration's descriptor
    Show {
        /// Migration name (file name without extension)
        name: String,

        /// Migration category
        category: String,
    },

    /// Run one migration
    Run {
        /// Migration name (file name without extension)
        name: String,

        /// Migration category
        category: String,

        /// Skip the safe-mode confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Run all migrations, optionally of one category, in execution order
    RunAll {
        /// Only this category
        category: Option<String>,

        /// Keep going after a failed migration
        #[arg(long)]
        continue_on_failure: bool,

        /// Dry-run every migration instead of running it
        #[arg(long)]
        dry_run: bool,

        /// Skip the safe-mode confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Run one migration without changing the target
    DryRun {
        /// Migration name (file name without extension)
        name: String,

        /// Migration category
        category: String,
    },

    /// Show the last recorded result of every migration
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show every recorded result of one migration
    History {
        /// Migration name (file name without extension)
        name: String,

        /// Migration category
        category: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Invoke a migration's rollback entry point
    Rollback {
        /// Migration name (file name without extension)
        name: String,

        /// Migration category
        category: String,

        /// Skip the safe-mode confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Invoke a migration's verify entry point
    Verify {
        /// Migration name (file name without extension)
        name: String,

        /// Migration category
        category: String,
    },

    /// Take a backup of the target system
    Backup {
        /// Label recorded with the backup
        #[arg(long, default_value = FULL_SCOPE)]
        scope: String,
    },

    /// List backups, oldest first
    Backups {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore the target system from a backup
    Restore {
        /// Backup id as shown by `migrate backups`
        backup_id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}
