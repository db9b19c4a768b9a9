//! Centralized error types for the migration orchestrator
//!
//! Uses thiserror for typed errors that can be matched on,
//! while still being compatible with anyhow for propagation.

use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

use crate::domain::{Capability, Category};

/// Top-level error type for orchestrator commands
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backup error: {0}")]
    Backup(#[from] BackupError),

    #[error("Migration '{name}' not found in category '{category}'")]
    NotFound { name: String, category: Category },

    #[error("Migration {name} ({category}) does not support {}: no {} entry point", .capability.label(), .capability.label())]
    CapabilityMissing {
        name: String,
        category: Category,
        capability: Capability,
    },

    #[error("Aborted: {reason}")]
    Aborted { reason: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown environment '{name}'. Expected one of: dev, staging, prod")]
    UnknownEnvironment { name: String },

    #[error("Unknown migration category '{name}'. Expected one of: script, sql, orm, deployment, maintenance")]
    UnknownCategory { name: String },

    #[error("Category '{category}' is disabled in the configuration")]
    CategoryDisabled { category: Category },

    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Config file not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },
}

/// Why a candidate file could not be turned into a descriptor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisFailureReason {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("no executable content")]
    EmptyContent,

    #[error("unparseable: {0}")]
    Unparseable(String),

    #[error("missing required entry point {0}")]
    MissingEntryPoint(String),
}

/// Analysis failure for one candidate; excludes the unit from the catalog
#[derive(Error, Debug, Clone)]
#[error("Cannot analyze {} ({category}): {reason}", .path.display())]
pub struct AnalysisFailure {
    pub path: PathBuf,
    pub category: Category,
    pub reason: AnalysisFailureReason,
}

/// Backup errors
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Snapshot capture failed: {message}")]
    CaptureFailed { message: String },

    #[error("Snapshot capture timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Backup {id} not found")]
    NotFound { id: String },

    #[error("Restore of backup {id} failed: {message}")]
    RestoreFailed { id: String, message: String },

    #[error("Backup store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process exit codes of the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    Failure = 1,
    Configuration = 2,
    StaleCatalog = 3,
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status as u8)
    }
}

/// Pick the exit status for an error that reached `main`
pub fn exit_status_for(err: &anyhow::Error) -> ExitStatus {
    for cause in err.chain() {
        if cause.downcast_ref::<ConfigError>().is_some() {
            return ExitStatus::Configuration;
        }
        if let Some(orchestrator) = cause.downcast_ref::<OrchestratorError>() {
            return match orchestrator {
                OrchestratorError::Config(_) => ExitStatus::Configuration,
                _ => ExitStatus::Failure,
            };
        }
    }
    ExitStatus::Failure
}
