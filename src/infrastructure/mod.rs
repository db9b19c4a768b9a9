//! Infrastructure layer - external I/O adapters
//!
//! This module contains all code that interacts with external systems:
//! - Child processes running migration entry points (interpreters, psql, alembic)
//! - Snapshot media used by the backup manager

pub mod process;
pub mod snapshot;

// Re-export commonly used types
pub use process::{CommandSpec, CommandTemplate, ProcessOutcome, ProcessRunner, TemplateVars};
pub use snapshot::{medium_from_config, SnapshotMedium};
