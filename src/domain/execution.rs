//! Execution outcome types
//!
//! An `ExecutionResult` is created when the engine begins a run, becomes
//! terminal once its status leaves `Pending`/`Running`, and is appended to
//! the status ledger on completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::migration::{Category, MigrationDescriptor};

/// Lifecycle status of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
    RolledBack,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Failed and timed-out runs are eligible for rollback
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed out",
            Self::Skipped => "skipped",
            Self::RolledBack => "rolled back",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the engine was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Run,
    DryRun,
    Rollback,
    Verify,
}

impl Operation {
    /// Operations that may change the target system
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Run | Self::Rollback)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Run => "run",
            Self::DryRun => "dry-run",
            Self::Rollback => "rollback",
            Self::Verify => "verify",
        })
    }
}

/// Step of the execution protocol an error happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Preflight,
    Backup,
    Run,
    DryRun,
    Verify,
    Rollback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Preflight => "preflight",
            Self::Backup => "backup",
            Self::Run => "run",
            Self::DryRun => "dry-run",
            Self::Verify => "verify",
            Self::Rollback => "rollback",
        })
    }
}

/// Failure classification surfaced to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    StaleCatalog,
    BackupError,
    ExecutionFailure,
    TimedOut,
    VerificationFailed,
    RollbackFailure,
    StructuralValidation,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StaleCatalog => "StaleCatalog",
            Self::BackupError => "BackupError",
            Self::ExecutionFailure => "ExecutionFailure",
            Self::TimedOut => "TimedOut",
            Self::VerificationFailed => "VerificationFailed",
            Self::RollbackFailure => "RollbackFailure",
            Self::StructuralValidation => "StructuralValidation",
        })
    }
}

/// Structured error attached to a failed result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub reason: FailureReason,
    pub phase: Phase,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(reason: FailureReason, phase: Phase, message: impl Into<String>) -> Self {
        Self {
            reason,
            phase,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} during {}: {}", self.reason, self.phase, self.message)
    }
}

/// Outcome of running one migration descriptor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub name: String,
    pub category: Category,
    pub operation: Operation,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: u64,
    pub backup_reference: Option<String>,
    pub error_detail: Option<ErrorDetail>,
    /// Rollback failure, kept apart from the original failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_error: Option<ErrorDetail>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    /// Tail of the unit's captured output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tail: Option<String>,
}

impl ExecutionResult {
    /// New result in `Pending` state, never attempted
    pub fn pending(unit: &MigrationDescriptor, operation: Operation) -> Self {
        Self {
            name: unit.name.clone(),
            category: unit.category,
            operation,
            status: ExecutionStatus::Pending,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
            backup_reference: None,
            error_detail: None,
            rollback_error: None,
            notes: Vec::new(),
            output_tail: None,
        }
    }

    /// Mark the start of an attempt
    pub fn begin(&mut self) {
        self.started_at = Some(Utc::now());
    }

    /// Terminal failure with the given detail
    pub fn fail(&mut self, status: ExecutionStatus, detail: ErrorDetail) {
        self.status = status;
        self.error_detail = Some(detail);
    }

    /// Stamp the finish time and duration
    pub fn finish(&mut self) {
        let finished = Utc::now();
        if let Some(started) = self.started_at {
            self.duration_ms = (finished - started).num_milliseconds().max(0) as u64;
        }
        self.finished_at = Some(finished);
    }

    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    /// Operator-facing failure line: name, category, phase and message
    pub fn failure_summary(&self) -> Option<String> {
        self.error_detail.as_ref().map(|detail| {
            let mut line = format!(
                "{} ({}) failed in {} phase [{}]: {}",
                self.name, self.category, detail.phase, detail.reason, detail.message
            );
            if detail.reason == FailureReason::StaleCatalog {
                line.push_str(
                    "\n  The catalog is stale: re-run discovery (e.g. `migrate list`) and retry the command.",
                );
            }
            line
        })
    }

    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.duration_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::migration::{Capability, MigrationDescriptor};
    use std::collections::{BTreeMap, BTreeSet};
    use std::path::PathBuf;

    fn descriptor() -> MigrationDescriptor {
        MigrationDescriptor {
            name: "001_add_cuisine".into(),
            category: Category::Sql,
            source_path: PathBuf::from("/tmp/001_add_cuisine.sql"),
            capabilities: BTreeSet::from([Capability::Runnable]),
            entry_points: BTreeMap::new(),
            documentation: None,
            content_fingerprint: "sha256:00".into(),
            supports_dry_run: false,
            independent: false,
            attributes: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_status_terminality() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Skipped.is_terminal());
        assert!(ExecutionStatus::RolledBack.is_terminal());
        assert!(ExecutionStatus::TimedOut.is_failure());
        assert!(!ExecutionStatus::RolledBack.is_failure());
    }

    #[test]
    fn test_failure_summary_names_phase_and_unit() {
        let mut result = ExecutionResult::pending(&descriptor(), Operation::Run);
        result.begin();
        result.fail(
            ExecutionStatus::Failed,
            ErrorDetail::new(FailureReason::ExecutionFailure, Phase::Run, "exit status 3"),
        );
        result.finish();

        let summary = result.failure_summary().unwrap();
        assert!(summary.contains("001_add_cuisine"));
        assert!(summary.contains("sql"));
        assert!(summary.contains("run phase"));
        assert!(summary.contains("exit status 3"));
        assert!(result.finished_at.is_some());
    }

    #[test]
    fn test_stale_catalog_summary_instructs_rediscovery() {
        let mut result = ExecutionResult::pending(&descriptor(), Operation::Run);
        result.fail(
            ExecutionStatus::Failed,
            ErrorDetail::new(FailureReason::StaleCatalog, Phase::Preflight, "fingerprint changed"),
        );
        assert!(result.failure_summary().unwrap().contains("re-run discovery"));
    }

    #[test]
    fn test_result_serializes_status_in_snake_case() {
        let mut result = ExecutionResult::pending(&descriptor(), Operation::DryRun);
        result.status = ExecutionStatus::RolledBack;
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "rolled_back");
        assert_eq!(json["operation"], "dry_run");
        assert_eq!(json["category"], "sql");
    }
}
