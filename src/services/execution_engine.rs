//! Execution engine - runs migration units under an execution policy
//!
//! Every run walks the same protocol:
//!
//! ```text
//! preflight (fingerprint) → backup → run → verify → rollback on failure → record
//! ```
//!
//! Unit code is untrusted. Each entry point runs as a child process under the
//! policy timeout and is killed when it overruns. Failures of a unit are
//! values in its [`ExecutionResult`], never Rust errors.

use futures::future::join_all;
use serde::Serialize;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::backup_manager::BackupManager;
use super::status_ledger::StatusLedger;
use crate::analyzer::{fingerprint_file, Analyzer};
use crate::domain::{
    Capability, EntryPoint, ErrorDetail, ExecutionPolicy, ExecutionResult, ExecutionStatus, FailureReason,
    MigrationDescriptor, Operation, Phase,
};
use crate::error::OrchestratorError;
use crate::infrastructure::process::ProcessOutput;
use crate::infrastructure::{CommandSpec, ProcessOutcome, ProcessRunner};
use crate::observability::{BackupCreatedEvent, BackupFailedEvent, BatchCompletedEvent, EventSink, MigrationEvent};

/// Lines of unit output kept on a failed result
const OUTPUT_TAIL_LINES: usize = 20;

/// How one invocation of an entry point ended
enum Invocation {
    Completed(ProcessOutput),
    Failed {
        message: String,
        output_tail: Option<String>,
    },
    TimedOut,
}

/// Options for a batch run
#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// Halt on the first result that is not a success
    pub stop_on_failure: bool,
    pub dry_run: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            stop_on_failure: true,
            dry_run: false,
        }
    }
}

/// Results of a batch, in input order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<ExecutionResult>,
    pub cancelled: bool,
    /// Unit whose failure halted the batch
    pub halted_by: Option<String>,
    pub duration_ms: u64,
}

impl BatchReport {
    pub fn count(&self, status: ExecutionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Every unit ran and none failed
    pub fn is_success(&self) -> bool {
        !self.cancelled
            && self
                .results
                .iter()
                .all(|r| matches!(r.status, ExecutionStatus::Succeeded | ExecutionStatus::Skipped))
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| r.error_detail.is_some())
    }
}

/// Runs migration units against the target system
pub struct ExecutionEngine {
    analyzer: Analyzer,
    policy: ExecutionPolicy,
    backups: Option<BackupManager>,
    ledger: StatusLedger,
    events: EventSink,
    runner: ProcessRunner,
    cancelled: Arc<AtomicBool>,
}

impl ExecutionEngine {
    pub fn new(analyzer: Analyzer, policy: ExecutionPolicy, ledger: StatusLedger) -> Self {
        Self {
            analyzer,
            policy,
            backups: None,
            ledger,
            events: EventSink::disabled(),
            runner: ProcessRunner::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_backups(mut self, manager: BackupManager) -> Self {
        self.backups = Some(manager);
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Share a cancellation flag; a set flag stops a batch before its next unit
    pub fn with_cancellation(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Run one unit's run entry point
    pub async fn run_one(&self, unit: &MigrationDescriptor) -> ExecutionResult {
        self.execute(unit, Operation::Run).await
    }

    /// Run one unit without mutating the target
    ///
    /// Units that cannot honour a no-mutation run are only parsed and come
    /// back `Skipped`.
    pub async fn dry_run(&self, unit: &MigrationDescriptor) -> ExecutionResult {
        self.execute(unit, Operation::DryRun).await
    }

    /// Invoke the rollback entry point directly
    ///
    /// # Errors
    /// Returns `OrchestratorError::CapabilityMissing` if the unit has no rollback entry point
    pub async fn rollback(&self, unit: &MigrationDescriptor) -> Result<ExecutionResult, OrchestratorError> {
        require_capability(unit, Capability::Rollbackable)?;
        Ok(self.execute(unit, Operation::Rollback).await)
    }

    /// Invoke the verify entry point directly
    ///
    /// # Errors
    /// Returns `OrchestratorError::CapabilityMissing` if the unit has no verify entry point
    pub async fn verify(&self, unit: &MigrationDescriptor) -> Result<ExecutionResult, OrchestratorError> {
        require_capability(unit, Capability::Verifiable)?;
        Ok(self.execute(unit, Operation::Verify).await)
    }

    /// Run units in the given order
    ///
    /// With `stop_on_failure` the first non-successful result halts the batch
    /// and the remaining units come back `Pending`. Cancellation is honoured
    /// between units only. With `allow_parallel`, consecutive units of one
    /// category declared independent run concurrently.
    pub async fn run_batch(&self, units: &[&MigrationDescriptor], options: BatchOptions) -> BatchReport {
        let started = Instant::now();
        let operation = if options.dry_run {
            Operation::DryRun
        } else {
            Operation::Run
        };

        let mut results = Vec::with_capacity(units.len());
        let mut halted_by: Option<String> = None;
        let mut cancelled = false;

        for wave in plan_waves(units, self.policy.allow_parallel) {
            let members = &units[wave];

            if halted_by.is_none() && !cancelled && self.is_cancelled() {
                warn!("Batch cancelled; remaining migrations will not start");
                cancelled = true;
            }
            if let Some(blocker) = &halted_by {
                for unit in members {
                    results.push(not_attempted(
                        unit,
                        operation,
                        format!("not attempted: batch halted after {} failed", blocker),
                    ));
                }
                continue;
            }
            if cancelled {
                for unit in members {
                    results.push(not_attempted(unit, operation, "not attempted: batch cancelled"));
                }
                continue;
            }

            let attempted = if members.len() == 1 {
                vec![self.attempt(members[0], operation).await]
            } else {
                info!("Running {} independent migrations in parallel", members.len());
                join_all(members.iter().map(|unit| self.attempt(unit, operation))).await
            };

            for (unit, mut result) in members.iter().zip(attempted) {
                self.conclude(unit, &mut result).await;
                let acceptable = result.status == ExecutionStatus::Succeeded
                    || (options.dry_run && result.status == ExecutionStatus::Skipped);
                if !acceptable && options.stop_on_failure && halted_by.is_none() {
                    halted_by = Some(result.qualified_name());
                }
                results.push(result);
            }
        }

        let report = BatchReport {
            results,
            cancelled,
            halted_by,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        self.events.emit(|metadata| {
            MigrationEvent::BatchCompleted(BatchCompletedEvent {
                metadata,
                total: report.results.len(),
                succeeded: report.count(ExecutionStatus::Succeeded),
                failed: report.count(ExecutionStatus::Failed) + report.count(ExecutionStatus::TimedOut),
                skipped: report.count(ExecutionStatus::Skipped),
                rolled_back: report.count(ExecutionStatus::RolledBack),
                pending: report.count(ExecutionStatus::Pending),
                cancelled: report.cancelled,
                duration_secs: report.duration_ms as f64 / 1000.0,
            })
        });
        report
    }

    async fn execute(&self, unit: &MigrationDescriptor, operation: Operation) -> ExecutionResult {
        let mut result = self.attempt(unit, operation).await;
        self.conclude(unit, &mut result).await;
        result
    }

    /// Drive one operation to a terminal state
    async fn attempt(&self, unit: &MigrationDescriptor, operation: Operation) -> ExecutionResult {
        let mut result = ExecutionResult::pending(unit, operation);
        result.begin();
        self.events.started(unit, operation);
        info!(
            migration = %unit.name,
            category = %unit.category,
            "Starting {} of {}",
            operation,
            unit.qualified_name()
        );

        match operation {
            Operation::Run => self.perform_run(unit, &mut result).await,
            Operation::DryRun => self.perform_dry_run(unit, &mut result).await,
            Operation::Rollback => self.perform_rollback(unit, &mut result).await,
            Operation::Verify => self.perform_verify(unit, &mut result).await,
        }

        result.finish();
        result
    }

    /// Record, log and announce a terminal result
    async fn conclude(&self, unit: &MigrationDescriptor, result: &mut ExecutionResult) {
        if result.operation.is_mutating() {
            if let Err(e) = self.ledger.record(unit, result).await {
                error!("Failed to record {} in the status ledger: {:#}", result.qualified_name(), e);
                result.note(format!("not recorded in status ledger: {:#}", e));
            }
        }

        match result.status {
            ExecutionStatus::Succeeded | ExecutionStatus::Skipped => info!(
                migration = %result.name,
                category = %result.category,
                "{} {} in {}ms",
                result.qualified_name(),
                result.status,
                result.duration_ms
            ),
            _ => {
                if let Some(summary) = result.failure_summary() {
                    error!(migration = %result.name, category = %result.category, "{}", summary);
                }
            }
        }

        self.events.finished(result);
    }

    async fn perform_run(&self, unit: &MigrationDescriptor, result: &mut ExecutionResult) {
        if !self.preflight(unit, result).await || !self.backup_before(unit, result).await {
            return;
        }

        result.status = ExecutionStatus::Running;
        match self.invoke(unit, EntryPoint::Run).await {
            Invocation::Completed(output) => {
                debug!(
                    "{} finished in {}; output:\n{}",
                    unit.qualified_name(),
                    humantime::format_duration(Duration::from_millis(output.elapsed.as_millis() as u64)),
                    output.tail(OUTPUT_TAIL_LINES)
                );
                result.status = ExecutionStatus::Succeeded;
            }
            Invocation::Failed { message, output_tail } => {
                result.output_tail = output_tail;
                result.fail(
                    ExecutionStatus::Failed,
                    ErrorDetail::new(FailureReason::ExecutionFailure, Phase::Run, message),
                );
            }
            Invocation::TimedOut => {
                result.fail(
                    ExecutionStatus::TimedOut,
                    ErrorDetail::new(FailureReason::TimedOut, Phase::Run, self.timeout_message()),
                );
            }
        }

        if result.status == ExecutionStatus::Succeeded {
            self.verify_after_run(unit, result).await;
        }
        if result.status.is_failure() {
            self.rollback_after_failure(unit, result).await;
        }
    }

    async fn verify_after_run(&self, unit: &MigrationDescriptor, result: &mut ExecutionResult) {
        if !self.policy.verify_after_run {
            return;
        }
        if !unit.has(Capability::Verifiable) {
            result.note("verification skipped: no verify entry point");
            return;
        }

        info!(migration = %unit.name, category = %unit.category, phase = "verify", "Verifying {}", unit.qualified_name());
        match self.invoke(unit, EntryPoint::Verify).await {
            Invocation::Completed(_) => result.note("verified"),
            Invocation::Failed { message, output_tail } => {
                result.output_tail = output_tail;
                result.fail(
                    ExecutionStatus::Failed,
                    ErrorDetail::new(FailureReason::VerificationFailed, Phase::Verify, message),
                );
            }
            Invocation::TimedOut => result.fail(
                ExecutionStatus::Failed,
                ErrorDetail::new(
                    FailureReason::VerificationFailed,
                    Phase::Verify,
                    self.timeout_message(),
                ),
            ),
        }
    }

    async fn rollback_after_failure(&self, unit: &MigrationDescriptor, result: &mut ExecutionResult) {
        if !self.policy.rollback_on_failure {
            result.note("automatic rollback disabled by policy");
            return;
        }
        if !unit.has(Capability::Rollbackable) {
            warn!("{} has no rollback entry point; leaving the target as the failed run left it", unit.qualified_name());
            result.note("no rollback entry point; nothing was rolled back");
            return;
        }

        info!(migration = %unit.name, category = %unit.category, phase = "rollback", "Rolling back {}", unit.qualified_name());
        let failure = match self.invoke(unit, EntryPoint::Rollback).await {
            Invocation::Completed(_) => {
                result.status = ExecutionStatus::RolledBack;
                return;
            }
            Invocation::Failed { message, .. } => message,
            Invocation::TimedOut => self.timeout_message(),
        };

        error!(
            migration = %unit.name,
            category = %unit.category,
            "Rollback of {} failed: {}. Manual intervention required: the target may be in an intermediate state",
            unit.qualified_name(),
            failure
        );
        result.rollback_error = Some(ErrorDetail::new(FailureReason::RollbackFailure, Phase::Rollback, failure));
    }

    async fn perform_dry_run(&self, unit: &MigrationDescriptor, result: &mut ExecutionResult) {
        if !self.preflight(unit, result).await {
            return;
        }

        result.status = ExecutionStatus::Running;
        let command = if unit.supports_dry_run {
            self.analyzer.dry_run_command_for(unit)
        } else {
            Ok(None)
        };

        let spec = match command {
            Ok(Some(spec)) => spec,
            Ok(None) => {
                self.structural_validation(unit, result);
                return;
            }
            Err(e) => {
                result.fail(
                    ExecutionStatus::Failed,
                    ErrorDetail::new(FailureReason::ExecutionFailure, Phase::DryRun, format!("{:#}", e)),
                );
                return;
            }
        };

        match self.spawn(spec).await {
            Invocation::Completed(_) => {
                result.status = ExecutionStatus::Succeeded;
                result.note("dry run: no changes applied");
            }
            Invocation::Failed { message, output_tail } => {
                result.output_tail = output_tail;
                result.fail(
                    ExecutionStatus::Failed,
                    ErrorDetail::new(FailureReason::ExecutionFailure, Phase::DryRun, message),
                );
            }
            Invocation::TimedOut => result.fail(
                ExecutionStatus::TimedOut,
                ErrorDetail::new(FailureReason::TimedOut, Phase::DryRun, self.timeout_message()),
            ),
        }
    }

    fn structural_validation(&self, unit: &MigrationDescriptor, result: &mut ExecutionResult) {
        match self.analyzer.validate_structure(unit) {
            Ok(summary) => {
                result.status = ExecutionStatus::Skipped;
                result.note(format!(
                    "dry run not supported by this unit; structural validation only ({})",
                    summary
                ));
            }
            Err(message) => result.fail(
                ExecutionStatus::Failed,
                ErrorDetail::new(FailureReason::StructuralValidation, Phase::DryRun, message),
            ),
        }
    }

    async fn perform_rollback(&self, unit: &MigrationDescriptor, result: &mut ExecutionResult) {
        if !self.preflight(unit, result).await || !self.backup_before(unit, result).await {
            return;
        }

        result.status = ExecutionStatus::Running;
        match self.invoke(unit, EntryPoint::Rollback).await {
            Invocation::Completed(_) => result.status = ExecutionStatus::Succeeded,
            Invocation::Failed { message, output_tail } => {
                result.output_tail = output_tail;
                result.fail(
                    ExecutionStatus::Failed,
                    ErrorDetail::new(FailureReason::RollbackFailure, Phase::Rollback, message),
                );
            }
            Invocation::TimedOut => result.fail(
                ExecutionStatus::TimedOut,
                ErrorDetail::new(FailureReason::TimedOut, Phase::Rollback, self.timeout_message()),
            ),
        }
    }

    async fn perform_verify(&self, unit: &MigrationDescriptor, result: &mut ExecutionResult) {
        if !self.preflight(unit, result).await {
            return;
        }

        result.status = ExecutionStatus::Running;
        match self.invoke(unit, EntryPoint::Verify).await {
            Invocation::Completed(_) => result.status = ExecutionStatus::Succeeded,
            Invocation::Failed { message, output_tail } => {
                result.output_tail = output_tail;
                result.fail(
                    ExecutionStatus::Failed,
                    ErrorDetail::new(FailureReason::VerificationFailed, Phase::Verify, message),
                );
            }
            Invocation::TimedOut => result.fail(
                ExecutionStatus::TimedOut,
                ErrorDetail::new(FailureReason::TimedOut, Phase::Verify, self.timeout_message()),
            ),
        }
    }

    /// Refuse to run a descriptor whose file changed since discovery
    async fn preflight(&self, unit: &MigrationDescriptor, result: &mut ExecutionResult) -> bool {
        let detail = match fingerprint_file(&unit.source_path).await {
            Ok(current) if current == unit.content_fingerprint => return true,
            Ok(current) => format!(
                "{} changed since discovery (catalog {}, on disk {})",
                unit.source_path.display(),
                short_fingerprint(&unit.content_fingerprint),
                short_fingerprint(&current)
            ),
            Err(e) => format!("{:#}", e),
        };

        warn!("Stale catalog entry for {}: {}", unit.qualified_name(), detail);
        result.fail(
            ExecutionStatus::Failed,
            ErrorDetail::new(FailureReason::StaleCatalog, Phase::Preflight, detail),
        );
        false
    }

    /// Take the policy-mandated backup; `false` means the run must not start
    async fn backup_before(&self, unit: &MigrationDescriptor, result: &mut ExecutionResult) -> bool {
        // Safe mode makes backups mandatory even if the policy was built by hand
        if !self.policy.auto_backup && !self.policy.safe_mode {
            return true;
        }

        let scope = unit.qualified_name();
        let outcome = match &self.backups {
            Some(manager) => manager
                .create_backup(&scope, self.policy.timeout)
                .await
                .map_err(|e| e.to_string()),
            None => Err("no backup store configured".to_string()),
        };

        match outcome {
            Ok(backup) => {
                self.events.emit(|metadata| {
                    MigrationEvent::BackupCreated(BackupCreatedEvent {
                        metadata,
                        backup_id: backup.id.clone(),
                        scope: scope.clone(),
                        size_bytes: backup.size_bytes,
                    })
                });
                result.backup_reference = Some(backup.id);
                true
            }
            Err(message) => {
                let fatal = self.policy.safe_mode;
                self.events.emit(|metadata| {
                    MigrationEvent::BackupFailed(BackupFailedEvent {
                        metadata,
                        scope: scope.clone(),
                        error: message.clone(),
                        fatal,
                    })
                });

                if fatal {
                    error!("Backup before {} failed in safe mode; not running it: {}", scope, message);
                    result.fail(
                        ExecutionStatus::Failed,
                        ErrorDetail::new(FailureReason::BackupError, Phase::Backup, message),
                    );
                    false
                } else {
                    warn!("Backup before {} failed; continuing without one: {}", scope, message);
                    result.note(format!("ran without a backup: {}", message));
                    true
                }
            }
        }
    }

    async fn invoke(&self, unit: &MigrationDescriptor, entry: EntryPoint) -> Invocation {
        match self.analyzer.command_for(unit, entry) {
            Ok(Some(spec)) => self.spawn(spec).await,
            Ok(None) => Invocation::Failed {
                message: format!("no {} entry point", entry),
                output_tail: None,
            },
            Err(e) => Invocation::Failed {
                message: format!("{:#}", e),
                output_tail: None,
            },
        }
    }

    async fn spawn(&self, spec: CommandSpec) -> Invocation {
        let spec = spec.env("MIGRATION_ENV", self.policy.environment.key());
        match self.runner.run(&spec, self.policy.timeout).await {
            Ok(ProcessOutcome::Completed(output)) if output.success() => Invocation::Completed(output),
            Ok(ProcessOutcome::Completed(output)) => {
                let tail = output.tail(OUTPUT_TAIL_LINES);
                Invocation::Failed {
                    message: output.failure_message(),
                    output_tail: (!tail.trim().is_empty()).then_some(tail),
                }
            }
            Ok(ProcessOutcome::TimedOut { .. }) => Invocation::TimedOut,
            Err(e) => Invocation::Failed {
                message: format!("{:#}", e),
                output_tail: None,
            },
        }
    }

    fn timeout_message(&self) -> String {
        format!(
            "exceeded the {} timeout; process killed",
            humantime::format_duration(self.policy.timeout)
        )
    }
}

/// `CapabilityMissing` unless the unit declares `capability`
pub fn require_capability(unit: &MigrationDescriptor, capability: Capability) -> Result<(), OrchestratorError> {
    if unit.has(capability) {
        Ok(())
    } else {
        Err(OrchestratorError::CapabilityMissing {
            name: unit.name.clone(),
            category: unit.category,
            capability,
        })
    }
}

fn not_attempted(unit: &MigrationDescriptor, operation: Operation, note: impl Into<String>) -> ExecutionResult {
    let mut result = ExecutionResult::pending(unit, operation);
    result.note(note);
    result
}

/// `sha256:0123456789ab`
fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..19).unwrap_or(fingerprint)
}

/// Group consecutive independent units of one category into parallel waves
fn plan_waves(units: &[&MigrationDescriptor], allow_parallel: bool) -> Vec<Range<usize>> {
    let mut waves = Vec::new();
    let mut start = 0;
    while start < units.len() {
        let mut end = start + 1;
        if allow_parallel && units[start].independent {
            while end < units.len()
                && units[end].independent
                && units[end].category == units[start].category
            {
                end += 1;
            }
        }
        waves.push(start..end);
        start = end;
    }
    waves
}
