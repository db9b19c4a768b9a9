//! # Migration Observability
//!
//! Structured events for migration runs, rollbacks, backups and batches.
//!
//! ## Event Flow
//!
//! ```text
//! migrate → JSON stdout (MIGRATION_EVENT: prefix) → log shipper → alerting
//! ```
//!
//! Events are off by default. Enable with `--emit-events` or
//! `MIGRATION_EVENTS=1`. A `RollbackFailed` event is the alert for a target
//! left in an intermediate state; it always carries `action_required`.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::{ExecutionResult, ExecutionStatus, MigrationDescriptor, Operation};

/// Event prefix for log shippers to identify structured events
const EVENT_PREFIX: &str = "MIGRATION_EVENT:";

/// Migration event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum MigrationEvent {
    /// A run, dry run, rollback or verification started
    MigrationStarted(MigrationStartedEvent),
    /// Reached a non-failure terminal state (succeeded or skipped)
    MigrationCompleted(MigrationCompletedEvent),
    /// Failed, timed out or was rolled back after a failure
    MigrationFailed(MigrationFailedEvent),
    /// Automatic rollback after a failure succeeded
    RollbackCompleted(RollbackCompletedEvent),
    /// Automatic rollback failed; manual intervention required
    RollbackFailed(RollbackFailedEvent),
    BackupCreated(BackupCreatedEvent),
    BackupFailed(BackupFailedEvent),
    /// A batch finished (fully, halted or cancelled)
    BatchCompleted(BatchCompletedEvent),
}

/// Common fields for all events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Timestamp in RFC3339 format
    pub timestamp: String,
    /// Environment (dev, staging, prod)
    pub environment: String,
    /// Hostname of the machine running the orchestrator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// CI job ID if running in CI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ci_job_id: Option<String>,
}

impl EventMetadata {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            environment: environment.into(),
            hostname: std::env::var("HOSTNAME").ok(),
            ci_job_id: std::env::var("GITHUB_RUN_ID")
                .ok()
                .or_else(|| std::env::var("CI_JOB_ID").ok()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationStartedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub migration: String,
    pub category: String,
    pub operation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationCompletedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub migration: String,
    pub category: String,
    pub operation: String,
    pub status: String,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationFailedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub migration: String,
    pub category: String,
    pub operation: String,
    pub status: String,
    /// Failure reason (StaleCatalog, BackupError, ExecutionFailure, ...)
    pub reason: String,
    /// Phase the failure happened in
    pub phase: String,
    pub error: String,
    pub duration_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    /// Last lines of the unit's output (if captured)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackCompletedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub migration: String,
    pub category: String,
    pub original_error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackFailedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub migration: String,
    pub category: String,
    pub original_error: String,
    pub rollback_error: String,
    /// Backup available for a manual restore, if one was taken
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<String>,
    pub action_required: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupCreatedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub backup_id: String,
    pub scope: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupFailedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub scope: String,
    pub error: String,
    /// Whether the failure aborted the pending run
    pub fatal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchCompletedEvent {
    #[serde(flatten)]
    pub metadata: EventMetadata,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub rolled_back: usize,
    pub pending: usize,
    pub cancelled: bool,
    pub duration_secs: f64,
}

/// Emits a structured event as JSON to stdout
///
/// Events are prefixed with `MIGRATION_EVENT:` for log shippers to parse.
pub fn emit_event(event: &MigrationEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            println!("{}{}", EVENT_PREFIX, json);
        }
        Err(e) => {
            tracing::error!("Failed to serialize event: {}", e);
        }
    }
}

/// Emits events for one orchestrator invocation when enabled
#[derive(Debug, Clone)]
pub struct EventSink {
    enabled: bool,
    environment: String,
}

impl EventSink {
    pub fn new(enabled: bool, environment: impl Into<String>) -> Self {
        Self {
            enabled,
            environment: environment.into(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, "")
    }

    /// Build and emit an event; the builder only runs when enabled
    pub fn emit(&self, build: impl FnOnce(EventMetadata) -> MigrationEvent) {
        if self.enabled {
            emit_event(&build(EventMetadata::new(self.environment.as_str())));
        }
    }

    pub fn started(&self, unit: &MigrationDescriptor, operation: Operation) {
        self.emit(|metadata| {
            MigrationEvent::MigrationStarted(MigrationStartedEvent {
                metadata,
                migration: unit.name.clone(),
                category: unit.category.key().to_string(),
                operation: operation.to_string(),
            })
        });
    }

    /// Completion, failure and rollback events for a terminal result
    pub fn finished(&self, result: &ExecutionResult) {
        if !self.enabled {
            return;
        }
        let metadata = EventMetadata::new(self.environment.as_str());
        for event in events_for(result, &metadata) {
            emit_event(&event);
        }
    }
}

/// Events describing a terminal result
fn events_for(result: &ExecutionResult, metadata: &EventMetadata) -> Vec<MigrationEvent> {
    let migration = result.name.clone();
    let category = result.category.key().to_string();
    let duration_secs = result.duration().as_secs_f64();
    let mut events = Vec::new();

    match &result.error_detail {
        None => events.push(MigrationEvent::MigrationCompleted(MigrationCompletedEvent {
            metadata: metadata.clone(),
            migration: migration.clone(),
            category: category.clone(),
            operation: result.operation.to_string(),
            status: result.status.label().to_string(),
            duration_secs,
            backup_id: result.backup_reference.clone(),
            notes: result.notes.clone(),
        })),
        Some(detail) => {
            events.push(MigrationEvent::MigrationFailed(MigrationFailedEvent {
                metadata: metadata.clone(),
                migration: migration.clone(),
                category: category.clone(),
                operation: result.operation.to_string(),
                status: result.status.label().to_string(),
                reason: detail.reason.to_string(),
                phase: detail.phase.to_string(),
                error: detail.message.clone(),
                duration_secs,
                backup_id: result.backup_reference.clone(),
                output_tail: result.output_tail.clone(),
            }));

            if let Some(rollback) = &result.rollback_error {
                events.push(MigrationEvent::RollbackFailed(RollbackFailedEvent {
                    metadata: metadata.clone(),
                    migration,
                    category,
                    original_error: detail.message.clone(),
                    rollback_error: rollback.message.clone(),
                    backup_id: result.backup_reference.clone(),
                    action_required: "Target may be in an intermediate state; inspect it and restore or repair manually"
                        .to_string(),
                }));
            } else if result.status == ExecutionStatus::RolledBack {
                events.push(MigrationEvent::RollbackCompleted(RollbackCompletedEvent {
                    metadata: metadata.clone(),
                    migration,
                    category,
                    original_error: detail.message.clone(),
                }));
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, ErrorDetail, FailureReason, Phase};

    fn failed_result() -> ExecutionResult {
        ExecutionResult {
            name: "003_split_address".into(),
            category: Category::Script,
            operation: Operation::Run,
            status: ExecutionStatus::Failed,
            started_at: None,
            finished_at: None,
            duration_ms: 1500,
            backup_reference: Some("20260101T000000Z-deadbeef".into()),
            error_detail: Some(ErrorDetail::new(
                FailureReason::ExecutionFailure,
                Phase::Run,
                "exit code 1",
            )),
            rollback_error: None,
            notes: Vec::new(),
            output_tail: None,
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = MigrationEvent::BackupCreated(BackupCreatedEvent {
            metadata: EventMetadata::new("prod"),
            backup_id: "20260101T000000Z-deadbeef".into(),
            scope: "full".into(),
            size_bytes: 42,
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"BackupCreated\""));
        assert!(json.contains("\"environment\":\"prod\""));
        assert!(json.contains("deadbeef"));
    }

    #[test]
    fn test_failed_result_events() {
        let events = events_for(&failed_result(), &EventMetadata::new("dev"));
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], MigrationEvent::MigrationFailed(e) if e.reason == "ExecutionFailure" && e.phase == "run"));
    }

    #[test]
    fn test_rollback_failure_is_separate_alert() {
        let mut result = failed_result();
        result.rollback_error = Some(ErrorDetail::new(
            FailureReason::RollbackFailure,
            Phase::Rollback,
            "exit code 2",
        ));
        let events = events_for(&result, &EventMetadata::new("dev"));
        assert_eq!(events.len(), 2);
        match &events[1] {
            MigrationEvent::RollbackFailed(e) => {
                assert_eq!(e.original_error, "exit code 1");
                assert_eq!(e.rollback_error, "exit code 2");
                assert_eq!(e.backup_id.as_deref(), Some("20260101T000000Z-deadbeef"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_rolled_back_result_emits_rollback_completed() {
        let mut result = failed_result();
        result.status = ExecutionStatus::RolledBack;
        let events = events_for(&result, &EventMetadata::new("dev"));
        assert!(matches!(events[1], MigrationEvent::RollbackCompleted(_)));
    }
}
