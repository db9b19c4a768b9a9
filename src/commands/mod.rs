//! Command implementations
//!
//! One module per group of subcommands, each exposing async entry points
//! that return the process exit status. [`Session`] carries what every
//! command needs: configuration, the resolved execution policy and the
//! event sink. The catalog is rebuilt by every command that needs it.

pub mod backup;
pub mod list;
pub mod rollback;
pub mod run;
pub mod status;
pub mod verify;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::analyzer::Analyzer;
use crate::config::OrchestratorConfig;
use crate::domain::policy;
use crate::domain::{Category, ExecutionPolicy, ExecutionResult, ExecutionStatus, FailureReason, PolicyOverrides};
use crate::error::{ConfigError, ExitStatus, OrchestratorError};
use crate::observability::EventSink;
use crate::services::{BackupManager, ExecutionEngine, Registry, StatusLedger};
use crate::ui;

/// Everything resolved once per invocation
pub struct Session {
    pub config: OrchestratorConfig,
    pub policy: ExecutionPolicy,
    pub events: EventSink,
    cancel: Arc<AtomicBool>,
}

impl Session {
    /// Load configuration and resolve the execution policy
    ///
    /// # Errors
    /// Returns `ConfigError` (exit code 2) for a bad config file or unknown environment
    pub fn load(
        config_path: Option<&Path>,
        environment: &str,
        overrides: &PolicyOverrides,
        emit_events: bool,
    ) -> Result<Self> {
        let cwd = std::env::current_dir().context("Failed to determine the current directory")?;
        let config = OrchestratorConfig::load(config_path, &cwd).context("Failed to load configuration")?;
        let policy = policy::resolve(environment, &config.environment_layers()?, overrides)?;
        debug!("Resolved execution policy: {:?}", policy);

        let events = EventSink::new(emit_events, policy.environment.key());
        Ok(Self {
            config,
            policy,
            events,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build a fresh catalog for this invocation
    pub fn discover(&self) -> Result<(Registry, Analyzer)> {
        let roots = self.config.source_registry()?;
        let analyzer = Analyzer::new(&roots);
        let registry = Registry::build(&roots, &analyzer);
        Ok((registry, analyzer))
    }

    pub fn ledger(&self) -> StatusLedger {
        StatusLedger::new(self.config.ledger_path())
    }

    pub fn backups(&self) -> BackupManager {
        BackupManager::from_config(&self.config)
    }

    pub fn engine(&self, analyzer: Analyzer) -> ExecutionEngine {
        ExecutionEngine::new(analyzer, self.policy.clone(), self.ledger())
            .with_backups(self.backups())
            .with_events(self.events.clone())
            .with_cancellation(Arc::clone(&self.cancel))
    }

    /// Ctrl-C stops a batch before its next migration; the running one finishes
    pub fn cancel_on_interrupt(&self) {
        let flag = Arc::clone(&self.cancel);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping after the current migration");
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    /// In safe mode, ask before anything that can change the target
    ///
    /// # Errors
    /// Returns `OrchestratorError::Aborted` when the operator does not confirm
    pub fn confirm_mutation(&self, action: &str, assume_yes: bool) -> Result<()> {
        if assume_yes || !self.policy.requires_confirmation() {
            return Ok(());
        }
        ui::print_warning(&format!("Safe mode is on ({})", self.policy.environment));
        if ui::confirm(&format!("Proceed to {}?", action))? {
            Ok(())
        } else {
            Err(OrchestratorError::Aborted {
                reason: format!("{} not confirmed", action),
            }
            .into())
        }
    }

    pub fn print_policy(&self) {
        let on_off = |value: bool| if value { "on" } else { "off" };
        ui::print_info(&format!(
            "env {} | safe mode {} | auto backup {} | verify {} | rollback {} | timeout {}{}",
            self.policy.environment,
            on_off(self.policy.safe_mode),
            on_off(self.policy.auto_backup),
            on_off(self.policy.verify_after_run),
            on_off(self.policy.rollback_on_failure),
            humantime::format_duration(self.policy.timeout),
            if self.policy.allow_parallel { " | parallel" } else { "" }
        ));
    }
}

/// Parse a category argument, accepting the usual aliases
pub fn parse_category(value: &str) -> Result<Category, ConfigError> {
    Category::from_str(value).ok_or_else(|| ConfigError::UnknownCategory {
        name: value.to_string(),
    })
}

/// Exit status for finished results: a stale catalog wins, then any failure
pub fn exit_status_for_results<'a>(results: impl IntoIterator<Item = &'a ExecutionResult>) -> ExitStatus {
    let mut status = ExitStatus::Success;
    for result in results {
        let stale = result
            .error_detail
            .as_ref()
            .is_some_and(|detail| detail.reason == FailureReason::StaleCatalog);
        if stale {
            return ExitStatus::StaleCatalog;
        }
        if !matches!(result.status, ExecutionStatus::Succeeded | ExecutionStatus::Skipped) {
            status = ExitStatus::Failure;
        }
    }
    status
}

/// Surface analysis failures and duplicates from discovery
pub fn print_discovery_problems(registry: &Registry) {
    for failure in registry.failures() {
        ui::print_warning(&format!("Excluded: {}", failure));
    }
    for warning in registry.warnings() {
        ui::print_warning(warning);
    }
}
