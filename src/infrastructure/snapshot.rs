//! Snapshot media for the backup manager
//!
//! The backup manager owns ids, manifests and atomic persistence; a medium
//! only knows how to write a snapshot of the target system into a file and
//! how to put one back. Two media ship with the orchestrator:
//!
//! - [`CommandMedium`]: external dump/restore tools (`pg_dump`/`pg_restore`)
//! - [`FileMedium`]: file-backed databases (SQLite) copied byte for byte

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::process::{CommandTemplate, ProcessOutcome, ProcessRunner, TemplateVars};
use crate::config::{BackupMediumConfig, OrchestratorConfig};

/// Storage medium capable of capturing and restoring the target system
#[async_trait]
pub trait SnapshotMedium: Send + Sync {
    /// Short label recorded in backup manifests
    fn describe(&self) -> String;

    /// Write a snapshot for `scope` into `destination`
    async fn capture(&self, scope: &str, destination: &Path, timeout: Duration) -> Result<()>;

    /// Restore the target system from `source`
    async fn restore(&self, source: &Path, timeout: Duration) -> Result<()>;
}

/// Build the configured medium
pub fn medium_from_config(config: &OrchestratorConfig) -> Box<dyn SnapshotMedium> {
    match &config.backup.medium {
        BackupMediumConfig::Command { create, restore } => Box::new(CommandMedium {
            create: create.clone(),
            restore: restore.clone(),
            working_dir: config.base_dir.clone(),
            runner: ProcessRunner::new(),
        }),
        BackupMediumConfig::File { source } => Box::new(FileMedium {
            source: config.resolve_path(source),
        }),
    }
}

/// Dump/restore through external commands
pub struct CommandMedium {
    pub create: CommandTemplate,
    pub restore: CommandTemplate,
    pub working_dir: PathBuf,
    pub runner: ProcessRunner,
}

impl CommandMedium {
    async fn execute(&self, template: &CommandTemplate, vars: TemplateVars, timeout: Duration) -> Result<()> {
        let spec = template.render(&vars)?.current_dir(&self.working_dir);
        match self.runner.run(&spec, timeout).await? {
            ProcessOutcome::Completed(output) if output.success() => Ok(()),
            ProcessOutcome::Completed(output) => {
                bail!("{} {}", spec.program, output.failure_message())
            }
            ProcessOutcome::TimedOut { elapsed } => {
                bail!(
                    "{} timed out after {:.1}s",
                    spec.program,
                    elapsed.as_secs_f64()
                )
            }
        }
    }
}

#[async_trait]
impl SnapshotMedium for CommandMedium {
    fn describe(&self) -> String {
        format!("command:{}", self.create.0.first().map(String::as_str).unwrap_or(""))
    }

    async fn capture(&self, scope: &str, destination: &Path, timeout: Duration) -> Result<()> {
        let vars = TemplateVars::new()
            .with("output", destination.display().to_string())
            .with("scope", scope);
        self.execute(&self.create, vars, timeout).await
    }

    async fn restore(&self, source: &Path, timeout: Duration) -> Result<()> {
        let vars = TemplateVars::new().with("input", source.display().to_string());
        self.execute(&self.restore, vars, timeout).await
    }
}

/// Byte copy of a file-backed database
pub struct FileMedium {
    pub source: PathBuf,
}

#[async_trait]
impl SnapshotMedium for FileMedium {
    fn describe(&self) -> String {
        format!("file:{}", self.source.display())
    }

    async fn capture(&self, _scope: &str, destination: &Path, timeout: Duration) -> Result<()> {
        if !self.source.exists() {
            bail!("Database file does not exist: {}", self.source.display());
        }
        tokio::time::timeout(timeout, tokio::fs::copy(&self.source, destination))
            .await
            .context("Snapshot copy timed out")?
            .with_context(|| format!("Failed to copy {}", self.source.display()))?;
        Ok(())
    }

    async fn restore(&self, source: &Path, timeout: Duration) -> Result<()> {
        // Copy next to the target, then rename over it
        let staging = self.source.with_extension("restore-tmp");
        tokio::time::timeout(timeout, tokio::fs::copy(source, &staging))
            .await
            .context("Restore copy timed out")?
            .with_context(|| format!("Failed to stage restore into {}", staging.display()))?;
        tokio::fs::rename(&staging, &self.source)
            .await
            .with_context(|| format!("Failed to replace {}", self.source.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_medium_capture_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("app.db");
        std::fs::write(&db, b"v1").unwrap();
        let medium = FileMedium { source: db.clone() };

        let snapshot = dir.path().join("snap");
        medium
            .capture("full", &snapshot, Duration::from_secs(5))
            .await
            .unwrap();
        std::fs::write(&db, b"v2").unwrap();

        medium.restore(&snapshot, Duration::from_secs(5)).await.unwrap();
        assert_eq!(std::fs::read(&db).unwrap(), b"v1");
    }

    #[tokio::test]
    async fn test_file_medium_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let medium = FileMedium {
            source: dir.path().join("missing.db"),
        };
        let err = medium
            .capture("full", &dir.path().join("snap"), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_command_medium_writes_output_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let medium = CommandMedium {
            create: CommandTemplate::new(["sh", "-c", "printf '%s' \"$1\" > \"$2\"", "dump", "{scope}", "{output}"]),
            restore: CommandTemplate::new(["true"]),
            working_dir: dir.path().to_path_buf(),
            runner: ProcessRunner::new(),
        };

        let snapshot = dir.path().join("snap");
        medium
            .capture("restaurants", &snapshot, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&snapshot).unwrap(), "restaurants");
    }
}
