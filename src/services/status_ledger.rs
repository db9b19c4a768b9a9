//! Status ledger - durable record of execution results
//!
//! An append-only JSON-lines file. Each line is a [`LedgerEntry`] holding one
//! terminal [`ExecutionResult`] plus the fingerprint of the file that ran.
//! The core never rewrites or truncates the file; retention is left to
//! whoever operates it.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::domain::{Category, ExecutionResult, MigrationDescriptor};

/// One recorded result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub recorded_at: DateTime<Utc>,
    /// Fingerprint of the unit as it was when it ran
    pub fingerprint: String,
    pub source_path: PathBuf,
    pub result: ExecutionResult,
}

impl LedgerEntry {
    pub fn key(&self) -> (Category, String) {
        (self.result.category, self.result.name.clone())
    }
}

/// Append-only ledger backed by a JSON-lines file
pub struct StatusLedger {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StatusLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a terminal result
    ///
    /// # Errors
    /// Returns error if the result is not terminal or the file cannot be written
    pub async fn record(&self, unit: &MigrationDescriptor, result: &ExecutionResult) -> Result<()> {
        if !result.status.is_terminal() {
            bail!(
                "Refusing to record {} in non-terminal state {}",
                result.qualified_name(),
                result.status
            );
        }

        let entry = LedgerEntry {
            recorded_at: Utc::now(),
            fingerprint: unit.content_fingerprint.clone(),
            source_path: unit.source_path.clone(),
            result: result.clone(),
        };
        let mut line = serde_json::to_string(&entry).context("Failed to serialize ledger entry")?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open ledger {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to append to ledger {}", self.path.display()))?;
        file.sync_data().await.context("Failed to sync ledger")?;

        debug!(
            "Recorded {} ({}) in ledger",
            result.qualified_name(),
            result.status
        );
        Ok(())
    }

    /// All readable entries in file order
    ///
    /// Lines that fail to parse are skipped with a warning.
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read ledger {}", self.path.display()))
            }
        };

        let mut entries = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LedgerEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(
                    "Skipping unreadable ledger line {} in {}: {}",
                    index + 1,
                    self.path.display(),
                    e
                ),
            }
        }
        Ok(entries)
    }

    /// Every recorded entry for one migration, oldest first
    pub async fn history_entries(&self, name: &str, category: Category) -> Result<Vec<LedgerEntry>> {
        let mut entries: Vec<LedgerEntry> = self
            .entries()
            .await?
            .into_iter()
            .filter(|entry| entry.result.category == category && entry.result.name == name)
            .collect();
        entries.sort_by_key(|entry| entry.result.started_at.unwrap_or(entry.recorded_at));
        Ok(entries)
    }

    /// Every recorded result for one migration, ordered by start time
    pub async fn history(&self, name: &str, category: Category) -> Result<Vec<ExecutionResult>> {
        Ok(self
            .history_entries(name, category)
            .await?
            .into_iter()
            .map(|entry| entry.result)
            .collect())
    }

    pub async fn last_result(&self, name: &str, category: Category) -> Result<Option<ExecutionResult>> {
        Ok(self.history(name, category).await?.pop())
    }

    /// Most recent entry per migration, keyed by `(category, name)`
    pub async fn latest_per_migration(&self) -> Result<BTreeMap<(Category, String), LedgerEntry>> {
        let mut latest: BTreeMap<(Category, String), LedgerEntry> = BTreeMap::new();
        for entry in self.entries().await? {
            let newer = latest.get(&entry.key()).map_or(true, |current| {
                entry.result.started_at.unwrap_or(entry.recorded_at)
                    >= current.result.started_at.unwrap_or(current.recorded_at)
            });
            if newer {
                latest.insert(entry.key(), entry);
            }
        }
        Ok(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Capability, ExecutionStatus, Operation};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn unit(name: &str) -> MigrationDescriptor {
        MigrationDescriptor {
            name: name.into(),
            category: Category::Sql,
            source_path: PathBuf::from(format!("/srv/app/migrations/sql/{}.sql", name)),
            capabilities: BTreeSet::from([Capability::Runnable]),
            entry_points: BTreeMap::new(),
            documentation: None,
            content_fingerprint: format!("sha256:{}", name),
            supports_dry_run: false,
            independent: false,
            attributes: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    fn finished(unit: &MigrationDescriptor, status: ExecutionStatus) -> ExecutionResult {
        let mut result = ExecutionResult::pending(unit, Operation::Run);
        result.begin();
        result.status = status;
        result.finish();
        result
    }

    #[tokio::test]
    async fn test_record_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = StatusLedger::new(dir.path().join("state/ledger.jsonl"));
        let a = unit("001_a");
        let b = unit("002_b");

        ledger.record(&a, &finished(&a, ExecutionStatus::Failed)).await.unwrap();
        ledger.record(&b, &finished(&b, ExecutionStatus::Succeeded)).await.unwrap();
        ledger.record(&a, &finished(&a, ExecutionStatus::Succeeded)).await.unwrap();

        let history = ledger.history("001_a", Category::Sql).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, ExecutionStatus::Failed);
        assert_eq!(history[1].status, ExecutionStatus::Succeeded);

        let last = ledger.last_result("001_a", Category::Sql).await.unwrap().unwrap();
        assert_eq!(last.status, ExecutionStatus::Succeeded);

        assert!(ledger.last_result("001_a", Category::Script).await.unwrap().is_none());
        assert_eq!(ledger.latest_per_migration().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_non_terminal_results_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = StatusLedger::new(dir.path().join("ledger.jsonl"));
        let a = unit("001_a");
        let pending = ExecutionResult::pending(&a, Operation::Run);
        assert!(ledger.record(&a, &pending).await.is_err());
        assert!(ledger.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = StatusLedger::new(dir.path().join("nothing.jsonl"));
        assert!(ledger.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let ledger = StatusLedger::new(&path);
        let a = unit("001_a");
        ledger.record(&a, &finished(&a, ExecutionStatus::Succeeded)).await.unwrap();

        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("{truncated\n");
        std::fs::write(&path, content).unwrap();
        ledger.record(&a, &finished(&a, ExecutionStatus::RolledBack)).await.unwrap();

        let entries = ledger.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].result.status, ExecutionStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_concurrent_appends_keep_lines_whole() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(StatusLedger::new(dir.path().join("ledger.jsonl")));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    let u = unit(&format!("{:03}_unit", i));
                    ledger.record(&u, &finished(&u, ExecutionStatus::Succeeded)).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(ledger.entries().await.unwrap().len(), 16);
    }
}
