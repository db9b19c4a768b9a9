//! Backup manager - point-in-time snapshots of the target system
//!
//! Layout of the backup directory:
//!
//! ```text
//! .migration-backups/
//!   20261019T142233Z-3f9a1c2e.snapshot   # written by the snapshot medium
//!   20261019T142233Z-3f9a1c2e.json       # manifest (Backup)
//! ```
//!
//! Creation is atomic: the medium writes into a temporary file in the same
//! directory, which is renamed into place only after it succeeds, and the
//! manifest is written last. A backup without a manifest never existed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::error::BackupError;
use crate::infrastructure::{medium_from_config, SnapshotMedium};

/// Scope label for a snapshot of the whole target
pub const FULL_SCOPE: &str = "full";

const SNAPSHOT_EXT: &str = "snapshot";
const MANIFEST_EXT: &str = "json";

/// Opaque snapshot reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub scope: String,
    /// Medium that produced the snapshot, e.g. `command:pg_dump`
    pub medium: String,
    pub snapshot_path: PathBuf,
    pub size_bytes: u64,
}

/// `YYYYMMDDTHHMMSSZ-<8 hex>`: sortable by creation time, unique per call
pub fn new_backup_id(now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", now.format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

/// Creates, lists and restores snapshots
pub struct BackupManager {
    directory: PathBuf,
    medium: Box<dyn SnapshotMedium>,
}

impl BackupManager {
    pub fn new(directory: impl Into<PathBuf>, medium: Box<dyn SnapshotMedium>) -> Self {
        Self {
            directory: directory.into(),
            medium,
        }
    }

    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self::new(config.backup_dir(), medium_from_config(config))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Take a snapshot for `scope`
    ///
    /// Either a complete backup (snapshot and manifest) is returned, or nothing
    /// is left behind in the backup directory.
    ///
    /// # Errors
    /// Returns `BackupError` if the medium fails, exceeds `timeout`, or the store cannot be written
    pub async fn create_backup(&self, scope: &str, timeout: Duration) -> Result<Backup, BackupError> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let created_at = Utc::now();
        let id = new_backup_id(created_at);

        let partial = tempfile::Builder::new()
            .prefix(&format!(".{}.", id))
            .suffix(".partial")
            .tempfile_in(&self.directory)?;

        info!("Creating backup {} (scope: {}) via {}", id, scope, self.medium.describe());
        match tokio::time::timeout(timeout, self.medium.capture(scope, partial.path(), timeout)).await {
            Err(_) => {
                return Err(BackupError::Timeout {
                    timeout_secs: timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                return Err(BackupError::CaptureFailed {
                    message: format!("{:#}", e),
                })
            }
            Ok(Ok(())) => {}
        }

        let size_bytes = partial.as_file().metadata()?.len();
        let snapshot_path = self.directory.join(format!("{}.{}", id, SNAPSHOT_EXT));
        partial
            .persist(&snapshot_path)
            .map_err(|e| BackupError::Io(e.error))?;

        // Drop the snapshot again if the manifest cannot be written
        let snapshot_guard = scopeguard::guard(snapshot_path.clone(), |path| {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove orphaned snapshot {}: {}", path.display(), e);
            }
        });

        let backup = Backup {
            id,
            created_at,
            scope: scope.to_string(),
            medium: self.medium.describe(),
            snapshot_path,
            size_bytes,
        };
        self.write_manifest(&backup)?;

        scopeguard::ScopeGuard::into_inner(snapshot_guard);
        info!(
            "Backup {} created ({} bytes) at {}",
            backup.id,
            backup.size_bytes,
            backup.snapshot_path.display()
        );
        Ok(backup)
    }

    fn write_manifest(&self, backup: &Backup) -> Result<(), BackupError> {
        let json = serde_json::to_vec_pretty(backup)
            .map_err(|e| BackupError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

        let mut manifest = tempfile::Builder::new()
            .prefix(&format!(".{}.", backup.id))
            .suffix(".manifest")
            .tempfile_in(&self.directory)?;
        manifest.write_all(&json)?;
        manifest.as_file().sync_all()?;
        manifest
            .persist(self.manifest_path(&backup.id))
            .map_err(|e| BackupError::Io(e.error))?;
        Ok(())
    }

    fn manifest_path(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", id, MANIFEST_EXT))
    }

    /// Look up one backup by id
    ///
    /// # Errors
    /// Returns `BackupError::NotFound` if no complete backup has that id
    pub async fn get(&self, id: &str) -> Result<Backup, BackupError> {
        if id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(BackupError::NotFound { id: id.to_string() });
        }
        let content = match tokio::fs::read(self.manifest_path(id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound { id: id.to_string() })
            }
            Err(e) => return Err(e.into()),
        };
        let backup: Backup = serde_json::from_slice(&content)
            .map_err(|e| BackupError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        if !backup.snapshot_path.exists() {
            return Err(BackupError::NotFound { id: id.to_string() });
        }
        Ok(backup)
    }

    /// All complete backups, oldest first
    pub async fn list(&self) -> Result<Vec<Backup>, BackupError> {
        let mut dir = match tokio::fs::read_dir(&self.directory).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            let is_manifest = path.extension().and_then(|e| e.to_str()) == Some(MANIFEST_EXT);
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_manifest || id.starts_with('.') {
                continue;
            }
            match self.get(id).await {
                Ok(backup) => backups.push(backup),
                Err(e) => warn!("Ignoring backup manifest {}: {}", path.display(), e),
            }
        }
        backups.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(backups)
    }

    /// Restore the target system from a backup
    ///
    /// # Errors
    /// Returns `BackupError::NotFound` for unknown ids and `RestoreFailed` if the medium fails
    pub async fn restore(&self, id: &str, timeout: Duration) -> Result<(), BackupError> {
        let backup = self.get(id).await?;
        info!("Restoring backup {} from {}", backup.id, backup.snapshot_path.display());

        match tokio::time::timeout(timeout, self.medium.restore(&backup.snapshot_path, timeout)).await {
            Err(_) => Err(BackupError::RestoreFailed {
                id: id.to_string(),
                message: format!("timed out after {}s", timeout.as_secs()),
            }),
            Ok(Err(e)) => Err(BackupError::RestoreFailed {
                id: id.to_string(),
                message: format!("{:#}", e),
            }),
            Ok(Ok(())) => {
                info!("Backup {} restored", id);
                Ok(())
            }
        }
    }
}

/// Human-readable size for listings
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
