//! Backup store and status ledger configuration.

use serde::{Deserialize, Serialize};

use crate::infrastructure::CommandTemplate;
use crate::tools::tools;

/// Where and how snapshots are taken
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    /// Directory holding snapshots and their manifests
    #[serde(default = "default_backup_directory")]
    pub directory: String,

    #[serde(default)]
    pub medium: BackupMediumConfig,
}

fn default_backup_directory() -> String {
    ".migration-backups".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: default_backup_directory(),
            medium: BackupMediumConfig::default(),
        }
    }
}

/// Storage medium for snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackupMediumConfig {
    /// External dump/restore commands; `{output}`, `{input}`, `{scope}` placeholders
    Command {
        create: CommandTemplate,
        restore: CommandTemplate,
    },
    /// Copy of a file-backed database
    File { source: String },
}

impl Default for BackupMediumConfig {
    fn default() -> Self {
        Self::Command {
            create: CommandTemplate::new([
                tools::PG_DUMP,
                "--format=custom",
                "--file",
                "{output}",
                "{env:DATABASE_URL}",
            ]),
            restore: CommandTemplate::new([
                tools::PG_RESTORE,
                "--clean",
                "--if-exists",
                "--dbname",
                "{env:DATABASE_URL}",
                "{input}",
            ]),
        }
    }
}

/// Location of the append-only status ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: String,
}

fn default_ledger_path() -> String {
    ".migration-state/ledger.jsonl".to_string()
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_medium_parses() {
        let config: BackupConfig = serde_json::from_str(
            r#"{"directory": "backups", "medium": {"type": "file", "source": "data/app.db"}}"#,
        )
        .unwrap();
        assert_eq!(config.directory, "backups");
        assert!(matches!(config.medium, BackupMediumConfig::File { ref source } if source == "data/app.db"));
    }

    #[test]
    fn test_default_medium_uses_pg_dump() {
        match BackupConfig::default().medium {
            BackupMediumConfig::Command { create, .. } => assert_eq!(create.0[0], "pg_dump"),
            other => panic!("unexpected medium: {:?}", other),
        }
    }
}
