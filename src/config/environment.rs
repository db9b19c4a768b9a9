//! Per-environment execution defaults.

use serde::{Deserialize, Serialize};

use crate::domain::PolicyOverrides;
use crate::error::ConfigError;

/// Maximum per-migration timeout accepted from configuration (24h)
const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Environment defaults as written in the configuration file.
///
/// Every field is optional; unset fields fall through to the built-in
/// defaults of the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentConfig {
    /// Require confirmation for destructive operations and mandatory backups
    #[serde(default)]
    pub safe_mode: Option<bool>,

    /// Snapshot the target before every mutating run
    #[serde(default)]
    pub auto_backup: Option<bool>,

    /// Invoke the verify entry point after a successful run
    #[serde(default, alias = "verifyAfterRun")]
    pub verify_after_migration: Option<bool>,

    /// Per-migration ceiling in seconds
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Allow migrations declared independent to run concurrently
    #[serde(default)]
    pub allow_parallel: Option<bool>,

    /// Invoke the rollback entry point when a run fails
    #[serde(default)]
    pub rollback_on_failure: Option<bool>,
}

impl EnvironmentConfig {
    pub fn to_overrides(&self) -> PolicyOverrides {
        PolicyOverrides {
            safe_mode: self.safe_mode,
            auto_backup: self.auto_backup,
            verify_after_run: self.verify_after_migration,
            timeout_seconds: self.timeout_seconds,
            allow_parallel: self.allow_parallel,
            rollback_on_failure: self.rollback_on_failure,
        }
    }

    /// Validate value ranges
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` if the timeout is zero or longer than a day
    pub fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if let Some(timeout) = self.timeout_seconds {
            if timeout == 0 || timeout > MAX_TIMEOUT_SECS {
                return Err(ConfigError::InvalidValue {
                    field: format!("environments.{}.timeoutSeconds", name),
                    value: format!("{} (must be between 1 and {})", timeout, MAX_TIMEOUT_SECS),
                });
            }
        }
        Ok(())
    }
}
