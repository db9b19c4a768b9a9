//! Execution policy resolution
//!
//! Merge order: built-in defaults < environment defaults from configuration
//! < explicit caller overrides. Production keeps a hard floor of
//! `autoBackup=true` and `safeMode=true` that no override can lower.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::warn;

use crate::error::ConfigError;

/// Deployment environments a run can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "dev" | "development" | "local" => Some(Self::Dev),
            "staging" | "stage" => Some(Self::Staging),
            "prod" | "production" => Some(Self::Prod),
            _ => None,
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
        }
    }

    /// Built-in defaults, the lowest merge layer
    fn builtin(&self) -> ExecutionPolicy {
        match self {
            Self::Dev => ExecutionPolicy {
                environment: *self,
                safe_mode: false,
                auto_backup: false,
                verify_after_run: true,
                timeout: Duration::from_secs(300),
                allow_parallel: false,
                rollback_on_failure: true,
            },
            Self::Staging => ExecutionPolicy {
                environment: *self,
                safe_mode: false,
                auto_backup: true,
                verify_after_run: true,
                timeout: Duration::from_secs(300),
                allow_parallel: false,
                rollback_on_failure: true,
            },
            Self::Prod => ExecutionPolicy {
                environment: *self,
                safe_mode: true,
                auto_backup: true,
                verify_after_run: true,
                timeout: Duration::from_secs(600),
                allow_parallel: false,
                rollback_on_failure: true,
            },
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Concrete configuration for one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPolicy {
    pub environment: Environment,
    pub safe_mode: bool,
    pub auto_backup: bool,
    pub verify_after_run: bool,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    pub allow_parallel: bool,
    pub rollback_on_failure: bool,
}

impl ExecutionPolicy {
    /// Whether a mutating operation needs explicit operator confirmation
    pub fn requires_confirmation(&self) -> bool {
        self.safe_mode
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }
}

/// Optional policy values; one layer of the merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyOverrides {
    pub safe_mode: Option<bool>,
    pub auto_backup: Option<bool>,
    pub verify_after_run: Option<bool>,
    pub timeout_seconds: Option<u64>,
    pub allow_parallel: Option<bool>,
    pub rollback_on_failure: Option<bool>,
}

impl PolicyOverrides {
    fn apply(&self, policy: &mut ExecutionPolicy) {
        if let Some(v) = self.safe_mode {
            policy.safe_mode = v;
        }
        if let Some(v) = self.auto_backup {
            policy.auto_backup = v;
        }
        if let Some(v) = self.verify_after_run {
            policy.verify_after_run = v;
        }
        if let Some(v) = self.timeout_seconds {
            policy.timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.allow_parallel {
            policy.allow_parallel = v;
        }
        if let Some(v) = self.rollback_on_failure {
            policy.rollback_on_failure = v;
        }
    }
}

/// Resolve the policy for one invocation.
///
/// `environment_layers` holds the per-environment defaults from the
/// configuration file, keyed by canonical environment.
///
/// # Errors
/// Returns `ConfigError::UnknownEnvironment` for names outside dev/staging/prod
/// and `ConfigError::InvalidValue` for a zero timeout.
pub fn resolve(
    environment: &str,
    environment_layers: &BTreeMap<Environment, PolicyOverrides>,
    overrides: &PolicyOverrides,
) -> Result<ExecutionPolicy, ConfigError> {
    let env = Environment::from_str(environment).ok_or_else(|| ConfigError::UnknownEnvironment {
        name: environment.to_string(),
    })?;

    let mut policy = env.builtin();
    if let Some(layer) = environment_layers.get(&env) {
        layer.apply(&mut policy);
    }
    overrides.apply(&mut policy);

    if env == Environment::Prod {
        if !policy.auto_backup {
            warn!("autoBackup cannot be disabled in production; keeping it on");
            policy.auto_backup = true;
        }
        if !policy.safe_mode {
            warn!("safeMode cannot be disabled in production; keeping it on");
            policy.safe_mode = true;
        }
    }

    // Safe mode makes backups mandatory in every environment
    if policy.safe_mode && !policy.auto_backup {
        warn!("autoBackup cannot be disabled while safeMode is on; keeping it on");
        policy.auto_backup = true;
    }

    if policy.timeout.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: "timeoutSeconds".to_string(),
            value: "0".to_string(),
        });
    }

    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_from_str() {
        assert_eq!(Environment::from_str("production"), Some(Environment::Prod));
        assert_eq!(Environment::from_str("DEV"), Some(Environment::Dev));
        assert_eq!(Environment::from_str("stage"), Some(Environment::Staging));
        assert_eq!(Environment::from_str("qa"), None);
    }

    #[test]
    fn test_unknown_environment_is_config_error() {
        let err = resolve("qa", &BTreeMap::new(), &PolicyOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEnvironment { ref name } if name == "qa"));
    }

    #[test]
    fn test_prod_keeps_auto_backup_despite_override() {
        let mut layers = BTreeMap::new();
        layers.insert(
            Environment::Prod,
            PolicyOverrides {
                auto_backup: Some(false),
                ..Default::default()
            },
        );
        let overrides = PolicyOverrides {
            auto_backup: Some(false),
            safe_mode: Some(false),
            ..Default::default()
        };

        let policy = resolve("prod", &layers, &overrides).unwrap();
        assert!(policy.auto_backup);
        assert!(policy.safe_mode);
    }

    #[test]
    fn test_safe_mode_forces_backups_outside_prod() {
        let overrides = PolicyOverrides {
            safe_mode: Some(true),
            auto_backup: Some(false),
            ..Default::default()
        };
        let policy = resolve("staging", &BTreeMap::new(), &overrides).unwrap();
        assert!(policy.safe_mode);
        assert!(policy.auto_backup);

        let mut layers = BTreeMap::new();
        layers.insert(
            Environment::Dev,
            PolicyOverrides {
                safe_mode: Some(true),
                auto_backup: Some(false),
                ..Default::default()
            },
        );
        let policy = resolve("dev", &layers, &PolicyOverrides::default()).unwrap();
        assert!(policy.auto_backup);
    }

    #[test]
    fn test_merge_order_builtin_then_environment_then_overrides() {
        let mut layers = BTreeMap::new();
        layers.insert(
            Environment::Dev,
            PolicyOverrides {
                timeout_seconds: Some(120),
                auto_backup: Some(true),
                verify_after_run: Some(false),
                ..Default::default()
            },
        );
        let overrides = PolicyOverrides {
            timeout_seconds: Some(30),
            ..Default::default()
        };

        let policy = resolve("dev", &layers, &overrides).unwrap();
        assert_eq!(policy.timeout, Duration::from_secs(30));
        assert!(policy.auto_backup);
        assert!(!policy.verify_after_run);
        assert!(!policy.safe_mode);
        assert!(!policy.allow_parallel);
    }

    #[test]
    fn test_dev_may_disable_backup() {
        let overrides = PolicyOverrides {
            auto_backup: Some(false),
            ..Default::default()
        };
        let policy = resolve("staging", &BTreeMap::new(), &overrides).unwrap();
        assert!(!policy.auto_backup);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let overrides = PolicyOverrides {
            timeout_seconds: Some(0),
            ..Default::default()
        };
        let err = resolve("dev", &BTreeMap::new(), &overrides).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
