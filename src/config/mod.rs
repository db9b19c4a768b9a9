//! # Orchestrator Configuration
//!
//! A single project file (`migrations.json`, `migrations.yaml`/`.yml` or
//! `migrations.toml`) holds:
//!
//! - `environments`: per-environment execution defaults (dev, staging, prod)
//! - `migrationCategories`: the source registry (roots, priorities, discovery rules)
//! - `backup`: snapshot directory and storage medium
//! - `ledger`: location of the status ledger
//!
//! Every section is optional; built-in defaults cover a conventional layout.
//! Relative paths resolve against the directory holding the config file.
//!
//! ```rust,ignore
//! let config = OrchestratorConfig::load(None, &std::env::current_dir()?)?;
//! for root in config.source_registry()? {
//!     println!("{} -> {}", root.category, root.root.display());
//! }
//! ```

mod backup;
mod category;
mod environment;

pub use backup::{BackupConfig, BackupMediumConfig, LedgerConfig};
pub use category::{CategoryConfig, CommandOverrides, SourceRoot};
pub use environment::EnvironmentConfig;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::{Category, Environment, PolicyOverrides};
use crate::error::ConfigError;

/// File names searched for, in order of preference
pub const CONFIG_FILE_NAMES: [&str; 4] = [
    "migrations.json",
    "migrations.yaml",
    "migrations.yml",
    "migrations.toml",
];

/// How many parent directories discovery climbs
const MAX_SEARCH_DEPTH: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Ok(Self::Json),
            Some("yaml") | Some("yml") => Ok(Self::Yaml),
            Some("toml") => Ok(Self::Toml),
            other => Err(ConfigError::ParseError {
                message: format!(
                    "unsupported config format '{}' for {}",
                    other.unwrap_or(""),
                    path.display()
                ),
            }),
        }
    }
}

/// Complete orchestrator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    /// Directory relative paths resolve against (set on load)
    #[serde(skip)]
    pub base_dir: PathBuf,

    /// File this configuration was read from, if any
    #[serde(skip)]
    pub source_file: Option<PathBuf>,

    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,

    #[serde(default)]
    pub migration_categories: BTreeMap<String, CategoryConfig>,

    #[serde(default)]
    pub backup: BackupConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl OrchestratorConfig {
    /// Load the configuration for a run
    ///
    /// An explicit path must exist. Without one, the config file is searched
    /// from `start_dir` upwards; when nothing is found the built-in defaults
    /// apply with `start_dir` as the project root.
    ///
    /// # Errors
    /// Returns error if the file is missing, unreadable, malformed or fails validation
    pub fn load(explicit: Option<&Path>, start_dir: &Path) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound {
                        path: path.display().to_string(),
                    }
                    .into());
                }
                Some(path.to_path_buf())
            }
            None => Self::discover(start_dir),
        };

        match path {
            Some(path) => Self::from_file(&path),
            None => {
                debug!(
                    "No migrations config found from {}, using built-in defaults",
                    start_dir.display()
                );
                let config = Self {
                    base_dir: start_dir.to_path_buf(),
                    ..Default::default()
                };
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Search `start_dir` and its parents for a config file
    pub fn discover(start_dir: &Path) -> Option<PathBuf> {
        let mut current = Some(start_dir);
        for _ in 0..MAX_SEARCH_DEPTH {
            let dir = current?;
            for name in CONFIG_FILE_NAMES {
                let candidate = dir.join(name);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
            current = dir.parent();
        }
        None
    }

    /// Read and validate a config file
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn from_file(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path)?;
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let base_dir = path
            .parent()
            .map(|p| p.canonicalize().unwrap_or_else(|_| p.to_path_buf()))
            .unwrap_or_default();

        let mut config = Self::parse(&content, format)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        config.base_dir = base_dir;
        config.source_file = Some(path.to_path_buf());
        config.validate()?;

        debug!("Loaded migrations config from {}", path.display());
        Ok(config)
    }

    /// Parse config content without validation
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let parsed = match format {
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Yaml => serde_yaml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| ConfigError::ParseError { message })
    }

    /// Reject unknown keys and out-of-range values
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, env) in &self.environments {
            Environment::from_str(name).ok_or_else(|| ConfigError::UnknownEnvironment {
                name: name.clone(),
            })?;
            env.validate(name)?;
        }
        for name in self.migration_categories.keys() {
            Category::from_str(name).ok_or_else(|| ConfigError::UnknownCategory {
                name: name.clone(),
            })?;
        }
        self.source_registry()?;
        Ok(())
    }

    /// Environment defaults keyed by canonical environment
    pub fn environment_layers(&self) -> Result<BTreeMap<Environment, PolicyOverrides>, ConfigError> {
        self.environments
            .iter()
            .map(|(name, env)| {
                let key = Environment::from_str(name).ok_or_else(|| {
                    ConfigError::UnknownEnvironment { name: name.clone() }
                })?;
                Ok((key, env.to_overrides()))
            })
            .collect()
    }

    /// Configured entry for a category, accepting key aliases
    pub fn category_config(&self, category: Category) -> Option<&CategoryConfig> {
        self.migration_categories
            .iter()
            .find(|(key, _)| Category::from_str(key) == Some(category))
            .map(|(_, config)| config)
    }

    /// Resolved discovery root for one category
    pub fn source_root(&self, category: Category) -> Result<SourceRoot, ConfigError> {
        SourceRoot::resolve(category, self.category_config(category), &self.base_dir)
    }

    /// All discovery roots, enabled or not, in batch order
    pub fn source_registry(&self) -> Result<Vec<SourceRoot>, ConfigError> {
        let mut roots = Category::ALL
            .iter()
            .map(|category| self.source_root(*category))
            .collect::<Result<Vec<_>, _>>()?;
        roots.sort_by_key(|root| (root.priority, root.category));
        Ok(roots)
    }

    /// Resolve a configured path against the project root
    pub fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.resolve_path(&self.backup.directory)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.resolve_path(&self.ledger.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_config_parses() {
        let yaml = r#"
environments:
  staging:
    safeMode: true
    timeoutSeconds: 120
migrationCategories:
  sql:
    priority: 5
    path: db/migrations
  scripts:
    enabled: false
backup:
  directory: snapshots
  medium:
    type: file
    source: app.db
ledger:
  path: state/ledger.jsonl
"#;
        let mut config = OrchestratorConfig::parse(yaml, ConfigFormat::Yaml).unwrap();
        config.base_dir = PathBuf::from("/srv/app");
        config.validate().unwrap();

        let layers = config.environment_layers().unwrap();
        assert_eq!(layers[&Environment::Staging].timeout_seconds, Some(120));

        let sql = config.source_root(Category::Sql).unwrap();
        assert_eq!(sql.priority, 5);
        assert_eq!(sql.root, PathBuf::from("/srv/app/db/migrations"));

        // "scripts" is an alias of the script category
        assert!(!config.source_root(Category::Script).unwrap().enabled);

        assert_eq!(config.backup_dir(), PathBuf::from("/srv/app/snapshots"));
        assert_eq!(config.ledger_path(), PathBuf::from("/srv/app/state/ledger.jsonl"));
    }

    #[test]
    fn test_toml_config_parses() {
        let toml = r#"
[environments.dev]
allowParallel = true

[migrationCategories.orm]
path = "db/alembic/versions"
"#;
        let config = OrchestratorConfig::parse(toml, ConfigFormat::Toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.environments["dev"].allow_parallel, Some(true));
        assert_eq!(
            config.category_config(Category::Orm).unwrap().path.as_deref(),
            Some("db/alembic/versions")
        );
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let config =
            OrchestratorConfig::parse(r#"{"environments": {"qa": {}}}"#, ConfigFormat::Json).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownEnvironment { .. })
        ));
    }

    #[test]
    fn test_unknown_category_rejected() {
        let config = OrchestratorConfig::parse(
            r#"{"migrationCategories": {"graphql": {}}}"#,
            ConfigFormat::Json,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownCategory { .. })
        ));
    }

    #[test]
    fn test_malformed_content_is_parse_error() {
        let err = OrchestratorConfig::parse("{not json", ConfigFormat::Json).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_source_registry_in_priority_order() {
        let config = OrchestratorConfig::parse(
            r#"{"migrationCategories": {"maintenance": {"priority": 1}}}"#,
            ConfigFormat::Json,
        )
        .unwrap();
        let order: Vec<Category> = config
            .source_registry()
            .unwrap()
            .into_iter()
            .map(|root| root.category)
            .collect();
        assert_eq!(
            order,
            vec![
                Category::Maintenance,
                Category::Orm,
                Category::Sql,
                Category::Script,
                Category::Deployment
            ]
        );
    }

    #[test]
    fn test_discover_searches_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("migrations.yaml"), "{}").unwrap();

        let found = OrchestratorConfig::discover(&nested).unwrap();
        assert_eq!(found, dir.path().join("migrations.yaml"));
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestratorConfig::load(None, dir.path()).unwrap();
        assert_eq!(config.base_dir, dir.path());
        assert!(config.source_file.is_none());
        assert_eq!(
            config.source_root(Category::Sql).unwrap().root,
            dir.path().join("migrations/sql")
        );
    }

    #[test]
    fn test_explicit_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = OrchestratorConfig::load(Some(&dir.path().join("nope.json")), dir.path())
            .unwrap_err();
        assert!(err.downcast_ref::<ConfigError>().is_some());
    }
}
