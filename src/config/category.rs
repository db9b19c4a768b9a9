//! Migration category configuration (the source registry).
//!
//! Each category has a discovery root, a priority that orders batch runs,
//! discovery rules and optional command overrides for its unit adapter.

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::domain::{Category, EntryPoint};
use crate::error::ConfigError;
use crate::infrastructure::CommandTemplate;

/// Category settings as written in the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryConfig {
    /// Include this category in discovery
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Lower runs first in batch order
    #[serde(default)]
    pub priority: Option<i64>,

    #[serde(default)]
    pub description: Option<String>,

    /// Discovery root (relative to the project root)
    #[serde(default)]
    pub path: Option<String>,

    /// Descend into subdirectories of the root
    #[serde(default)]
    pub recursive: Option<bool>,

    /// File name glob patterns never treated as migration units
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Migrations declared to touch disjoint resources
    #[serde(default)]
    pub independent: Vec<String>,

    /// Working directory for child processes (defaults to the project root)
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Replacement command templates for the unit adapter
    #[serde(default)]
    pub commands: CommandOverrides,
}

/// Per-entry-point command template overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOverrides {
    #[serde(default)]
    pub run: Option<CommandTemplate>,
    #[serde(default)]
    pub rollback: Option<CommandTemplate>,
    #[serde(default)]
    pub verify: Option<CommandTemplate>,
    #[serde(default)]
    pub dry_run: Option<CommandTemplate>,
}

impl CommandOverrides {
    pub fn for_entry(&self, entry: EntryPoint) -> Option<&CommandTemplate> {
        match entry {
            EntryPoint::Run => self.run.as_ref(),
            EntryPoint::Rollback => self.rollback.as_ref(),
            EntryPoint::Verify => self.verify.as_ref(),
        }
    }
}

/// Built-in settings for a category
pub struct CategoryDefaults {
    pub priority: i64,
    pub path: &'static str,
    pub description: &'static str,
}

pub fn defaults_for(category: Category) -> CategoryDefaults {
    match category {
        Category::Orm => CategoryDefaults {
            priority: 10,
            path: "alembic/versions",
            description: "ORM-managed revisions",
        },
        Category::Sql => CategoryDefaults {
            priority: 20,
            path: "migrations/sql",
            description: "Declarative SQL migrations",
        },
        Category::Script => CategoryDefaults {
            priority: 30,
            path: "migrations/scripts",
            description: "Scripted migrations with lifecycle functions",
        },
        Category::Deployment => CategoryDefaults {
            priority: 40,
            path: "scripts/deployment",
            description: "Deployment scripts",
        },
        Category::Maintenance => CategoryDefaults {
            priority: 50,
            path: "scripts/maintenance",
            description: "Maintenance scripts",
        },
    }
}

/// A resolved discovery root: configuration merged over built-in defaults
#[derive(Debug, Clone)]
pub struct SourceRoot {
    pub category: Category,
    pub enabled: bool,
    pub priority: i64,
    pub description: String,
    pub root: PathBuf,
    pub recursive: bool,
    pub exclude: Vec<Pattern>,
    pub independent: BTreeSet<String>,
    pub working_dir: PathBuf,
    pub commands: CommandOverrides,
}

impl SourceRoot {
    /// Merge the configured entry (if any) over the category defaults
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for malformed exclude patterns
    pub fn resolve(
        category: Category,
        config: Option<&CategoryConfig>,
        base_dir: &std::path::Path,
    ) -> Result<Self, ConfigError> {
        let defaults = defaults_for(category);
        let fallback = CategoryConfig::default();
        let config = config.unwrap_or(&fallback);

        let exclude = config
            .exclude
            .iter()
            .map(|pattern| {
                Pattern::new(pattern).map_err(|e| ConfigError::InvalidValue {
                    field: format!("migrationCategories.{}.exclude", category),
                    value: format!("{} ({})", pattern, e),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let root = base_dir.join(config.path.as_deref().unwrap_or(defaults.path));
        let working_dir = config
            .working_dir
            .as_deref()
            .map(|dir| base_dir.join(dir))
            .unwrap_or_else(|| base_dir.to_path_buf());

        Ok(Self {
            category,
            enabled: config.enabled.unwrap_or(true),
            priority: config.priority.unwrap_or(defaults.priority),
            description: config
                .description
                .clone()
                .unwrap_or_else(|| defaults.description.to_string()),
            root,
            recursive: config.recursive.unwrap_or(false),
            exclude,
            independent: config.independent.iter().cloned().collect(),
            working_dir,
            commands: config.commands.clone(),
        })
    }

    /// Whether a file name matches one of the exclude patterns
    pub fn is_excluded(&self, file_name: &str) -> bool {
        self.exclude
            .iter()
            .any(|pattern| pattern.matches(file_name) || pattern.as_str() == file_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_defaults_apply_when_unconfigured() {
        let root = SourceRoot::resolve(Category::Sql, None, Path::new("/srv/app")).unwrap();
        assert!(root.enabled);
        assert_eq!(root.priority, 20);
        assert_eq!(root.root, PathBuf::from("/srv/app/migrations/sql"));
        assert_eq!(root.working_dir, PathBuf::from("/srv/app"));
        assert!(!root.recursive);
    }

    #[test]
    fn test_configured_values_override_defaults() {
        let config: CategoryConfig = serde_json::from_str(
            r#"{
                "enabled": false,
                "priority": 5,
                "description": "Legacy SQL",
                "path": "db/sql",
                "exclude": ["*_draft.sql"],
                "independent": ["004_index_names"],
                "commands": {"run": ["sqlite3", "app.db", ".read {path}"]}
            }"#,
        )
        .unwrap();

        let root = SourceRoot::resolve(Category::Sql, Some(&config), Path::new("/srv/app")).unwrap();
        assert!(!root.enabled);
        assert_eq!(root.priority, 5);
        assert_eq!(root.description, "Legacy SQL");
        assert_eq!(root.root, PathBuf::from("/srv/app/db/sql"));
        assert!(root.is_excluded("010_wip_draft.sql"));
        assert!(!root.is_excluded("010_wip.sql"));
        assert!(root.independent.contains("004_index_names"));
        assert_eq!(
            root.commands.for_entry(EntryPoint::Run).unwrap().0[0],
            "sqlite3"
        );
    }

    #[test]
    fn test_invalid_exclude_pattern_is_config_error() {
        let config = CategoryConfig {
            exclude: vec!["[unclosed".to_string()],
            ..Default::default()
        };
        let err = SourceRoot::resolve(Category::Script, Some(&config), Path::new("/")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
