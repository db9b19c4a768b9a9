//! Migration domain types
//!
//! Defines migration categories, capabilities and the descriptor produced by
//! discovery for every migration unit.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Kinds of migration units the orchestrator knows how to discover
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Imperative scripts exposing lifecycle functions
    Script,
    /// Declarative SQL files
    Sql,
    /// ORM-managed revision files (Alembic style)
    Orm,
    /// Ad-hoc deployment scripts
    Deployment,
    /// Ad-hoc maintenance scripts
    Maintenance,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Script,
        Category::Sql,
        Category::Orm,
        Category::Deployment,
        Category::Maintenance,
    ];

    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "script" | "scripts" | "script-based" | "python" => Some(Self::Script),
            "sql" | "declarative-sql" | "declarative" => Some(Self::Sql),
            "orm" | "orm-managed" | "alembic" => Some(Self::Orm),
            "deployment" | "deploy" => Some(Self::Deployment),
            "maintenance" | "maint" => Some(Self::Maintenance),
            _ => None,
        }
    }

    /// Canonical key used in configuration and on the command line
    pub fn key(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Sql => "sql",
            Self::Orm => "orm",
            Self::Deployment => "deployment",
            Self::Maintenance => "maintenance",
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Script => "Script-based",
            Self::Sql => "Declarative SQL",
            Self::Orm => "ORM-managed",
            Self::Deployment => "Deployment",
            Self::Maintenance => "Maintenance",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Abilities a migration unit exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    Runnable,
    Rollbackable,
    Verifiable,
}

impl Capability {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Runnable => "run",
            Self::Rollbackable => "rollback",
            Self::Verifiable => "verify",
        }
    }
}

/// Well-known lifecycle entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    Run,
    Rollback,
    Verify,
}

impl EntryPoint {
    /// Conventional function name for script-based units
    pub fn function_name(&self) -> &'static str {
        match self {
            Self::Run => "run_migration",
            Self::Rollback => "rollback_migration",
            Self::Verify => "verify_migration",
        }
    }

    /// Capability granted by exposing this entry point
    pub fn capability(&self) -> Capability {
        match self {
            Self::Run => Capability::Runnable,
            Self::Rollback => Capability::Rollbackable,
            Self::Verify => Capability::Verifiable,
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.capability().label())
    }
}

/// What gets executed for an entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "target", rename_all = "lowercase")]
pub enum EntryTarget {
    /// A named callable inside the unit's source file
    Function(String),
    /// A whole file (the unit itself or a declared companion)
    File(PathBuf),
}

/// Identity and metadata for one discovered migration unit.
///
/// Created by the analyzer during a registry build and never mutated
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationDescriptor {
    pub name: String,
    pub category: Category,
    pub source_path: PathBuf,
    pub capabilities: BTreeSet<Capability>,
    pub entry_points: BTreeMap<EntryPoint, EntryTarget>,
    pub documentation: Option<String>,
    pub content_fingerprint: String,
    /// Whether the run entry point honours a no-mutation flag
    pub supports_dry_run: bool,
    /// Declared disjoint from other units; eligible for parallel waves
    pub independent: bool,
    /// Adapter-specific facts (ORM revision ids, dry-run flags)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Non-fatal analysis annotations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl MigrationDescriptor {
    /// Registry key
    pub fn key(&self) -> (Category, String) {
        (self.category, self.name.clone())
    }

    /// `category/name`, used in logs and messages
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.category, self.name)
    }

    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub fn entry(&self, entry: EntryPoint) -> Option<&EntryTarget> {
        self.entry_points.get(&entry)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Compact capability list, e.g. `run,rollback`
    pub fn capability_summary(&self) -> String {
        self.capabilities
            .iter()
            .map(Capability::label)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// First line of the documentation block
    pub fn summary(&self) -> Option<&str> {
        self.documentation
            .as_deref()
            .and_then(|doc| doc.lines().map(str::trim).find(|l| !l.is_empty()))
    }
}

/// Derive the capability set from detected entry points.
///
/// Runnable is always present for a discovered unit.
pub fn capabilities_for(entry_points: &BTreeMap<EntryPoint, EntryTarget>) -> BTreeSet<Capability> {
    let mut caps: BTreeSet<Capability> = entry_points.keys().map(EntryPoint::capability).collect();
    caps.insert(Capability::Runnable);
    caps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_str() {
        assert_eq!(Category::from_str("sql"), Some(Category::Sql));
        assert_eq!(Category::from_str("Declarative-SQL"), Some(Category::Sql));
        assert_eq!(Category::from_str("alembic"), Some(Category::Orm));
        assert_eq!(Category::from_str("scripts"), Some(Category::Script));
        assert_eq!(Category::from_str("MAINTENANCE"), Some(Category::Maintenance));
        assert_eq!(Category::from_str("graphql"), None);
    }

    #[test]
    fn test_category_key_round_trips_through_from_str() {
        for category in Category::ALL {
            assert_eq!(Category::from_str(category.key()), Some(category));
        }
    }

    #[test]
    fn test_capabilities_always_include_runnable() {
        let caps = capabilities_for(&BTreeMap::new());
        assert_eq!(caps.into_iter().collect::<Vec<_>>(), vec![Capability::Runnable]);

        let mut entries = BTreeMap::new();
        entries.insert(EntryPoint::Run, EntryTarget::Function("run_migration".into()));
        entries.insert(EntryPoint::Verify, EntryTarget::Function("verify_migration".into()));
        let caps = capabilities_for(&entries);
        assert!(caps.contains(&Capability::Verifiable));
        assert!(!caps.contains(&Capability::Rollbackable));
    }

    #[test]
    fn test_entry_point_function_names() {
        assert_eq!(EntryPoint::Run.function_name(), "run_migration");
        assert_eq!(EntryPoint::Rollback.function_name(), "rollback_migration");
        assert_eq!(EntryPoint::Verify.function_name(), "verify_migration");
    }
}
