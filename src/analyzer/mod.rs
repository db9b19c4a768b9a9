//! # Migration Analyzer
//!
//! Turns a candidate file into a [`MigrationDescriptor`]: name, capabilities,
//! documentation and content fingerprint. Each category is served by one
//! [`UnitAdapter`]; adding a category means adding an adapter, the engine
//! and registry stay untouched.
//!
//! | Category | Adapter | Entry points |
//! |---|---|---|
//! | script | [`script::ScriptAdapter`] | `run_migration` / `rollback_migration` / `verify_migration` functions |
//! | sql | [`sql::SqlAdapter`] | the file, plus header-declared companions |
//! | orm | [`orm::OrmAdapter`] | `upgrade` / `downgrade` through the ORM tooling |
//! | deployment, maintenance | [`text::TextAdapter`] | the file, plus header-declared companions |
//!
//! Analysis only reads files. No unit code runs during discovery.

pub mod header;
pub mod orm;
pub mod python;
pub mod script;
pub mod shell;
pub mod sql;
pub mod text;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{CommandOverrides, SourceRoot};
use crate::domain::migration::capabilities_for;
use crate::domain::{Category, EntryPoint, EntryTarget, MigrationDescriptor};
use crate::error::{AnalysisFailure, AnalysisFailureReason};
use crate::infrastructure::{CommandSpec, CommandTemplate, TemplateVars};

/// What an adapter learned from one file
#[derive(Debug, Clone, Default)]
pub struct Inspection {
    pub entry_points: BTreeMap<EntryPoint, EntryTarget>,
    pub documentation: Option<String>,
    pub supports_dry_run: bool,
    pub attributes: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

impl Inspection {
    /// A unit whose run entry point is the file itself
    pub fn whole_file(path: &Path) -> Self {
        let mut inspection = Self::default();
        inspection
            .entry_points
            .insert(EntryPoint::Run, EntryTarget::File(path.to_path_buf()));
        inspection
    }
}

/// Per-category capability detection and invocation
pub trait UnitAdapter: Send + Sync {
    fn category(&self) -> Category;

    /// Whether a file under the category root is a candidate unit
    fn accepts(&self, path: &Path) -> bool;

    /// Side-effect-free introspection of a unit's source
    fn inspect(&self, path: &Path, content: &str) -> Result<Inspection, AnalysisFailureReason>;

    /// Command template for an entry point the unit exposes
    fn command(&self, unit: &MigrationDescriptor, entry: EntryPoint) -> CommandTemplate;

    /// Command template for a no-mutation run, `None` when the unit cannot honour one
    fn dry_run_command(&self, unit: &MigrationDescriptor) -> Option<CommandTemplate>;

    /// Parse without executing; returns a short note on success
    fn validate_structure(&self, path: &Path, content: &str) -> Result<String, String>;
}

/// Content fingerprint recorded at discovery and checked before execution
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}

/// Fingerprint of a file as it is on disk now
pub async fn fingerprint_file(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(fingerprint(&bytes))
}

pub(crate) fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|candidate| ext.eq_ignore_ascii_case(candidate)))
}

/// `name.down.sql`, `name.rollback.sh`, `name.verify.py` and the like
pub(crate) fn is_companion_file(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    [".down", ".rollback", ".verify"]
        .iter()
        .any(|suffix| stem.to_ascii_lowercase().ends_with(suffix))
}

/// Add rollback/verify entry points for companions named in the header
pub(crate) fn resolve_companions(path: &Path, header: &header::Header, inspection: &mut Inspection) {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    for (key, entry) in [("rollback", EntryPoint::Rollback), ("verify", EntryPoint::Verify)] {
        let Some(name) = header.directive(key) else {
            continue;
        };
        let companion = dir.join(name);
        if companion.is_file() {
            inspection.entry_points.insert(entry, EntryTarget::File(companion));
        } else {
            inspection.warnings.push(format!(
                "declared {} companion {} not found; capability not added",
                key,
                companion.display()
            ));
        }
    }
}

/// All unit adapters plus the source roots they serve
pub struct Analyzer {
    adapters: Vec<Box<dyn UnitAdapter>>,
    roots: BTreeMap<Category, SourceRoot>,
}

impl Analyzer {
    /// Build adapters for every category, applying each root's command overrides
    pub fn new(roots: &[SourceRoot]) -> Self {
        let roots: BTreeMap<Category, SourceRoot> =
            roots.iter().map(|root| (root.category, root.clone())).collect();
        let commands = |category: Category| -> CommandOverrides {
            roots
                .get(&category)
                .map(|root| root.commands.clone())
                .unwrap_or_default()
        };

        let adapters: Vec<Box<dyn UnitAdapter>> = vec![
            Box::new(script::ScriptAdapter::new(commands(Category::Script))),
            Box::new(sql::SqlAdapter::new(commands(Category::Sql))),
            Box::new(orm::OrmAdapter::new(commands(Category::Orm))),
            Box::new(text::TextAdapter::new(
                Category::Deployment,
                commands(Category::Deployment),
            )),
            Box::new(text::TextAdapter::new(
                Category::Maintenance,
                commands(Category::Maintenance),
            )),
        ];

        Self { adapters, roots }
    }

    pub fn adapter(&self, category: Category) -> Option<&dyn UnitAdapter> {
        self.adapters
            .iter()
            .find(|adapter| adapter.category() == category)
            .map(|adapter| adapter.as_ref())
    }

    /// Whether a file is a candidate unit of the category
    pub fn accepts(&self, path: &Path, category: Category) -> bool {
        self.adapter(category).is_some_and(|adapter| adapter.accepts(path))
    }

    /// Analyze one candidate file
    ///
    /// # Errors
    /// Returns `AnalysisFailure` when the file is unreadable, empty or unparseable
    pub fn analyze(&self, path: &Path, category: Category) -> Result<MigrationDescriptor, AnalysisFailure> {
        let failure = |reason: AnalysisFailureReason| AnalysisFailure {
            path: path.to_path_buf(),
            category,
            reason,
        };

        let adapter = self
            .adapter(category)
            .ok_or_else(|| failure(AnalysisFailureReason::Unparseable("no adapter for category".to_string())))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .ok_or_else(|| failure(AnalysisFailureReason::Io("file name is not valid UTF-8".to_string())))?;

        let bytes = std::fs::read(path).map_err(|e| failure(AnalysisFailureReason::Io(e.to_string())))?;
        let content = std::str::from_utf8(&bytes)
            .map_err(|e| failure(AnalysisFailureReason::Unparseable(format!("not valid UTF-8: {}", e))))?;

        let inspection = adapter.inspect(path, content).map_err(failure)?;
        let independent = self
            .roots
            .get(&category)
            .is_some_and(|root| root.independent.contains(&name));

        Ok(MigrationDescriptor {
            capabilities: capabilities_for(&inspection.entry_points),
            name,
            category,
            source_path: path.to_path_buf(),
            entry_points: inspection.entry_points,
            documentation: inspection.documentation,
            content_fingerprint: fingerprint(&bytes),
            supports_dry_run: inspection.supports_dry_run,
            independent,
            attributes: inspection.attributes,
            warnings: inspection.warnings,
        })
    }

    /// Rendered command for an entry point, `None` when the unit lacks it
    ///
    /// # Errors
    /// Returns error if the template references an unset `{env:VAR}`
    pub fn command_for(&self, unit: &MigrationDescriptor, entry: EntryPoint) -> Result<Option<CommandSpec>> {
        let Some(target) = unit.entry(entry) else {
            return Ok(None);
        };
        let Some(adapter) = self.adapter(unit.category) else {
            return Ok(None);
        };
        let template = adapter.command(unit, entry);
        self.render(unit, target, &template).map(Some)
    }

    /// Rendered command for a dry run, `None` when only structural validation is possible
    ///
    /// # Errors
    /// Returns error if the template references an unset `{env:VAR}`
    pub fn dry_run_command_for(&self, unit: &MigrationDescriptor) -> Result<Option<CommandSpec>> {
        let (Some(adapter), Some(target)) = (self.adapter(unit.category), unit.entry(EntryPoint::Run)) else {
            return Ok(None);
        };
        match adapter.dry_run_command(unit) {
            Some(template) => self
                .render(unit, target, &template)
                .map(|spec| Some(spec.env("MIGRATION_DRY_RUN", "1"))),
            None => Ok(None),
        }
    }

    /// Parse the unit's current file without executing it
    pub fn validate_structure(&self, unit: &MigrationDescriptor) -> Result<String, String> {
        let adapter = self
            .adapter(unit.category)
            .ok_or_else(|| format!("no adapter for category {}", unit.category))?;
        let content = std::fs::read_to_string(&unit.source_path)
            .map_err(|e| format!("cannot read {}: {}", unit.source_path.display(), e))?;
        adapter.validate_structure(&unit.source_path, &content)
    }

    fn render(&self, unit: &MigrationDescriptor, target: &EntryTarget, template: &CommandTemplate) -> Result<CommandSpec> {
        let root = self.roots.get(&unit.category);
        let source_dir = unit
            .source_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut vars = TemplateVars::new()
            .with("name", unit.name.as_str())
            .with("category", unit.category.key())
            .with("dir", source_dir.display().to_string());
        match target {
            EntryTarget::Function(function) => {
                vars.set("path", unit.source_path.display().to_string());
                vars.set("entry", function.as_str());
            }
            EntryTarget::File(file) => {
                vars.set("path", file.display().to_string());
                vars.set("entry", "");
            }
        }
        if let Some(root) = root {
            vars.set("root", root.root.display().to_string());
        }
        for (key, value) in &unit.attributes {
            vars.set(key, value.as_str());
        }

        let working_dir: PathBuf = root.map(|r| r.working_dir.clone()).unwrap_or(source_dir);
        Ok(template
            .render(&vars)
            .with_context(|| format!("Cannot build command for {}", unit.qualified_name()))?
            .current_dir(working_dir)
            .env("MIGRATION_NAME", unit.name.as_str())
            .env("MIGRATION_CATEGORY", unit.category.key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Capability;

    fn analyzer_for(dir: &Path) -> Analyzer {
        let roots: Vec<SourceRoot> = Category::ALL
            .iter()
            .map(|c| SourceRoot::resolve(*c, None, dir).unwrap())
            .collect();
        Analyzer::new(&roots)
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = fingerprint(b"SELECT 1;");
        let b = fingerprint(b"SELECT 2;");
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), "sha256:".len() + 64);
        assert_ne!(a, b);
        assert_eq!(a, fingerprint(b"SELECT 1;"));
    }

    #[test]
    fn test_analyze_sql_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("001_create_restaurants.sql");
        std::fs::write(&path, "-- Create restaurants\nCREATE TABLE restaurants (id INT);\n").unwrap();

        let unit = analyzer_for(dir.path()).analyze(&path, Category::Sql).unwrap();
        assert_eq!(unit.name, "001_create_restaurants");
        assert_eq!(unit.category, Category::Sql);
        assert_eq!(unit.documentation.as_deref(), Some("Create restaurants"));
        assert_eq!(unit.capabilities.iter().copied().collect::<Vec<_>>(), vec![Capability::Runnable]);
        assert_eq!(unit.attribute("statements"), Some("1"));
    }

    #[test]
    fn test_unreadable_file_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = analyzer_for(dir.path())
            .analyze(&dir.path().join("missing.sql"), Category::Sql)
            .unwrap_err();
        assert!(matches!(err.reason, AnalysisFailureReason::Io(_)));
    }

    #[test]
    fn test_invalid_utf8_is_unparseable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.py");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();
        let err = analyzer_for(dir.path()).analyze(&path, Category::Script).unwrap_err();
        assert!(matches!(err.reason, AnalysisFailureReason::Unparseable(_)));
    }

    #[test]
    fn test_script_command_renders_launcher() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("002_seed.py");
        std::fs::write(&path, "def run_migration(dry_run=False):\n    return True\n").unwrap();

        let analyzer = analyzer_for(dir.path());
        let unit = analyzer.analyze(&path, Category::Script).unwrap();

        let spec = analyzer.command_for(&unit, EntryPoint::Run).unwrap().unwrap();
        assert_eq!(spec.program, "python3");
        assert_eq!(spec.args[0], "-c");
        assert_eq!(spec.args[2], path.display().to_string());
        assert_eq!(spec.args[3], "run_migration");
        assert_eq!(spec.cwd.as_deref(), Some(dir.path()));
        assert!(spec.env.contains(&("MIGRATION_NAME".to_string(), "002_seed".to_string())));

        let dry = analyzer.dry_run_command_for(&unit).unwrap().unwrap();
        assert_eq!(dry.args.last().map(String::as_str), Some("--dry-run"));
        assert!(dry.env.contains(&("MIGRATION_DRY_RUN".to_string(), "1".to_string())));

        assert!(analyzer.command_for(&unit, EntryPoint::Rollback).unwrap().is_none());
    }

    #[test]
    fn test_independent_flag_comes_from_source_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("005_indexes.sql");
        std::fs::write(&path, "CREATE INDEX i ON t (c);").unwrap();

        let config = crate::config::CategoryConfig {
            independent: vec!["005_indexes".to_string()],
            ..Default::default()
        };
        let root = SourceRoot::resolve(Category::Sql, Some(&config), dir.path()).unwrap();
        let unit = Analyzer::new(&[root]).analyze(&path, Category::Sql).unwrap();
        assert!(unit.independent);
    }

    #[test]
    fn test_companion_detection() {
        assert!(is_companion_file(Path::new("004.down.sql")));
        assert!(is_companion_file(Path::new("purge.ROLLBACK.sh")));
        assert!(!is_companion_file(Path::new("004_downtime.sql")));
    }
}
