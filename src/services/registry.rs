//! Migration registry - the catalog of discovered units
//!
//! Built fresh for every orchestrator invocation by walking each enabled
//! source root and handing every candidate file to the analyzer. Nothing is
//! cached between invocations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::analyzer::Analyzer;
use crate::config::SourceRoot;
use crate::domain::{Category, MigrationDescriptor};
use crate::error::{AnalysisFailure, ConfigError, OrchestratorError};

/// Catalog of migration descriptors keyed by `(category, name)`
#[derive(Debug, Default)]
pub struct Registry {
    units: BTreeMap<(Category, String), MigrationDescriptor>,
    roots: Vec<SourceRoot>,
    failures: Vec<AnalysisFailure>,
    warnings: Vec<String>,
}

impl Registry {
    /// Discover every unit under the enabled roots
    ///
    /// Analysis failures and duplicates are logged and collected; they never
    /// abort the build.
    pub fn build(roots: &[SourceRoot], analyzer: &Analyzer) -> Self {
        let mut roots = roots.to_vec();
        roots.sort_by_key(|root| (root.priority, root.category));

        let mut registry = Self {
            roots,
            ..Default::default()
        };

        for root in registry.roots.clone() {
            if !root.enabled {
                debug!("Skipping disabled category {}", root.category);
                continue;
            }
            registry.discover_root(&root, analyzer);
        }

        info!(
            "Discovered {} migration(s), {} excluded by analysis failures",
            registry.units.len(),
            registry.failures.len()
        );
        registry
    }

    fn discover_root(&mut self, root: &SourceRoot, analyzer: &Analyzer) {
        if !root.root.is_dir() {
            debug!(
                "Discovery root for {} does not exist: {}",
                root.category,
                root.root.display()
            );
            return;
        }

        for path in candidates(root, analyzer) {
            match analyzer.analyze(&path, root.category) {
                Ok(unit) => self.insert(unit),
                Err(failure) => {
                    warn!("{}", failure);
                    self.failures.push(failure);
                }
            }
        }
    }

    fn insert(&mut self, unit: MigrationDescriptor) {
        for warning in &unit.warnings {
            warn!("{}: {}", unit.qualified_name(), warning);
        }

        if let Some(existing) = self.units.get(&unit.key()) {
            let message = format!(
                "duplicate migration {}: keeping {}, ignoring {}",
                unit.qualified_name(),
                existing.source_path.display(),
                unit.source_path.display()
            );
            warn!("{}", message);
            self.warnings.push(message);
            return;
        }
        self.units.insert(unit.key(), unit);
    }

    /// Descriptors in default execution order: category priority, then name
    pub fn list(&self, category: Option<Category>) -> Vec<&MigrationDescriptor> {
        self.roots
            .iter()
            .filter(|root| category.map_or(true, |c| c == root.category))
            .flat_map(|root| {
                self.units
                    .iter()
                    .filter(move |((c, _), _)| *c == root.category)
                    .map(|(_, unit)| unit)
            })
            .collect()
    }

    /// Look up one unit
    ///
    /// A trailing file extension on `name` is tolerated (`001_init.sql`).
    ///
    /// # Errors
    /// Returns `ConfigError::CategoryDisabled` for a disabled category and
    /// `OrchestratorError::NotFound` when no such unit was discovered
    pub fn find(&self, name: &str, category: Category) -> Result<&MigrationDescriptor, OrchestratorError> {
        self.ensure_enabled(category)?;

        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        self.units
            .get(&(category, name.to_string()))
            .or_else(|| self.units.get(&(category, stem.to_string())))
            .ok_or_else(|| OrchestratorError::NotFound {
                name: name.to_string(),
                category,
            })
    }

    /// # Errors
    /// Returns `ConfigError::CategoryDisabled` when the category is switched off
    pub fn ensure_enabled(&self, category: Category) -> Result<(), ConfigError> {
        match self.root(category) {
            Some(root) if !root.enabled => Err(ConfigError::CategoryDisabled { category }),
            _ => Ok(()),
        }
    }

    pub fn root(&self, category: Category) -> Option<&SourceRoot> {
        self.roots.iter().find(|root| root.category == category)
    }

    /// Roots in priority order, enabled or not
    pub fn roots(&self) -> &[SourceRoot] {
        &self.roots
    }

    pub fn failures(&self) -> &[AnalysisFailure] {
        &self.failures
    }

    /// Discovery-level warnings (duplicates)
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map_or(false, |name| name.starts_with('.') || name == "__pycache__")
}

/// Candidate files under a root, sorted so the first occurrence is stable
fn candidates(root: &SourceRoot, analyzer: &Analyzer) -> Vec<PathBuf> {
    let max_depth = if root.recursive { usize::MAX } else { 1 };

    let mut paths: Vec<PathBuf> = WalkDir::new(&root.root)
        .min_depth(1)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Cannot read entry under {}: {}", root.root.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            !root.is_excluded(&name)
        })
        .map(DirEntry::into_path)
        .filter(|path| analyzer.accepts(path, root.category))
        .collect();

    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CategoryConfig;
    use crate::domain::Capability;
    use std::fs;

    fn roots_for(dir: &Path, configure: impl Fn(Category) -> Option<CategoryConfig>) -> Vec<SourceRoot> {
        Category::ALL
            .iter()
            .map(|c| SourceRoot::resolve(*c, configure(*c).as_ref(), dir).unwrap())
            .collect()
    }

    fn build(dir: &Path) -> Registry {
        let roots = roots_for(dir, |_| None);
        Registry::build(&roots, &Analyzer::new(&roots))
    }

    fn caps(unit: &MigrationDescriptor) -> Vec<Capability> {
        unit.capabilities.iter().copied().collect()
    }

    #[test]
    fn test_mixed_discovery_root() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("migrations/scripts");
        let sql = dir.path().join("migrations/sql");
        fs::create_dir_all(&scripts).unwrap();
        fs::create_dir_all(&sql).unwrap();

        fs::write(
            scripts.join("001_full.py"),
            "\"\"\"Backfill loyalty points.\"\"\"\n\ndef run_migration():\n    return True\n\ndef rollback_migration():\n    return True\n\ndef verify_migration():\n    return True\n",
        )
        .unwrap();
        fs::write(scripts.join("002_run_only.py"), "def run_migration():\n    pass\n").unwrap();
        fs::write(scripts.join("003_broken.py"), "def run_migration():\n    x = 'oops\n").unwrap();
        fs::write(sql.join("001_create.sql"), "CREATE TABLE t (id INT);\n").unwrap();
        fs::write(sql.join("002_index.sql"), "CREATE INDEX i ON t (id);\n").unwrap();

        let registry = build(dir.path());
        let units = registry.list(None);
        assert_eq!(units.len(), 4);
        assert_eq!(registry.failures().len(), 1);
        assert!(registry.failures()[0].path.ends_with("003_broken.py"));

        // sql (priority 20) precedes script (priority 30)
        let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["001_create", "002_index", "001_full", "002_run_only"]);

        assert_eq!(
            caps(registry.find("001_full", Category::Script).unwrap()),
            vec![Capability::Runnable, Capability::Rollbackable, Capability::Verifiable]
        );
        assert_eq!(
            caps(registry.find("002_run_only", Category::Script).unwrap()),
            vec![Capability::Runnable]
        );
        for name in ["001_create", "002_index"] {
            assert_eq!(caps(registry.find(name, Category::Sql).unwrap()), vec![Capability::Runnable]);
        }
    }

    #[test]
    fn test_find_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let registry = build(dir.path());
        assert!(matches!(
            registry.find("001_nothing", Category::Sql),
            Err(OrchestratorError::NotFound { .. })
        ));
    }

    #[test]
    fn test_find_tolerates_extension() {
        let dir = tempfile::tempdir().unwrap();
        let sql = dir.path().join("migrations/sql");
        fs::create_dir_all(&sql).unwrap();
        fs::write(sql.join("001_create.sql"), "CREATE TABLE t (id INT);").unwrap();

        let registry = build(dir.path());
        assert_eq!(registry.find("001_create.sql", Category::Sql).unwrap().name, "001_create");
    }

    #[test]
    fn test_duplicate_names_keep_first_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("migrations/scripts");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(scripts.join("004_seed.py"), "def run_migration():\n    pass\n").unwrap();
        fs::write(scripts.join("004_seed.sh"), "run_migration() {\n  true\n}\n").unwrap();

        let registry = build(dir.path());
        assert_eq!(registry.len(), 1);
        assert!(registry
            .find("004_seed", Category::Script)
            .unwrap()
            .source_path
            .ends_with("004_seed.py"));
        assert_eq!(registry.warnings().len(), 1);
        assert!(registry.warnings()[0].contains("duplicate"));
    }

    #[test]
    fn test_companions_hidden_and_excluded_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let sql = dir.path().join("db");
        fs::create_dir_all(sql.join("archive")).unwrap();
        fs::write(
            sql.join("001_create.sql"),
            "-- Create table\n-- rollback: 001_create.down.sql\nCREATE TABLE t (id INT);\n",
        )
        .unwrap();
        fs::write(sql.join("001_create.down.sql"), "DROP TABLE t;\n").unwrap();
        fs::write(sql.join(".002_hidden.sql"), "SELECT 1;\n").unwrap();
        fs::write(sql.join("003_scratch.sql"), "SELECT 1;\n").unwrap();
        fs::write(sql.join("archive/000_old.sql"), "SELECT 1;\n").unwrap();

        let roots = roots_for(dir.path(), |c| {
            (c == Category::Sql).then(|| CategoryConfig {
                path: Some("db".into()),
                exclude: vec!["*_scratch.sql".into()],
                ..Default::default()
            })
        });
        let registry = Registry::build(&roots, &Analyzer::new(&roots));

        let names: Vec<&str> = registry.list(Some(Category::Sql)).iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["001_create"]);
        assert!(registry
            .find("001_create", Category::Sql)
            .unwrap()
            .has(Capability::Rollbackable));
    }

    #[test]
    fn test_recursive_root_descends() {
        let dir = tempfile::tempdir().unwrap();
        let sql = dir.path().join("migrations/sql");
        fs::create_dir_all(sql.join("2026")).unwrap();
        fs::write(sql.join("2026/010_nested.sql"), "SELECT 1;").unwrap();

        let roots = roots_for(dir.path(), |c| {
            (c == Category::Sql).then(|| CategoryConfig {
                recursive: Some(true),
                ..Default::default()
            })
        });
        let registry = Registry::build(&roots, &Analyzer::new(&roots));
        assert!(registry.find("010_nested", Category::Sql).is_ok());
    }

    #[test]
    fn test_disabled_category_not_discovered() {
        let dir = tempfile::tempdir().unwrap();
        let sql = dir.path().join("migrations/sql");
        fs::create_dir_all(&sql).unwrap();
        fs::write(sql.join("001_create.sql"), "SELECT 1;").unwrap();

        let roots = roots_for(dir.path(), |c| {
            (c == Category::Sql).then(|| CategoryConfig {
                enabled: Some(false),
                ..Default::default()
            })
        });
        let registry = Registry::build(&roots, &Analyzer::new(&roots));
        assert!(registry.is_empty());
        assert!(matches!(
            registry.find("001_create", Category::Sql),
            Err(OrchestratorError::Config(ConfigError::CategoryDisabled { .. }))
        ));
    }

    #[test]
    fn test_rebuild_picks_up_changed_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let sql = dir.path().join("migrations/sql");
        fs::create_dir_all(&sql).unwrap();
        let path = sql.join("001_create.sql");
        fs::write(&path, "CREATE TABLE t (id INT);").unwrap();
        let before = build(dir.path()).find("001_create", Category::Sql).unwrap().content_fingerprint.clone();

        fs::write(&path, "CREATE TABLE t (id BIGINT);").unwrap();
        let after = build(dir.path()).find("001_create", Category::Sql).unwrap().content_fingerprint.clone();
        assert_ne!(before, after);
    }
}
