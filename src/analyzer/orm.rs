//! ORM-managed (Alembic-style) revision adapter
//!
//! A revision file declares `revision` / `down_revision` identifiers and
//! `upgrade()` / `downgrade()` functions. Execution goes through the ORM's
//! own tooling, addressed by revision id rather than by file.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use super::python;
use super::{has_extension, Inspection, UnitAdapter};
use crate::config::CommandOverrides;
use crate::domain::{Category, EntryPoint, EntryTarget, MigrationDescriptor};
use crate::error::AnalysisFailureReason;
use crate::infrastructure::CommandTemplate;
use crate::tools::tools;

/// `down_revision` of the first revision in a chain
pub const BASE_REVISION: &str = "base";

fn revision_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^revision\s*(?::\s*[\w\[\], |]+)?=\s*['"]([^'"]+)['"]"#)
            .expect("revision pattern is valid")
    })
}

fn down_revision_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"^down_revision\s*(?::\s*[\w\[\], |]+)?=\s*(.+)$"#)
            .expect("down_revision pattern is valid")
    })
}

pub struct OrmAdapter {
    commands: CommandOverrides,
}

impl OrmAdapter {
    pub fn new(commands: CommandOverrides) -> Self {
        Self { commands }
    }

    fn default_template(entry: EntryPoint) -> CommandTemplate {
        match entry {
            EntryPoint::Rollback => {
                CommandTemplate::new([tools::ALEMBIC, "downgrade", "{down_revision}"])
            }
            _ => CommandTemplate::new([tools::ALEMBIC, "upgrade", "{revision}"]),
        }
    }
}

impl UnitAdapter for OrmAdapter {
    fn category(&self) -> Category {
        Category::Orm
    }

    fn accepts(&self, path: &Path) -> bool {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        has_extension(path, &["py"]) && !file_name.starts_with("__") && file_name != "env.py"
    }

    fn inspect(&self, _path: &Path, content: &str) -> Result<Inspection, AnalysisFailureReason> {
        let outline = python::outline(content).map_err(AnalysisFailureReason::Unparseable)?;
        if outline.is_empty() {
            return Err(AnalysisFailureReason::EmptyContent);
        }

        let mut revision = None;
        let mut down_revision = None;
        for line in &outline.top_level {
            if let Some(caps) = revision_pattern().captures(&line.text) {
                revision = Some(caps[1].to_string());
            } else if let Some(caps) = down_revision_pattern().captures(&line.text) {
                down_revision = Some(caps[1].trim().to_string());
            }
        }

        let revision = revision
            .ok_or_else(|| AnalysisFailureReason::MissingEntryPoint("revision identifier".to_string()))?;
        if outline.function("upgrade").is_none() {
            return Err(AnalysisFailureReason::MissingEntryPoint("upgrade()".to_string()));
        }

        let mut inspection = Inspection::default();
        inspection.documentation = outline.docstring.clone();
        inspection
            .entry_points
            .insert(EntryPoint::Run, EntryTarget::Function("upgrade".to_string()));
        inspection.supports_dry_run = true;

        let down = match down_revision.as_deref() {
            None | Some("None") => Some(BASE_REVISION.to_string()),
            Some(value) => python::string_literal(value),
        };
        match down {
            Some(down) => {
                if let Some(downgrade) = outline.function("downgrade") {
                    if !downgrade.is_trivial() {
                        inspection.entry_points.insert(
                            EntryPoint::Rollback,
                            EntryTarget::Function("downgrade".to_string()),
                        );
                    }
                }
                inspection.attributes.insert("down_revision".to_string(), down);
            }
            None => {
                // merge revisions have several parents; no single downgrade target
                inspection.warnings.push(format!(
                    "down_revision {} is not a single revision; rollback disabled",
                    down_revision.unwrap_or_default()
                ));
            }
        }

        if self.commands.verify.is_some() {
            inspection.entry_points.insert(
                EntryPoint::Verify,
                EntryTarget::Function("verify".to_string()),
            );
        }

        inspection.attributes.insert("revision".to_string(), revision);
        Ok(inspection)
    }

    fn command(&self, _unit: &MigrationDescriptor, entry: EntryPoint) -> CommandTemplate {
        self.commands
            .for_entry(entry)
            .cloned()
            .unwrap_or_else(|| Self::default_template(entry))
    }

    fn dry_run_command(&self, unit: &MigrationDescriptor) -> Option<CommandTemplate> {
        if let Some(template) = &self.commands.dry_run {
            return Some(template.clone());
        }
        // offline mode renders the SQL between the parent and this revision
        let range = match unit.attribute("down_revision") {
            Some(down) if down != BASE_REVISION => "{down_revision}:{revision}",
            _ => "{revision}",
        };
        Some(CommandTemplate::new([tools::ALEMBIC, "upgrade", range, "--sql"]))
    }

    fn validate_structure(&self, path: &Path, content: &str) -> Result<String, String> {
        self.inspect(path, content)
            .map(|_| "revision structure is valid".to_string())
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Capability;

    const REVISION: &str = r#""""add restaurant slugs

Revision ID: a1b2c3d4
Revises: 9f8e7d6c
"""
from alembic import op
import sqlalchemy as sa

revision = 'a1b2c3d4'
down_revision = '9f8e7d6c'
branch_labels = None
depends_on = None


def upgrade():
    op.add_column('restaurants', sa.Column('slug', sa.Text()))


def downgrade():
    op.drop_column('restaurants', 'slug')
"#;

    fn adapter() -> OrmAdapter {
        OrmAdapter::new(CommandOverrides::default())
    }

    #[test]
    fn test_revision_with_downgrade_is_rollbackable() {
        let inspection = adapter().inspect(Path::new("a1b2c3d4_slugs.py"), REVISION).unwrap();
        assert_eq!(inspection.attributes["revision"], "a1b2c3d4");
        assert_eq!(inspection.attributes["down_revision"], "9f8e7d6c");
        assert!(inspection.entry_points.contains_key(&EntryPoint::Rollback));
        assert!(inspection.supports_dry_run);
        assert!(inspection
            .documentation
            .as_deref()
            .unwrap()
            .starts_with("add restaurant slugs"));
    }

    #[test]
    fn test_trivial_downgrade_is_not_rollbackable() {
        let src = REVISION.replace(
            "    op.drop_column('restaurants', 'slug')",
            "    pass",
        );
        let inspection = adapter().inspect(Path::new("x.py"), &src).unwrap();
        let caps = crate::domain::migration::capabilities_for(&inspection.entry_points);
        assert_eq!(caps.into_iter().collect::<Vec<_>>(), vec![Capability::Runnable]);
    }

    #[test]
    fn test_first_revision_downgrades_to_base() {
        let src = REVISION.replace("down_revision = '9f8e7d6c'", "down_revision = None");
        let inspection = adapter().inspect(Path::new("x.py"), &src).unwrap();
        assert_eq!(inspection.attributes["down_revision"], BASE_REVISION);
    }

    #[test]
    fn test_merge_revision_disables_rollback() {
        let src = REVISION.replace("down_revision = '9f8e7d6c'", "down_revision = ('aaa', 'bbb')");
        let inspection = adapter().inspect(Path::new("x.py"), &src).unwrap();
        assert!(!inspection.entry_points.contains_key(&EntryPoint::Rollback));
        assert_eq!(inspection.warnings.len(), 1);
    }

    #[test]
    fn test_missing_revision_or_upgrade_fails() {
        let src = REVISION.replace("revision = 'a1b2c3d4'\n", "");
        assert!(matches!(
            adapter().inspect(Path::new("x.py"), &src),
            Err(AnalysisFailureReason::MissingEntryPoint(_))
        ));

        let src = REVISION.replace("def upgrade():", "def upgrade_later():");
        assert!(matches!(
            adapter().inspect(Path::new("x.py"), &src),
            Err(AnalysisFailureReason::MissingEntryPoint(_))
        ));
    }

    #[test]
    fn test_package_files_are_not_units() {
        assert!(adapter().accepts(Path::new("versions/a1b2_slugs.py")));
        assert!(!adapter().accepts(Path::new("versions/__init__.py")));
        assert!(!adapter().accepts(Path::new("versions/README")));
    }
}
