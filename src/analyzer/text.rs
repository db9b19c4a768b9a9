//! Deployment and maintenance script adapter
//!
//! These units are executed as whole files. Their header comment may name
//! rollback/verify companion files and a `dry-run:` flag the script honours.

use std::path::Path;

use super::header::{self, CommentSyntax};
use super::{has_extension, is_companion_file, python, resolve_companions, shell, sql, Inspection, UnitAdapter};
use crate::config::CommandOverrides;
use crate::domain::{Category, EntryPoint, EntryTarget, MigrationDescriptor};
use crate::error::AnalysisFailureReason;
use crate::infrastructure::CommandTemplate;
use crate::tools::tools;

const EXTENSIONS: [&str; 4] = ["sh", "bash", "py", "sql"];

pub struct TextAdapter {
    category: Category,
    commands: CommandOverrides,
}

impl TextAdapter {
    pub fn new(category: Category, commands: CommandOverrides) -> Self {
        Self { category, commands }
    }

    /// Default command for a file, chosen by its extension
    fn interpreter_for(path: &Path) -> CommandTemplate {
        if has_extension(path, &["py"]) {
            CommandTemplate::new([tools::PYTHON, "{path}"])
        } else if has_extension(path, &["sql"]) {
            sql::default_run_template()
        } else {
            CommandTemplate::new([tools::SH, "{path}"])
        }
    }

    fn check_structure(path: &Path, content: &str) -> Result<usize, AnalysisFailureReason> {
        if has_extension(path, &["sql"]) {
            let statements = sql::split_statements(content).map_err(AnalysisFailureReason::Unparseable)?;
            if statements.is_empty() {
                return Err(AnalysisFailureReason::EmptyContent);
            }
            Ok(statements.len())
        } else if has_extension(path, &["py"]) {
            let outline = python::outline(content).map_err(AnalysisFailureReason::Unparseable)?;
            if outline.is_empty() {
                return Err(AnalysisFailureReason::EmptyContent);
            }
            Ok(outline.top_level.len())
        } else {
            let outline = shell::outline(content).map_err(AnalysisFailureReason::Unparseable)?;
            if !outline.has_content {
                return Err(AnalysisFailureReason::EmptyContent);
            }
            Ok(outline.functions.len() + outline.side_effects.len())
        }
    }
}

impl UnitAdapter for TextAdapter {
    fn category(&self) -> Category {
        self.category
    }

    fn accepts(&self, path: &Path) -> bool {
        has_extension(path, &EXTENSIONS) && !is_companion_file(path)
    }

    fn inspect(&self, path: &Path, content: &str) -> Result<Inspection, AnalysisFailureReason> {
        Self::check_structure(path, content)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let header = header::parse(content, CommentSyntax::for_extension(ext));

        let mut inspection = Inspection::whole_file(path);
        inspection.documentation = header.documentation.clone();
        resolve_companions(path, &header, &mut inspection);

        if let Some(flag) = header.directive("dry-run") {
            inspection
                .attributes
                .insert("dry_run_flag".to_string(), flag.to_string());
            inspection.supports_dry_run = true;
        }
        if self.commands.dry_run.is_some() {
            inspection.supports_dry_run = true;
        }
        Ok(inspection)
    }

    fn command(&self, unit: &MigrationDescriptor, entry: EntryPoint) -> CommandTemplate {
        if let Some(template) = self.commands.for_entry(entry) {
            return template.clone();
        }
        match unit.entry(entry) {
            Some(EntryTarget::File(file)) => Self::interpreter_for(file),
            _ => Self::interpreter_for(&unit.source_path),
        }
    }

    fn dry_run_command(&self, unit: &MigrationDescriptor) -> Option<CommandTemplate> {
        if let Some(template) = &self.commands.dry_run {
            return Some(template.clone());
        }
        let flag = unit.attribute("dry_run_flag")?;
        let mut template = self.command(unit, EntryPoint::Run);
        template.0.extend(flag.split_whitespace().map(str::to_string));
        Some(template)
    }

    fn validate_structure(&self, path: &Path, content: &str) -> Result<String, String> {
        Self::check_structure(path, content)
            .map(|count| format!("{} top-level item(s) parsed", count))
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> TextAdapter {
        TextAdapter::new(Category::Maintenance, CommandOverrides::default())
    }

    #[test]
    fn test_dry_run_directive() {
        let src = "#!/bin/sh\n# Vacuum large tables\n# dry-run: --check\nvacuumdb --all\n";
        let inspection = adapter().inspect(Path::new("vacuum.sh"), src).unwrap();
        assert!(inspection.supports_dry_run);
        assert_eq!(inspection.attributes["dry_run_flag"], "--check");
        assert_eq!(inspection.documentation.as_deref(), Some("Vacuum large tables"));
        assert_eq!(
            inspection.entry_points.get(&EntryPoint::Run),
            Some(&EntryTarget::File(Path::new("vacuum.sh").to_path_buf()))
        );
    }

    #[test]
    fn test_without_directive_no_dry_run() {
        let inspection = adapter()
            .inspect(Path::new("reindex.sql"), "REINDEX DATABASE app;\n")
            .unwrap();
        assert!(!inspection.supports_dry_run);
    }

    #[test]
    fn test_structure_errors() {
        assert_eq!(
            adapter().inspect(Path::new("empty.sh"), "#!/bin/sh\n# todo\n").unwrap_err(),
            AnalysisFailureReason::EmptyContent
        );
        assert!(matches!(
            adapter().inspect(Path::new("broken.py"), "x = (\n").unwrap_err(),
            AnalysisFailureReason::Unparseable(_)
        ));
    }

    #[test]
    fn test_accepts_scripts_but_not_companions() {
        assert!(adapter().accepts(Path::new("rotate.sh")));
        assert!(adapter().accepts(Path::new("purge.py")));
        assert!(!adapter().accepts(Path::new("rotate.rollback.sh")));
        assert!(!adapter().accepts(Path::new("README.md")));
    }
}
