//! Script-based unit adapter (Python and shell)
//!
//! A script unit exposes lifecycle functions named `run_migration`,
//! `rollback_migration` and `verify_migration`. Detection is purely textual
//! (see [`super::python`] and [`super::shell`]); nothing is imported or
//! sourced during discovery. At execution time a small launcher loads the
//! file and calls the requested function.

use std::collections::BTreeMap;
use std::path::Path;

use super::{has_extension, python, shell, Inspection, UnitAdapter};
use crate::config::CommandOverrides;
use crate::domain::{Category, EntryPoint, EntryTarget, MigrationDescriptor};
use crate::error::AnalysisFailureReason;
use crate::infrastructure::CommandTemplate;
use crate::tools::tools;

/// Flag passed to entry points that accept a no-mutation run
pub const DRY_RUN_FLAG: &str = "--dry-run";

/// Loads the module without triggering its `__main__` guard and calls one function.
/// A `False` return value counts as failure.
const PYTHON_LAUNCHER: &str = "import runpy, sys
ns = runpy.run_path(sys.argv[1], run_name=\"__migration__\")
fn = ns[sys.argv[2]]
ok = fn(dry_run=True) if \"--dry-run\" in sys.argv[3:] else fn()
sys.exit(1 if ok is False else 0)";

/// Sources the script and calls one function with the remaining arguments
const SHELL_LAUNCHER: &str = "f=$1; e=$2; shift 2; . \"$f\"; \"$e\" \"$@\"";

const MAX_REPORTED_SIDE_EFFECTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    Shell,
}

impl Language {
    fn of(path: &Path) -> Option<Self> {
        if has_extension(path, &["py"]) {
            Some(Self::Python)
        } else if has_extension(path, &["sh", "bash"]) {
            Some(Self::Shell)
        } else {
            None
        }
    }
}

/// Functions found in a script, independent of language
struct Scan {
    documentation: Option<String>,
    functions: BTreeMap<String, bool>,
    side_effects: Vec<(usize, String)>,
}

pub struct ScriptAdapter {
    commands: CommandOverrides,
}

impl ScriptAdapter {
    pub fn new(commands: CommandOverrides) -> Self {
        Self { commands }
    }

    fn scan(language: Language, content: &str) -> Result<Scan, AnalysisFailureReason> {
        match language {
            Language::Python => {
                let outline = python::outline(content).map_err(AnalysisFailureReason::Unparseable)?;
                if outline.is_empty() {
                    return Err(AnalysisFailureReason::EmptyContent);
                }
                let documentation = outline.docstring.clone().or_else(|| {
                    super::header::parse(content, super::header::CommentSyntax::Hash).documentation
                });
                Ok(Scan {
                    documentation,
                    functions: outline
                        .functions
                        .iter()
                        .map(|f| (f.name.clone(), f.has_param("dry_run")))
                        .collect(),
                    side_effects: outline.side_effects,
                })
            }
            Language::Shell => {
                let outline = shell::outline(content).map_err(AnalysisFailureReason::Unparseable)?;
                if !outline.has_content {
                    return Err(AnalysisFailureReason::EmptyContent);
                }
                Ok(Scan {
                    documentation: super::header::parse(content, super::header::CommentSyntax::Hash)
                        .documentation,
                    functions: outline
                        .functions
                        .iter()
                        .map(|f| {
                            let dry_run = f.body.contains(DRY_RUN_FLAG) || f.body.contains("DRY_RUN");
                            (f.name.clone(), dry_run)
                        })
                        .collect(),
                    side_effects: outline.side_effects,
                })
            }
        }
    }

    fn launcher(language: Language) -> CommandTemplate {
        match language {
            Language::Python => CommandTemplate::new([tools::PYTHON, "-c", PYTHON_LAUNCHER, "{path}", "{entry}"]),
            Language::Shell => {
                CommandTemplate::new([tools::SH, "-c", SHELL_LAUNCHER, "migrate", "{path}", "{entry}"])
            }
        }
    }

    fn interpreter(language: Language) -> CommandTemplate {
        match language {
            Language::Python => CommandTemplate::new([tools::PYTHON, "{path}"]),
            Language::Shell => CommandTemplate::new([tools::SH, "{path}"]),
        }
    }
}

impl UnitAdapter for ScriptAdapter {
    fn category(&self) -> Category {
        Category::Script
    }

    fn accepts(&self, path: &Path) -> bool {
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        Language::of(path).is_some() && !file_name.starts_with("__")
    }

    fn inspect(&self, path: &Path, content: &str) -> Result<Inspection, AnalysisFailureReason> {
        let language = Language::of(path)
            .ok_or_else(|| AnalysisFailureReason::Unparseable("unsupported script type".to_string()))?;
        let scan = Self::scan(language, content)?;

        let mut inspection = Inspection::default();
        inspection.documentation = scan.documentation;

        if !scan.functions.contains_key(EntryPoint::Run.function_name()) {
            inspection.entry_points.insert(EntryPoint::Run, EntryTarget::File(path.to_path_buf()));
            inspection.warnings.push(format!(
                "no {}() found; the script is executed as a whole",
                EntryPoint::Run.function_name()
            ));
            return Ok(inspection);
        }

        if !scan.side_effects.is_empty() {
            let shown: Vec<String> = scan
                .side_effects
                .iter()
                .take(MAX_REPORTED_SIDE_EFFECTS)
                .map(|(line, text)| format!("line {}: {}", line, truncate(text, 60)))
                .collect();
            inspection.warnings.push(format!(
                "import-time side effects ({}); only run is trusted",
                shown.join("; ")
            ));
            inspection.entry_points.insert(
                EntryPoint::Run,
                EntryTarget::Function(EntryPoint::Run.function_name().to_string()),
            );
            return Ok(inspection);
        }

        for entry in [EntryPoint::Run, EntryPoint::Rollback, EntryPoint::Verify] {
            if scan.functions.contains_key(entry.function_name()) {
                inspection
                    .entry_points
                    .insert(entry, EntryTarget::Function(entry.function_name().to_string()));
            }
        }
        inspection.supports_dry_run = scan
            .functions
            .get(EntryPoint::Run.function_name())
            .copied()
            .unwrap_or(false)
            || self.commands.dry_run.is_some();

        Ok(inspection)
    }

    fn command(&self, unit: &MigrationDescriptor, entry: EntryPoint) -> CommandTemplate {
        if let Some(template) = self.commands.for_entry(entry) {
            return template.clone();
        }
        let language = Language::of(&unit.source_path).unwrap_or(Language::Shell);
        match unit.entry(entry) {
            Some(EntryTarget::Function(_)) => Self::launcher(language),
            _ => Self::interpreter(language),
        }
    }

    fn dry_run_command(&self, unit: &MigrationDescriptor) -> Option<CommandTemplate> {
        if let Some(template) = &self.commands.dry_run {
            return Some(template.clone());
        }
        if !unit.supports_dry_run {
            return None;
        }
        let mut template = self.command(unit, EntryPoint::Run);
        template.0.push(DRY_RUN_FLAG.to_string());
        Some(template)
    }

    fn validate_structure(&self, path: &Path, content: &str) -> Result<String, String> {
        let language = Language::of(path).ok_or_else(|| "unsupported script type".to_string())?;
        let scan = Self::scan(language, content).map_err(|e| e.to_string())?;
        Ok(format!("{} top-level function(s) parsed", scan.functions.len()))
    }
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Capability;
    use crate::domain::migration::capabilities_for;

    fn inspect(name: &str, content: &str) -> Result<Inspection, AnalysisFailureReason> {
        ScriptAdapter::new(CommandOverrides::default()).inspect(Path::new(name), content)
    }

    #[test]
    fn test_all_entry_points_detected() {
        let src = "\"\"\"Seed cuisines.\"\"\"\n\ndef run_migration(dry_run=False):\n    return True\n\ndef rollback_migration():\n    return True\n\ndef verify_migration():\n    return True\n";
        let inspection = inspect("001_cuisines.py", src).unwrap();
        let caps = capabilities_for(&inspection.entry_points);
        assert_eq!(caps.len(), 3);
        assert!(inspection.supports_dry_run);
        assert_eq!(inspection.documentation.as_deref(), Some("Seed cuisines."));
        assert!(inspection.warnings.is_empty());
    }

    #[test]
    fn test_run_only() {
        let inspection = inspect("002.py", "def run_migration():\n    pass\n").unwrap();
        assert_eq!(
            capabilities_for(&inspection.entry_points).into_iter().collect::<Vec<_>>(),
            vec![Capability::Runnable]
        );
        assert!(!inspection.supports_dry_run);
    }

    #[test]
    fn test_side_effects_restrict_to_runnable() {
        let src = "print('connecting')\n\ndef run_migration():\n    pass\n\ndef rollback_migration():\n    pass\n";
        let inspection = inspect("003.py", src).unwrap();
        assert_eq!(inspection.entry_points.len(), 1);
        assert!(inspection.warnings[0].contains("line 1: print('connecting')"));
    }

    #[test]
    fn test_standalone_script_runs_whole_file() {
        let inspection = inspect("cleanup.sh", "#!/bin/sh\n# Purge temp rows\npsql -c 'DELETE FROM tmp'\n").unwrap();
        assert_eq!(
            inspection.entry_points.get(&EntryPoint::Run),
            Some(&EntryTarget::File(Path::new("cleanup.sh").to_path_buf()))
        );
        assert_eq!(inspection.documentation.as_deref(), Some("Purge temp rows"));
        assert_eq!(inspection.warnings.len(), 1);
    }

    #[test]
    fn test_shell_dry_run_detection() {
        let src = "run_migration() {\n  if [ \"$1\" = \"--dry-run\" ]; then return 0; fi\n}\nrollback_migration() {\n  :\n}\n";
        let inspection = inspect("004.sh", src).unwrap();
        assert!(inspection.supports_dry_run);
        assert!(inspection.entry_points.contains_key(&EntryPoint::Rollback));
    }

    #[test]
    fn test_unparseable_script_fails() {
        let err = inspect("005.py", "def run_migration(:\n    pass\n").unwrap_err();
        assert!(matches!(err, AnalysisFailureReason::Unparseable(_)));
    }

    #[test]
    fn test_empty_script_is_empty_content() {
        assert_eq!(
            inspect("006.py", "# nothing yet\n").unwrap_err(),
            AnalysisFailureReason::EmptyContent
        );
    }
}
