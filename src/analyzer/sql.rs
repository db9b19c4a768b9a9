//! Declarative SQL unit adapter
//!
//! A `.sql` file is one unit. It is runnable as a whole; rollback and verify
//! are available only when the header names companion files:
//!
//! ```sql
//! -- Add opening hours
//! -- rollback: 004_opening_hours.down.sql
//! -- verify: 004_opening_hours.verify.sql
//! ALTER TABLE restaurants ADD COLUMN opening_hours JSONB;
//! ```
//!
//! Companion files (`*.down.sql`, `*.rollback.sql`, `*.verify.sql`) are never
//! discovered as units of their own.

use std::path::Path;

use super::header::{self, CommentSyntax};
use super::{has_extension, is_companion_file, resolve_companions, Inspection, UnitAdapter};
use crate::config::CommandOverrides;
use crate::domain::{Category, EntryPoint, MigrationDescriptor};
use crate::error::AnalysisFailureReason;
use crate::infrastructure::CommandTemplate;
use crate::tools::tools;

/// `psql` invocation used when no override is configured
pub fn default_run_template() -> CommandTemplate {
    CommandTemplate::new([
        tools::PSQL,
        "{env:DATABASE_URL}",
        "--set",
        "ON_ERROR_STOP=1",
        "--single-transaction",
        "--file",
        "{path}",
    ])
}

pub struct SqlAdapter {
    commands: CommandOverrides,
}

impl SqlAdapter {
    pub fn new(commands: CommandOverrides) -> Self {
        Self { commands }
    }
}

impl UnitAdapter for SqlAdapter {
    fn category(&self) -> Category {
        Category::Sql
    }

    fn accepts(&self, path: &Path) -> bool {
        has_extension(path, &["sql"]) && !is_companion_file(path)
    }

    fn inspect(&self, path: &Path, content: &str) -> Result<Inspection, AnalysisFailureReason> {
        let statements = split_statements(content).map_err(AnalysisFailureReason::Unparseable)?;
        if statements.is_empty() {
            return Err(AnalysisFailureReason::EmptyContent);
        }

        let header = header::parse(content, CommentSyntax::Sql);
        let mut inspection = Inspection::whole_file(path);
        inspection.documentation = header.documentation.clone();
        inspection
            .attributes
            .insert("statements".to_string(), statements.len().to_string());
        resolve_companions(path, &header, &mut inspection);

        if self.commands.dry_run.is_some() {
            inspection.supports_dry_run = true;
        }
        Ok(inspection)
    }

    fn command(&self, _unit: &MigrationDescriptor, entry: EntryPoint) -> CommandTemplate {
        self.commands
            .for_entry(entry)
            .or(self.commands.run.as_ref())
            .cloned()
            .unwrap_or_else(default_run_template)
    }

    fn dry_run_command(&self, _unit: &MigrationDescriptor) -> Option<CommandTemplate> {
        self.commands.dry_run.clone()
    }

    fn validate_structure(&self, _path: &Path, content: &str) -> Result<String, String> {
        let statements = split_statements(content)?;
        if statements.is_empty() {
            return Err("no SQL statements".to_string());
        }
        Ok(format!("{} statement(s) parsed", statements.len()))
    }
}

/// Split SQL text into statements
///
/// Understands single and double quotes, `--` and `/* */` comments,
/// dollar-quoted bodies (`$$ ... $$`, `$fn$ ... $fn$`) and parentheses.
/// Comments are dropped from the returned statements.
///
/// # Errors
/// Returns a description of unterminated literals, comments or parentheses
pub fn split_statements(sql: &str) -> Result<Vec<String>, String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut parens: usize = 0;
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                line += 1;
                current.push(c);
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let opened = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => return Err(format!("unterminated block comment opened on line {}", opened)),
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 2;
                            break;
                        }
                        Some('\n') => line += 1,
                        Some(_) => {}
                    }
                    i += 1;
                }
                current.push(' ');
            }
            '\'' | '"' => {
                let opened = line;
                current.push(c);
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(format!("unterminated quoted literal opened on line {}", opened))
                        }
                        Some(&q) if q == c => {
                            current.push(q);
                            i += 1;
                            // doubled quote is an escaped quote
                            if chars.get(i) == Some(&c) {
                                current.push(c);
                                i += 1;
                                continue;
                            }
                            break;
                        }
                        Some(&other) => {
                            if other == '\n' {
                                line += 1;
                            }
                            current.push(other);
                            i += 1;
                        }
                    }
                }
            }
            '$' => match dollar_tag(&chars, i) {
                Some(tag) => {
                    let opened = line;
                    let tag_len = tag.chars().count();
                    current.push_str(&tag);
                    i += tag_len;
                    loop {
                        if i >= chars.len() {
                            return Err(format!("unterminated dollar-quoted body {} opened on line {}", tag, opened));
                        }
                        if chars[i] == '$' && starts_with(&chars, i, &tag) {
                            current.push_str(&tag);
                            i += tag_len;
                            break;
                        }
                        if chars[i] == '\n' {
                            line += 1;
                        }
                        current.push(chars[i]);
                        i += 1;
                    }
                }
                None => {
                    current.push(c);
                    i += 1;
                }
            },
            '(' => {
                parens += 1;
                current.push(c);
                i += 1;
            }
            ')' => {
                if parens == 0 {
                    return Err(format!("unbalanced ')' on line {}", line));
                }
                parens -= 1;
                current.push(c);
                i += 1;
            }
            ';' if parens == 0 => {
                push_statement(&mut statements, &mut current);
                i += 1;
            }
            _ => {
                current.push(c);
                i += 1;
            }
        }
    }

    if parens > 0 {
        return Err("unclosed '(' at end of file".to_string());
    }
    push_statement(&mut statements, &mut current);
    Ok(statements)
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}

/// `$tag$` opening at `start`, if any
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    let mut i = start + 1;
    while let Some(c) = chars.get(i) {
        match c {
            '$' => return Some(chars[start..=i].iter().collect()),
            c if c.is_alphanumeric() || *c == '_' => {
                // positional parameters like $1 are not tags
                if i == start + 1 && c.is_ascii_digit() {
                    return None;
                }
                i += 1;
            }
            _ => return None,
        }
    }
    None
}

fn starts_with(chars: &[char], at: usize, tag: &str) -> bool {
    tag.chars()
        .enumerate()
        .all(|(offset, c)| chars.get(at + offset) == Some(&c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Capability, EntryTarget};

    #[test]
    fn test_split_handles_literals_and_comments() {
        let sql = r#"
-- header; not a statement
CREATE TABLE t (id INT, note TEXT DEFAULT 'a;b');
/* block ; comment */
INSERT INTO t VALUES (1, 'it''s; fine');
CREATE FUNCTION f() RETURNS trigger AS $body$
BEGIN
  PERFORM 1; RETURN NEW;
END;
$body$ LANGUAGE plpgsql;
SELECT $1, $$x;y$$
"#;
        let statements = split_statements(sql).unwrap();
        assert_eq!(statements.len(), 4, "{:#?}", statements);
        assert!(statements[1].contains("'it''s; fine'"));
        assert!(statements[2].contains("PERFORM 1; RETURN NEW;"));
    }

    #[test]
    fn test_comment_only_file_has_no_statements() {
        assert!(split_statements("-- nothing here\n/* still nothing */\n;\n").unwrap().is_empty());
    }

    #[test]
    fn test_unterminated_literal_is_error() {
        let err = split_statements("SELECT 'oops;\n").unwrap_err();
        assert!(err.contains("unterminated quoted literal"), "{}", err);
        assert!(split_statements("SELECT (1;\n").is_err());
        assert!(split_statements("SELECT $a$ body\n").is_err());
    }

    #[test]
    fn test_empty_file_is_empty_content() {
        let adapter = SqlAdapter::new(CommandOverrides::default());
        let err = adapter
            .inspect(Path::new("/m/001.sql"), "-- just a comment\n")
            .unwrap_err();
        assert_eq!(err, AnalysisFailureReason::EmptyContent);
    }

    #[test]
    fn test_companions_add_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let unit = dir.path().join("004_hours.sql");
        std::fs::write(dir.path().join("004_hours.down.sql"), "ALTER TABLE r DROP COLUMN hours;").unwrap();
        let content = "-- Add hours\n-- rollback: 004_hours.down.sql\n-- verify: 004_hours.verify.sql\nALTER TABLE r ADD COLUMN hours TEXT;\n";

        let adapter = SqlAdapter::new(CommandOverrides::default());
        let inspection = adapter.inspect(&unit, content).unwrap();

        assert_eq!(
            inspection.entry_points.get(&EntryPoint::Rollback),
            Some(&EntryTarget::File(dir.path().join("004_hours.down.sql")))
        );
        // declared but missing: warned, not added
        assert!(!inspection.entry_points.contains_key(&EntryPoint::Verify));
        assert!(inspection.warnings.iter().any(|w| w.contains("004_hours.verify.sql")));
        assert!(!inspection.supports_dry_run);

        let caps = crate::domain::migration::capabilities_for(&inspection.entry_points);
        assert!(caps.contains(&Capability::Rollbackable));
    }

    #[test]
    fn test_companion_files_are_not_units() {
        let adapter = SqlAdapter::new(CommandOverrides::default());
        assert!(adapter.accepts(Path::new("/m/004_hours.sql")));
        assert!(!adapter.accepts(Path::new("/m/004_hours.down.sql")));
        assert!(!adapter.accepts(Path::new("/m/004_hours.verify.sql")));
        assert!(!adapter.accepts(Path::new("/m/notes.md")));
    }
}
