//! Leading comment blocks: documentation and header directives
//!
//! ```text
//! -- Add restaurant opening hours
//! --
//! -- rollback: 004_opening_hours.down.sql
//! -- verify: 004_opening_hours.verify.sql
//! ```
//!
//! Directive lines (`rollback:`, `verify:`, `dry-run:`) are pulled out of the
//! block; what remains is the unit's documentation.

use std::collections::BTreeMap;

/// Comment syntax of a unit's language
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentSyntax {
    /// `#` line comments (Python, shell)
    Hash,
    /// `--` line comments or a leading `/* */` block (SQL)
    Sql,
}

impl CommentSyntax {
    pub fn for_extension(ext: &str) -> Self {
        if ext.eq_ignore_ascii_case("sql") {
            Self::Sql
        } else {
            Self::Hash
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub documentation: Option<String>,
    /// Normalized directive key (`rollback`, `verify`, `dry-run`) to value
    pub directives: BTreeMap<String, String>,
}

impl Header {
    pub fn directive(&self, key: &str) -> Option<&str> {
        self.directives.get(key).map(String::as_str)
    }
}

const DIRECTIVES: [&str; 3] = ["rollback", "verify", "dry-run"];

/// Parse the first contiguous comment block of a file
pub fn parse(content: &str, syntax: CommentSyntax) -> Header {
    let block = match syntax {
        CommentSyntax::Hash => hash_block(content),
        CommentSyntax::Sql => sql_block(content),
    };

    let mut header = Header::default();
    let mut doc_lines = Vec::new();
    for line in block {
        match directive(&line) {
            Some((key, value)) => {
                header.directives.entry(key).or_insert(value);
            }
            None => doc_lines.push(line),
        }
    }

    let documentation = doc_lines.join("\n").trim().to_string();
    if !documentation.is_empty() {
        header.documentation = Some(documentation);
    }
    header
}

fn hash_block(content: &str) -> Vec<String> {
    let mut lines = content.lines().peekable();

    if lines.peek().is_some_and(|l| l.starts_with("#!")) {
        lines.next();
    }
    while lines.peek().is_some_and(|l| l.trim().is_empty()) {
        lines.next();
    }

    let mut block = Vec::new();
    for line in lines {
        let trimmed = line.trim_start();
        let Some(text) = trimmed.strip_prefix('#') else {
            break;
        };
        // encoding cookies and editor modelines are not documentation
        if text.contains("-*-") || text.trim_start().starts_with("vim:") {
            continue;
        }
        block.push(strip_one_space(text).trim_end().to_string());
    }
    block
}

fn sql_block(content: &str) -> Vec<String> {
    let trimmed = content.trim_start();

    if let Some(rest) = trimmed.strip_prefix("/*") {
        let body = match rest.find("*/") {
            Some(end) => &rest[..end],
            None => return Vec::new(),
        };
        return body
            .lines()
            .map(|line| {
                let line = line.trim();
                let line = line.strip_prefix('*').unwrap_or(line);
                strip_one_space(line).trim_end().to_string()
            })
            .collect();
    }

    trimmed
        .lines()
        .map_while(|line| line.trim_start().strip_prefix("--"))
        .map(|text| strip_one_space(text).trim_end().to_string())
        .collect()
}

fn strip_one_space(text: &str) -> &str {
    text.strip_prefix(' ').unwrap_or(text)
}

fn directive(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim().to_ascii_lowercase().replace('_', "-");
    let value = value.trim();
    if value.is_empty() || !DIRECTIVES.contains(&key.as_str()) {
        return None;
    }
    Some((key, value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_header_with_directives() {
        let sql = "-- Add opening hours to restaurants\n--\n-- Rollback: 004.down.sql\n-- verify: 004.verify.sql\nALTER TABLE restaurants ADD COLUMN hours TEXT;\n";
        let header = parse(sql, CommentSyntax::Sql);
        assert_eq!(
            header.documentation.as_deref(),
            Some("Add opening hours to restaurants")
        );
        assert_eq!(header.directive("rollback"), Some("004.down.sql"));
        assert_eq!(header.directive("verify"), Some("004.verify.sql"));
    }

    #[test]
    fn test_sql_block_comment_header() {
        let sql = "/*\n * Backfill slugs\n * dry-run: --check\n */\nUPDATE restaurants SET slug = lower(name);\n";
        let header = parse(sql, CommentSyntax::Sql);
        assert_eq!(header.documentation.as_deref(), Some("Backfill slugs"));
        assert_eq!(header.directive("dry-run"), Some("--check"));
    }

    #[test]
    fn test_hash_header_skips_shebang() {
        let sh = "#!/usr/bin/env bash\n# Rotate stale sessions\n# dry_run: --dry-run\n\nset -e\n";
        let header = parse(sh, CommentSyntax::Hash);
        assert_eq!(header.documentation.as_deref(), Some("Rotate stale sessions"));
        assert_eq!(header.directive("dry-run"), Some("--dry-run"));
    }

    #[test]
    fn test_no_leading_comment_yields_none() {
        let header = parse("SELECT 1;\n-- trailing\n", CommentSyntax::Sql);
        assert!(header.documentation.is_none());
        assert!(header.directives.is_empty());
    }

    #[test]
    fn test_prose_with_colon_is_documentation() {
        let header = parse("# Note: run after deploy\n", CommentSyntax::Hash);
        assert_eq!(header.documentation.as_deref(), Some("Note: run after deploy"));
    }
}
