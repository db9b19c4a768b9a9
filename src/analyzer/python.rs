//! Static outline of Python sources
//!
//! Migration modules are never imported during discovery. Instead the source
//! is split into logical lines (strings, comments, bracket nesting and
//! backslash continuations understood) and the top-level statements are
//! classified: definitions, imports and assignments are inert, anything else
//! runs at import time.

/// One logical line of source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    pub indent: usize,
    pub line: usize,
    pub text: String,
}

/// A top-level `def`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    /// Logical lines of the body, comments removed
    pub body: Vec<String>,
}

impl FunctionDef {
    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|p| p == name)
    }

    /// Body does nothing beyond `pass`, `...` or a docstring
    pub fn is_trivial(&self) -> bool {
        self.body
            .iter()
            .all(|line| line == "pass" || line == "..." || string_literal(line).is_some())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleOutline {
    pub docstring: Option<String>,
    pub functions: Vec<FunctionDef>,
    /// Top-level statements executed on import, as `(line, text)`
    pub side_effects: Vec<(usize, String)>,
    /// Top-level logical lines in source order
    pub top_level: Vec<LogicalLine>,
}

impl ModuleOutline {
    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.top_level.is_empty()
    }
}

/// Build the outline of a module
///
/// # Errors
/// Returns a description of the first unterminated string or unbalanced bracket
pub fn outline(content: &str) -> Result<ModuleOutline, String> {
    let lines = logical_lines(content)?;
    let mut outline = ModuleOutline::default();

    for (index, line) in lines.iter().enumerate() {
        if line.indent > 0 {
            continue;
        }
        outline.top_level.push(line.clone());

        if index == 0 {
            if let Some(doc) = string_literal(&line.text) {
                outline.docstring = Some(dedent(&doc)).filter(|d| !d.is_empty());
                continue;
            }
        }

        if let Some(mut def) = parse_def(&line.text) {
            def.body.extend(
                lines[index + 1..]
                    .iter()
                    .take_while(|l| l.indent > 0)
                    .map(|l| l.text.clone()),
            );
            outline.functions.push(def);
            continue;
        }

        if !is_inert(&line.text) {
            outline.side_effects.push((line.line, line.text.clone()));
        }
    }

    Ok(outline)
}

/// Split source into logical lines
///
/// # Errors
/// Returns a description of the first lexical error
pub fn logical_lines(content: &str) -> Result<Vec<LogicalLine>, String> {
    let chars: Vec<char> = content.chars().collect();
    let mut lines = Vec::new();
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut buffer = String::new();
    let mut indent = 0;
    let mut start_line = 1;
    let mut line_no = 1;
    let mut at_line_start = true;
    let mut i = 0;

    while i < chars.len() {
        if at_line_start {
            let mut width = 0;
            while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
                width += 1;
                i += 1;
            }
            at_line_start = false;
            indent = width;
            start_line = line_no;
            continue;
        }

        let c = chars[i];
        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '\'' | '"' => {
                let end = scan_string(&chars, i, &mut line_no)?;
                buffer.extend(&chars[i..end]);
                i = end;
            }
            '(' | '[' | '{' => {
                brackets.push((c, line_no));
                buffer.push(c);
                i += 1;
            }
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match brackets.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => return Err(format!("unbalanced '{}' on line {}", c, line_no)),
                }
                buffer.push(c);
                i += 1;
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                buffer.push(' ');
                line_no += 1;
                i += 2;
            }
            '\n' => {
                line_no += 1;
                i += 1;
                if brackets.is_empty() {
                    flush(&mut lines, &mut buffer, indent, start_line);
                    at_line_start = true;
                } else {
                    buffer.push(' ');
                }
            }
            _ => {
                buffer.push(c);
                i += 1;
            }
        }
    }

    if let Some((open, line)) = brackets.last() {
        return Err(format!("unclosed '{}' opened on line {}", open, line));
    }
    flush(&mut lines, &mut buffer, indent, start_line);
    Ok(lines)
}

fn flush(lines: &mut Vec<LogicalLine>, buffer: &mut String, indent: usize, line: usize) {
    let text = buffer.trim();
    if !text.is_empty() {
        lines.push(LogicalLine {
            indent,
            line,
            text: text.to_string(),
        });
    }
    buffer.clear();
}

/// Scan a string literal starting at `start`; returns the index after it
fn scan_string(chars: &[char], start: usize, line_no: &mut usize) -> Result<usize, String> {
    let quote = chars[start];
    let opened_on = *line_no;
    let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
    let mut i = if triple { start + 3 } else { start + 1 };

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if chars.get(i + 1) == Some(&'\n') {
                    *line_no += 1;
                }
                i += 2;
                continue;
            }
            '\n' if !triple => {
                return Err(format!("unterminated string on line {}", opened_on));
            }
            '\n' => *line_no += 1,
            c if c == quote => {
                if !triple {
                    return Ok(i + 1);
                }
                if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
                    return Ok(i + 3);
                }
            }
            _ => {}
        }
        i += 1;
    }

    Err(format!("unterminated string on line {}", opened_on))
}

/// Contents of a logical line that is a lone string literal
pub fn string_literal(text: &str) -> Option<String> {
    let body = text.trim_start_matches(|c: char| "rRuUbBfF".contains(c));
    if body.len() + 2 < text.len() {
        return None;
    }
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if body.len() >= 2 * quote.len() && body.starts_with(quote) && body.ends_with(quote) {
            let inner = &body[quote.len()..body.len() - quote.len()];
            // two adjacent literals are an expression, not a docstring
            if quote.len() == 1 && inner.contains(quote) {
                return None;
            }
            return Some(inner.to_string());
        }
    }
    None
}

fn dedent(doc: &str) -> String {
    let mut lines = doc.lines();
    let first = lines.next().unwrap_or("").trim();
    let rest: Vec<&str> = lines.collect();
    let margin = rest
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut out = vec![first.to_string()];
    out.extend(
        rest.iter()
            .map(|l| l.get(margin..).unwrap_or("").trim_end().to_string()),
    );
    out.join("\n").trim().to_string()
}

fn parse_def(text: &str) -> Option<FunctionDef> {
    let rest = text.strip_prefix("async ").map(str::trim_start).unwrap_or(text);
    let rest = rest.strip_prefix("def ")?.trim_start();

    let name_len = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let name = &rest[..name_len];
    if name.is_empty() {
        return None;
    }

    let after_name = rest[name_len..].trim_start();
    let params_src = after_name.strip_prefix('(')?;
    let close = matching_paren(params_src)?;
    let params = split_top_level(&params_src[..close])
        .into_iter()
        .filter_map(|param| {
            let param = param.trim().trim_start_matches('*');
            let end = param.find([':', '=']).unwrap_or(param.len());
            let name = param[..end].trim();
            (!name.is_empty() && name != "/").then(|| name.to_string())
        })
        .collect();

    // one-line bodies: `def f(): pass`
    let mut body = Vec::new();
    let tail = &params_src[close + 1..];
    if let Some(colon) = tail.find(':') {
        let inline = tail[colon + 1..].trim();
        if !inline.is_empty() {
            body.push(inline.to_string());
        }
    }

    Some(FunctionDef {
        name: name.to_string(),
        params,
        body,
    })
}

fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' if depth == 0 => return Some(i),
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    None
}

fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Whether a top-level statement is free of import-time effects
fn is_inert(text: &str) -> bool {
    let keyword = text
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .next()
        .unwrap_or("");

    match keyword {
        "import" | "from" | "class" | "pass" | "try" | "except" | "finally" | "else" | "elif" => {
            true
        }
        "if" => ["__name__", "TYPE_CHECKING", "sys.version_info"]
            .iter()
            .any(|guard| text.contains(guard)),
        _ => {
            text.starts_with('@')
                || text == "..."
                || string_literal(text).is_some()
                || is_assignment(text)
        }
    }
}

fn is_assignment(text: &str) -> bool {
    let chars: Vec<char> = text.chars().collect();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == '\\' {
                i += 1;
            } else if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            '=' if depth == 0 => {
                let prev = if i > 0 { chars[i - 1] } else { ' ' };
                let next = chars.get(i + 1).copied().unwrap_or(' ');
                if next != '=' && !"=!<>".contains(prev) {
                    return true;
                }
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#""""Add slug column to restaurants.

    Backfills existing rows.
    """
import os
from app.db import connection

BATCH_SIZE = 500
LABELS = {
    "a": 1,
    "b": (2, 3),
}


def run_migration(dry_run=False):
    with connection() as conn:
        conn.execute("ALTER TABLE restaurants ADD COLUMN slug TEXT")  # comment ) ]


def rollback_migration():
    pass


async def verify_migration(*, timeout: int = 5) -> bool:
    return True


if __name__ == "__main__":
    run_migration()
"#;

    #[test]
    fn test_outline_detects_functions_and_docstring() {
        let outline = outline(FULL).unwrap();
        assert_eq!(
            outline.docstring.as_deref(),
            Some("Add slug column to restaurants.\n\nBackfills existing rows.")
        );
        let names: Vec<&str> = outline.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["run_migration", "rollback_migration", "verify_migration"]);
        assert!(outline.function("run_migration").unwrap().has_param("dry_run"));
        assert!(outline.function("verify_migration").unwrap().has_param("timeout"));
        assert!(outline.function("rollback_migration").unwrap().is_trivial());
        assert!(!outline.function("run_migration").unwrap().is_trivial());
        assert!(outline.side_effects.is_empty(), "{:?}", outline.side_effects);
    }

    #[test]
    fn test_top_level_call_is_side_effect() {
        let src = "import requests\nrequests.post('https://hooks.example/notify')\n\ndef run_migration():\n    pass\n";
        let outline = outline(src).unwrap();
        assert_eq!(outline.side_effects.len(), 1);
        assert_eq!(outline.side_effects[0].0, 2);
    }

    #[test]
    fn test_comparison_is_not_assignment() {
        assert!(!is_assignment("x == 1"));
        assert!(!is_assignment("print(a=1)"));
        assert!(is_assignment("x: int = 1"));
        assert!(is_assignment("counter += 1"));
        assert!(!is_assignment("check('a=b')"));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let err = outline("def run_migration():\n    x = 'oops\n").unwrap_err();
        assert!(err.contains("unterminated string on line 2"), "{}", err);

        let err = outline("\"\"\"never closed\n").unwrap_err();
        assert!(err.contains("unterminated string"));
    }

    #[test]
    fn test_unbalanced_brackets_are_errors() {
        let err = outline("def run_migration(:\n    pass\n").unwrap_err();
        assert!(err.contains("unclosed '('"), "{}", err);

        let err = outline("x = [1, 2)\n").unwrap_err();
        assert!(err.contains("unbalanced ')'"), "{}", err);
    }

    #[test]
    fn test_brackets_inside_strings_and_comments_ignored() {
        let src = "X = '(['  # ]]]\nY = \"\"\"\n)\n\"\"\"\n";
        let outline = outline(src).unwrap();
        assert_eq!(outline.top_level.len(), 2);
    }

    #[test]
    fn test_escaped_quote_in_default_does_not_split_params() {
        assert_eq!(split_top_level(r"sep='\',', dry_run=False"), vec![r"sep='\','", " dry_run=False"]);

        let def = parse_def(r"def run_migration(sep='\'', dry_run=False):").unwrap();
        assert_eq!(def.params, vec!["sep", "dry_run"]);
        assert!(def.has_param("dry_run"));
    }

    #[test]
    fn test_one_line_def_body() {
        let outline = outline("def downgrade(): pass\n").unwrap();
        let def = outline.function("downgrade").unwrap();
        assert_eq!(def.body, vec!["pass".to_string()]);
        assert!(def.is_trivial());
    }

    #[test]
    fn test_string_literal_detection() {
        assert_eq!(string_literal("'''doc'''").as_deref(), Some("doc"));
        assert_eq!(string_literal("r\"raw\"").as_deref(), Some("raw"));
        assert!(string_literal("'a' + 'b'").is_none());
        assert!(string_literal("name").is_none());
    }
}
