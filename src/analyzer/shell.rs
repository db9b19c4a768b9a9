//! Static outline of shell scripts
//!
//! Finds top-level function definitions and top-level commands without
//! running the script. Quotes, comments and here-documents are understood
//! well enough to check that braces balance.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellFunction {
    pub name: String,
    pub body: String,
}

#[derive(Debug, Clone, Default)]
pub struct ShellOutline {
    pub functions: Vec<ShellFunction>,
    /// Top-level commands other than definitions and settings, as `(line, text)`
    pub side_effects: Vec<(usize, String)>,
    /// Any non-comment content at all
    pub has_content: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Quote {
    Single,
    Double,
}

struct OpenFunction {
    name: String,
    body: String,
    opened: bool,
}

/// Build the outline of a script
///
/// # Errors
/// Returns a description of unterminated quotes, here-documents or unbalanced braces
pub fn outline(content: &str) -> Result<ShellOutline, String> {
    let mut outline = ShellOutline::default();
    let mut depth: i64 = 0;
    let mut quote: Option<(Quote, usize)> = None;
    let mut heredoc: Option<(String, usize)> = None;
    let mut current: Option<OpenFunction> = None;

    for (index, line) in content.lines().enumerate() {
        let line_no = index + 1;

        if let Some((terminator, _)) = &heredoc {
            if line.trim_start_matches('\t') == terminator {
                heredoc = None;
            }
            if let Some(function) = current.as_mut() {
                function.body.push_str(line);
                function.body.push('\n');
            }
            continue;
        }

        let statement_start = depth == 0 && quote.is_none() && current.is_none();
        let code = strip_comment(line, quote.map(|(q, _)| q));
        if !code.trim().is_empty() {
            outline.has_content = true;
        }

        if statement_start {
            let text = code.trim();
            if let Some(name) = function_name(text) {
                current = Some(OpenFunction {
                    name,
                    body: String::new(),
                    opened: false,
                });
            } else if !text.is_empty() && !is_inert(text) {
                outline.side_effects.push((line_no, text.to_string()));
            }
        }

        let scan = scan_line(&code, &mut quote, line_no)?;
        depth += scan.brace_delta;
        if depth < 0 {
            return Err(format!("unbalanced '}}' on line {}", line_no));
        }
        if let Some(terminator) = scan.heredoc {
            heredoc = Some((terminator, line_no));
        }

        if let Some(function) = current.as_mut() {
            function.body.push_str(line);
            function.body.push('\n');
            if scan.opened_brace {
                function.opened = true;
            }
            if function.opened && depth == 0 && quote.is_none() {
                if let Some(done) = current.take() {
                    outline.functions.push(ShellFunction {
                        name: done.name,
                        body: done.body,
                    });
                }
            }
        }
    }

    if let Some((_, line)) = quote {
        return Err(format!("unterminated quote opened on line {}", line));
    }
    if let Some((terminator, line)) = heredoc {
        return Err(format!(
            "here-document opened on line {} is missing terminator '{}'",
            line, terminator
        ));
    }
    if depth != 0 {
        return Err("unbalanced '{' at end of file".to_string());
    }
    if let Some(function) = current {
        return Err(format!("function '{}' has no body", function.name));
    }

    Ok(outline)
}

struct LineScan {
    brace_delta: i64,
    opened_brace: bool,
    heredoc: Option<String>,
}

fn scan_line(code: &str, quote: &mut Option<(Quote, usize)>, line_no: usize) -> Result<LineScan, String> {
    let chars: Vec<char> = code.chars().collect();
    let mut scan = LineScan {
        brace_delta: 0,
        opened_brace: false,
        heredoc: None,
    };
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match *quote {
            Some((Quote::Single, _)) => {
                if c == '\'' {
                    *quote = None;
                }
            }
            Some((Quote::Double, _)) => match c {
                '\\' => i += 1,
                '"' => *quote = None,
                _ => {}
            },
            None => match c {
                '\\' => i += 1,
                '\'' => *quote = Some((Quote::Single, line_no)),
                '"' => *quote = Some((Quote::Double, line_no)),
                '{' => {
                    scan.brace_delta += 1;
                    scan.opened_brace = true;
                }
                '}' => scan.brace_delta -= 1,
                '<' if chars.get(i + 1) == Some(&'<') && chars.get(i + 2) != Some(&'<') => {
                    let (terminator, next) = heredoc_terminator(&chars, i + 2);
                    if let Some(terminator) = terminator {
                        scan.heredoc = Some(terminator);
                    }
                    i = next;
                    continue;
                }
                _ => {}
            },
        }
        i += 1;
    }

    Ok(scan)
}

fn heredoc_terminator(chars: &[char], mut i: usize) -> (Option<String>, usize) {
    if chars.get(i) == Some(&'-') {
        i += 1;
    }
    while chars.get(i).is_some_and(|c| *c == ' ') {
        i += 1;
    }
    let quoted = matches!(chars.get(i), Some('\'') | Some('"'));
    if quoted {
        i += 1;
    }
    let start = i;
    while chars
        .get(i)
        .is_some_and(|c| c.is_alphanumeric() || *c == '_')
    {
        i += 1;
    }
    let word: String = chars[start..i].iter().collect();
    if quoted && matches!(chars.get(i), Some('\'') | Some('"')) {
        i += 1;
    }
    ((!word.is_empty()).then_some(word), i)
}

/// Drop a trailing `#` comment (only where `#` starts a word outside quotes)
fn strip_comment(line: &str, mut quote: Option<Quote>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut prev = ' ';
    let mut escaped = false;
    for c in line.chars() {
        if escaped {
            escaped = false;
        } else {
            match quote {
                Some(Quote::Single) if c == '\'' => quote = None,
                Some(Quote::Double) if c == '"' => quote = None,
                Some(Quote::Double) if c == '\\' => escaped = true,
                Some(_) => {}
                None => match c {
                    '#' if prev.is_whitespace() || prev == ';' => break,
                    '\\' => escaped = true,
                    '\'' => quote = Some(Quote::Single),
                    '"' => quote = Some(Quote::Double),
                    _ => {}
                },
            }
        }
        out.push(c);
        prev = c;
    }
    out
}

fn function_name(text: &str) -> Option<String> {
    let (rest, keyword) = match text.strip_prefix("function ") {
        Some(rest) => (rest.trim_start(), true),
        None => (text, false),
    };
    let len = rest
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(rest.len());
    let name = &rest[..len];
    if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }

    let after = rest[len..].trim_start();
    let after = match after.strip_prefix("()") {
        Some(after) => after,
        None if keyword => after,
        None => after.strip_prefix('(')?.trim_start().strip_prefix(')')?,
    };
    let after = after.trim_start();
    (after.is_empty() || after.starts_with('{')).then(|| name.to_string())
}

fn is_inert(text: &str) -> bool {
    const SETTINGS: [&str; 8] = [
        "set ", "shopt ", "trap ", "source ", ". ", "umask ", "readonly ", "declare ",
    ];
    if text == "}" || SETTINGS.iter().any(|prefix| text.starts_with(prefix)) {
        return true;
    }
    let assignment = text.strip_prefix("export ").unwrap_or(text);
    match assignment.find('=') {
        Some(eq) => {
            let name = &assignment[..eq];
            !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
        }
        None => text.starts_with("export "),
    }
}
