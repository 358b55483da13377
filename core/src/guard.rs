//! Normalization and statement-shape checks for model-generated SQL.
//!
//! The generated query is executed as-is once it passes here; these checks
//! only narrow what reaches the store to single read-only statements.

use std::sync::LazyLock;

use regex::Regex;

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n?(.*?)```").expect("fence pattern is valid")
});

static LEADING_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\s(]*([A-Za-z]+)").expect("keyword pattern is valid"));

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryRejection {
    #[error("query is empty")]
    Empty,
    #[error("query contains more than one statement")]
    MultipleStatements,
    #[error("only SELECT or WITH queries may run, got {0}")]
    NotReadOnly(String),
}

/// Pull the query text out of a model candidate.
///
/// Markdown fences and trailing semicolons are removed; an already plain
/// query comes back unchanged. Returns `None` when nothing is left.
pub fn extract_query(candidate: &str) -> Option<String> {
    let body = match FENCED_BLOCK.captures(candidate) {
        Some(captures) => captures.get(1).map_or("", |m| m.as_str()),
        None => candidate,
    };

    let query = body.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if query.is_empty() {
        None
    } else {
        Some(query.to_string())
    }
}

/// Accept only a single statement that starts with `SELECT` or `WITH`.
pub fn check_read_only(query: &str) -> Result<(), QueryRejection> {
    let code = strip_literals_and_comments(query);
    if code.trim().is_empty() {
        return Err(QueryRejection::Empty);
    }
    if code.contains(';') {
        return Err(QueryRejection::MultipleStatements);
    }

    let keyword = LEADING_KEYWORD
        .captures(&code)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
        .unwrap_or_default();

    match keyword.as_str() {
        "SELECT" | "WITH" => Ok(()),
        "" => Err(QueryRejection::NotReadOnly("<none>".to_string())),
        _ => Err(QueryRejection::NotReadOnly(keyword)),
    }
}

/// Replace quoted text, dollar-quoted bodies and comments with spaces so
/// structural characters inside them are ignored.
fn strip_literals_and_comments(query: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum Mode {
        Code,
        SingleQuoted,
        DoubleQuoted,
        DollarQuoted,
        LineComment,
        BlockComment,
    }

    let chars: Vec<char> = query.chars().collect();
    let mut out = String::with_capacity(query.len());
    let mut mode = Mode::Code;
    let mut dollar_tag: &[char] = &[];
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        // characters consumed by this step, all blanked unless in code
        let mut width = 1;

        match mode {
            Mode::Code => match c {
                '\'' => mode = Mode::SingleQuoted,
                '"' => mode = Mode::DoubleQuoted,
                '-' if next == Some('-') => {
                    mode = Mode::LineComment;
                    width = 2;
                }
                '/' if next == Some('*') => {
                    mode = Mode::BlockComment;
                    width = 2;
                }
                '$' if i == 0 || !is_identifier_char(chars[i - 1]) => {
                    match dollar_tag_len(&chars[i..]) {
                        Some(len) => {
                            dollar_tag = &chars[i..i + len];
                            mode = Mode::DollarQuoted;
                            width = len;
                        }
                        None => {
                            out.push(c);
                            i += 1;
                            continue;
                        }
                    }
                }
                _ => {
                    out.push(c);
                    i += 1;
                    continue;
                }
            },
            Mode::SingleQuoted => {
                if c == '\'' {
                    mode = Mode::Code;
                }
            }
            Mode::DoubleQuoted => {
                if c == '"' {
                    mode = Mode::Code;
                }
            }
            Mode::DollarQuoted => {
                if chars[i..].starts_with(dollar_tag) {
                    mode = Mode::Code;
                    width = dollar_tag.len();
                }
            }
            Mode::LineComment => {
                if c == '\n' {
                    mode = Mode::Code;
                    out.push('\n');
                    i += 1;
                    continue;
                }
            }
            Mode::BlockComment => {
                if c == '*' && next == Some('/') {
                    mode = Mode::Code;
                    width = 2;
                }
            }
        }

        out.extend(std::iter::repeat_n(' ', width));
        i += width;
    }

    out
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Length of an opening `$$` or `$tag$` at the start of `rest`. Positional
/// parameters such as `$1` are not tags.
fn dollar_tag_len(rest: &[char]) -> Option<usize> {
    let mut len = 1;
    while let Some(&c) = rest.get(len) {
        match c {
            '$' => return Some(len + 1),
            c if c.is_alphabetic() || c == '_' => {}
            c if c.is_ascii_digit() && len > 1 => {}
            _ => return None,
        }
        len += 1;
    }
    None
}
