//! Select-only statement guard.
//!
//! Statements written by the reasoning loop are checked here before they
//! reach the database. Only a single `SELECT` (or `WITH ... SELECT`)
//! statement is accepted, and no mutating keyword may appear outside
//! literals and comments. The SQLite backend additionally refuses any
//! prepared statement that is not read-only, and its connection is opened
//! read-only as well.

use crate::errors::{DatabaseError, DbResult};

const ALLOWED_LEADING_KEYWORDS: &[&str] = &["SELECT", "WITH"];

const MUTATING_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "CREATE", "ALTER", "DROP", "REPLACE", "TRUNCATE", "ATTACH",
    "DETACH", "PRAGMA", "VACUUM", "REINDEX", "ANALYZE", "BEGIN", "COMMIT", "ROLLBACK", "SAVEPOINT",
    "RELEASE", "UPSERT",
];

/// Checks that `sql` is a single read-only statement and returns it with
/// surrounding comments and trailing semicolons removed.
pub fn ensure_read_only(sql: &str) -> DbResult<&str> {
    let code = mask_literals_and_comments(sql);

    // Masking keeps byte offsets, so bounds found in `code` apply to `sql`
    let start = code.len() - code.trim_start().len();
    let mut end = code.trim_end().len();
    while end > start && code[..end].ends_with(';') {
        end = code[..end - 1].trim_end().len();
    }
    if end <= start {
        return Err(DatabaseError::StatementRejected(
            "empty statement".to_string(),
        ));
    }
    let body = &sql[start..end];
    let code = &code[start..end];

    if code.contains(';') {
        return Err(DatabaseError::StatementRejected(
            "only a single statement is allowed".to_string(),
        ));
    }

    let keyword: String = code
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();

    if !ALLOWED_LEADING_KEYWORDS.contains(&keyword.as_str()) {
        return Err(DatabaseError::StatementRejected(format!(
            "only SELECT queries are allowed, got '{}'",
            if keyword.is_empty() { body.chars().take(20).collect() } else { keyword }
        )));
    }

    if let Some(found) = first_mutating_keyword(code) {
        return Err(DatabaseError::StatementRejected(format!(
            "mutating keyword '{}' is not allowed",
            found
        )));
    }

    Ok(body)
}

/// Replaces string literals, quoted identifiers and comments with spaces,
/// byte for byte.
fn mask_literals_and_comments(sql: &str) -> String {
    #[derive(Clone, Copy)]
    enum Mode {
        Code,
        Quoted(char),
        LineComment,
        BlockComment,
    }

    let mut out = String::with_capacity(sql.len());
    let mut mode = Mode::Code;
    let mut chars = sql.chars().peekable();
    let blank = |out: &mut String, c: char| out.extend(std::iter::repeat(' ').take(c.len_utf8()));

    while let Some(c) = chars.next() {
        match mode {
            Mode::Code => match c {
                '\'' | '"' | '`' => {
                    mode = Mode::Quoted(c);
                    blank(&mut out, c);
                }
                '[' => {
                    mode = Mode::Quoted(']');
                    blank(&mut out, c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    mode = Mode::LineComment;
                    out.push_str("  ");
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    mode = Mode::BlockComment;
                    out.push_str("  ");
                }
                _ => out.push(c),
            },
            Mode::Quoted(close) => {
                if c == close {
                    mode = Mode::Code;
                }
                blank(&mut out, c);
            }
            Mode::LineComment => {
                if c == '\n' {
                    mode = Mode::Code;
                    out.push('\n');
                } else {
                    blank(&mut out, c);
                }
            }
            Mode::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    mode = Mode::Code;
                    out.push_str("  ");
                } else {
                    blank(&mut out, c);
                }
            }
        }
    }
    out
}

/// First mutating keyword used as a statement word. `replace(...)` and other
/// function calls are not statements and are skipped.
fn first_mutating_keyword(code: &str) -> Option<String> {
    let mut rest = code;
    while !rest.is_empty() {
        let token_start = match rest.find(|c: char| c.is_ascii_alphanumeric() || c == '_') {
            Some(idx) => idx,
            None => return None,
        };
        let tail = &rest[token_start..];
        let token_len = tail
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(tail.len());
        let token = tail[..token_len].to_ascii_uppercase();
        let after = &tail[token_len..];

        let is_call = after.trim_start().starts_with('(');
        if !is_call && MUTATING_KEYWORDS.contains(&token.as_str()) {
            return Some(token);
        }
        rest = after;
    }
    None
}
