//! Statement rendering for logs.
//!
//! Interpolates positional parameters into statement text so a traced
//! statement reads as it would have been typed. The output is for humans
//! only and is never sent to a database.

use crate::models::QueryParam;
use sqlparser::dialect::Dialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer};
use std::fmt::Write;
use tracing::trace;

/// Render `sql` with `params` substituted for its placeholders.
///
/// The statement is tokenized with `dialect`, so comments, quoted strings and
/// identifiers keep their text. Only placeholder tokens are replaced: `?`
/// (sequential), `?N` and `$N` (1-based). Placeholders with no matching
/// parameter are left as written, and a statement that does not tokenize is
/// returned unchanged.
pub fn explain(dialect: &dyn Dialect, sql: &str, params: &[QueryParam]) -> String {
    let tokens = match Tokenizer::new(dialect, sql)
        .with_unescape(false)
        .tokenize_with_location()
    {
        Ok(tokens) => tokens,
        Err(err) => {
            trace!(error = %err, "Statement not tokenized, rendering it as written");
            return sql.to_string();
        }
    };

    let lines = LineStarts::new(sql);
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut copied = 0;
    let mut next_sequential = 0usize;

    for token in &tokens {
        let Token::Placeholder(placeholder) = &token.token else {
            continue;
        };
        let index = if placeholder == "?" {
            next_sequential += 1;
            Some(next_sequential - 1)
        } else {
            numbered_index(placeholder)
        };
        let Some(param) = index.and_then(|i| params.get(i)) else {
            continue;
        };
        let (Some(start), Some(end)) = (
            lines.offset(sql, token.span.start),
            lines.offset(sql, token.span.end),
        ) else {
            continue;
        };

        out.push_str(&sql[copied..start]);
        push_literal(&mut out, param);
        copied = end;
    }

    out.push_str(&sql[copied..]);
    out
}

/// Zero-based index of `?N` or `$N`.
fn numbered_index(placeholder: &str) -> Option<usize> {
    placeholder
        .strip_prefix('?')
        .or_else(|| placeholder.strip_prefix('$'))
        .and_then(|n| n.parse::<usize>().ok())
        .and_then(|n| n.checked_sub(1))
}

/// Byte offset of each line start, for mapping tokenizer locations back to text.
struct LineStarts(Vec<usize>);

impl LineStarts {
    fn new(sql: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self(starts)
    }

    /// Locations count lines and columns from 1, columns in characters.
    fn offset(&self, sql: &str, location: Location) -> Option<usize> {
        let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
        let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
        let start = *self.0.get(line)?;
        let rest = sql.get(start..)?;
        rest.char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(rest.len()))
            .nth(column)
            .map(|i| start + i)
    }
}

/// Render one parameter as a SQL literal.
pub fn literal(param: &QueryParam) -> String {
    let mut out = String::new();
    push_literal(&mut out, param);
    out
}

fn push_literal(out: &mut String, param: &QueryParam) {
    match param {
        QueryParam::Null => out.push_str("NULL"),
        QueryParam::Bool(true) => out.push_str("TRUE"),
        QueryParam::Bool(false) => out.push_str("FALSE"),
        QueryParam::Int(v) => {
            let _ = write!(out, "{v}");
        }
        QueryParam::Float(v) => {
            let _ = write!(out, "{v}");
        }
        QueryParam::String(s) => {
            out.push('\'');
            out.push_str(&s.replace('\'', "''"));
            out.push('\'');
        }
        QueryParam::Bytes(bytes) => {
            out.push_str("X'");
            for b in bytes {
                let _ = write!(out, "{b:02X}");
            }
            out.push('\'');
        }
    }
}
