//! SQL text utilities.
//!
//! Extension operations interpolate identifiers and interval literals into
//! statement text, so every such value goes through [`Ident`] or
//! [`Interval`] first. The lexical helpers here (placeholder renumbering,
//! top-level keyword search, statement classification) all share one scanner
//! that skips quoted text and comments.

use std::fmt;

use crate::error::{DbError, DbResult};

const MAX_IDENTIFIER_LEN: usize = 63;

const RESERVED: &[&str] = &[
    "all", "and", "as", "between", "case", "check", "create", "cross", "default", "delete",
    "distinct", "drop", "else", "end", "except", "foreign", "from", "group", "having", "in",
    "index", "inner", "insert", "intersect", "into", "is", "join", "key", "left", "like",
    "limit", "natural", "not", "null", "offset", "on", "or", "order", "outer", "primary",
    "returning", "right", "select", "set", "table", "then", "union", "update", "user",
    "using", "values", "when", "where", "window",
];

/// Escape a string for use in SQL (for identifiers, not values).
pub fn escape_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Check if an identifier segment needs quoting.
///
/// Unquoted names are folded to lower case by the server, so any segment
/// with upper-case letters is quoted to keep the name as written.
pub fn needs_quoting(name: &str) -> bool {
    RESERVED.contains(&name.to_ascii_lowercase().as_str())
        || name.starts_with(|c: char| c.is_ascii_digit())
        || !name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Quote an identifier segment if needed.
pub fn quote_identifier(name: &str) -> String {
    if needs_quoting(name) {
        escape_identifier(name)
    } else {
        name.to_string()
    }
}

/// Render a string as a single-quoted SQL literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// A validated, possibly schema-qualified identifier.
///
/// Segments are limited to ASCII letters, digits, `_` and `$`, start with a
/// letter or `_`, and are at most 63 bytes long.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    segments: Vec<String>,
}

impl Ident {
    /// Validate `value` as an identifier named by `field` in errors.
    pub fn parse(field: &str, value: &str) -> DbResult<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(DbError::invalid(field, "must not be empty"));
        }

        let segments: Vec<&str> = value.split('.').collect();
        if segments.len() > 3 {
            return Err(DbError::invalid(
                field,
                format!("'{}' has too many qualifiers", value),
            ));
        }

        for segment in &segments {
            let mut chars = segment.chars();
            let valid_start = chars.next().is_some_and(is_ident_start);
            let valid_rest = segment.bytes().all(is_ident_char);
            if !valid_start || !valid_rest {
                return Err(DbError::invalid(
                    field,
                    format!("'{}' is not a valid identifier", value),
                ));
            }
            if segment.len() > MAX_IDENTIFIER_LEN {
                return Err(DbError::invalid(
                    field,
                    format!("'{}' exceeds {} bytes", segment, MAX_IDENTIFIER_LEN),
                ));
            }
        }

        Ok(Self {
            segments: segments.into_iter().map(str::to_string).collect(),
        })
    }

    /// The unqualified (last) segment.
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// The schema qualifier, if any.
    pub fn schema(&self) -> Option<&str> {
        if self.segments.len() > 1 {
            self.segments
                .get(self.segments.len() - 2)
                .map(String::as_str)
        } else {
            None
        }
    }

    /// The identifier as written by the caller.
    pub fn raw(&self) -> String {
        self.segments.join(".")
    }

    /// SQL form for use in statement text.
    pub fn sql(&self) -> String {
        self.segments
            .iter()
            .map(|s| quote_identifier(s))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// SQL form wrapped in a string literal, for `regclass` arguments.
    pub fn literal(&self) -> String {
        quote_literal(&self.sql())
    }

    /// The unqualified name as a string literal, for catalog lookups.
    pub fn name_literal(&self) -> String {
        quote_literal(self.name())
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql())
    }
}

const INTERVAL_UNITS: &[&str] = &[
    "microsecond", "microseconds", "us", "millisecond", "milliseconds", "ms", "second",
    "seconds", "sec", "secs", "s", "minute", "minutes", "min", "mins", "m", "hour", "hours",
    "hr", "hrs", "h", "day", "days", "d", "week", "weeks", "w", "month", "months", "mon",
    "mons", "year", "years", "yr", "yrs", "y", "decade", "decades", "century", "centuries",
];

/// A validated PostgreSQL interval such as `1 hour` or `7 days 12:00:00`.
///
/// Accepted input is a sequence of `<number> <unit>` pairs (the space is
/// optional) and at most one `HH:MM[:SS[.frac]]` clock term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interval(String);

impl Interval {
    /// Validate `value` as an interval named by `field` in errors.
    pub fn parse(field: &str, value: &str) -> DbResult<Self> {
        let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
        if normalized.is_empty() {
            return Err(DbError::invalid(field, "interval must not be empty"));
        }
        if !interval_is_valid(&normalized) {
            return Err(DbError::invalid(
                field,
                format!("'{}' is not a valid interval", value),
            ));
        }
        Ok(Self(normalized))
    }

    /// The interval text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The interval as a quoted string, e.g. `'1 hour'`.
    pub fn quoted(&self) -> String {
        quote_literal(&self.0)
    }

    /// The interval as a typed literal, e.g. `INTERVAL '1 hour'`.
    pub fn literal(&self) -> String {
        format!("INTERVAL {}", self.quoted())
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_number(s: &str) -> bool {
    let s = s.strip_prefix(['-', '+']).unwrap_or(s);
    let mut parts = s.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next();
    let whole_ok = whole.bytes().all(|b| b.is_ascii_digit());
    let frac_ok = frac.is_none_or(|f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()));
    !whole.is_empty() && whole_ok && frac_ok
}

fn is_clock(s: &str) -> bool {
    let s = s.strip_prefix('-').unwrap_or(s);
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return false;
    }
    let digits = |p: &str| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit());
    digits(parts[0]) && digits(parts[1]) && parts.get(2).is_none_or(|sec| is_number(sec))
}

fn is_unit(s: &str) -> bool {
    INTERVAL_UNITS.contains(&s.to_ascii_lowercase().as_str())
}

fn split_number_unit(token: &str) -> Option<(&str, &str)> {
    let idx = token.find(|c: char| c.is_ascii_alphabetic())?;
    let (num, unit) = token.split_at(idx);
    (!num.is_empty()).then_some((num, unit))
}

fn interval_is_valid(value: &str) -> bool {
    let tokens: Vec<&str> = value.split(' ').collect();
    let mut i = 0;
    let mut terms = 0;
    let mut clock_seen = false;

    while i < tokens.len() {
        let token = tokens[i];
        if is_clock(token) {
            if clock_seen {
                return false;
            }
            clock_seen = true;
            i += 1;
        } else if is_number(token) {
            match tokens.get(i + 1) {
                Some(unit) if is_unit(unit) => i += 2,
                _ => return false,
            }
        } else if let Some((num, unit)) = split_number_unit(token) {
            if !is_number(num) || !is_unit(unit) {
                return false;
            }
            i += 1;
        } else {
            return false;
        }
        terms += 1;
    }

    terms > 0
}

/// Walk the bytes of `sql` that are outside quotes and comments, passing
/// each byte's offset and the parenthesis depth it sits at.
fn scan_code(sql: &str, mut visit: impl FnMut(usize, u8, usize)) {
    let b = sql.as_bytes();
    let mut i = 0;
    let mut depth = 0usize;

    while i < b.len() {
        match b[i] {
            q @ (b'\'' | b'"') => {
                i += 1;
                while i < b.len() {
                    if b[i] == q {
                        if b.get(i + 1) == Some(&q) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if b.get(i + 1) == Some(&b'-') => {
                while i < b.len() && b[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if b.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < b.len() && !(b[i] == b'*' && b.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 2;
            }
            b'$' if i == 0 || !is_ident_char(b[i - 1]) => {
                if let Some(end) = dollar_quote_end(b, i) {
                    i = end;
                } else {
                    visit(i, b'$', depth);
                    i += 1;
                }
            }
            b'(' => {
                visit(i, b'(', depth);
                depth += 1;
                i += 1;
            }
            b')' => {
                depth = depth.saturating_sub(1);
                visit(i, b')', depth);
                i += 1;
            }
            c => {
                visit(i, c, depth);
                i += 1;
            }
        }
    }
}

/// If a dollar-quoted string (`$$...$$` or `$tag$...$tag$`) starts at
/// `start`, return the offset just past its closing tag.
fn dollar_quote_end(b: &[u8], start: usize) -> Option<usize> {
    let mut j = start + 1;
    while j < b.len() && (b[j].is_ascii_alphabetic() || b[j] == b'_') {
        j += 1;
    }
    if b.get(j) != Some(&b'$') {
        return None;
    }
    let tag = &b[start..=j];
    let body = j + 1;
    let close = b[body..]
        .windows(tag.len())
        .position(|w| w == tag)
        .map(|p| body + p + tag.len());
    Some(close.unwrap_or(b.len()))
}

/// A `$n` placeholder found outside quoted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placeholder {
    /// Byte offset of the `$`.
    pub start: usize,
    /// Byte offset just past the last digit.
    pub end: usize,
    /// The placeholder number.
    pub index: usize,
}

/// Find every `$n` placeholder outside quoted text and comments.
pub fn placeholders(sql: &str) -> Vec<Placeholder> {
    let b = sql.as_bytes();
    let mut found = Vec::new();
    scan_code(sql, |i, c, _| {
        if c != b'$' {
            return;
        }
        let mut end = i + 1;
        while end < b.len() && b[end].is_ascii_digit() {
            end += 1;
        }
        if end > i + 1 {
            if let Ok(index) = sql[i + 1..end].parse() {
                found.push(Placeholder {
                    start: i,
                    end,
                    index,
                });
            }
        }
    });
    found
}

/// Shift every `$n` placeholder in `clause` by `offset` in one pass, so
/// `$1` with an offset of 3 becomes `$4` and never collides with an
/// already-shifted neighbour.
pub fn renumber_placeholders(clause: &str, offset: usize) -> String {
    if offset == 0 {
        return clause.to_string();
    }

    let mut out = String::with_capacity(clause.len() + 4);
    let mut last = 0;
    for p in placeholders(clause) {
        out.push_str(&clause[last..p.start]);
        out.push('$');
        out.push_str(&(p.index + offset).to_string());
        last = p.end;
    }
    out.push_str(&clause[last..]);
    out
}

/// Byte offsets of `keyword` (case-insensitive, whole word) at parenthesis
/// depth zero, outside quotes and comments.
pub fn top_level_keyword_positions(sql: &str, keyword: &str) -> Vec<usize> {
    let b = sql.as_bytes();
    let kw = keyword.as_bytes();
    let mut found = Vec::new();

    scan_code(sql, |i, _, depth| {
        if depth != 0 || i + kw.len() > b.len() {
            return;
        }
        if i > 0 && is_ident_char(b[i - 1]) {
            return;
        }
        if !b[i..i + kw.len()].eq_ignore_ascii_case(kw) {
            return;
        }
        if b.get(i + kw.len()).is_some_and(|&n| is_ident_char(n)) {
            return;
        }
        found.push(i);
    });
    found
}

/// The first keyword of a statement, uppercased, skipping whitespace,
/// comments and opening parentheses.
pub fn leading_keyword(sql: &str) -> Option<String> {
    let b = sql.as_bytes();
    let mut start = None;
    scan_code(sql, |i, c, _| {
        if start.is_none() && c.is_ascii_alphabetic() {
            start = Some(i);
        }
    });
    let start = start?;
    let end = b[start..]
        .iter()
        .position(|c| !c.is_ascii_alphabetic())
        .map_or(b.len(), |p| start + p);
    Some(sql[start..end].to_ascii_uppercase())
}

/// Whether a statement returns rows and should use the query path.
///
/// Statements led by `SELECT` or `WITH` are row-returning; anything else
/// goes through exec.
pub fn is_select_query(sql: &str) -> bool {
    matches!(leading_keyword(sql).as_deref(), Some("SELECT" | "WITH"))
}
