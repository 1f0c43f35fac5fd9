//! Statement parameters and placeholder rewriting.
//!
//! Queries may use positional (`$1`, `?`) or named (`:name`) placeholders.
//! Before a query reaches the driver every placeholder occurrence is
//! rewritten to the next `$k`, and the values are resolved in that order:
//!
//! ```text
//! SELECT * FROM test WHERE domain = :domain AND tld = ?
//! SELECT * FROM test WHERE domain = $1 AND tld = $2      -- [Name("domain"), Index(0)]
//! ```
//!
//! String literals, quoted identifiers, dollar-quoted bodies, comments and
//! `::` casts are never treated as placeholders.

use crate::error::{Error, Result};
use crate::value::Value;

/// Parameter values for a statement execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Params {
    /// Empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional parameters, matched against `$N` and `?` placeholders.
    pub fn positional<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            positional: values.into_iter().map(Into::into).collect(),
            named: Vec::new(),
        }
    }

    /// Named parameters, matched against `:name` placeholders.
    pub fn named<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            positional: Vec::new(),
            named: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Append a positional parameter.
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.positional.push(value.into());
        self
    }

    /// Add or replace a named parameter.
    pub fn with_named(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.named.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.named.push((name, value)),
        }
        self
    }

    /// Check if no parameters were supplied.
    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.named.is_empty()
    }

    fn get_named(&self, name: &str) -> Option<&Value> {
        self.named.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

impl From<()> for Params {
    fn from(_: ()) -> Self {
        Self::default()
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            named: Vec::new(),
        }
    }
}

impl<V: Into<Value>, const N: usize> From<[V; N]> for Params {
    fn from(values: [V; N]) -> Self {
        Self::positional(values)
    }
}

/// What a rewritten `$k` placeholder is resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamKey {
    /// Zero-based position in the positional parameters.
    Index(usize),
    /// Name in the named parameters.
    Name(String),
}

/// A query with its placeholders rewritten to `$k` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    sql: String,
    keys: Vec<ParamKey>,
}

impl ParsedQuery {
    /// Rewrite the placeholders of `sql`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Query` for an empty query, for `$0`, or when `?` and
    /// `$N` placeholders are mixed in one query.
    pub fn parse(sql: &str) -> Result<Self> {
        ensure_not_empty(sql)?;
        Scanner::new(sql).run()
    }

    /// The rewritten SQL, using only `$k` placeholders.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Resolution key of each `$k`, in order.
    pub fn keys(&self) -> &[ParamKey] {
        &self.keys
    }

    /// Resolve parameter values in `$k` order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Query` naming the first placeholder without a value.
    pub fn bind(&self, params: &Params) -> Result<Vec<Value>> {
        self.keys
            .iter()
            .map(|key| match key {
                ParamKey::Index(idx) => params.positional.get(*idx).cloned().ok_or_else(|| {
                    Error::Query(format!(
                        "Value for unnamed parameter at position {} missing",
                        idx
                    ))
                }),
                ParamKey::Name(name) => params.get_named(name).cloned().ok_or_else(|| {
                    Error::Query(format!("Value for named parameter '{}' missing", name))
                }),
            })
            .collect()
    }
}

/// Reject blank queries before they reach the driver.
pub(crate) fn ensure_not_empty(sql: &str) -> Result<()> {
    if sql.trim().is_empty() {
        return Err(Error::Query("Empty query string".into()));
    }
    Ok(())
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

struct Scanner<'a> {
    sql: &'a str,
    bytes: &'a [u8],
    pos: usize,
    copied: usize,
    out: String,
    keys: Vec<ParamKey>,
    unnamed: usize,
    numbered: bool,
}

impl<'a> Scanner<'a> {
    fn new(sql: &'a str) -> Self {
        Self {
            sql,
            bytes: sql.as_bytes(),
            pos: 0,
            copied: 0,
            out: String::with_capacity(sql.len()),
            keys: Vec::new(),
            unnamed: 0,
            numbered: false,
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn run(mut self) -> Result<ParsedQuery> {
        while let Some(b) = self.peek(0) {
            match b {
                b'\'' => self.skip_string(),
                b'"' => self.skip_until(b'"'),
                b'-' if self.peek(1) == Some(b'-') => self.skip_line_comment(),
                b'/' if self.peek(1) == Some(b'*') => self.skip_block_comment(),
                b':' if self.peek(1) == Some(b':') => self.pos += 2,
                b':' if self.peek(1).is_some_and(is_ident_start) => self.named()?,
                b'$' if self.peek(1).is_some_and(|c| c.is_ascii_digit()) => self.numbered()?,
                b'$' => self.skip_dollar_quoted(),
                b'?' => self.unnamed()?,
                _ => self.pos += 1,
            }
        }

        self.out.push_str(&self.sql[self.copied..]);
        Ok(ParsedQuery {
            sql: self.out,
            keys: self.keys,
        })
    }

    fn emit(&mut self, start: usize, end: usize, key: ParamKey) {
        self.out.push_str(&self.sql[self.copied..start]);
        self.keys.push(key);
        self.out.push('$');
        self.out.push_str(&self.keys.len().to_string());
        self.copied = end;
        self.pos = end;
    }

    fn named(&mut self) -> Result<()> {
        let start = self.pos;
        let mut end = start + 1;
        while self.bytes.get(end).copied().is_some_and(is_ident_char) {
            end += 1;
        }
        let name = self.sql[start + 1..end].to_string();
        self.emit(start, end, ParamKey::Name(name));
        Ok(())
    }

    fn numbered(&mut self) -> Result<()> {
        if self.unnamed > 0 {
            return Err(Error::Query(
                "Cannot mix unnamed and numbered parameters".into(),
            ));
        }
        let start = self.pos;
        let mut end = start + 1;
        while self.bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
        let number: usize = self.sql[start + 1..end]
            .parse()
            .map_err(|e| Error::Query(format!("Invalid parameter number: {}", e)))?;
        if number == 0 {
            return Err(Error::Query("Parameter numbers start at $1".into()));
        }
        self.numbered = true;
        self.emit(start, end, ParamKey::Index(number - 1));
        Ok(())
    }

    fn unnamed(&mut self) -> Result<()> {
        if self.numbered {
            return Err(Error::Query(
                "Cannot mix unnamed and numbered parameters".into(),
            ));
        }
        let start = self.pos;
        let index = self.unnamed;
        self.unnamed += 1;
        self.emit(start, start + 1, ParamKey::Index(index));
        Ok(())
    }

    /// `'...'`, with `''` escapes, and `E'...'` with backslash escapes.
    fn skip_string(&mut self) {
        let escapes = self.pos > 0
            && matches!(self.bytes[self.pos - 1], b'E' | b'e')
            && (self.pos < 2 || !is_ident_char(self.bytes[self.pos - 2]));
        self.pos += 1;
        while let Some(b) = self.peek(0) {
            self.pos += 1;
            match b {
                b'\\' if escapes => self.pos += 1,
                b'\'' if self.peek(0) == Some(b'\'') => self.pos += 1,
                b'\'' => return,
                _ => {}
            }
        }
    }

    /// Quoted identifier; a doubled quote is an escaped quote.
    fn skip_until(&mut self, quote: u8) {
        self.pos += 1;
        while let Some(b) = self.peek(0) {
            self.pos += 1;
            if b == quote {
                if self.peek(0) == Some(quote) {
                    self.pos += 1;
                } else {
                    return;
                }
            }
        }
    }

    fn skip_line_comment(&mut self) {
        while let Some(b) = self.peek(0) {
            self.pos += 1;
            if b == b'\n' {
                return;
            }
        }
    }

    /// Block comments nest in PostgreSQL.
    fn skip_block_comment(&mut self) {
        let mut depth = 0usize;
        while self.pos < self.bytes.len() {
            if self.peek(0) == Some(b'/') && self.peek(1) == Some(b'*') {
                depth += 1;
                self.pos += 2;
            } else if self.peek(0) == Some(b'*') && self.peek(1) == Some(b'/') {
                depth -= 1;
                self.pos += 2;
                if depth == 0 {
                    return;
                }
            } else {
                self.pos += 1;
            }
        }
    }

    /// `$$...$$` or `$tag$...$tag$`; a lone `$` is left alone.
    fn skip_dollar_quoted(&mut self) {
        let start = self.pos;
        let mut end = start + 1;
        if self.bytes.get(end).copied().is_some_and(is_ident_start) {
            while self.bytes.get(end).copied().is_some_and(is_ident_char) {
                end += 1;
            }
        }
        if self.bytes.get(end) != Some(&b'$') {
            self.pos += 1;
            return;
        }
        let tag = &self.sql[start..=end];
        let body = end + 1;
        self.pos = match self.sql[body..].find(tag) {
            Some(offset) => body + offset + tag.len(),
            None => self.bytes.len(),
        };
    }
}
