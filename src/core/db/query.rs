/// Query Input Module
///
/// This module describes what goes into and comes out of a gateway call:
/// the query argument, result rows, and the helpers that classify a
/// statement or a driver failure.

use crate::core::{GatewayError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{Value, ValueRef};
use rusqlite::ErrorCode;
use std::borrow::Cow;

/// A single result row, one value per column in column order
pub type Row = Vec<Value>;

/// Substring that marks a statement as returning a value from `execute`
pub const RETURNING_MARKER: &str = "RETURNING";

static DUPLICATE_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:table|view)\s+(?:"([^"]+)"|`([^`]+)`|\[([^\]]+)\]|'([^']+)'|(\S+))\s+already exists$"#)
        .expect("duplicate table pattern is valid")
});

/// The query argument of a gateway operation.
///
/// Text is accepted as-is. Raw bytes are accepted only when they decode as
/// UTF-8; anything else is not a text value and is rejected with
/// `GatewayError::InvalidQuery` before a connection is opened.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryText<'a> {
    Text(Cow<'a, str>),
    Bytes(Cow<'a, [u8]>),
}

impl<'a> QueryText<'a> {
    /// Returns the query as text, or `None` if it is not valid UTF-8
    pub fn as_text(&self) -> Option<&str> {
        match self {
            QueryText::Text(text) => Some(text.as_ref()),
            QueryText::Bytes(bytes) => std::str::from_utf8(bytes).ok(),
        }
    }

    /// Lossy rendering used in error messages
    pub fn display(&self) -> Cow<'_, str> {
        match self {
            QueryText::Text(text) => Cow::Borrowed(text.as_ref()),
            QueryText::Bytes(bytes) => String::from_utf8_lossy(bytes),
        }
    }

    /// Checks that the query is text
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::InvalidQuery` carrying a lossy rendering of the
    /// argument.
    pub fn require_text(&self) -> Result<&str> {
        self.as_text()
            .ok_or_else(|| GatewayError::invalid_query(self.display().into_owned()))
    }
}

impl<'a> From<&'a str> for QueryText<'a> {
    fn from(value: &'a str) -> Self {
        QueryText::Text(Cow::Borrowed(value))
    }
}

impl<'a> From<&'a String> for QueryText<'a> {
    fn from(value: &'a String) -> Self {
        QueryText::Text(Cow::Borrowed(value.as_str()))
    }
}

impl From<String> for QueryText<'static> {
    fn from(value: String) -> Self {
        QueryText::Text(Cow::Owned(value))
    }
}

impl<'a> From<&'a [u8]> for QueryText<'a> {
    fn from(value: &'a [u8]) -> Self {
        QueryText::Bytes(Cow::Borrowed(value))
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for QueryText<'a> {
    fn from(value: &'a [u8; N]) -> Self {
        QueryText::Bytes(Cow::Borrowed(&value[..]))
    }
}

impl<'a> From<&'a Vec<u8>> for QueryText<'a> {
    fn from(value: &'a Vec<u8>) -> Self {
        QueryText::Bytes(Cow::Borrowed(value.as_slice()))
    }
}

impl From<Vec<u8>> for QueryText<'static> {
    fn from(value: Vec<u8>) -> Self {
        QueryText::Bytes(Cow::Owned(value))
    }
}

/// Whether `execute` should hand back the first column of the first row.
///
/// This is a case-sensitive substring match, not a parse: the word inside a
/// comment or string literal also counts, and a lowercase `returning`
/// clause does not.
pub fn has_returning_clause(sql: &str) -> bool {
    sql.contains(RETURNING_MARKER)
}

/// Extracts the relation name from SQLite's duplicate table error.
///
/// SQLite raises this while preparing `CREATE TABLE`, so it usually arrives
/// as `SqlInputError`; `SqliteFailure` covers the step-time path. A clash
/// with an existing view counts as a duplicate too.
///
/// Returns `None` when `err` is not a duplicate table failure, and
/// `Some(UNKNOWN_TABLE)` when it is but the name cannot be read back.
pub fn duplicate_table_name(err: &rusqlite::Error) -> Option<String> {
    let message = match err {
        rusqlite::Error::SqlInputError { error, msg, .. } if error.code == ErrorCode::Unknown => msg,
        rusqlite::Error::SqliteFailure(code, Some(message)) if code.code == ErrorCode::Unknown => message,
        _ => return None,
    };

    let is_relation = message.starts_with("table ") || message.starts_with("view ");
    if !is_relation || !message.ends_with(" already exists") {
        return None;
    }

    let name = DUPLICATE_TABLE
        .captures(message)
        .and_then(|caps| caps.iter().skip(1).flatten().next())
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| crate::core::error::UNKNOWN_TABLE.to_string());
    Some(name)
}

/// Reads every column of `row` into an owned `Row`
pub fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let column_count = row.as_ref().column_count();
    (0..column_count).map(|i| row.get::<_, Value>(i)).collect()
}

/// Converts a SQLite value to JSON. Blobs become lowercase hex strings.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match ValueRef::from(value) {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        ValueRef::Text(t) => serde_json::Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => serde_json::Value::String(b.iter().map(|byte| format!("{:02x}", byte)).collect()),
    }
}

/// Converts a row to a JSON array
pub fn row_to_json(row: &[Value]) -> serde_json::Value {
    serde_json::Value::Array(row.iter().map(value_to_json).collect())
}
