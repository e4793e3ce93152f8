//! Statement-related data models.
//!
//! This module defines the argument and result types that flow through every
//! entry point of the pool capability set.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A decoded row, keyed by column name.
pub type RowMap = serde_json::Map<String, JsonValue>;

/// A positional parameter value for parameterized statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data, written in JSON as `{"base64": "..."}` so it never reads back as a string
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as a tagged base64 object.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tagged {
        base64: String,
    }

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Tagged {
            base64: STANDARD.encode(bytes),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let Tagged { base64 } = Tagged::deserialize(deserializer)?;
        STANDARD.decode(&base64).map_err(serde::de::Error::custom)
    }
}

/// Outcome of an execute-style statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Backend-assigned id of the last inserted row, when the backend reports one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

impl ExecResult {
    pub fn new(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            last_insert_id: None,
        }
    }
}

/// A materialised result set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Rows {
    pub columns: Vec<String>,
    pub rows: Vec<RowMap>,
}

impl Rows {
    /// Build a result set, taking column order from the first row when not given.
    pub fn from_maps(columns: Vec<String>, rows: Vec<RowMap>) -> Self {
        let columns = if columns.is_empty() {
            rows.first()
                .map(|r| r.keys().cloned().collect())
                .unwrap_or_default()
        } else {
            columns
        };
        Self { columns, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RowMap> {
        self.rows.iter()
    }
}

impl IntoIterator for Rows {
    type Item = RowMap;
    type IntoIter = std::vec::IntoIter<RowMap>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

/// Deferred outcome of a single-row query.
///
/// The single-row entry point has no error return of its own; any failure is
/// carried here and surfaces when the caller inspects the row.
#[derive(Debug)]
pub struct SingleRow {
    inner: DbResult<Option<RowMap>>,
}

impl SingleRow {
    pub fn new(inner: DbResult<Option<RowMap>>) -> Self {
        Self { inner }
    }

    pub fn from_error(err: DbError) -> Self {
        Self { inner: Err(err) }
    }

    /// The row if one was returned, `None` for an empty result.
    pub fn optional(self) -> DbResult<Option<RowMap>> {
        self.inner
    }

    /// The row, or `DbError::RowNotFound` for an empty result.
    pub fn into_result(self) -> DbResult<RowMap> {
        self.inner?.ok_or(DbError::RowNotFound)
    }

    /// Look up a single column value. Errors and empty results both yield `None`.
    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        match &self.inner {
            Ok(Some(row)) => row.get(column),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&DbError> {
        self.inner.as_ref().err()
    }
}

/// A statement prepared on the wrapped pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    pub sql: String,
    pub columns: Vec<String>,
}
