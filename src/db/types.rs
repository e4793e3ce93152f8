//! Row decoding.
//!
//! Rows coming back from any backend are turned into JSON maps so the pool
//! capability set can stay backend-agnostic.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies the column type name
//! 2. A per-backend decoder tries the Rust types that category maps to

use crate::models::{DatabaseType, ExecResult, RowMap};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlQueryResult, MySqlRow};
use sqlx::postgres::{PgQueryResult, PgRow};
use sqlx::sqlite::{SqliteQueryResult, SqliteRow};
use sqlx::{Column, Row, TypeInfo};

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // MySQL reports BOOLEAN columns as TINYINT(1), which decode fine as integers
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || (db == DatabaseType::SQLite && lower == "numeric")
    {
        return TypeCategory::Float;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

/// Encode binary data as base64.
pub fn encode_binary(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    JsonValue::String(STANDARD.encode(bytes))
}

fn binary_json(bytes: Vec<u8>) -> JsonValue {
    encode_binary(&bytes)
}

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self) -> RowMap;

    fn column_names(&self) -> Vec<String>;
}

/// Try each listed type in order, first successful non-NULL decode wins.
macro_rules! try_decode {
    ($row:expr, $idx:expr, $($ty:ty => $conv:expr),+ $(,)?) => {{
        let mut value = None;
        $(
            if value.is_none() {
                match $row.try_get::<Option<$ty>, _>($idx) {
                    Ok(Some(v)) => value = Some($conv(v)),
                    Ok(None) => value = Some(JsonValue::Null),
                    Err(_) => {}
                }
            }
        )+
        value.unwrap_or(JsonValue::Null)
    }};
}

macro_rules! impl_row_to_json {
    ($row_ty:ty, $db:expr) => {
        impl RowToJson for $row_ty {
            fn to_json_map(&self) -> RowMap {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        let category = categorize_type(col.type_info().name(), $db);
                        let value = match category {
                            TypeCategory::Integer => try_decode!(self, idx,
                                i64 => JsonValue::from,
                                i32 => JsonValue::from,
                                i16 => JsonValue::from,
                                bool => JsonValue::from,
                            ),
                            TypeCategory::Float => try_decode!(self, idx,
                                f64 => JsonValue::from,
                                f32 => JsonValue::from,
                            ),
                            TypeCategory::Boolean => try_decode!(self, idx,
                                bool => JsonValue::from,
                                i64 => JsonValue::from,
                            ),
                            TypeCategory::Binary => try_decode!(self, idx,
                                Vec<u8> => binary_json,
                            ),
                            TypeCategory::Text => try_decode!(self, idx,
                                String => JsonValue::from,
                            ),
                            TypeCategory::Unknown => try_decode!(self, idx,
                                i64 => JsonValue::from,
                                f64 => JsonValue::from,
                                String => JsonValue::from,
                                Vec<u8> => binary_json,
                            ),
                        };
                        (col.name().to_string(), value)
                    })
                    .collect()
            }

            fn column_names(&self) -> Vec<String> {
                self.columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect()
            }
        }
    };
}

impl_row_to_json!(MySqlRow, DatabaseType::MySQL);
impl_row_to_json!(PgRow, DatabaseType::PostgreSQL);
impl_row_to_json!(SqliteRow, DatabaseType::SQLite);

impl From<MySqlQueryResult> for ExecResult {
    fn from(result: MySqlQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: i64::try_from(result.last_insert_id()).ok(),
        }
    }
}

impl From<PgQueryResult> for ExecResult {
    fn from(result: PgQueryResult) -> Self {
        Self::new(result.rows_affected())
    }
}

impl From<SqliteQueryResult> for ExecResult {
    fn from(result: SqliteQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INTEGER", DatabaseType::SQLite), TypeCategory::Integer);
        assert_eq!(categorize_type("int8", DatabaseType::PostgreSQL), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT UNSIGNED", DatabaseType::MySQL), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_numeric_depends_on_backend() {
        assert_eq!(categorize_type("NUMERIC", DatabaseType::SQLite), TypeCategory::Float);
        assert_eq!(categorize_type("numeric", DatabaseType::PostgreSQL), TypeCategory::Unknown);
    }

    #[test]
    fn test_categorize_type_text_and_binary() {
        assert_eq!(categorize_type("VARCHAR", DatabaseType::MySQL), TypeCategory::Text);
        assert_eq!(categorize_type("bytea", DatabaseType::PostgreSQL), TypeCategory::Binary);
        assert_eq!(categorize_type("BLOB", DatabaseType::SQLite), TypeCategory::Binary);
        assert_eq!(categorize_type("NULL", DatabaseType::SQLite), TypeCategory::Unknown);
    }

    #[test]
    fn test_encode_binary() {
        assert_eq!(encode_binary(b"hi"), JsonValue::String("aGk=".to_string()));
    }
}
