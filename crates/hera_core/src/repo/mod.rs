//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define data access contracts for the six base relations.
//! - Isolate SQLite query details from orchestration services.
//!
//! # Invariants
//! - Every query on tenant data carries an `organization_id` equality filter.
//! - Repository APIs return semantic errors (`NotFound`, `UniqueViolation`,
//!   `VersionConflict`) in addition to DB transport errors.
//! - Repositories never open transactions themselves; callers pass a
//!   connection or an open transaction.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod dynamic_repo;
pub mod entity_repo;
pub mod idempotency_repo;
pub mod organization_repo;
pub mod relationship_repo;
pub mod transaction_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error shared by every table repository.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    NotFound {
        kind: &'static str,
        id: Uuid,
    },
    /// A UNIQUE/PRIMARY KEY constraint rejected the write.
    UniqueViolation(String),
    VersionConflict {
        id: Uuid,
        expected: i64,
        actual: i64,
    },
    /// Persisted data cannot be converted to a valid model.
    InvalidData(String),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::UniqueViolation(message) => write!(f, "unique constraint violated: {message}"),
            Self::VersionConflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on {id}: expected {expected}, current {actual}"
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "repository requires table `{table}`")
            }
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(failure, message) = &value {
            let is_unique = failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                );
            if is_unique {
                return Self::UniqueViolation(
                    message
                        .clone()
                        .unwrap_or_else(|| "UNIQUE constraint failed".to_string()),
                );
            }
        }
        Self::Db(DbError::Sqlite(value))
    }
}

/// Shared pagination options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Reads the database clock in epoch milliseconds.
///
/// One value per atomic unit keeps every row of a multi-row write on the same
/// timestamp.
pub fn now_ms(conn: &Connection) -> RepoResult<i64> {
    let now = conn.query_row(
        "SELECT CAST(unixepoch('subsec') * 1000 AS INTEGER);",
        [],
        |row| row.get(0),
    )?;
    Ok(now)
}

/// Verifies the connection is migrated and carries the required tables.
pub fn ensure_connection_ready(conn: &Connection, tables: &[&'static str]) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in tables {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}

pub(crate) fn push_pagination(sql: &mut String, binds: &mut Vec<SqlValue>, page: Page) {
    if let Some(limit) = page.limit {
        sql.push_str(" LIMIT ?");
        binds.push(SqlValue::Integer(i64::from(limit)));
        if page.offset > 0 {
            sql.push_str(" OFFSET ?");
            binds.push(SqlValue::Integer(i64::from(page.offset)));
        }
    } else if page.offset > 0 {
        sql.push_str(" LIMIT -1 OFFSET ?");
        binds.push(SqlValue::Integer(i64::from(page.offset)));
    }
}

pub(crate) fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

pub(crate) fn parse_optional_uuid(
    value: Option<String>,
    column: &'static str,
) -> RepoResult<Option<Uuid>> {
    value.map(|text| parse_uuid(&text, column)).transpose()
}

pub(crate) fn optional_uuid_to_db(value: Option<Uuid>) -> Option<String> {
    value.map(|id| id.to_string())
}

pub(crate) fn parse_json(value: &str, column: &'static str) -> RepoResult<Value> {
    serde_json::from_str(value)
        .map_err(|err| RepoError::InvalidData(format!("invalid json in {column}: {err}")))
}

pub(crate) fn json_to_db(value: &Value) -> String {
    match value {
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn int_to_bool(value: i64, column: &'static str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

/// Formats the `<PREFIX>-<000001>` style codes used for generated codes.
pub(crate) fn format_sequence_code(prefix: &str, sequence: i64) -> String {
    let normalized: String = prefix
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{normalized}-{sequence:06}")
}

#[cfg(test)]
mod tests {
    use super::{format_sequence_code, json_to_db, push_pagination, Page};
    use serde_json::json;

    #[test]
    fn sequence_codes_are_uppercased_and_padded() {
        assert_eq!(format_sequence_code("sale", 7), "SALE-000007");
        assert_eq!(format_sequence_code("gl account", 12), "GL_ACCOUNT-000012");
    }

    #[test]
    fn null_json_is_stored_as_empty_object() {
        assert_eq!(json_to_db(&json!(null)), "{}");
        assert_eq!(json_to_db(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn pagination_uses_offset_only_path_without_limit() {
        let mut sql = String::from("SELECT 1");
        let mut binds = Vec::new();
        push_pagination(
            &mut sql,
            &mut binds,
            Page {
                limit: None,
                offset: 3,
            },
        );
        assert_eq!(sql, "SELECT 1 LIMIT -1 OFFSET ?");
        assert_eq!(binds.len(), 1);
    }
}
