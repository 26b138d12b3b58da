//! Core use-case services.
//!
//! # Responsibility
//! - Run each multi-table operation as one atomic unit.
//! - Enforce tenancy, smart code behavior and lifecycle policy above the
//!   repository layer.
//!
//! # Invariants
//! - Every write starts with `BEGIN IMMEDIATE`, resolves the organization
//!   inside that transaction, and reads its result back before commit.
//! - A failed operation commits nothing.

use crate::repo::Page;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use serde_json::{Map, Value};

pub mod dynamic_store;
pub mod entity_service;
pub mod error;
pub mod organization_guard;
pub mod organization_service;
pub mod relationship_service;
pub mod transaction_service;

pub use error::{EngineError, EngineResult};

/// Default number of rows returned by LIST calls.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;
/// Upper bound accepted for LIST calls.
pub const MAX_PAGE_LIMIT: u32 = 500;

/// What a DELETE request actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeleteOutcome {
    #[serde(rename = "DELETE")]
    Deleted,
    #[serde(rename = "ARCHIVE")]
    Archived,
}

impl DeleteOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deleted => "DELETE",
            Self::Archived => "ARCHIVE",
        }
    }
}

/// Pagination bounds applied to caller-supplied limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for PageLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_PAGE_LIMIT,
            max_limit: MAX_PAGE_LIMIT,
        }
    }
}

impl PageLimits {
    /// Clamps `limit` into `1..=max_limit`, using the default when absent.
    pub fn page(&self, limit: Option<u32>, offset: Option<u32>) -> Page {
        let limit = match limit {
            Some(0) | None => self.default_limit,
            Some(value) => value.min(self.max_limit),
        };
        Page {
            limit: Some(limit.max(1)),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Opens the write transaction for one atomic unit.
pub(crate) fn begin_unit(conn: &Connection) -> EngineResult<Transaction<'_>> {
    Ok(Transaction::new_unchecked(
        conn,
        TransactionBehavior::Immediate,
    )?)
}

/// Trims `value` and rejects blank input.
pub(crate) fn require_text(value: &str, field: &str) -> EngineResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Shallow-merges object keys of `patch` into `target`; non-object values
/// replace `target` wholesale.
pub(crate) fn merge_json_object(target: &mut Value, patch: Value) {
    match patch {
        Value::Null => {}
        Value::Object(incoming) => match target {
            Value::Object(existing) => {
                for (key, value) in incoming {
                    existing.insert(key, value);
                }
            }
            other => *other = Value::Object(incoming),
        },
        incoming => *target = incoming,
    }
}

/// Stores `null` JSON payloads as empty objects.
pub(crate) fn normalize_object(value: Value) -> Value {
    match value {
        Value::Null => Value::Object(Map::new()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::{merge_json_object, require_text, PageLimits};
    use serde_json::json;

    #[test]
    fn page_limits_apply_default_and_cap() {
        let limits = PageLimits::default();
        assert_eq!(limits.page(None, None).limit, Some(50));
        assert_eq!(limits.page(Some(0), None).limit, Some(50));
        assert_eq!(limits.page(Some(10_000), Some(5)).limit, Some(500));
        assert_eq!(limits.page(Some(10), Some(5)).offset, 5);
    }

    #[test]
    fn merge_keeps_untouched_keys() {
        let mut metadata = json!({ "channel": "web", "priority": 1 });
        merge_json_object(&mut metadata, json!({ "priority": 2, "approved_by": "ops" }));
        assert_eq!(
            metadata,
            json!({ "channel": "web", "priority": 2, "approved_by": "ops" })
        );

        merge_json_object(&mut metadata, json!(null));
        assert_eq!(metadata["channel"], json!("web"));
    }

    #[test]
    fn require_text_rejects_blank() {
        assert_eq!(require_text("  Widget ", "entity_name").expect("name"), "Widget");
        let err = require_text("   ", "entity_name").expect_err("blank");
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }
}
