//! Request/response envelope types shared by every noun.
//!
//! # Invariants
//! - Responses are flat: `data` carries the typed result directly.
//! - `error` holds the stable error code, `error_detail` the message.

use crate::model::status::RecordStatus;
use crate::orchestrator::Noun;
use crate::service::error::{EngineError, EngineResult};
use crate::smart_code::code::SmartCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Verb of one envelope call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrudAction {
    Create,
    Read,
    Update,
    Delete,
    Void,
    Archive,
    List,
}

impl CrudAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Read => "READ",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Void => "VOID",
            Self::Archive => "ARCHIVE",
            Self::List => "LIST",
        }
    }

    /// Parses an action name case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CREATE" => Some(Self::Create),
            "READ" => Some(Self::Read),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "VOID" => Some(Self::Void),
            "ARCHIVE" => Some(Self::Archive),
            "LIST" => Some(Self::List),
            _ => None,
        }
    }
}

/// Incoming call.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RequestEnvelope {
    pub action: String,
    #[serde(default)]
    pub actor_user_id: Option<Uuid>,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub payload: RequestPayload,
    #[serde(default)]
    pub options: RequestOptions,
}

impl RequestEnvelope {
    pub fn new(action: CrudAction, organization_id: Option<Uuid>) -> Self {
        Self {
            action: action.as_str().to_string(),
            organization_id,
            ..Self::default()
        }
    }

    /// Returns the organization id or a validation error.
    pub(crate) fn require_organization(&self) -> EngineResult<Uuid> {
        self.organization_id
            .ok_or_else(|| EngineError::validation("organization_id is required"))
    }
}

/// Sections a request may carry; each noun reads the ones it understands.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestPayload {
    pub organization: Option<Value>,
    pub entity: Option<Value>,
    pub dynamic: Option<Map<String, Value>>,
    pub relationships: Option<Vec<Value>>,
    pub relationship: Option<Value>,
    pub header: Option<Value>,
    pub lines: Option<Vec<Value>>,
    pub patch: Option<Value>,
    pub reason: Option<String>,
}

/// Read and pagination switches.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RequestOptions {
    /// An id string, or an object of equality predicates.
    #[serde(rename = "where")]
    pub filter: Option<Value>,
    pub include_relationships: bool,
    /// Audit mode.
    pub include_deleted: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl RequestOptions {
    /// Id named by `where` (string or `{ "id": ... }`), if any.
    pub(crate) fn where_id(&self) -> EngineResult<Option<Uuid>> {
        match self.filter.as_ref() {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => parse_id(text, "where").map(Some),
            Some(Value::Object(map)) => match map.get("id") {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(text)) => parse_id(text, "where.id").map(Some),
                Some(_) => Err(EngineError::validation("where.id must be a uuid string")),
            },
            Some(_) => Err(EngineError::validation(
                "where must be an id string or a predicate object",
            )),
        }
    }

    /// Predicate object of `where`, deserialized into `T`.
    pub(crate) fn where_predicate<T: DeserializeOwned + Default>(&self) -> EngineResult<T> {
        match self.filter.as_ref() {
            Some(value @ Value::Object(_)) => decode_section(Some(value.clone()), "where"),
            _ => Ok(T::default()),
        }
    }

    pub(crate) fn has_predicate(&self) -> bool {
        matches!(self.filter.as_ref(), Some(Value::Object(map)) if !map.is_empty())
    }
}

/// Outgoing result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ResponseEnvelope {
    pub fn ok(action: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            action: action.into(),
            data: Some(data),
            error: None,
            error_detail: None,
        }
    }

    pub fn failure(action: impl Into<String>, err: &EngineError) -> Self {
        Self {
            success: false,
            action: action.into(),
            data: None,
            error: Some(err.code().to_string()),
            error_detail: Some(err.to_string()),
        }
    }

    /// Error code of a failed response.
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Paged LIST result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListData<T: Serialize> {
    pub items: Vec<T>,
    pub count: usize,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Deserializes one payload section, treating a missing section as empty.
pub(crate) fn decode_section<T: DeserializeOwned + Default>(
    value: Option<Value>,
    section: &str,
) -> EngineResult<T> {
    match value {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|err| EngineError::validation(format!("invalid {section}: {err}"))),
    }
}

/// Like `decode_section`, but the section must be present.
pub(crate) fn require_section<T: DeserializeOwned + Default>(
    value: Option<Value>,
    section: &str,
) -> EngineResult<T> {
    match value {
        None | Some(Value::Null) => Err(EngineError::validation(format!(
            "payload.{section} is required"
        ))),
        some => decode_section(some, section),
    }
}

/// Resolves the record id from `where`, falling back to the payload id.
pub(crate) fn target_id(
    options: &RequestOptions,
    fallback: Option<Uuid>,
    noun: Noun,
) -> EngineResult<Uuid> {
    options.where_id()?.or(fallback).ok_or_else(|| {
        EngineError::validation(format!("{} id is required in where.id", noun.as_str()))
    })
}

pub(crate) fn parse_id(text: &str, field: &str) -> EngineResult<Uuid> {
    Uuid::parse_str(text.trim())
        .map_err(|_| EngineError::validation(format!("{field} must be a uuid, got `{text}`")))
}

pub(crate) fn require_smart_code(value: Option<&str>) -> EngineResult<SmartCode> {
    let raw = value.ok_or_else(|| EngineError::validation("smart_code is required"))?;
    Ok(SmartCode::parse(raw)?)
}

pub(crate) fn optional_smart_code(value: Option<&str>) -> EngineResult<Option<SmartCode>> {
    value.map(SmartCode::parse).transpose().map_err(Into::into)
}

pub(crate) fn parse_record_status(value: Option<&str>) -> EngineResult<Option<RecordStatus>> {
    value
        .map(|raw| {
            RecordStatus::parse(raw)
                .ok_or_else(|| EngineError::validation(format!("unknown status `{raw}`")))
        })
        .transpose()
}

pub(crate) fn to_data<T: Serialize>(value: &T) -> EngineResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| EngineError::InvalidRequest(format!("failed to render response: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{CrudAction, RequestEnvelope, RequestOptions};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn actions_parse_case_insensitively() {
        assert_eq!(CrudAction::parse("create"), Some(CrudAction::Create));
        assert_eq!(CrudAction::parse(" VOID "), Some(CrudAction::Void));
        assert_eq!(CrudAction::parse("UPSERT"), None);
    }

    #[test]
    fn envelope_deserializes_with_defaults() {
        let org = Uuid::new_v4();
        let request: RequestEnvelope = serde_json::from_value(json!({
            "action": "READ",
            "organization_id": org.to_string(),
            "options": { "where": { "entity_code": "CUST-1" }, "include_deleted": true }
        }))
        .expect("envelope");

        assert_eq!(request.organization_id, Some(org));
        assert!(request.options.include_deleted);
        assert!(!request.options.include_relationships);
        assert!(request.options.has_predicate());
        assert_eq!(request.options.where_id().expect("where"), None);
        assert!(request.payload.entity.is_none());
    }

    #[test]
    fn where_accepts_bare_id_or_id_object() {
        let id = Uuid::new_v4();
        let bare = RequestOptions {
            filter: Some(json!(id.to_string())),
            ..RequestOptions::default()
        };
        assert_eq!(bare.where_id().expect("bare"), Some(id));

        let object = RequestOptions {
            filter: Some(json!({ "id": id.to_string() })),
            ..RequestOptions::default()
        };
        assert_eq!(object.where_id().expect("object"), Some(id));

        let bad = RequestOptions {
            filter: Some(json!("not-a-uuid")),
            ..RequestOptions::default()
        };
        assert_eq!(bad.where_id().expect_err("bad").code(), "VALIDATION_ERROR");
    }
}
