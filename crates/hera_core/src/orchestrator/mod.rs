//! CRUD orchestrator: the single envelope entry point per noun.
//!
//! # Responsibility
//! - Parse request envelopes into typed service inputs.
//! - Route each action to the owning service and wrap the result.
//!
//! # Invariants
//! - Every call yields exactly one `ResponseEnvelope`; failures never panic.
//! - Logs carry ids, actions and error codes only, never payload values.

use crate::service::error::{EngineError, EngineResult};
use crate::service::PageLimits;
use crate::smart_code::registry::SmartCodeRegistry;
use log::{info, warn};
use rusqlite::Connection;
use serde_json::Value;
use std::time::Instant;

mod entity;
pub mod envelope;
mod organization;
mod relationship;
mod transaction;

pub use envelope::{
    CrudAction, ListData, RequestEnvelope, RequestOptions, RequestPayload, ResponseEnvelope,
};

/// Resource family addressed by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Noun {
    Entity,
    Relationship,
    Transaction,
    Organization,
}

impl Noun {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Relationship => "relationship",
            Self::Transaction => "transaction",
            Self::Organization => "organization",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "entity" | "entities" => Some(Self::Entity),
            "relationship" | "relationships" => Some(Self::Relationship),
            "transaction" | "transactions" => Some(Self::Transaction),
            "organization" | "organizations" => Some(Self::Organization),
            _ => None,
        }
    }
}

/// Envelope dispatcher bound to one connection and registry.
pub struct Orchestrator<'a> {
    conn: &'a Connection,
    registry: &'a SmartCodeRegistry,
    limits: PageLimits,
}

impl<'a> Orchestrator<'a> {
    pub fn new(conn: &'a Connection, registry: &'a SmartCodeRegistry) -> Self {
        Self {
            conn,
            registry,
            limits: PageLimits::default(),
        }
    }

    pub fn with_page_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn entity(&self, request: RequestEnvelope) -> ResponseEnvelope {
        self.dispatch(Noun::Entity, request)
    }

    pub fn relationship(&self, request: RequestEnvelope) -> ResponseEnvelope {
        self.dispatch(Noun::Relationship, request)
    }

    pub fn transaction(&self, request: RequestEnvelope) -> ResponseEnvelope {
        self.dispatch(Noun::Transaction, request)
    }

    pub fn organization(&self, request: RequestEnvelope) -> ResponseEnvelope {
        self.dispatch(Noun::Organization, request)
    }

    /// Parses a JSON envelope and dispatches it.
    pub fn dispatch_json(&self, noun: Noun, raw: &str) -> ResponseEnvelope {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(err) => {
                return self.reject(
                    noun,
                    "",
                    EngineError::InvalidRequest(format!("request is not valid JSON: {err}")),
                )
            }
        };
        let action = value
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_uppercase();
        match serde_json::from_value::<RequestEnvelope>(value) {
            Ok(request) => self.dispatch(noun, request),
            Err(err) => self.reject(noun, &action, EngineError::InvalidRequest(err.to_string())),
        }
    }

    /// Routes one envelope to its noun handler.
    pub fn dispatch(&self, noun: Noun, request: RequestEnvelope) -> ResponseEnvelope {
        let started_at = Instant::now();
        let action_text = request.action.trim().to_ascii_uppercase();
        let organization_id = request
            .organization_id
            .map_or_else(|| "none".to_string(), |id| id.to_string());

        let result = match CrudAction::parse(&action_text) {
            Some(action) => self.route(noun, action, request),
            None => Err(EngineError::InvalidRequest(format!(
                "unknown action `{}`",
                request.action
            ))),
        };
        let duration_ms = started_at.elapsed().as_millis();

        match result {
            Ok(data) => {
                info!(
                    "event=crud_dispatch module=orchestrator status=ok noun={} action={} organization_id={} duration_ms={}",
                    noun.as_str(),
                    action_text,
                    organization_id,
                    duration_ms
                );
                ResponseEnvelope::ok(action_text, data)
            }
            Err(err) => {
                warn!(
                    "event=crud_dispatch module=orchestrator status=error noun={} action={} organization_id={} error_code={} duration_ms={}",
                    noun.as_str(),
                    action_text,
                    organization_id,
                    err.code(),
                    duration_ms
                );
                ResponseEnvelope::failure(action_text, &err)
            }
        }
    }

    fn route(
        &self,
        noun: Noun,
        action: CrudAction,
        request: RequestEnvelope,
    ) -> EngineResult<Value> {
        match noun {
            Noun::Entity => entity::handle(self, action, request),
            Noun::Relationship => relationship::handle(self, action, request),
            Noun::Transaction => transaction::handle(self, action, request),
            Noun::Organization => organization::handle(self, action, request),
        }
    }

    fn reject(&self, noun: Noun, action: &str, err: EngineError) -> ResponseEnvelope {
        warn!(
            "event=crud_dispatch module=orchestrator status=error noun={} action={} error_code={}",
            noun.as_str(),
            if action.is_empty() { "none" } else { action },
            err.code()
        );
        ResponseEnvelope::failure(action, &err)
    }
}

fn unsupported(noun: Noun, action: CrudAction) -> EngineError {
    EngineError::InvalidRequest(format!(
        "{} does not support {}",
        noun.as_str(),
        action.as_str()
    ))
}

#[cfg(test)]
mod tests {
    use super::{Noun, Orchestrator};
    use crate::db::open_db_in_memory;
    use crate::smart_code::registry::SmartCodeRegistry;

    #[test]
    fn malformed_json_is_an_invalid_request() {
        let conn = open_db_in_memory().expect("db");
        let registry = SmartCodeRegistry::default();
        let orchestrator = Orchestrator::new(&conn, &registry);

        let response = orchestrator.dispatch_json(Noun::Entity, "{ not json");
        assert!(!response.success);
        assert_eq!(response.error_code(), Some("INVALID_REQUEST"));
    }

    #[test]
    fn unknown_actions_and_unsupported_pairs_are_rejected() {
        let conn = open_db_in_memory().expect("db");
        let registry = SmartCodeRegistry::default();
        let orchestrator = Orchestrator::new(&conn, &registry);

        let response =
            orchestrator.dispatch_json(Noun::Entity, r#"{ "action": "UPSERT", "organization_id": null }"#);
        assert_eq!(response.error_code(), Some("INVALID_REQUEST"));
        assert_eq!(response.action, "UPSERT");

        let response = orchestrator.dispatch_json(Noun::Entity, r#"{ "action": "VOID" }"#);
        assert_eq!(response.error_code(), Some("INVALID_REQUEST"));
    }

    #[test]
    fn nouns_parse_singular_and_plural() {
        assert_eq!(Noun::parse("Entities"), Some(Noun::Entity));
        assert_eq!(Noun::parse("transaction"), Some(Noun::Transaction));
        assert_eq!(Noun::parse("ledger"), None);
    }
}
