//! HERA universal business data engine.
//!
//! Organizations, entities, dynamic attributes, relationships and
//! transactions live in six universal tables. Smart codes decide which
//! business rules apply to a row; the CRUD orchestrator exposes every
//! operation through one request/response envelope.

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod repo;
pub mod service;
pub mod smart_code;

pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status};
pub use orchestrator::{
    CrudAction, ListData, Noun, Orchestrator, RequestEnvelope, RequestOptions, RequestPayload,
    ResponseEnvelope,
};
pub use repo::{Page, RepoError, RepoResult};
pub use service::entity_service::EntityService;
pub use service::organization_service::OrganizationService;
pub use service::relationship_service::RelationshipGraph;
pub use service::transaction_service::TransactionService;
pub use service::{DeleteOutcome, EngineError, EngineResult, PageLimits};
pub use smart_code::code::{SmartCode, SmartCodeError};
pub use smart_code::registry::{SmartCodeBehavior, SmartCodeRegistry};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
