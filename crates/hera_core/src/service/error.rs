//! Engine-level error taxonomy.
//!
//! # Responsibility
//! - Collapse repository, smart code, attribute and guard failures into one
//!   error type for orchestrator callers.
//! - Map every variant to a stable envelope code.
//!
//! # Invariants
//! - Raw SQLite unique violations never escape as `DATABASE_ERROR`; they are
//!   translated to the matching conflict code.

use crate::model::dynamic::DynamicFieldError;
use crate::model::organization::OrganizationId;
use crate::repo::RepoError;
use crate::smart_code::code::SmartCodeError;
use crate::smart_code::registry::GuardViolation;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type EngineResult<T> = Result<T, EngineError>;

/// Error returned by every service and orchestrator operation.
#[derive(Debug)]
pub enum EngineError {
    /// Missing or malformed input detected before any write.
    Validation(String),
    SmartCode(SmartCodeError),
    OrgNotFound(OrganizationId),
    OrgInactive(OrganizationId),
    NotFound {
        kind: &'static str,
        id: Option<Uuid>,
    },
    Unbalanced {
        debit_total: f64,
        credit_total: f64,
    },
    DuplicateCode(String),
    VersionConflict {
        id: Uuid,
        expected: i64,
        actual: i64,
    },
    ActiveEdgeConflict(String),
    TransactionImmutable(Uuid),
    DeleteNotPermitted {
        id: Uuid,
        reason: String,
    },
    /// Envelope could not be parsed or names an unsupported action.
    InvalidRequest(String),
    Repo(RepoError),
}

impl EngineError {
    /// Stable code reported in the response envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::SmartCode(_) => "ERR_SMART_CODE_FORMAT",
            Self::OrgNotFound(_) => "ORG_NOT_FOUND",
            Self::OrgInactive(_) => "ORG_INACTIVE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Unbalanced { .. } => "UNBALANCED_ENTRY",
            Self::DuplicateCode(_) => "DUPLICATE_CODE",
            Self::VersionConflict { .. } => "VERSION_CONFLICT",
            Self::ActiveEdgeConflict(_) => "ACTIVE_EDGE_CONFLICT",
            Self::TransactionImmutable(_) => "TRANSACTION_IMMUTABLE",
            Self::DeleteNotPermitted { .. } => "DELETE_NOT_PERMITTED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Repo(_) => "DATABASE_ERROR",
        }
    }

    pub(crate) fn not_found(kind: &'static str, id: Uuid) -> Self {
        Self::NotFound { kind, id: Some(id) }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(message) => write!(f, "{message}"),
            Self::SmartCode(err) => write!(f, "{err}"),
            Self::OrgNotFound(id) => write!(f, "organization not found: {id}"),
            Self::OrgInactive(id) => write!(f, "organization is not active: {id}"),
            Self::NotFound { kind, id: Some(id) } => write!(f, "{kind} not found: {id}"),
            Self::NotFound { kind, id: None } => write!(f, "no {kind} matches the request"),
            Self::Unbalanced {
                debit_total,
                credit_total,
            } => write!(
                f,
                "ledger entry is unbalanced: debit total {debit_total:.2}, credit total {credit_total:.2}"
            ),
            Self::DuplicateCode(message) => write!(f, "duplicate code: {message}"),
            Self::VersionConflict {
                id,
                expected,
                actual,
            } => write!(
                f,
                "entity {id} is at version {actual}, request expected {expected}"
            ),
            Self::ActiveEdgeConflict(message) => write!(f, "{message}"),
            Self::TransactionImmutable(id) => {
                write!(f, "transaction {id} is voided and can no longer change")
            }
            Self::DeleteNotPermitted { id, reason } => {
                write!(f, "delete of {id} is not permitted: {reason}")
            }
            Self::InvalidRequest(message) => write!(f, "invalid request: {message}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SmartCode(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound { kind, id } => Self::not_found(kind, id),
            RepoError::VersionConflict {
                id,
                expected,
                actual,
            } => Self::VersionConflict {
                id,
                expected,
                actual,
            },
            RepoError::UniqueViolation(message) => unique_violation(message),
            other => Self::Repo(other),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(value: rusqlite::Error) -> Self {
        RepoError::from(value).into()
    }
}

impl From<SmartCodeError> for EngineError {
    fn from(value: SmartCodeError) -> Self {
        Self::SmartCode(value)
    }
}

impl From<DynamicFieldError> for EngineError {
    fn from(value: DynamicFieldError) -> Self {
        match value {
            DynamicFieldError::SmartCode(err) => Self::SmartCode(err),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<GuardViolation> for EngineError {
    fn from(value: GuardViolation) -> Self {
        match value {
            GuardViolation::Unbalanced {
                debit_total,
                credit_total,
            } => Self::Unbalanced {
                debit_total,
                credit_total,
            },
            other => Self::Validation(other.to_string()),
        }
    }
}

fn unique_violation(message: String) -> EngineError {
    if message.contains("relationships.") {
        return EngineError::ActiveEdgeConflict(format!(
            "another active edge already exists: {message}"
        ));
    }
    EngineError::DuplicateCode(message)
}

#[cfg(test)]
mod tests {
    use super::EngineError;
    use crate::repo::RepoError;
    use crate::smart_code::registry::GuardViolation;
    use uuid::Uuid;

    #[test]
    fn unique_violations_map_to_conflict_codes() {
        let edge: EngineError = RepoError::UniqueViolation(
            "UNIQUE constraint failed: relationships.organization_id, relationships.from_entity_id, relationships.relationship_type".to_string(),
        )
        .into();
        assert_eq!(edge.code(), "ACTIVE_EDGE_CONFLICT");

        let code: EngineError = RepoError::UniqueViolation(
            "UNIQUE constraint failed: entities.organization_id, entities.entity_type, entities.entity_code".to_string(),
        )
        .into();
        assert_eq!(code.code(), "DUPLICATE_CODE");
    }

    #[test]
    fn repo_not_found_and_version_conflict_keep_their_codes() {
        let id = Uuid::new_v4();
        let missing: EngineError = RepoError::NotFound { kind: "entity", id }.into();
        assert_eq!(missing.code(), "NOT_FOUND");

        let stale: EngineError = RepoError::VersionConflict {
            id,
            expected: 1,
            actual: 2,
        }
        .into();
        assert_eq!(stale.code(), "VERSION_CONFLICT");
    }

    #[test]
    fn guard_violations_split_into_balance_and_validation() {
        let unbalanced: EngineError = GuardViolation::Unbalanced {
            debit_total: 100.0,
            credit_total: 90.0,
        }
        .into();
        assert_eq!(unbalanced.code(), "UNBALANCED_ENTRY");
        assert!(unbalanced.to_string().contains("100.00"));

        let invalid: EngineError = GuardViolation::InvalidLine {
            line_number: 2,
            message: "missing side".to_string(),
        }
        .into();
        assert_eq!(invalid.code(), "VALIDATION_ERROR");
    }
}
