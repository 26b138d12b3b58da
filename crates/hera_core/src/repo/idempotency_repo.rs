//! Idempotency key ledger for replay-safe CREATE calls.
//!
//! # Invariants
//! - A key maps to exactly one record per `(organization_id, scope)`.
//! - Keys are recorded in the same transaction as the record they point at,
//!   so a rolled-back CREATE leaves no key behind.

use crate::model::organization::OrganizationId;
use crate::repo::{ensure_connection_ready, parse_uuid, RepoResult};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

/// Namespace of an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdempotencyScope {
    Entity,
    Transaction,
}

impl IdempotencyScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Transaction => "transaction",
        }
    }
}

/// Repository interface for idempotency keys.
pub trait IdempotencyRepository {
    fn lookup_key(
        &self,
        organization_id: OrganizationId,
        scope: IdempotencyScope,
        key: &str,
    ) -> RepoResult<Option<Uuid>>;
    fn record_key(
        &self,
        organization_id: OrganizationId,
        scope: IdempotencyScope,
        key: &str,
        record_id: Uuid,
        created_at: i64,
    ) -> RepoResult<()>;
    /// Drops every key pointing at `record_id` (used when the record is
    /// physically deleted).
    fn forget_record(
        &self,
        organization_id: OrganizationId,
        scope: IdempotencyScope,
        record_id: Uuid,
    ) -> RepoResult<()>;
}

/// SQLite-backed idempotency repository.
pub struct SqliteIdempotencyRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteIdempotencyRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["idempotency_keys"])?;
        Ok(Self { conn })
    }

    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl IdempotencyRepository for SqliteIdempotencyRepository<'_> {
    fn lookup_key(
        &self,
        organization_id: OrganizationId,
        scope: IdempotencyScope,
        key: &str,
    ) -> RepoResult<Option<Uuid>> {
        let record: Option<String> = self
            .conn
            .query_row(
                "SELECT record_id FROM idempotency_keys
                 WHERE organization_id = ?1 AND scope = ?2 AND idempotency_key = ?3;",
                params![organization_id.to_string(), scope.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        record
            .map(|text| parse_uuid(&text, "idempotency_keys.record_id"))
            .transpose()
    }

    fn record_key(
        &self,
        organization_id: OrganizationId,
        scope: IdempotencyScope,
        key: &str,
        record_id: Uuid,
        created_at: i64,
    ) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO idempotency_keys (
                organization_id, scope, idempotency_key, record_id, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                organization_id.to_string(),
                scope.as_str(),
                key,
                record_id.to_string(),
                created_at
            ],
        )?;
        Ok(())
    }

    fn forget_record(
        &self,
        organization_id: OrganizationId,
        scope: IdempotencyScope,
        record_id: Uuid,
    ) -> RepoResult<()> {
        self.conn.execute(
            "DELETE FROM idempotency_keys
             WHERE organization_id = ?1 AND scope = ?2 AND record_id = ?3;",
            params![organization_id.to_string(), scope.as_str(), record_id.to_string()],
        )?;
        Ok(())
    }
}
