//! Transaction header/line repository.
//!
//! # Responsibility
//! - Persist transaction headers and their immutable lines.
//! - Answer the reference questions behind the delete policy.
//!
//! # Invariants
//! - Lines are only inserted together with their header and are never
//!   updated.
//! - Header updates touch lifecycle and annotation columns only.

use crate::model::organization::OrganizationId;
use crate::model::status::TransactionStatus;
use crate::model::transaction::{TransactionHeader, TransactionId, TransactionLine};
use crate::repo::{
    ensure_connection_ready, json_to_db, optional_uuid_to_db, parse_json, parse_optional_uuid,
    parse_uuid, push_pagination, Page, RepoError, RepoResult,
};
use crate::smart_code::code::SmartCode;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use uuid::Uuid;

const HEADER_SELECT_SQL: &str = "SELECT
    id,
    organization_id,
    transaction_type,
    transaction_code,
    transaction_date,
    status,
    total_amount,
    currency,
    smart_code,
    source_entity_id,
    target_entity_id,
    reference_transaction_id,
    description,
    metadata,
    void_reason,
    voided_at,
    idempotency_key,
    created_by,
    updated_by,
    created_at,
    updated_at
FROM transaction_headers";

const LINE_SELECT_SQL: &str = "SELECT
    id,
    organization_id,
    transaction_id,
    line_number,
    line_type,
    entity_id,
    description,
    quantity,
    unit_amount,
    line_amount,
    smart_code,
    line_data,
    created_at
FROM transaction_lines";

/// Filter options for header listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionListQuery {
    pub transaction_type: Option<String>,
    pub status: Option<TransactionStatus>,
    pub smart_code: Option<String>,
    pub source_entity_id: Option<Uuid>,
    pub target_entity_id: Option<Uuid>,
    /// Inclusive `YYYY-MM-DD` lower bound.
    pub date_from: Option<String>,
    /// Inclusive `YYYY-MM-DD` upper bound.
    pub date_to: Option<String>,
    /// Audit mode: also return voided and cancelled headers.
    pub include_hidden: bool,
    pub page: Page,
}

/// Repository interface for transaction rows.
pub trait TransactionRepository {
    fn insert_header(&self, header: &TransactionHeader) -> RepoResult<()>;
    fn insert_line(&self, line: &TransactionLine) -> RepoResult<()>;
    fn get_header(
        &self,
        organization_id: OrganizationId,
        id: TransactionId,
    ) -> RepoResult<Option<TransactionHeader>>;
    fn list_lines(
        &self,
        organization_id: OrganizationId,
        transaction_id: TransactionId,
    ) -> RepoResult<Vec<TransactionLine>>;
    fn list_headers(
        &self,
        organization_id: OrganizationId,
        query: &TransactionListQuery,
    ) -> RepoResult<Vec<TransactionHeader>>;
    /// Persists the mutable header columns of `header`.
    fn update_header(&self, header: &TransactionHeader) -> RepoResult<()>;
    /// Removes header and lines.
    fn delete_transaction(
        &self,
        organization_id: OrganizationId,
        id: TransactionId,
    ) -> RepoResult<()>;
    /// Returns whether another header names `id` as its reference transaction.
    fn is_referenced_by_other(
        &self,
        organization_id: OrganizationId,
        id: TransactionId,
    ) -> RepoResult<bool>;
    fn transaction_code_exists(
        &self,
        organization_id: OrganizationId,
        transaction_code: &str,
    ) -> RepoResult<bool>;
    fn count_transactions(&self, organization_id: OrganizationId) -> RepoResult<i64>;
}

/// SQLite-backed transaction repository.
pub struct SqliteTransactionRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTransactionRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["transaction_headers", "transaction_lines"])?;
        Ok(Self { conn })
    }

    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TransactionRepository for SqliteTransactionRepository<'_> {
    fn insert_header(&self, header: &TransactionHeader) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO transaction_headers (
                id,
                organization_id,
                transaction_type,
                transaction_code,
                transaction_date,
                status,
                total_amount,
                currency,
                smart_code,
                source_entity_id,
                target_entity_id,
                reference_transaction_id,
                description,
                metadata,
                void_reason,
                voided_at,
                idempotency_key,
                created_by,
                updated_by,
                created_at,
                updated_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21
            );",
            params![
                header.id.to_string(),
                header.organization_id.to_string(),
                header.transaction_type.as_str(),
                header.transaction_code.as_str(),
                header.transaction_date.as_str(),
                header.status.as_str(),
                header.total_amount,
                header.currency.as_str(),
                header.smart_code.as_str(),
                optional_uuid_to_db(header.source_entity_id),
                optional_uuid_to_db(header.target_entity_id),
                optional_uuid_to_db(header.reference_transaction_id),
                header.description.as_deref(),
                json_to_db(&header.metadata),
                header.void_reason.as_deref(),
                header.voided_at,
                header.idempotency_key.as_deref(),
                optional_uuid_to_db(header.created_by),
                optional_uuid_to_db(header.updated_by),
                header.created_at,
                header.updated_at,
            ],
        )?;
        Ok(())
    }

    fn insert_line(&self, line: &TransactionLine) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO transaction_lines (
                id,
                organization_id,
                transaction_id,
                line_number,
                line_type,
                entity_id,
                description,
                quantity,
                unit_amount,
                line_amount,
                smart_code,
                line_data,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
            params![
                line.id.to_string(),
                line.organization_id.to_string(),
                line.transaction_id.to_string(),
                line.line_number,
                line.line_type.as_str(),
                optional_uuid_to_db(line.entity_id),
                line.description.as_deref(),
                line.quantity,
                line.unit_amount,
                line.line_amount,
                line.smart_code.as_ref().map(SmartCode::as_str),
                json_to_db(&line.line_data),
                line.created_at,
            ],
        )?;
        Ok(())
    }

    fn get_header(
        &self,
        organization_id: OrganizationId,
        id: TransactionId,
    ) -> RepoResult<Option<TransactionHeader>> {
        let mut stmt = self.conn.prepare(&format!(
            "{HEADER_SELECT_SQL} WHERE id = ?1 AND organization_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![id.to_string(), organization_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_header_row(row)?));
        }
        Ok(None)
    }

    fn list_lines(
        &self,
        organization_id: OrganizationId,
        transaction_id: TransactionId,
    ) -> RepoResult<Vec<TransactionLine>> {
        let mut stmt = self.conn.prepare(&format!(
            "{LINE_SELECT_SQL}
             WHERE organization_id = ?1 AND transaction_id = ?2
             ORDER BY line_number ASC;"
        ))?;
        let mut rows = stmt.query(params![
            organization_id.to_string(),
            transaction_id.to_string()
        ])?;
        let mut lines = Vec::new();
        while let Some(row) = rows.next()? {
            lines.push(parse_line_row(row)?);
        }
        Ok(lines)
    }

    fn list_headers(
        &self,
        organization_id: OrganizationId,
        query: &TransactionListQuery,
    ) -> RepoResult<Vec<TransactionHeader>> {
        let mut sql = format!("{HEADER_SELECT_SQL} WHERE organization_id = ?");
        let mut binds: Vec<SqlValue> = vec![SqlValue::Text(organization_id.to_string())];

        if !query.include_hidden {
            sql.push_str(" AND status NOT IN ('voided', 'cancelled')");
        }
        let equality_filters = [
            ("transaction_type", query.transaction_type.clone()),
            ("status", query.status.map(|status| status.as_str().to_string())),
            ("smart_code", query.smart_code.clone()),
            (
                "source_entity_id",
                query.source_entity_id.map(|id| id.to_string()),
            ),
            (
                "target_entity_id",
                query.target_entity_id.map(|id| id.to_string()),
            ),
        ];
        for (column, value) in equality_filters {
            if let Some(value) = value {
                sql.push_str(&format!(" AND {column} = ?"));
                binds.push(SqlValue::Text(value));
            }
        }
        if let Some(date_from) = query.date_from.as_deref() {
            sql.push_str(" AND transaction_date >= ?");
            binds.push(SqlValue::Text(date_from.to_string()));
        }
        if let Some(date_to) = query.date_to.as_deref() {
            sql.push_str(" AND transaction_date <= ?");
            binds.push(SqlValue::Text(date_to.to_string()));
        }

        sql.push_str(" ORDER BY transaction_date DESC, created_at DESC, id ASC");
        push_pagination(&mut sql, &mut binds, query.page);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut headers = Vec::new();
        while let Some(row) = rows.next()? {
            headers.push(parse_header_row(row)?);
        }
        Ok(headers)
    }

    fn update_header(&self, header: &TransactionHeader) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE transaction_headers
             SET
                status = ?3,
                description = ?4,
                transaction_date = ?5,
                metadata = ?6,
                void_reason = ?7,
                voided_at = ?8,
                updated_by = ?9,
                updated_at = ?10
             WHERE id = ?1 AND organization_id = ?2;",
            params![
                header.id.to_string(),
                header.organization_id.to_string(),
                header.status.as_str(),
                header.description.as_deref(),
                header.transaction_date.as_str(),
                json_to_db(&header.metadata),
                header.void_reason.as_deref(),
                header.voided_at,
                optional_uuid_to_db(header.updated_by),
                header.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                kind: "transaction",
                id: header.id,
            });
        }
        Ok(())
    }

    fn delete_transaction(
        &self,
        organization_id: OrganizationId,
        id: TransactionId,
    ) -> RepoResult<()> {
        self.conn.execute(
            "DELETE FROM transaction_lines WHERE organization_id = ?1 AND transaction_id = ?2;",
            params![organization_id.to_string(), id.to_string()],
        )?;
        let changed = self.conn.execute(
            "DELETE FROM transaction_headers WHERE organization_id = ?1 AND id = ?2;",
            params![organization_id.to_string(), id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                kind: "transaction",
                id,
            });
        }
        Ok(())
    }

    fn is_referenced_by_other(
        &self,
        organization_id: OrganizationId,
        id: TransactionId,
    ) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM transaction_headers
                WHERE organization_id = ?1
                  AND reference_transaction_id = ?2
                  AND id <> ?2
            );",
            params![organization_id.to_string(), id.to_string()],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn transaction_code_exists(
        &self,
        organization_id: OrganizationId,
        transaction_code: &str,
    ) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM transaction_headers
                WHERE organization_id = ?1 AND transaction_code = ?2
            );",
            params![organization_id.to_string(), transaction_code],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn count_transactions(&self, organization_id: OrganizationId) -> RepoResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM transaction_headers WHERE organization_id = ?1;",
            [organization_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn parse_smart_code(text: &str, column: &'static str) -> RepoResult<SmartCode> {
    SmartCode::parse(text).map_err(|err| RepoError::InvalidData(format!("{err} in {column}")))
}

fn parse_header_row(row: &Row<'_>) -> RepoResult<TransactionHeader> {
    let id_text: String = row.get("id")?;
    let organization_text: String = row.get("organization_id")?;
    let smart_code_text: String = row.get("smart_code")?;
    let metadata_text: String = row.get("metadata")?;

    let status_text: String = row.get("status")?;
    let status = TransactionStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in transaction_headers.status"
        ))
    })?;

    Ok(TransactionHeader {
        id: parse_uuid(&id_text, "transaction_headers.id")?,
        organization_id: parse_uuid(&organization_text, "transaction_headers.organization_id")?,
        transaction_type: row.get("transaction_type")?,
        transaction_code: row.get("transaction_code")?,
        transaction_date: row.get("transaction_date")?,
        status,
        total_amount: row.get("total_amount")?,
        currency: row.get("currency")?,
        smart_code: parse_smart_code(&smart_code_text, "transaction_headers.smart_code")?,
        source_entity_id: parse_optional_uuid(
            row.get("source_entity_id")?,
            "transaction_headers.source_entity_id",
        )?,
        target_entity_id: parse_optional_uuid(
            row.get("target_entity_id")?,
            "transaction_headers.target_entity_id",
        )?,
        reference_transaction_id: parse_optional_uuid(
            row.get("reference_transaction_id")?,
            "transaction_headers.reference_transaction_id",
        )?,
        description: row.get("description")?,
        metadata: parse_json(&metadata_text, "transaction_headers.metadata")?,
        void_reason: row.get("void_reason")?,
        voided_at: row.get("voided_at")?,
        idempotency_key: row.get("idempotency_key")?,
        created_by: parse_optional_uuid(row.get("created_by")?, "transaction_headers.created_by")?,
        updated_by: parse_optional_uuid(row.get("updated_by")?, "transaction_headers.updated_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_line_row(row: &Row<'_>) -> RepoResult<TransactionLine> {
    let id_text: String = row.get("id")?;
    let organization_text: String = row.get("organization_id")?;
    let transaction_text: String = row.get("transaction_id")?;
    let line_data_text: String = row.get("line_data")?;

    let smart_code = row
        .get::<_, Option<String>>("smart_code")?
        .map(|text| parse_smart_code(&text, "transaction_lines.smart_code"))
        .transpose()?;

    Ok(TransactionLine {
        id: parse_uuid(&id_text, "transaction_lines.id")?,
        organization_id: parse_uuid(&organization_text, "transaction_lines.organization_id")?,
        transaction_id: parse_uuid(&transaction_text, "transaction_lines.transaction_id")?,
        line_number: row.get("line_number")?,
        line_type: row.get("line_type")?,
        entity_id: parse_optional_uuid(row.get("entity_id")?, "transaction_lines.entity_id")?,
        description: row.get("description")?,
        quantity: row.get("quantity")?,
        unit_amount: row.get("unit_amount")?,
        line_amount: row.get("line_amount")?,
        smart_code,
        line_data: parse_json(&line_data_text, "transaction_lines.line_data")?,
        created_at: row.get("created_at")?,
    })
}
