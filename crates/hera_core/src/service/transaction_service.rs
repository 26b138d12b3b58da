//! Transaction orchestrator service.
//!
//! # Responsibility
//! - Create headers and lines as one unit after smart code guards pass.
//! - Patch, void, delete and list transactions with audit-mode visibility.
//!
//! # Invariants
//! - Ledger-classified entries balance within the registry's epsilon before
//!   anything is written.
//! - Voided transactions never change again; only audit reads see them.
//! - Every mutation returns the row read back inside its own unit.

use crate::ledger::ledger_totals;
use crate::model::dynamic::is_iso_date;
use crate::model::entity::EntityId;
use crate::model::organization::OrganizationId;
use crate::model::status::TransactionStatus;
use crate::model::transaction::{
    LedgerSide, TransactionHeader, TransactionId, TransactionLine, TransactionRecord,
};
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::idempotency_repo::{
    IdempotencyRepository, IdempotencyScope, SqliteIdempotencyRepository,
};
use crate::repo::transaction_repo::{
    SqliteTransactionRepository, TransactionListQuery, TransactionRepository,
};
use crate::repo::{format_sequence_code, now_ms};
use crate::service::error::{EngineError, EngineResult};
use crate::service::organization_guard::resolve_organization;
use crate::service::{
    begin_unit, merge_json_object, normalize_object, require_text, DeleteOutcome,
};
use crate::smart_code::code::SmartCode;
use crate::smart_code::registry::SmartCodeRegistry;
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

const DEFAULT_CURRENCY: &str = "USD";

/// Header input for CREATE.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub transaction_type: String,
    /// Generated as `<TYPE>-<000001>` when absent.
    pub transaction_code: Option<String>,
    /// `YYYY-MM-DD`; defaults to the current UTC date.
    pub transaction_date: Option<String>,
    pub status: Option<TransactionStatus>,
    /// Derived from the lines when absent.
    pub total_amount: Option<f64>,
    pub currency: Option<String>,
    pub smart_code: SmartCode,
    pub source_entity_id: Option<EntityId>,
    pub target_entity_id: Option<EntityId>,
    pub reference_transaction_id: Option<TransactionId>,
    pub description: Option<String>,
    pub metadata: Value,
    pub idempotency_key: Option<String>,
}

impl NewTransaction {
    pub fn new(transaction_type: impl Into<String>, smart_code: SmartCode) -> Self {
        Self {
            transaction_type: transaction_type.into(),
            transaction_code: None,
            transaction_date: None,
            status: None,
            total_amount: None,
            currency: None,
            smart_code,
            source_entity_id: None,
            target_entity_id: None,
            reference_transaction_id: None,
            description: None,
            metadata: Value::Object(Map::new()),
            idempotency_key: None,
        }
    }
}

/// Line input for CREATE.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransactionLine {
    /// Defaults to the 1-based position in the request.
    pub line_number: Option<i64>,
    pub line_type: String,
    pub entity_id: Option<EntityId>,
    pub description: Option<String>,
    /// Defaults to 1.
    pub quantity: Option<f64>,
    /// Defaults to 0.
    pub unit_amount: Option<f64>,
    /// Defaults to `quantity * unit_amount`.
    pub line_amount: Option<f64>,
    pub smart_code: Option<SmartCode>,
    pub line_data: Value,
}

impl NewTransactionLine {
    pub fn new(line_type: impl Into<String>) -> Self {
        Self {
            line_number: None,
            line_type: line_type.into(),
            entity_id: None,
            description: None,
            quantity: None,
            unit_amount: None,
            line_amount: None,
            smart_code: None,
            line_data: Value::Object(Map::new()),
        }
    }

    /// Builds a ledger line for `side` with a fixed amount.
    pub fn ledger(line_type: impl Into<String>, side: LedgerSide, amount: f64) -> Self {
        let mut line = Self::new(line_type);
        line.line_amount = Some(amount);
        line.line_data = serde_json::json!({ "side": side.as_str() });
        line
    }
}

/// Header patch for UPDATE. `metadata` is merged key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
    pub status: Option<TransactionStatus>,
    pub description: Option<String>,
    pub transaction_date: Option<String>,
    pub metadata: Option<Value>,
}

/// Result of a transaction DELETE request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionDeletion {
    pub action_performed: DeleteOutcome,
    pub transaction: TransactionRecord,
}

/// Transaction service bound to one connection.
pub struct TransactionService<'a> {
    conn: &'a Connection,
    registry: &'a SmartCodeRegistry,
}

impl<'a> TransactionService<'a> {
    pub fn new(conn: &'a Connection, registry: &'a SmartCodeRegistry) -> Self {
        Self { conn, registry }
    }

    /// Creates header and lines as one unit.
    ///
    /// # Errors
    /// - `UNBALANCED_ENTRY` when a ledger-classified entry does not balance.
    /// - `DUPLICATE_CODE` when `transaction_code` is taken.
    /// - `NOT_FOUND` when a referenced entity or transaction is missing.
    pub fn create(
        &self,
        organization_id: OrganizationId,
        actor_user_id: Option<Uuid>,
        input: NewTransaction,
        lines: Vec<NewTransactionLine>,
    ) -> EngineResult<TransactionRecord> {
        let tx = begin_unit(self.conn)?;
        resolve_organization(&tx, organization_id)?;

        let idempotency = SqliteIdempotencyRepository::new(&tx);
        let idempotency_key = input
            .idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string);
        if let Some(key) = idempotency_key.as_deref() {
            if let Some(existing_id) =
                idempotency.lookup_key(organization_id, IdempotencyScope::Transaction, key)?
            {
                let record = load_record(&tx, organization_id, existing_id)?;
                tx.commit()?;
                info!(
                    "event=idempotent_replay module=transaction status=ok transaction_id={}",
                    existing_id
                );
                return Ok(record);
            }
        }

        let transaction_type = require_text(&input.transaction_type, "transaction_type")?;
        let status = input.status.unwrap_or(TransactionStatus::Pending);
        if status == TransactionStatus::Voided {
            return Err(EngineError::validation(
                "transactions cannot be created as voided",
            ));
        }
        let transaction_date = match input.transaction_date.as_deref() {
            Some(date) => validate_date(date)?,
            None => current_date(&tx)?,
        };
        let currency = match input.currency.as_deref() {
            Some(currency) => require_text(currency, "currency")?.to_ascii_uppercase(),
            None => DEFAULT_CURRENCY.to_string(),
        };

        let entities = SqliteEntityRepository::new(&tx);
        for entity_id in [input.source_entity_id, input.target_entity_id]
            .into_iter()
            .flatten()
            .chain(lines.iter().filter_map(|line| line.entity_id))
        {
            if entities
                .get_entity(organization_id, entity_id, false)?
                .is_none()
            {
                return Err(EngineError::not_found("entity", entity_id));
            }
        }

        let transactions = SqliteTransactionRepository::new(&tx);
        if let Some(reference_id) = input.reference_transaction_id {
            transactions
                .get_header(organization_id, reference_id)?
                .ok_or_else(|| EngineError::not_found("transaction", reference_id))?;
        }

        let now = now_ms(&tx)?;
        let transaction_id = Uuid::new_v4();
        let built_lines = build_lines(organization_id, transaction_id, lines, now)?;

        let is_ledger = self.registry.is_ledger(&input.smart_code);
        if is_ledger && built_lines.is_empty() {
            return Err(EngineError::validation(
                "ledger transactions require at least one line",
            ));
        }
        self.registry
            .validate_transaction(&input.smart_code, &built_lines)?;

        let total_amount = match input.total_amount {
            Some(total) => total,
            None if is_ledger => ledger_totals(&built_lines)?.debit_total,
            None => built_lines.iter().map(|line| line.line_amount).sum(),
        };

        let transaction_code = match input.transaction_code.as_deref() {
            Some(code) => {
                let code = require_text(code, "transaction_code")?;
                if transactions.transaction_code_exists(organization_id, &code)? {
                    return Err(EngineError::DuplicateCode(format!(
                        "transaction_code `{code}` already exists"
                    )));
                }
                code
            }
            None => next_transaction_code(&transactions, organization_id, &transaction_type)?,
        };

        let header = TransactionHeader {
            id: transaction_id,
            organization_id,
            transaction_type,
            transaction_code,
            transaction_date,
            status,
            total_amount,
            currency,
            smart_code: input.smart_code,
            source_entity_id: input.source_entity_id,
            target_entity_id: input.target_entity_id,
            reference_transaction_id: input.reference_transaction_id,
            description: input.description,
            metadata: normalize_object(input.metadata),
            void_reason: None,
            voided_at: None,
            idempotency_key: idempotency_key.clone(),
            created_by: actor_user_id,
            updated_by: actor_user_id,
            created_at: now,
            updated_at: now,
        };
        transactions.insert_header(&header)?;
        for line in &built_lines {
            transactions.insert_line(line)?;
        }
        if let Some(key) = idempotency_key.as_deref() {
            idempotency.record_key(
                organization_id,
                IdempotencyScope::Transaction,
                key,
                transaction_id,
                now,
            )?;
        }

        let record = load_record(&tx, organization_id, transaction_id)?;
        tx.commit()?;
        info!(
            "event=transaction_create module=transaction status=ok transaction_id={} line_count={} ledger={}",
            transaction_id,
            record.lines.len(),
            is_ledger
        );
        Ok(record)
    }

    /// Reads header and lines. Voided and cancelled transactions need
    /// `include_deleted`.
    pub fn read(
        &self,
        organization_id: OrganizationId,
        id: TransactionId,
        include_deleted: bool,
    ) -> EngineResult<TransactionRecord> {
        resolve_organization(self.conn, organization_id)?;
        let record = load_record(self.conn, organization_id, id)?;
        if record.header.status.is_hidden_by_default() && !include_deleted {
            return Err(EngineError::not_found("transaction", id));
        }
        Ok(record)
    }

    pub fn list(
        &self,
        organization_id: OrganizationId,
        query: &TransactionListQuery,
    ) -> EngineResult<Vec<TransactionRecord>> {
        resolve_organization(self.conn, organization_id)?;
        let repo = SqliteTransactionRepository::new(self.conn);
        repo.list_headers(organization_id, query)?
            .into_iter()
            .map(|header| {
                let lines = repo.list_lines(organization_id, header.id)?;
                Ok(TransactionRecord { header, lines })
            })
            .collect()
    }

    /// Merges `patch` into the header and returns the committed row.
    pub fn update(
        &self,
        organization_id: OrganizationId,
        actor_user_id: Option<Uuid>,
        id: TransactionId,
        patch: TransactionPatch,
    ) -> EngineResult<TransactionRecord> {
        let tx = begin_unit(self.conn)?;
        resolve_organization(&tx, organization_id)?;
        let repo = SqliteTransactionRepository::new(&tx);
        let mut header = repo
            .get_header(organization_id, id)?
            .ok_or_else(|| EngineError::not_found("transaction", id))?;
        if header.status == TransactionStatus::Voided {
            return Err(EngineError::TransactionImmutable(id));
        }

        if let Some(status) = patch.status {
            if status == TransactionStatus::Voided {
                return Err(EngineError::validation(
                    "use the VOID action to void a transaction",
                ));
            }
            header.status = status;
        }
        if let Some(description) = patch.description {
            header.description = Some(description);
        }
        if let Some(date) = patch.transaction_date.as_deref() {
            header.transaction_date = validate_date(date)?;
        }
        if let Some(metadata) = patch.metadata {
            merge_json_object(&mut header.metadata, metadata);
        }
        header.updated_by = actor_user_id;
        header.updated_at = now_ms(&tx)?;
        repo.update_header(&header)?;

        let record = load_record(&tx, organization_id, id)?;
        tx.commit()?;
        Ok(record)
    }

    /// Marks the transaction voided, keeping header and lines intact.
    pub fn void(
        &self,
        organization_id: OrganizationId,
        actor_user_id: Option<Uuid>,
        id: TransactionId,
        reason: &str,
    ) -> EngineResult<TransactionRecord> {
        let reason = require_text(reason, "void reason")?;
        let tx = begin_unit(self.conn)?;
        resolve_organization(&tx, organization_id)?;
        let repo = SqliteTransactionRepository::new(&tx);
        let mut header = repo
            .get_header(organization_id, id)?
            .ok_or_else(|| EngineError::not_found("transaction", id))?;
        if header.status == TransactionStatus::Voided {
            return Err(EngineError::TransactionImmutable(id));
        }

        let now = now_ms(&tx)?;
        header.status = TransactionStatus::Voided;
        header.void_reason = Some(reason);
        header.voided_at = Some(now);
        header.updated_by = actor_user_id;
        header.updated_at = now;
        repo.update_header(&header)?;

        let record = load_record(&tx, organization_id, id)?;
        tx.commit()?;
        info!(
            "event=transaction_void module=transaction status=ok transaction_id={}",
            id
        );
        Ok(record)
    }

    /// Physically removes an unreferenced, non-final transaction.
    ///
    /// # Errors
    /// - `DELETE_NOT_PERMITTED` when the transaction is voided, posted under
    ///   a ledger smart code, or referenced by another transaction.
    pub fn delete(
        &self,
        organization_id: OrganizationId,
        id: TransactionId,
    ) -> EngineResult<TransactionDeletion> {
        let tx = begin_unit(self.conn)?;
        resolve_organization(&tx, organization_id)?;
        let repo = SqliteTransactionRepository::new(&tx);
        let record = load_record(&tx, organization_id, id)?;

        let refusal = if record.header.status == TransactionStatus::Voided {
            Some("voided transactions are retained for audit")
        } else if record.header.status == TransactionStatus::Posted
            && self.registry.is_ledger(&record.header.smart_code)
        {
            Some("posted ledger transactions are never removed; void them instead")
        } else if repo.is_referenced_by_other(organization_id, id)? {
            Some("another transaction references it")
        } else {
            None
        };
        if let Some(reason) = refusal {
            return Err(EngineError::DeleteNotPermitted {
                id,
                reason: reason.to_string(),
            });
        }

        SqliteIdempotencyRepository::new(&tx).forget_record(
            organization_id,
            IdempotencyScope::Transaction,
            id,
        )?;
        repo.delete_transaction(organization_id, id)?;
        tx.commit()?;

        Ok(TransactionDeletion {
            action_performed: DeleteOutcome::Deleted,
            transaction: record,
        })
    }
}

fn load_record(
    conn: &Connection,
    organization_id: OrganizationId,
    id: TransactionId,
) -> EngineResult<TransactionRecord> {
    let repo = SqliteTransactionRepository::new(conn);
    let header = repo
        .get_header(organization_id, id)?
        .ok_or_else(|| EngineError::not_found("transaction", id))?;
    let lines = repo.list_lines(organization_id, id)?;
    Ok(TransactionRecord { header, lines })
}

fn build_lines(
    organization_id: OrganizationId,
    transaction_id: TransactionId,
    lines: Vec<NewTransactionLine>,
    now: i64,
) -> EngineResult<Vec<TransactionLine>> {
    let mut seen = BTreeSet::new();
    let mut built = Vec::with_capacity(lines.len());
    for (index, line) in lines.into_iter().enumerate() {
        let line_number = line.line_number.unwrap_or(index as i64 + 1);
        if line_number < 1 {
            return Err(EngineError::validation(format!(
                "line_number must be positive, got {line_number}"
            )));
        }
        if !seen.insert(line_number) {
            return Err(EngineError::validation(format!(
                "duplicate line_number {line_number}"
            )));
        }
        let line_type = require_text(&line.line_type, "line_type")?;
        let quantity = line.quantity.unwrap_or(1.0);
        let unit_amount = line.unit_amount.unwrap_or(0.0);
        let line_amount = line.line_amount.unwrap_or(quantity * unit_amount);
        for (name, value) in [
            ("quantity", quantity),
            ("unit_amount", unit_amount),
            ("line_amount", line_amount),
        ] {
            if !value.is_finite() {
                return Err(EngineError::validation(format!(
                    "line {line_number}: {name} must be a finite number"
                )));
            }
        }

        let mut line_data = normalize_object(line.line_data);
        if let Some(side) = line_data.get("side").and_then(Value::as_str) {
            if let Some(parsed) = LedgerSide::parse(side) {
                line_data["side"] = Value::String(parsed.as_str().to_string());
            }
        }

        built.push(TransactionLine {
            id: Uuid::new_v4(),
            organization_id,
            transaction_id,
            line_number,
            line_type,
            entity_id: line.entity_id,
            description: line.description,
            quantity,
            unit_amount,
            line_amount,
            smart_code: line.smart_code,
            line_data,
            created_at: now,
        });
    }
    Ok(built)
}

fn next_transaction_code(
    repo: &SqliteTransactionRepository<'_>,
    organization_id: OrganizationId,
    transaction_type: &str,
) -> EngineResult<String> {
    let mut sequence = repo.count_transactions(organization_id)? + 1;
    loop {
        let code = format_sequence_code(transaction_type, sequence);
        if !repo.transaction_code_exists(organization_id, &code)? {
            return Ok(code);
        }
        sequence += 1;
    }
}

fn validate_date(value: &str) -> EngineResult<String> {
    let trimmed = value.trim();
    if !is_iso_date(trimmed) {
        return Err(EngineError::validation(format!(
            "transaction_date must be YYYY-MM-DD, got `{trimmed}`"
        )));
    }
    Ok(trimmed.to_string())
}

fn current_date(conn: &Connection) -> EngineResult<String> {
    Ok(conn.query_row("SELECT date('now');", [], |row| row.get(0))?)
}
