//! Transaction header and line models.
//!
//! # Invariants
//! - Lines are created with their header and never change afterwards.
//! - Ledger lines carry `line_data.side` = `DR` | `CR`.

use crate::model::entity::EntityId;
use crate::model::organization::OrganizationId;
use crate::model::status::TransactionStatus;
use crate::smart_code::code::SmartCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type TransactionId = Uuid;

/// Key inside `line_data` holding the ledger side.
pub const LINE_SIDE_KEY: &str = "side";

/// Double-entry side of one ledger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerSide {
    #[serde(rename = "DR")]
    Debit,
    #[serde(rename = "CR")]
    Credit,
}

impl LedgerSide {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "DR",
            Self::Credit => "CR",
        }
    }

    /// Parses `DR`/`CR` case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DR" => Some(Self::Debit),
            "CR" => Some(Self::Credit),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionHeader {
    pub id: TransactionId,
    pub organization_id: OrganizationId,
    pub transaction_type: String,
    pub transaction_code: String,
    /// `YYYY-MM-DD`.
    pub transaction_date: String,
    pub status: TransactionStatus,
    pub total_amount: f64,
    pub currency: String,
    pub smart_code: SmartCode,
    pub source_entity_id: Option<EntityId>,
    pub target_entity_id: Option<EntityId>,
    /// Origin transaction for reversals, credit notes and similar follow-ups.
    pub reference_transaction_id: Option<TransactionId>,
    pub description: Option<String>,
    pub metadata: Value,
    pub void_reason: Option<String>,
    pub voided_at: Option<i64>,
    pub idempotency_key: Option<String>,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLine {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub transaction_id: TransactionId,
    pub line_number: i64,
    pub line_type: String,
    pub entity_id: Option<EntityId>,
    pub description: Option<String>,
    pub quantity: f64,
    pub unit_amount: f64,
    pub line_amount: f64,
    pub smart_code: Option<SmartCode>,
    pub line_data: Value,
    pub created_at: i64,
}

impl TransactionLine {
    /// Reads the ledger side from `line_data`.
    ///
    /// Returns `Err(raw)` when a side is present but not `DR`/`CR`.
    pub fn side(&self) -> Result<Option<LedgerSide>, String> {
        match self.line_data.get(LINE_SIDE_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(raw)) => LedgerSide::parse(raw)
                .map(Some)
                .ok_or_else(|| raw.clone()),
            Some(other) => Err(other.to_string()),
        }
    }
}

/// Fully materialized transaction returned by every transaction action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub header: TransactionHeader,
    pub lines: Vec<TransactionLine>,
}

#[cfg(test)]
mod tests {
    use super::LedgerSide;

    #[test]
    fn ledger_side_parses_case_insensitively() {
        assert_eq!(LedgerSide::parse("dr"), Some(LedgerSide::Debit));
        assert_eq!(LedgerSide::parse(" CR "), Some(LedgerSide::Credit));
        assert_eq!(LedgerSide::parse("debit"), None);
        assert_eq!(LedgerSide::Credit.as_str(), "CR");
    }
}
