//! Generic business entity model.
//!
//! # Invariants
//! - `entity_code` is unique within `(organization_id, entity_type)`.
//! - `version` starts at 1 and increments on every successful update.

use crate::model::organization::OrganizationId;
use crate::model::status::RecordStatus;
use crate::smart_code::code::SmartCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type EntityId = Uuid;

/// Generic business object (customer, product, gl_account, appointment, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub organization_id: OrganizationId,
    pub entity_type: String,
    pub entity_name: String,
    pub entity_code: String,
    pub smart_code: SmartCode,
    pub status: RecordStatus,
    /// Optimistic concurrency counter.
    pub version: i64,
    pub parent_entity_id: Option<EntityId>,
    pub metadata: Value,
    pub created_by: Option<Uuid>,
    pub updated_by: Option<Uuid>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Entity {
    pub fn is_archived(&self) -> bool {
        self.status == RecordStatus::Archived
    }
}
