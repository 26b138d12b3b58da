//! Typed directed edge between two entities.
//!
//! # Invariants
//! - At most one edge per `(organization_id, from_entity_id,
//!   relationship_type)` has `is_active = true`.
//! - Deactivated edges are retained with `ended_at` set.

use crate::model::entity::EntityId;
use crate::model::organization::OrganizationId;
use crate::smart_code::code::SmartCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub type RelationshipId = Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub organization_id: OrganizationId,
    pub from_entity_id: EntityId,
    pub to_entity_id: EntityId,
    pub relationship_type: String,
    pub smart_code: Option<SmartCode>,
    /// The active edge of `(from, type)` encodes current state.
    pub is_active: bool,
    /// Epoch ms.
    pub effective_date: Option<i64>,
    /// Epoch ms.
    pub expiration_date: Option<i64>,
    /// Epoch ms when the edge was deactivated.
    pub ended_at: Option<i64>,
    pub relationship_data: Value,
    pub created_at: i64,
    pub updated_at: i64,
}
