//! Organization (tenant) model.

use crate::model::status::RecordStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Tenant boundary identifier; every other row is scoped by it.
pub type OrganizationId = Uuid;

/// Tenant root record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: OrganizationId,
    pub organization_name: String,
    /// Globally unique short code.
    pub organization_code: String,
    pub organization_type: String,
    pub industry: Option<String>,
    pub status: RecordStatus,
    pub parent_organization_id: Option<OrganizationId>,
    /// Free-form settings object.
    pub settings: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Organization {
    pub fn is_active(&self) -> bool {
        self.status == RecordStatus::Active
    }
}
