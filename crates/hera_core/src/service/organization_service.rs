//! Organization (tenant root) use-case service.
//!
//! # Responsibility
//! - Create, patch, archive and delete tenants.
//!
//! # Invariants
//! - `organization_code` is trimmed, uppercased and globally unique.
//! - Physical delete only happens when no row references the organization;
//!   otherwise the organization is archived instead.

use crate::model::organization::{Organization, OrganizationId};
use crate::model::status::RecordStatus;
use crate::repo::now_ms;
use crate::repo::organization_repo::{
    OrganizationListQuery, OrganizationRepository, SqliteOrganizationRepository,
};
use crate::service::error::{EngineError, EngineResult};
use crate::service::{
    begin_unit, merge_json_object, normalize_object, require_text, DeleteOutcome,
};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

const DEFAULT_ORGANIZATION_TYPE: &str = "business";

/// Input for creating one organization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewOrganization {
    pub organization_name: String,
    pub organization_code: String,
    pub organization_type: Option<String>,
    pub industry: Option<String>,
    pub parent_organization_id: Option<OrganizationId>,
    pub settings: Value,
}

/// Partial update. `settings` is merged key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrganizationPatch {
    pub organization_name: Option<String>,
    pub organization_type: Option<String>,
    pub industry: Option<String>,
    pub status: Option<RecordStatus>,
    pub settings: Option<Value>,
}

/// Result of an organization DELETE request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganizationDeletion {
    pub action_performed: DeleteOutcome,
    pub organization: Organization,
}

/// Organization service bound to one connection.
pub struct OrganizationService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> OrganizationService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn create(&self, input: NewOrganization) -> EngineResult<Organization> {
        let organization_name = require_text(&input.organization_name, "organization_name")?;
        let organization_code =
            require_text(&input.organization_code, "organization_code")?.to_ascii_uppercase();
        let organization_type = match input.organization_type.as_deref() {
            Some(value) => require_text(value, "organization_type")?,
            None => DEFAULT_ORGANIZATION_TYPE.to_string(),
        };

        let tx = begin_unit(self.conn)?;
        let repo = SqliteOrganizationRepository::new(&tx);
        if let Some(parent_id) = input.parent_organization_id {
            repo.get_organization(parent_id)?
                .ok_or_else(|| EngineError::not_found("organization", parent_id))?;
        }

        let now = now_ms(&tx)?;
        let organization = Organization {
            id: Uuid::new_v4(),
            organization_name,
            organization_code,
            organization_type,
            industry: input.industry.filter(|value| !value.trim().is_empty()),
            status: RecordStatus::Active,
            parent_organization_id: input.parent_organization_id,
            settings: normalize_object(input.settings),
            created_at: now,
            updated_at: now,
        };
        repo.insert_organization(&organization)?;
        let created = repo
            .get_organization(organization.id)?
            .ok_or_else(|| EngineError::not_found("organization", organization.id))?;
        tx.commit()?;
        Ok(created)
    }

    /// Reads one organization; archived ones require `include_archived`.
    pub fn get(&self, id: OrganizationId, include_archived: bool) -> EngineResult<Organization> {
        let repo = SqliteOrganizationRepository::new(self.conn);
        match repo.get_organization(id)? {
            Some(organization)
                if include_archived || organization.status != RecordStatus::Archived =>
            {
                Ok(organization)
            }
            _ => Err(EngineError::not_found("organization", id)),
        }
    }

    pub fn list(&self, query: &OrganizationListQuery) -> EngineResult<Vec<Organization>> {
        let repo = SqliteOrganizationRepository::new(self.conn);
        Ok(repo.list_organizations(query)?)
    }

    pub fn update(
        &self,
        id: OrganizationId,
        patch: OrganizationPatch,
    ) -> EngineResult<Organization> {
        let tx = begin_unit(self.conn)?;
        let repo = SqliteOrganizationRepository::new(&tx);
        let mut organization = repo
            .get_organization(id)?
            .ok_or_else(|| EngineError::not_found("organization", id))?;

        if let Some(name) = patch.organization_name.as_deref() {
            organization.organization_name = require_text(name, "organization_name")?;
        }
        if let Some(organization_type) = patch.organization_type.as_deref() {
            organization.organization_type = require_text(organization_type, "organization_type")?;
        }
        if let Some(industry) = patch.industry {
            organization.industry = Some(industry).filter(|value| !value.trim().is_empty());
        }
        if let Some(status) = patch.status {
            organization.status = status;
        }
        if let Some(settings) = patch.settings {
            merge_json_object(&mut organization.settings, settings);
        }
        organization.updated_at = now_ms(&tx)?;

        repo.update_organization(&organization)?;
        let updated = repo
            .get_organization(id)?
            .ok_or_else(|| EngineError::not_found("organization", id))?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn archive(&self, id: OrganizationId) -> EngineResult<Organization> {
        self.update(
            id,
            OrganizationPatch {
                status: Some(RecordStatus::Archived),
                ..OrganizationPatch::default()
            },
        )
    }

    /// Deletes an unreferenced organization, archiving it otherwise.
    pub fn delete(&self, id: OrganizationId) -> EngineResult<OrganizationDeletion> {
        let tx = begin_unit(self.conn)?;
        let repo = SqliteOrganizationRepository::new(&tx);
        let mut organization = repo
            .get_organization(id)?
            .ok_or_else(|| EngineError::not_found("organization", id))?;

        let action_performed = if repo.is_organization_referenced(id)? {
            if organization.status != RecordStatus::Archived {
                organization.status = RecordStatus::Archived;
                organization.updated_at = now_ms(&tx)?;
                repo.update_organization(&organization)?;
            }
            DeleteOutcome::Archived
        } else {
            repo.delete_organization(id)?;
            DeleteOutcome::Deleted
        };
        tx.commit()?;

        Ok(OrganizationDeletion {
            action_performed,
            organization,
        })
    }
}
