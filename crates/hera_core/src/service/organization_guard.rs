//! Tenant guard run at the start of every scoped operation.
//!
//! # Invariants
//! - Resolution happens inside the caller's atomic unit, so a failed guard
//!   leaves nothing committed.

use crate::model::organization::{Organization, OrganizationId};
use crate::repo::organization_repo::{OrganizationRepository, SqliteOrganizationRepository};
use crate::service::error::{EngineError, EngineResult};
use rusqlite::Connection;

/// Resolves and validates the organization named by a request.
pub struct OrganizationGuard<R: OrganizationRepository> {
    repo: R,
}

impl<R: OrganizationRepository> OrganizationGuard<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Returns the organization when it exists and is active.
    ///
    /// # Errors
    /// - `OrgNotFound` when no row matches `organization_id`.
    /// - `OrgInactive` when the organization is inactive or archived.
    pub fn resolve(&self, organization_id: OrganizationId) -> EngineResult<Organization> {
        let organization = self
            .repo
            .get_organization(organization_id)?
            .ok_or(EngineError::OrgNotFound(organization_id))?;
        if !organization.is_active() {
            return Err(EngineError::OrgInactive(organization_id));
        }
        Ok(organization)
    }
}

/// Runs the guard against the SQLite organization table on `conn`.
pub(crate) fn resolve_organization(
    conn: &Connection,
    organization_id: OrganizationId,
) -> EngineResult<Organization> {
    OrganizationGuard::new(SqliteOrganizationRepository::new(conn)).resolve(organization_id)
}
