//! Organization repository contracts and SQLite implementation.
//!
//! # Invariants
//! - `organization_code` is globally unique.
//! - Deleting an organization is only possible once no row references it.

use crate::model::organization::{Organization, OrganizationId};
use crate::model::status::RecordStatus;
use crate::repo::{
    ensure_connection_ready, json_to_db, optional_uuid_to_db, parse_json, parse_optional_uuid,
    parse_uuid, push_pagination, Page, RepoError, RepoResult,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const ORGANIZATION_SELECT_SQL: &str = "SELECT
    id,
    organization_name,
    organization_code,
    organization_type,
    industry,
    status,
    parent_organization_id,
    settings,
    created_at,
    updated_at
FROM organizations";

/// Query options for listing organizations.
#[derive(Debug, Clone, Default)]
pub struct OrganizationListQuery {
    pub include_archived: bool,
    pub parent_organization_id: Option<OrganizationId>,
    pub page: Page,
}

/// Repository interface for the tenant root table.
pub trait OrganizationRepository {
    fn insert_organization(&self, organization: &Organization) -> RepoResult<()>;
    fn get_organization(&self, id: OrganizationId) -> RepoResult<Option<Organization>>;
    fn list_organizations(&self, query: &OrganizationListQuery) -> RepoResult<Vec<Organization>>;
    fn update_organization(&self, organization: &Organization) -> RepoResult<()>;
    fn delete_organization(&self, id: OrganizationId) -> RepoResult<()>;
    /// Returns whether any tenant row or child organization points at `id`.
    fn is_organization_referenced(&self, id: OrganizationId) -> RepoResult<bool>;
}

/// SQLite-backed organization repository.
pub struct SqliteOrganizationRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteOrganizationRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["organizations"])?;
        Ok(Self { conn })
    }

    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl OrganizationRepository for SqliteOrganizationRepository<'_> {
    fn insert_organization(&self, organization: &Organization) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO organizations (
                id,
                organization_name,
                organization_code,
                organization_type,
                industry,
                status,
                parent_organization_id,
                settings,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            params![
                organization.id.to_string(),
                organization.organization_name.as_str(),
                organization.organization_code.as_str(),
                organization.organization_type.as_str(),
                organization.industry.as_deref(),
                organization.status.as_str(),
                optional_uuid_to_db(organization.parent_organization_id),
                json_to_db(&organization.settings),
                organization.created_at,
                organization.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_organization(&self, id: OrganizationId) -> RepoResult<Option<Organization>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{ORGANIZATION_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_organization_row(row)?));
        }
        Ok(None)
    }

    fn list_organizations(&self, query: &OrganizationListQuery) -> RepoResult<Vec<Organization>> {
        let mut sql = format!("{ORGANIZATION_SELECT_SQL} WHERE 1 = 1");
        let mut binds: Vec<SqlValue> = Vec::new();

        if !query.include_archived {
            sql.push_str(" AND status <> 'archived'");
        }
        if let Some(parent) = query.parent_organization_id {
            sql.push_str(" AND parent_organization_id = ?");
            binds.push(SqlValue::Text(parent.to_string()));
        }
        sql.push_str(" ORDER BY organization_code ASC, id ASC");
        push_pagination(&mut sql, &mut binds, query.page);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut organizations = Vec::new();
        while let Some(row) = rows.next()? {
            organizations.push(parse_organization_row(row)?);
        }
        Ok(organizations)
    }

    fn update_organization(&self, organization: &Organization) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE organizations
             SET
                organization_name = ?2,
                organization_code = ?3,
                organization_type = ?4,
                industry = ?5,
                status = ?6,
                parent_organization_id = ?7,
                settings = ?8,
                updated_at = ?9
             WHERE id = ?1;",
            params![
                organization.id.to_string(),
                organization.organization_name.as_str(),
                organization.organization_code.as_str(),
                organization.organization_type.as_str(),
                organization.industry.as_deref(),
                organization.status.as_str(),
                optional_uuid_to_db(organization.parent_organization_id),
                json_to_db(&organization.settings),
                organization.updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                kind: "organization",
                id: organization.id,
            });
        }
        Ok(())
    }

    fn delete_organization(&self, id: OrganizationId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM organizations WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                kind: "organization",
                id,
            });
        }
        Ok(())
    }

    fn is_organization_referenced(&self, id: OrganizationId) -> RepoResult<bool> {
        let referenced: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 WHERE
                    EXISTS(SELECT 1 FROM entities WHERE organization_id = ?1)
                    OR EXISTS(SELECT 1 FROM transaction_headers WHERE organization_id = ?1)
                    OR EXISTS(SELECT 1 FROM organizations WHERE parent_organization_id = ?1);",
                [id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(referenced.is_some())
    }
}

fn parse_organization_row(row: &Row<'_>) -> RepoResult<Organization> {
    let id_text: String = row.get("id")?;
    let status_text: String = row.get("status")?;
    let status = RecordStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid status `{status_text}` in organizations.status"
        ))
    })?;
    let settings_text: String = row.get("settings")?;

    Ok(Organization {
        id: parse_uuid(&id_text, "organizations.id")?,
        organization_name: row.get("organization_name")?,
        organization_code: row.get("organization_code")?,
        organization_type: row.get("organization_type")?,
        industry: row.get("industry")?,
        status,
        parent_organization_id: parse_optional_uuid(
            row.get("parent_organization_id")?,
            "organizations.parent_organization_id",
        )?,
        settings: parse_json(&settings_text, "organizations.settings")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
