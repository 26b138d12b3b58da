//! Relationship (edge) repository.
//!
//! # Responsibility
//! - Persist typed directed edges between entities.
//! - Locate the single active edge of `(from_entity_id, relationship_type)`.
//!
//! # Invariants
//! - Edges are never physically deleted; deactivation sets `is_active = 0`
//!   and `ended_at`.
//! - The partial unique index `uq_relationships_single_active` rejects a
//!   second active edge; the rejection surfaces as `UniqueViolation`.

use crate::model::entity::EntityId;
use crate::model::organization::OrganizationId;
use crate::model::relationship::{Relationship, RelationshipId};
use crate::repo::{
    bool_to_int, ensure_connection_ready, int_to_bool, json_to_db, parse_json, parse_uuid,
    push_pagination, Page, RepoError, RepoResult,
};
use crate::smart_code::code::SmartCode;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde_json::Value;

const RELATIONSHIP_SELECT_SQL: &str = "SELECT
    id,
    organization_id,
    from_entity_id,
    to_entity_id,
    relationship_type,
    smart_code,
    is_active,
    effective_date,
    expiration_date,
    ended_at,
    relationship_data,
    created_at,
    updated_at
FROM relationships";

/// Filter options for edge listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipListQuery {
    pub from_entity_id: Option<EntityId>,
    pub to_entity_id: Option<EntityId>,
    /// Matches edges where the entity is either endpoint.
    pub touching_entity_id: Option<EntityId>,
    pub relationship_type: Option<String>,
    pub include_inactive: bool,
    pub page: Page,
}

/// Repository interface for relationship rows.
pub trait RelationshipRepository {
    fn insert_relationship(&self, relationship: &Relationship) -> RepoResult<()>;
    fn get_relationship(
        &self,
        organization_id: OrganizationId,
        id: RelationshipId,
    ) -> RepoResult<Option<Relationship>>;
    fn find_active_edge(
        &self,
        organization_id: OrganizationId,
        from_entity_id: EntityId,
        relationship_type: &str,
    ) -> RepoResult<Option<Relationship>>;
    /// Deactivates one active edge. Fails with `NotFound` when the edge is
    /// missing or already inactive.
    fn deactivate_relationship(
        &self,
        organization_id: OrganizationId,
        id: RelationshipId,
        ended_at: i64,
    ) -> RepoResult<()>;
    fn update_relationship_payload(
        &self,
        organization_id: OrganizationId,
        id: RelationshipId,
        smart_code: Option<&SmartCode>,
        relationship_data: &Value,
        updated_at: i64,
    ) -> RepoResult<()>;
    fn list_relationships(
        &self,
        organization_id: OrganizationId,
        query: &RelationshipListQuery,
    ) -> RepoResult<Vec<Relationship>>;
}

/// SQLite-backed relationship repository.
pub struct SqliteRelationshipRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteRelationshipRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["relationships"])?;
        Ok(Self { conn })
    }

    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl RelationshipRepository for SqliteRelationshipRepository<'_> {
    fn insert_relationship(&self, relationship: &Relationship) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO relationships (
                id,
                organization_id,
                from_entity_id,
                to_entity_id,
                relationship_type,
                smart_code,
                is_active,
                effective_date,
                expiration_date,
                ended_at,
                relationship_data,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13);",
            params![
                relationship.id.to_string(),
                relationship.organization_id.to_string(),
                relationship.from_entity_id.to_string(),
                relationship.to_entity_id.to_string(),
                relationship.relationship_type.as_str(),
                relationship.smart_code.as_ref().map(SmartCode::as_str),
                bool_to_int(relationship.is_active),
                relationship.effective_date,
                relationship.expiration_date,
                relationship.ended_at,
                json_to_db(&relationship.relationship_data),
                relationship.created_at,
                relationship.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_relationship(
        &self,
        organization_id: OrganizationId,
        id: RelationshipId,
    ) -> RepoResult<Option<Relationship>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RELATIONSHIP_SELECT_SQL} WHERE id = ?1 AND organization_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![id.to_string(), organization_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_relationship_row(row)?));
        }
        Ok(None)
    }

    fn find_active_edge(
        &self,
        organization_id: OrganizationId,
        from_entity_id: EntityId,
        relationship_type: &str,
    ) -> RepoResult<Option<Relationship>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RELATIONSHIP_SELECT_SQL}
             WHERE organization_id = ?1
               AND from_entity_id = ?2
               AND relationship_type = ?3
               AND is_active = 1;"
        ))?;
        let mut rows = stmt.query(params![
            organization_id.to_string(),
            from_entity_id.to_string(),
            relationship_type
        ])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_relationship_row(row)?));
        }
        Ok(None)
    }

    fn deactivate_relationship(
        &self,
        organization_id: OrganizationId,
        id: RelationshipId,
        ended_at: i64,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE relationships
             SET is_active = 0, ended_at = ?3, updated_at = ?3
             WHERE id = ?1 AND organization_id = ?2 AND is_active = 1;",
            params![id.to_string(), organization_id.to_string(), ended_at],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                kind: "relationship",
                id,
            });
        }
        Ok(())
    }

    fn update_relationship_payload(
        &self,
        organization_id: OrganizationId,
        id: RelationshipId,
        smart_code: Option<&SmartCode>,
        relationship_data: &Value,
        updated_at: i64,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE relationships
             SET smart_code = ?3, relationship_data = ?4, updated_at = ?5
             WHERE id = ?1 AND organization_id = ?2;",
            params![
                id.to_string(),
                organization_id.to_string(),
                smart_code.map(SmartCode::as_str),
                json_to_db(relationship_data),
                updated_at,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound {
                kind: "relationship",
                id,
            });
        }
        Ok(())
    }

    fn list_relationships(
        &self,
        organization_id: OrganizationId,
        query: &RelationshipListQuery,
    ) -> RepoResult<Vec<Relationship>> {
        let mut sql = format!("{RELATIONSHIP_SELECT_SQL} WHERE organization_id = ?");
        let mut binds: Vec<SqlValue> = vec![SqlValue::Text(organization_id.to_string())];

        if !query.include_inactive {
            sql.push_str(" AND is_active = 1");
        }
        if let Some(from_entity_id) = query.from_entity_id {
            sql.push_str(" AND from_entity_id = ?");
            binds.push(SqlValue::Text(from_entity_id.to_string()));
        }
        if let Some(to_entity_id) = query.to_entity_id {
            sql.push_str(" AND to_entity_id = ?");
            binds.push(SqlValue::Text(to_entity_id.to_string()));
        }
        if let Some(entity_id) = query.touching_entity_id {
            sql.push_str(" AND (from_entity_id = ? OR to_entity_id = ?)");
            binds.push(SqlValue::Text(entity_id.to_string()));
            binds.push(SqlValue::Text(entity_id.to_string()));
        }
        if let Some(relationship_type) = query.relationship_type.as_deref() {
            sql.push_str(" AND relationship_type = ?");
            binds.push(SqlValue::Text(relationship_type.to_string()));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");
        push_pagination(&mut sql, &mut binds, query.page);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut relationships = Vec::new();
        while let Some(row) = rows.next()? {
            relationships.push(parse_relationship_row(row)?);
        }
        Ok(relationships)
    }
}

fn parse_relationship_row(row: &Row<'_>) -> RepoResult<Relationship> {
    let id_text: String = row.get("id")?;
    let organization_text: String = row.get("organization_id")?;
    let from_text: String = row.get("from_entity_id")?;
    let to_text: String = row.get("to_entity_id")?;
    let data_text: String = row.get("relationship_data")?;

    let smart_code = row
        .get::<_, Option<String>>("smart_code")?
        .map(|text| {
            SmartCode::parse(&text).map_err(|err| {
                RepoError::InvalidData(format!("{err} in relationships.smart_code"))
            })
        })
        .transpose()?;

    Ok(Relationship {
        id: parse_uuid(&id_text, "relationships.id")?,
        organization_id: parse_uuid(&organization_text, "relationships.organization_id")?,
        from_entity_id: parse_uuid(&from_text, "relationships.from_entity_id")?,
        to_entity_id: parse_uuid(&to_text, "relationships.to_entity_id")?,
        relationship_type: row.get("relationship_type")?,
        smart_code,
        is_active: int_to_bool(row.get("is_active")?, "relationships.is_active")?,
        effective_date: row.get("effective_date")?,
        expiration_date: row.get("expiration_date")?,
        ended_at: row.get("ended_at")?,
        relationship_data: parse_json(&data_text, "relationships.relationship_data")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
