//! Entity repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist generic business objects scoped by organization.
//! - Provide version-checked updates and reference counting for the
//!   archive-instead-of-delete policy.
//!
//! # Invariants
//! - Every statement filters on `organization_id`.
//! - Updates only apply when the stored `version` equals the expected one.
//! - Archived rows are hidden unless the caller asks for them.

use crate::model::entity::{Entity, EntityId};
use crate::model::organization::OrganizationId;
use crate::model::status::RecordStatus;
use crate::repo::{
    ensure_connection_ready, json_to_db, optional_uuid_to_db, parse_json, parse_optional_uuid,
    parse_uuid, push_pagination, Page, RepoError, RepoResult,
};
use crate::smart_code::code::SmartCode;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const ENTITY_SELECT_SQL: &str = "SELECT
    id,
    organization_id,
    entity_type,
    entity_name,
    entity_code,
    smart_code,
    status,
    version,
    parent_entity_id,
    metadata,
    created_by,
    updated_by,
    created_at,
    updated_at
FROM entities";

/// Predicate and pagination options for entity lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityListQuery {
    pub id: Option<EntityId>,
    pub entity_type: Option<String>,
    pub entity_code: Option<String>,
    pub entity_name: Option<String>,
    pub smart_code: Option<String>,
    pub status: Option<RecordStatus>,
    pub parent_entity_id: Option<EntityId>,
    pub include_archived: bool,
    pub page: Page,
}

/// Rows that point at one entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityReferences {
    pub relationships: i64,
    pub transaction_lines: i64,
    pub transaction_headers: i64,
    pub child_entities: i64,
}

impl EntityReferences {
    pub fn is_referenced(&self) -> bool {
        self.relationships > 0
            || self.transaction_lines > 0
            || self.transaction_headers > 0
            || self.child_entities > 0
    }
}

/// Repository interface for entity rows.
pub trait EntityRepository {
    fn insert_entity(&self, entity: &Entity) -> RepoResult<()>;
    fn get_entity(
        &self,
        organization_id: OrganizationId,
        id: EntityId,
        include_archived: bool,
    ) -> RepoResult<Option<Entity>>;
    fn list_entities(
        &self,
        organization_id: OrganizationId,
        query: &EntityListQuery,
    ) -> RepoResult<Vec<Entity>>;
    /// Writes `entity` and bumps its version when the stored version matches
    /// `expected_version`. Returns the new version.
    fn update_entity(&self, entity: &Entity, expected_version: i64) -> RepoResult<i64>;
    fn delete_entity(&self, organization_id: OrganizationId, id: EntityId) -> RepoResult<()>;
    fn entity_references(
        &self,
        organization_id: OrganizationId,
        id: EntityId,
    ) -> RepoResult<EntityReferences>;
    fn entity_code_exists(
        &self,
        organization_id: OrganizationId,
        entity_type: &str,
        entity_code: &str,
    ) -> RepoResult<bool>;
    fn count_entities_of_type(
        &self,
        organization_id: OrganizationId,
        entity_type: &str,
    ) -> RepoResult<i64>;
}

/// SQLite-backed entity repository.
pub struct SqliteEntityRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteEntityRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["entities"])?;
        Ok(Self { conn })
    }

    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl EntityRepository for SqliteEntityRepository<'_> {
    fn insert_entity(&self, entity: &Entity) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO entities (
                id,
                organization_id,
                entity_type,
                entity_name,
                entity_code,
                smart_code,
                status,
                version,
                parent_entity_id,
                metadata,
                created_by,
                updated_by,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14);",
            params![
                entity.id.to_string(),
                entity.organization_id.to_string(),
                entity.entity_type.as_str(),
                entity.entity_name.as_str(),
                entity.entity_code.as_str(),
                entity.smart_code.as_str(),
                entity.status.as_str(),
                entity.version,
                optional_uuid_to_db(entity.parent_entity_id),
                json_to_db(&entity.metadata),
                optional_uuid_to_db(entity.created_by),
                optional_uuid_to_db(entity.updated_by),
                entity.created_at,
                entity.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_entity(
        &self,
        organization_id: OrganizationId,
        id: EntityId,
        include_archived: bool,
    ) -> RepoResult<Option<Entity>> {
        let mut stmt = self.conn.prepare(&format!(
            "{ENTITY_SELECT_SQL}
             WHERE id = ?1
               AND organization_id = ?2
               AND (?3 = 1 OR status <> 'archived');"
        ))?;
        let mut rows = stmt.query(params![
            id.to_string(),
            organization_id.to_string(),
            i64::from(include_archived),
        ])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_entity_row(row)?));
        }
        Ok(None)
    }

    fn list_entities(
        &self,
        organization_id: OrganizationId,
        query: &EntityListQuery,
    ) -> RepoResult<Vec<Entity>> {
        let mut sql = format!("{ENTITY_SELECT_SQL} WHERE organization_id = ?");
        let mut binds: Vec<SqlValue> = vec![SqlValue::Text(organization_id.to_string())];

        if !query.include_archived {
            sql.push_str(" AND status <> 'archived'");
        }
        let text_filters = [
            ("id", query.id.map(|id| id.to_string())),
            ("entity_type", query.entity_type.clone()),
            ("entity_code", query.entity_code.clone()),
            ("entity_name", query.entity_name.clone()),
            ("smart_code", query.smart_code.clone()),
            ("status", query.status.map(|status| status.as_str().to_string())),
            (
                "parent_entity_id",
                query.parent_entity_id.map(|id| id.to_string()),
            ),
        ];
        for (column, value) in text_filters {
            if let Some(value) = value {
                sql.push_str(&format!(" AND {column} = ?"));
                binds.push(SqlValue::Text(value));
            }
        }

        sql.push_str(" ORDER BY updated_at DESC, id ASC");
        push_pagination(&mut sql, &mut binds, query.page);

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(parse_entity_row(row)?);
        }
        Ok(entities)
    }

    fn update_entity(&self, entity: &Entity, expected_version: i64) -> RepoResult<i64> {
        let next_version = expected_version + 1;
        let changed = self.conn.execute(
            "UPDATE entities
             SET
                entity_type = ?3,
                entity_name = ?4,
                entity_code = ?5,
                smart_code = ?6,
                status = ?7,
                parent_entity_id = ?8,
                metadata = ?9,
                updated_by = ?10,
                updated_at = ?11,
                version = ?12
             WHERE id = ?1
               AND organization_id = ?2
               AND version = ?13;",
            params![
                entity.id.to_string(),
                entity.organization_id.to_string(),
                entity.entity_type.as_str(),
                entity.entity_name.as_str(),
                entity.entity_code.as_str(),
                entity.smart_code.as_str(),
                entity.status.as_str(),
                optional_uuid_to_db(entity.parent_entity_id),
                json_to_db(&entity.metadata),
                optional_uuid_to_db(entity.updated_by),
                entity.updated_at,
                next_version,
                expected_version,
            ],
        )?;
        if changed == 1 {
            return Ok(next_version);
        }

        let actual: Option<i64> = self
            .conn
            .query_row(
                "SELECT version FROM entities WHERE id = ?1 AND organization_id = ?2;",
                params![entity.id.to_string(), entity.organization_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match actual {
            None => Err(RepoError::NotFound {
                kind: "entity",
                id: entity.id,
            }),
            Some(actual) => Err(RepoError::VersionConflict {
                id: entity.id,
                expected: expected_version,
                actual,
            }),
        }
    }

    fn delete_entity(&self, organization_id: OrganizationId, id: EntityId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM entities WHERE id = ?1 AND organization_id = ?2;",
            params![id.to_string(), organization_id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::NotFound { kind: "entity", id });
        }
        Ok(())
    }

    fn entity_references(
        &self,
        organization_id: OrganizationId,
        id: EntityId,
    ) -> RepoResult<EntityReferences> {
        let references = self.conn.query_row(
            "SELECT
                (SELECT COUNT(*) FROM relationships
                  WHERE organization_id = ?2
                    AND (from_entity_id = ?1 OR to_entity_id = ?1)),
                (SELECT COUNT(*) FROM transaction_lines
                  WHERE organization_id = ?2 AND entity_id = ?1),
                (SELECT COUNT(*) FROM transaction_headers
                  WHERE organization_id = ?2
                    AND (source_entity_id = ?1 OR target_entity_id = ?1)),
                (SELECT COUNT(*) FROM entities
                  WHERE organization_id = ?2 AND parent_entity_id = ?1);",
            params![id.to_string(), organization_id.to_string()],
            |row| {
                Ok(EntityReferences {
                    relationships: row.get(0)?,
                    transaction_lines: row.get(1)?,
                    transaction_headers: row.get(2)?,
                    child_entities: row.get(3)?,
                })
            },
        )?;
        Ok(references)
    }

    fn entity_code_exists(
        &self,
        organization_id: OrganizationId,
        entity_type: &str,
        entity_code: &str,
    ) -> RepoResult<bool> {
        let exists: i64 = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM entities
                WHERE organization_id = ?1 AND entity_type = ?2 AND entity_code = ?3
            );",
            params![organization_id.to_string(), entity_type, entity_code],
            |row| row.get(0),
        )?;
        Ok(exists == 1)
    }

    fn count_entities_of_type(
        &self,
        organization_id: OrganizationId,
        entity_type: &str,
    ) -> RepoResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE organization_id = ?1 AND entity_type = ?2;",
            params![organization_id.to_string(), entity_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn parse_entity_row(row: &Row<'_>) -> RepoResult<Entity> {
    let id_text: String = row.get("id")?;
    let organization_text: String = row.get("organization_id")?;

    let smart_code_text: String = row.get("smart_code")?;
    let smart_code = SmartCode::parse(&smart_code_text).map_err(|err| {
        RepoError::InvalidData(format!("{err} in entities.smart_code"))
    })?;

    let status_text: String = row.get("status")?;
    let status = RecordStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in entities.status"))
    })?;

    let metadata_text: String = row.get("metadata")?;

    Ok(Entity {
        id: parse_uuid(&id_text, "entities.id")?,
        organization_id: parse_uuid(&organization_text, "entities.organization_id")?,
        entity_type: row.get("entity_type")?,
        entity_name: row.get("entity_name")?,
        entity_code: row.get("entity_code")?,
        smart_code,
        status,
        version: row.get("version")?,
        parent_entity_id: parse_optional_uuid(
            row.get("parent_entity_id")?,
            "entities.parent_entity_id",
        )?,
        metadata: parse_json(&metadata_text, "entities.metadata")?,
        created_by: parse_optional_uuid(row.get("created_by")?, "entities.created_by")?,
        updated_by: parse_optional_uuid(row.get("updated_by")?, "entities.updated_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
