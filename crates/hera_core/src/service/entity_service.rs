//! Entity orchestrator service.
//!
//! # Responsibility
//! - Create entities together with their attributes and edges.
//! - Version-checked updates with merge-by-name attribute patches.
//! - Delete unreferenced entities and archive referenced ones.
//!
//! # Invariants
//! - Every successful write bumps `version` by exactly one.
//! - A stale `expected_version` fails with `VERSION_CONFLICT` and writes
//!   nothing.
//! - Archived entities are invisible unless `include_deleted` is set.

use crate::model::dynamic::DynamicFieldInput;
use crate::model::entity::{Entity, EntityId};
use crate::model::organization::OrganizationId;
use crate::model::relationship::Relationship;
use crate::model::status::RecordStatus;
use crate::repo::dynamic_repo::SqliteDynamicFieldRepository;
use crate::repo::entity_repo::{EntityListQuery, EntityRepository, SqliteEntityRepository};
use crate::repo::idempotency_repo::{
    IdempotencyRepository, IdempotencyScope, SqliteIdempotencyRepository,
};
use crate::repo::relationship_repo::{
    RelationshipListQuery, RelationshipRepository, SqliteRelationshipRepository,
};
use crate::repo::{format_sequence_code, now_ms, Page};
use crate::service::dynamic_store::DynamicAttributeStore;
use crate::service::error::{EngineError, EngineResult};
use crate::service::organization_guard::resolve_organization;
use crate::service::relationship_service::{upsert_in_unit, RelationshipInput};
use crate::service::{begin_unit, normalize_object, require_text, DeleteOutcome};
use crate::smart_code::code::SmartCode;
use crate::smart_code::registry::SmartCodeRegistry;
use log::info;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Input for creating one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntity {
    pub entity_type: String,
    pub entity_name: String,
    /// Generated as `<TYPE>-<000001>` when absent.
    pub entity_code: Option<String>,
    pub smart_code: SmartCode,
    pub status: Option<RecordStatus>,
    pub parent_entity_id: Option<EntityId>,
    pub metadata: Value,
    pub idempotency_key: Option<String>,
}

impl NewEntity {
    pub fn new(
        entity_type: impl Into<String>,
        entity_name: impl Into<String>,
        smart_code: SmartCode,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_name: entity_name.into(),
            entity_code: None,
            smart_code,
            status: None,
            parent_entity_id: None,
            metadata: Value::Object(Map::new()),
            idempotency_key: None,
        }
    }
}

/// Edge created alongside a new entity, which is its source.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntityLink {
    pub to_entity_id: EntityId,
    pub relationship_type: String,
    pub smart_code: Option<SmartCode>,
    pub relationship_data: Value,
}

/// Field-level replacement of entity columns. Absent fields are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPatch {
    pub entity_name: Option<String>,
    pub entity_code: Option<String>,
    pub smart_code: Option<SmartCode>,
    pub status: Option<RecordStatus>,
    pub parent_entity_id: Option<EntityId>,
    pub metadata: Option<Value>,
    /// When set, the update only applies to this exact version.
    pub expected_version: Option<i64>,
}

/// Read switches shared by READ and LIST.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityReadOptions {
    pub include_relationships: bool,
    pub include_deleted: bool,
}

/// Target of a READ: an id or the first predicate match.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityLookup {
    Id(EntityId),
    Matching(EntityListQuery),
}

/// Entity with its attributes rendered as a nested map.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    #[serde(flatten)]
    pub entity: Entity,
    pub dynamic: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<Vec<Relationship>>,
}

/// Result of an entity DELETE request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityDeletion {
    pub action_performed: DeleteOutcome,
    /// Final state for archives, last state for physical deletes.
    pub entity: EntityRecord,
}

/// Entity service bound to one connection.
pub struct EntityService<'a> {
    conn: &'a Connection,
    registry: &'a SmartCodeRegistry,
}

impl<'a> EntityService<'a> {
    pub fn new(conn: &'a Connection, registry: &'a SmartCodeRegistry) -> Self {
        Self { conn, registry }
    }

    /// Creates an entity, its attributes and outgoing edges as one unit.
    ///
    /// A replayed `idempotency_key` returns the entity created first.
    pub fn create(
        &self,
        organization_id: OrganizationId,
        actor_user_id: Option<Uuid>,
        input: NewEntity,
        dynamic: &[DynamicFieldInput],
        links: Vec<NewEntityLink>,
    ) -> EngineResult<EntityRecord> {
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
                idempotency.lookup_key(organization_id, IdempotencyScope::Entity, key)?
            {
                let record = load_record(
                    &tx,
                    organization_id,
                    existing_id,
                    EntityReadOptions {
                        include_relationships: !links.is_empty(),
                        include_deleted: true,
                    },
                )?;
                tx.commit()?;
                info!(
                    "event=idempotent_replay module=entity status=ok entity_id={}",
                    existing_id
                );
                return Ok(record);
            }
        }

        let entity_type = require_text(&input.entity_type, "entity_type")?;
        let entity_name = require_text(&input.entity_name, "entity_name")?;
        let entities = SqliteEntityRepository::new(&tx);
        if let Some(parent_id) = input.parent_entity_id {
            entities
                .get_entity(organization_id, parent_id, false)?
                .ok_or_else(|| EngineError::not_found("entity", parent_id))?;
        }
        let entity_code = match input.entity_code.as_deref() {
            Some(code) => {
                let code = require_text(code, "entity_code")?;
                if entities.entity_code_exists(organization_id, &entity_type, &code)? {
                    return Err(duplicate_entity_code(&entity_type, &code));
                }
                code
            }
            None => next_entity_code(&entities, organization_id, &entity_type)?,
        };

        let now = now_ms(&tx)?;
        let entity = Entity {
            id: Uuid::new_v4(),
            organization_id,
            entity_type,
            entity_name,
            entity_code,
            smart_code: input.smart_code,
            status: input.status.unwrap_or(RecordStatus::Active),
            version: 1,
            parent_entity_id: input.parent_entity_id,
            metadata: normalize_object(input.metadata),
            created_by: actor_user_id,
            updated_by: actor_user_id,
            created_at: now,
            updated_at: now,
        };
        entities.insert_entity(&entity)?;

        DynamicAttributeStore::new(SqliteDynamicFieldRepository::new(&tx)).merge(
            organization_id,
            entity.id,
            dynamic,
            now,
        )?;

        let include_relationships = !links.is_empty();
        for link in links {
            let input = RelationshipInput {
                from_entity_id: entity.id,
                to_entity_id: link.to_entity_id,
                relationship_type: link.relationship_type,
                smart_code: link.smart_code,
                relationship_data: link.relationship_data,
                effective_date: None,
                expiration_date: None,
            };
            upsert_in_unit(&tx, self.registry, organization_id, input, now)?;
        }

        if let Some(key) = idempotency_key.as_deref() {
            idempotency.record_key(organization_id, IdempotencyScope::Entity, key, entity.id, now)?;
        }

        let record = load_record(
            &tx,
            organization_id,
            entity.id,
            EntityReadOptions {
                include_relationships,
                include_deleted: true,
            },
        )?;
        tx.commit()?;
        Ok(record)
    }

    /// Reads one entity by id or by the first predicate match.
    pub fn read(
        &self,
        organization_id: OrganizationId,
        lookup: EntityLookup,
        options: EntityReadOptions,
    ) -> EngineResult<EntityRecord> {
        resolve_organization(self.conn, organization_id)?;
        let id = match lookup {
            EntityLookup::Id(id) => id,
            EntityLookup::Matching(mut query) => {
                query.include_archived = options.include_deleted;
                query.page = Page {
                    limit: Some(1),
                    offset: 0,
                };
                SqliteEntityRepository::new(self.conn)
                    .list_entities(organization_id, &query)?
                    .into_iter()
                    .next()
                    .map(|entity| entity.id)
                    .ok_or(EngineError::NotFound {
                        kind: "entity",
                        id: None,
                    })?
            }
        };
        load_record(self.conn, organization_id, id, options)
    }

    pub fn list(
        &self,
        organization_id: OrganizationId,
        mut query: EntityListQuery,
        options: EntityReadOptions,
    ) -> EngineResult<Vec<EntityRecord>> {
        resolve_organization(self.conn, organization_id)?;
        query.include_archived = options.include_deleted;
        let entities =
            SqliteEntityRepository::new(self.conn).list_entities(organization_id, &query)?;
        entities
            .into_iter()
            .map(|entity| render_record(self.conn, entity, options))
            .collect()
    }

    /// Replaces supplied entity columns and merges attributes by name.
    pub fn update(
        &self,
        organization_id: OrganizationId,
        actor_user_id: Option<Uuid>,
        id: EntityId,
        patch: EntityPatch,
        dynamic: &[DynamicFieldInput],
    ) -> EngineResult<EntityRecord> {
        let tx = begin_unit(self.conn)?;
        resolve_organization(&tx, organization_id)?;
        let entities = SqliteEntityRepository::new(&tx);
        let mut entity = entities
            .get_entity(organization_id, id, false)?
            .ok_or_else(|| EngineError::not_found("entity", id))?;

        let expected_version = patch.expected_version.unwrap_or(entity.version);
        if expected_version != entity.version {
            return Err(EngineError::VersionConflict {
                id,
                expected: expected_version,
                actual: entity.version,
            });
        }

        if let Some(name) = patch.entity_name.as_deref() {
            entity.entity_name = require_text(name, "entity_name")?;
        }
        if let Some(code) = patch.entity_code.as_deref() {
            let code = require_text(code, "entity_code")?;
            if code != entity.entity_code
                && entities.entity_code_exists(organization_id, &entity.entity_type, &code)?
            {
                return Err(duplicate_entity_code(&entity.entity_type, &code));
            }
            entity.entity_code = code;
        }
        if let Some(smart_code) = patch.smart_code {
            entity.smart_code = smart_code;
        }
        if let Some(status) = patch.status {
            entity.status = status;
        }
        if let Some(parent_id) = patch.parent_entity_id {
            if parent_id == id {
                return Err(EngineError::validation("entity cannot be its own parent"));
            }
            entities
                .get_entity(organization_id, parent_id, false)?
                .ok_or_else(|| EngineError::not_found("entity", parent_id))?;
            entity.parent_entity_id = Some(parent_id);
        }
        if let Some(metadata) = patch.metadata {
            entity.metadata = normalize_object(metadata);
        }

        let now = now_ms(&tx)?;
        DynamicAttributeStore::new(SqliteDynamicFieldRepository::new(&tx)).merge(
            organization_id,
            id,
            dynamic,
            now,
        )?;

        entity.updated_by = actor_user_id;
        entity.updated_at = now;
        entities.update_entity(&entity, expected_version)?;

        let record = load_record(
            &tx,
            organization_id,
            id,
            EntityReadOptions {
                include_relationships: false,
                include_deleted: true,
            },
        )?;
        tx.commit()?;
        Ok(record)
    }

    /// Upserts a single attribute on an existing entity.
    pub fn set_dynamic_field(
        &self,
        organization_id: OrganizationId,
        actor_user_id: Option<Uuid>,
        id: EntityId,
        input: DynamicFieldInput,
    ) -> EngineResult<EntityRecord> {
        self.update(
            organization_id,
            actor_user_id,
            id,
            EntityPatch::default(),
            std::slice::from_ref(&input),
        )
    }

    /// Sets `status = archived`. Archiving an archived entity is a no-op.
    pub fn archive(
        &self,
        organization_id: OrganizationId,
        actor_user_id: Option<Uuid>,
        id: EntityId,
    ) -> EngineResult<EntityRecord> {
        let tx = begin_unit(self.conn)?;
        resolve_organization(&tx, organization_id)?;
        let entities = SqliteEntityRepository::new(&tx);
        let entity = entities
            .get_entity(organization_id, id, true)?
            .ok_or_else(|| EngineError::not_found("entity", id))?;
        archive_in_unit(&tx, entity, actor_user_id)?;
        let record = load_record(
            &tx,
            organization_id,
            id,
            EntityReadOptions {
                include_relationships: false,
                include_deleted: true,
            },
        )?;
        tx.commit()?;
        Ok(record)
    }

    /// Physically deletes an unreferenced entity; archives it otherwise.
    pub fn delete(
        &self,
        organization_id: OrganizationId,
        actor_user_id: Option<Uuid>,
        id: EntityId,
    ) -> EngineResult<EntityDeletion> {
        let tx = begin_unit(self.conn)?;
        resolve_organization(&tx, organization_id)?;
        let entities = SqliteEntityRepository::new(&tx);
        let entity = entities
            .get_entity(organization_id, id, true)?
            .ok_or_else(|| EngineError::not_found("entity", id))?;
        let references = entities.entity_references(organization_id, id)?;
        let audit_read = EntityReadOptions {
            include_relationships: false,
            include_deleted: true,
        };

        let deletion = if references.is_referenced() {
            archive_in_unit(&tx, entity, actor_user_id)?;
            EntityDeletion {
                action_performed: DeleteOutcome::Archived,
                entity: load_record(&tx, organization_id, id, audit_read)?,
            }
        } else {
            let snapshot = render_record(&tx, entity, audit_read)?;
            DynamicAttributeStore::new(SqliteDynamicFieldRepository::new(&tx))
                .clear_entity(organization_id, id)?;
            SqliteIdempotencyRepository::new(&tx).forget_record(
                organization_id,
                IdempotencyScope::Entity,
                id,
            )?;
            entities.delete_entity(organization_id, id)?;
            EntityDeletion {
                action_performed: DeleteOutcome::Deleted,
                entity: snapshot,
            }
        };
        tx.commit()?;

        info!(
            "event=entity_delete module=entity status=ok entity_id={} action_performed={}",
            id,
            deletion.action_performed.as_str()
        );
        Ok(deletion)
    }
}

fn archive_in_unit(
    conn: &Connection,
    mut entity: Entity,
    actor_user_id: Option<Uuid>,
) -> EngineResult<()> {
    if entity.is_archived() {
        return Ok(());
    }
    let expected_version = entity.version;
    entity.status = RecordStatus::Archived;
    entity.updated_by = actor_user_id;
    entity.updated_at = now_ms(conn)?;
    SqliteEntityRepository::new(conn).update_entity(&entity, expected_version)?;
    Ok(())
}

fn load_record(
    conn: &Connection,
    organization_id: OrganizationId,
    id: EntityId,
    options: EntityReadOptions,
) -> EngineResult<EntityRecord> {
    let entity = SqliteEntityRepository::new(conn)
        .get_entity(organization_id, id, options.include_deleted)?
        .ok_or_else(|| EngineError::not_found("entity", id))?;
    render_record(conn, entity, options)
}

fn render_record(
    conn: &Connection,
    entity: Entity,
    options: EntityReadOptions,
) -> EngineResult<EntityRecord> {
    let dynamic = DynamicAttributeStore::new(SqliteDynamicFieldRepository::new(conn))
        .get(entity.organization_id, entity.id)?;
    let relationships = if options.include_relationships {
        let query = RelationshipListQuery {
            touching_entity_id: Some(entity.id),
            include_inactive: options.include_deleted,
            ..RelationshipListQuery::default()
        };
        Some(
            SqliteRelationshipRepository::new(conn)
                .list_relationships(entity.organization_id, &query)?,
        )
    } else {
        None
    };
    Ok(EntityRecord {
        entity,
        dynamic,
        relationships,
    })
}

fn next_entity_code(
    entities: &SqliteEntityRepository<'_>,
    organization_id: OrganizationId,
    entity_type: &str,
) -> EngineResult<String> {
    let mut sequence = entities.count_entities_of_type(organization_id, entity_type)? + 1;
    loop {
        let code = format_sequence_code(entity_type, sequence);
        if !entities.entity_code_exists(organization_id, entity_type, &code)? {
            return Ok(code);
        }
        sequence += 1;
    }
}

fn duplicate_entity_code(entity_type: &str, code: &str) -> EngineError {
    EngineError::DuplicateCode(format!(
        "entity_code `{code}` already exists for entity_type `{entity_type}`"
    ))
}
