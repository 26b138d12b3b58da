//! Relationship graph and active-edge state machine.
//!
//! # Responsibility
//! - Upsert typed edges between entities of one organization.
//! - Swap the active edge of `(from_entity_id, relationship_type)` atomically.
//! - Resolve "current state" as the target of the active edge.
//!
//! # Invariants
//! - A transition deactivates the old edge and inserts the new one inside the
//!   same `BEGIN IMMEDIATE` unit, so no reader observes zero or two active
//!   edges for the key.
//! - The partial unique index backs the invariant when writers race on
//!   separate connections.

use crate::model::entity::{Entity, EntityId};
use crate::model::organization::OrganizationId;
use crate::model::relationship::{Relationship, RelationshipId};
use crate::repo::entity_repo::{EntityRepository, SqliteEntityRepository};
use crate::repo::now_ms;
use crate::repo::relationship_repo::{
    RelationshipListQuery, RelationshipRepository, SqliteRelationshipRepository,
};
use crate::service::error::{EngineError, EngineResult};
use crate::service::organization_guard::resolve_organization;
use crate::service::{begin_unit, merge_json_object, normalize_object, require_text};
use crate::smart_code::code::SmartCode;
use crate::smart_code::registry::{SmartCodeBehavior, SmartCodeRegistry};
use log::debug;
use rusqlite::Connection;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Requested edge between two entities.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipInput {
    pub from_entity_id: EntityId,
    pub to_entity_id: EntityId,
    pub relationship_type: String,
    pub smart_code: Option<SmartCode>,
    pub relationship_data: Value,
    /// Epoch ms.
    pub effective_date: Option<i64>,
    /// Epoch ms.
    pub expiration_date: Option<i64>,
}

impl RelationshipInput {
    pub fn new(
        from_entity_id: EntityId,
        to_entity_id: EntityId,
        relationship_type: impl Into<String>,
    ) -> Self {
        Self {
            from_entity_id,
            to_entity_id,
            relationship_type: relationship_type.into(),
            smart_code: None,
            relationship_data: Value::Object(Map::new()),
            effective_date: None,
            expiration_date: None,
        }
    }

    pub fn with_smart_code(mut self, smart_code: SmartCode) -> Self {
        self.smart_code = Some(smart_code);
        self
    }
}

/// Relationship service bound to one connection.
pub struct RelationshipGraph<'a> {
    conn: &'a Connection,
    registry: &'a SmartCodeRegistry,
}

impl<'a> RelationshipGraph<'a> {
    pub fn new(conn: &'a Connection, registry: &'a SmartCodeRegistry) -> Self {
        Self { conn, registry }
    }

    /// Creates an edge, or refreshes the matching active edge.
    ///
    /// A different active target for `(from, type)` is swapped when the
    /// smart code carries the active-edge behavior and rejected otherwise.
    pub fn upsert(
        &self,
        organization_id: OrganizationId,
        input: RelationshipInput,
    ) -> EngineResult<Relationship> {
        let tx = begin_unit(self.conn)?;
        resolve_organization(&tx, organization_id)?;
        let now = now_ms(&tx)?;
        let relationship = upsert_in_unit(&tx, self.registry, organization_id, input, now)?;
        tx.commit()?;
        Ok(relationship)
    }

    /// Moves the active edge of `(from, type)` to `input.to_entity_id`.
    ///
    /// When `expected_to_entity_id` is set, the swap only happens if the
    /// current active edge points at it.
    pub fn transition(
        &self,
        organization_id: OrganizationId,
        input: RelationshipInput,
        expected_to_entity_id: Option<EntityId>,
    ) -> EngineResult<Relationship> {
        let tx = begin_unit(self.conn)?;
        resolve_organization(&tx, organization_id)?;
        let now = now_ms(&tx)?;
        let relationship =
            transition_in_unit(&tx, organization_id, input, expected_to_entity_id, now)?;
        tx.commit()?;
        Ok(relationship)
    }

    pub fn get(
        &self,
        organization_id: OrganizationId,
        id: RelationshipId,
    ) -> EngineResult<Relationship> {
        resolve_organization(self.conn, organization_id)?;
        SqliteRelationshipRepository::new(self.conn)
            .get_relationship(organization_id, id)?
            .ok_or_else(|| EngineError::not_found("relationship", id))
    }

    pub fn list(
        &self,
        organization_id: OrganizationId,
        query: &RelationshipListQuery,
    ) -> EngineResult<Vec<Relationship>> {
        resolve_organization(self.conn, organization_id)?;
        Ok(SqliteRelationshipRepository::new(self.conn)
            .list_relationships(organization_id, query)?)
    }

    /// Returns the target of the active `(from, type)` edge, if any.
    pub fn current_state(
        &self,
        organization_id: OrganizationId,
        from_entity_id: EntityId,
        relationship_type: &str,
    ) -> EngineResult<Option<Entity>> {
        resolve_organization(self.conn, organization_id)?;
        let edge = SqliteRelationshipRepository::new(self.conn).find_active_edge(
            organization_id,
            from_entity_id,
            relationship_type,
        )?;
        let Some(edge) = edge else {
            return Ok(None);
        };
        Ok(SqliteEntityRepository::new(self.conn).get_entity(
            organization_id,
            edge.to_entity_id,
            true,
        )?)
    }

    /// Ends an edge. Already inactive edges are returned unchanged.
    pub fn deactivate(
        &self,
        organization_id: OrganizationId,
        id: RelationshipId,
    ) -> EngineResult<Relationship> {
        let tx = begin_unit(self.conn)?;
        resolve_organization(&tx, organization_id)?;
        let repo = SqliteRelationshipRepository::new(&tx);
        let edge = repo
            .get_relationship(organization_id, id)?
            .ok_or_else(|| EngineError::not_found("relationship", id))?;
        if edge.is_active {
            repo.deactivate_relationship(organization_id, id, now_ms(&tx)?)?;
        }
        let edge = repo
            .get_relationship(organization_id, id)?
            .ok_or_else(|| EngineError::not_found("relationship", id))?;
        tx.commit()?;
        Ok(edge)
    }
}

fn validate_input(
    conn: &Connection,
    organization_id: OrganizationId,
    input: &mut RelationshipInput,
) -> EngineResult<()> {
    input.relationship_type = require_text(&input.relationship_type, "relationship_type")?;
    if input.from_entity_id == input.to_entity_id {
        return Err(EngineError::validation(
            "relationship endpoints must be different entities",
        ));
    }
    if let (Some(effective), Some(expiration)) = (input.effective_date, input.expiration_date) {
        if expiration < effective {
            return Err(EngineError::validation(
                "expiration_date must not precede effective_date",
            ));
        }
    }
    let entities = SqliteEntityRepository::new(conn);
    for id in [input.from_entity_id, input.to_entity_id] {
        if entities.get_entity(organization_id, id, false)?.is_none() {
            return Err(EngineError::not_found("entity", id));
        }
    }
    Ok(())
}

/// Upsert inside an already open unit.
pub(crate) fn upsert_in_unit(
    conn: &Connection,
    registry: &SmartCodeRegistry,
    organization_id: OrganizationId,
    mut input: RelationshipInput,
    now: i64,
) -> EngineResult<Relationship> {
    validate_input(conn, organization_id, &mut input)?;
    let repo = SqliteRelationshipRepository::new(conn);
    let active = repo.find_active_edge(
        organization_id,
        input.from_entity_id,
        &input.relationship_type,
    )?;

    match active {
        Some(edge) if edge.to_entity_id == input.to_entity_id => {
            let mut data = edge.relationship_data.clone();
            merge_json_object(&mut data, input.relationship_data);
            let smart_code = input.smart_code.or(edge.smart_code);
            repo.update_relationship_payload(
                organization_id,
                edge.id,
                smart_code.as_ref(),
                &data,
                now,
            )?;
            repo.get_relationship(organization_id, edge.id)?
                .ok_or_else(|| EngineError::not_found("relationship", edge.id))
        }
        Some(edge) => {
            let swaps = input
                .smart_code
                .as_ref()
                .or(edge.smart_code.as_ref())
                .is_some_and(|code| registry.has_behavior(code, SmartCodeBehavior::ActiveEdge));
            if !swaps {
                return Err(EngineError::ActiveEdgeConflict(format!(
                    "entity {} already has an active `{}` edge to {}",
                    input.from_entity_id, input.relationship_type, edge.to_entity_id
                )));
            }
            swap_active_edge(&repo, organization_id, Some(edge), input, now)
        }
        None => swap_active_edge(&repo, organization_id, None, input, now),
    }
}

/// Transition inside an already open unit.
pub(crate) fn transition_in_unit(
    conn: &Connection,
    organization_id: OrganizationId,
    mut input: RelationshipInput,
    expected_to_entity_id: Option<EntityId>,
    now: i64,
) -> EngineResult<Relationship> {
    validate_input(conn, organization_id, &mut input)?;
    let repo = SqliteRelationshipRepository::new(conn);
    let active = repo.find_active_edge(
        organization_id,
        input.from_entity_id,
        &input.relationship_type,
    )?;

    if let Some(expected) = expected_to_entity_id {
        let current = active.as_ref().map(|edge| edge.to_entity_id);
        if current != Some(expected) {
            return Err(EngineError::ActiveEdgeConflict(format!(
                "active `{}` edge of {} no longer points at {expected}",
                input.relationship_type, input.from_entity_id
            )));
        }
    }
    if let Some(edge) = active.as_ref() {
        if edge.to_entity_id == input.to_entity_id {
            return Ok(edge.clone());
        }
    }
    swap_active_edge(&repo, organization_id, active, input, now)
}

fn swap_active_edge(
    repo: &SqliteRelationshipRepository<'_>,
    organization_id: OrganizationId,
    previous: Option<Relationship>,
    input: RelationshipInput,
    now: i64,
) -> EngineResult<Relationship> {
    let previous_to = previous.as_ref().map(|edge| edge.to_entity_id);
    if let Some(edge) = previous.as_ref() {
        repo.deactivate_relationship(organization_id, edge.id, now)?;
    }

    let relationship = Relationship {
        id: Uuid::new_v4(),
        organization_id,
        from_entity_id: input.from_entity_id,
        to_entity_id: input.to_entity_id,
        relationship_type: input.relationship_type,
        smart_code: input
            .smart_code
            .or_else(|| previous.and_then(|edge| edge.smart_code)),
        is_active: true,
        effective_date: input.effective_date,
        expiration_date: input.expiration_date,
        ended_at: None,
        relationship_data: normalize_object(input.relationship_data),
        created_at: now,
        updated_at: now,
    };
    repo.insert_relationship(&relationship)?;

    debug!(
        "event=edge_activate module=relationship status=ok relationship_id={} previous_to={}",
        relationship.id,
        previous_to.map_or_else(|| "none".to_string(), |id| id.to_string())
    );
    Ok(relationship)
}
