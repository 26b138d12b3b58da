//! Relationship noun handler.
//!
//! CREATE upserts, UPDATE transitions the active edge, DELETE deactivates.

use crate::model::entity::Entity;
use crate::orchestrator::envelope::{
    decode_section, optional_smart_code, require_section, target_id, to_data, CrudAction,
    ListData, RequestEnvelope,
};
use crate::orchestrator::{unsupported, Noun, Orchestrator};
use crate::repo::relationship_repo::RelationshipListQuery;
use crate::service::error::{EngineError, EngineResult};
use crate::service::relationship_service::{RelationshipGraph, RelationshipInput};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RelationshipWire {
    id: Option<Uuid>,
    from_entity_id: Option<Uuid>,
    to_entity_id: Option<Uuid>,
    relationship_type: Option<String>,
    smart_code: Option<String>,
    relationship_data: Option<Value>,
    effective_date: Option<i64>,
    expiration_date: Option<i64>,
    expected_to_entity_id: Option<Uuid>,
}

impl RelationshipWire {
    fn into_input(self) -> EngineResult<(RelationshipInput, Option<Uuid>)> {
        let from_entity_id = self
            .from_entity_id
            .ok_or_else(|| EngineError::validation("from_entity_id is required"))?;
        let to_entity_id = self
            .to_entity_id
            .ok_or_else(|| EngineError::validation("to_entity_id is required"))?;
        let input = RelationshipInput {
            from_entity_id,
            to_entity_id,
            relationship_type: self.relationship_type.unwrap_or_default(),
            smart_code: optional_smart_code(self.smart_code.as_deref())?,
            relationship_data: self.relationship_data.unwrap_or(Value::Null),
            effective_date: self.effective_date,
            expiration_date: self.expiration_date,
        };
        Ok((input, self.expected_to_entity_id))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RelationshipPredicate {
    from_entity_id: Option<Uuid>,
    to_entity_id: Option<Uuid>,
    entity_id: Option<Uuid>,
    relationship_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct CurrentState<'a> {
    from_entity_id: Uuid,
    relationship_type: &'a str,
    current_state: Option<Entity>,
}

pub(super) fn handle(
    orchestrator: &Orchestrator<'_>,
    action: CrudAction,
    request: RequestEnvelope,
) -> EngineResult<Value> {
    if matches!(action, CrudAction::Void | CrudAction::Archive) {
        return Err(unsupported(Noun::Relationship, action));
    }
    let organization_id = request.require_organization()?;
    let graph = RelationshipGraph::new(orchestrator.conn, orchestrator.registry);

    match action {
        CrudAction::Create => {
            let wire: RelationshipWire =
                require_section(request.payload.relationship, "relationship")?;
            let (input, _) = wire.into_input()?;
            to_data(&graph.upsert(organization_id, input)?)
        }
        CrudAction::Update => {
            let section = request.payload.patch.or(request.payload.relationship);
            let wire: RelationshipWire = require_section(section, "relationship")?;
            let (input, expected_to_entity_id) = wire.into_input()?;
            to_data(&graph.transition(organization_id, input, expected_to_entity_id)?)
        }
        CrudAction::Read => {
            if let Some(id) = request.options.where_id()? {
                return to_data(&graph.get(organization_id, id)?);
            }
            let predicate: RelationshipPredicate = request.options.where_predicate()?;
            match (predicate.from_entity_id, predicate.relationship_type.as_deref()) {
                (Some(from_entity_id), Some(relationship_type)) => {
                    let current_state =
                        graph.current_state(organization_id, from_entity_id, relationship_type)?;
                    to_data(&CurrentState {
                        from_entity_id,
                        relationship_type,
                        current_state,
                    })
                }
                _ => Err(EngineError::validation(
                    "READ requires where.id or where.from_entity_id with relationship_type",
                )),
            }
        }
        CrudAction::List => {
            let predicate: RelationshipPredicate = request.options.where_predicate()?;
            let query = RelationshipListQuery {
                from_entity_id: predicate.from_entity_id,
                to_entity_id: predicate.to_entity_id,
                touching_entity_id: predicate.entity_id,
                relationship_type: predicate.relationship_type,
                include_inactive: request.options.include_deleted,
                page: orchestrator
                    .limits
                    .page(request.options.limit, request.options.offset),
            };
            let items = graph.list(organization_id, &query)?;
            to_data(&ListData {
                count: items.len(),
                items,
                limit: query.page.limit,
                offset: query.page.offset,
            })
        }
        CrudAction::Delete => {
            let wire: RelationshipWire =
                decode_section(request.payload.relationship, "relationship")?;
            let id = target_id(&request.options, wire.id, Noun::Relationship)?;
            to_data(&graph.deactivate(organization_id, id)?)
        }
        CrudAction::Void | CrudAction::Archive => Err(unsupported(Noun::Relationship, action)),
    }
}
