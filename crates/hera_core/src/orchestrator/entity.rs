//! Entity noun handler.

use crate::model::dynamic::DynamicFieldInput;
use crate::orchestrator::envelope::{
    decode_section, optional_smart_code, parse_record_status, require_section,
    require_smart_code, target_id, to_data, CrudAction, ListData, RequestEnvelope,
};
use crate::orchestrator::{unsupported, Noun, Orchestrator};
use crate::repo::entity_repo::EntityListQuery;
use crate::service::entity_service::{
    EntityLookup, EntityPatch, EntityReadOptions, EntityService, NewEntity, NewEntityLink,
};
use crate::service::error::{EngineError, EngineResult};
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct EntityWire {
    id: Option<Uuid>,
    entity_type: Option<String>,
    entity_name: Option<String>,
    entity_code: Option<String>,
    smart_code: Option<String>,
    status: Option<String>,
    parent_entity_id: Option<Uuid>,
    metadata: Option<Value>,
    version: Option<i64>,
    idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LinkWire {
    to_entity_id: Uuid,
    relationship_type: String,
    #[serde(default)]
    smart_code: Option<String>,
    #[serde(default)]
    relationship_data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct EntityPredicate {
    id: Option<Uuid>,
    entity_type: Option<String>,
    entity_code: Option<String>,
    entity_name: Option<String>,
    smart_code: Option<String>,
    status: Option<String>,
    parent_entity_id: Option<Uuid>,
}

impl EntityPredicate {
    fn into_query(self) -> EngineResult<EntityListQuery> {
        Ok(EntityListQuery {
            id: self.id,
            entity_type: self.entity_type,
            entity_code: self.entity_code,
            entity_name: self.entity_name,
            smart_code: self.smart_code,
            status: parse_record_status(self.status.as_deref())?,
            parent_entity_id: self.parent_entity_id,
            ..EntityListQuery::default()
        })
    }
}

pub(super) fn handle(
    orchestrator: &Orchestrator<'_>,
    action: CrudAction,
    request: RequestEnvelope,
) -> EngineResult<Value> {
    if action == CrudAction::Void {
        return Err(unsupported(Noun::Entity, action));
    }
    let organization_id = request.require_organization()?;
    let actor = request.actor_user_id;
    let service = EntityService::new(orchestrator.conn, orchestrator.registry);
    let options = EntityReadOptions {
        include_relationships: request.options.include_relationships,
        include_deleted: request.options.include_deleted,
    };

    match action {
        CrudAction::Create => {
            let wire: EntityWire = require_section(request.payload.entity, "entity")?;
            let input = NewEntity {
                entity_type: wire.entity_type.unwrap_or_default(),
                entity_name: wire.entity_name.unwrap_or_default(),
                entity_code: wire.entity_code,
                smart_code: require_smart_code(wire.smart_code.as_deref())?,
                status: parse_record_status(wire.status.as_deref())?,
                parent_entity_id: wire.parent_entity_id,
                metadata: wire.metadata.unwrap_or(Value::Null),
                idempotency_key: wire.idempotency_key,
            };
            let dynamic = dynamic_inputs(request.payload.dynamic)?;
            let links = request
                .payload
                .relationships
                .unwrap_or_default()
                .into_iter()
                .map(parse_link)
                .collect::<EngineResult<Vec<_>>>()?;
            to_data(&service.create(organization_id, actor, input, &dynamic, links)?)
        }
        CrudAction::Read => {
            let lookup = match request.options.where_id()? {
                Some(id) => EntityLookup::Id(id),
                None if request.options.has_predicate() => EntityLookup::Matching(
                    request
                        .options
                        .where_predicate::<EntityPredicate>()?
                        .into_query()?,
                ),
                None => {
                    let wire: EntityWire = decode_section(request.payload.entity, "entity")?;
                    EntityLookup::Id(wire.id.ok_or_else(|| {
                        EngineError::validation("READ requires where.id or a predicate")
                    })?)
                }
            };
            to_data(&service.read(organization_id, lookup, options)?)
        }
        CrudAction::Update => {
            let patch_section = request.payload.patch.or(request.payload.entity);
            let wire: EntityWire = decode_section(patch_section, "patch")?;
            let id = target_id(&request.options, wire.id, Noun::Entity)?;
            let patch = EntityPatch {
                entity_name: wire.entity_name,
                entity_code: wire.entity_code,
                smart_code: optional_smart_code(wire.smart_code.as_deref())?,
                status: parse_record_status(wire.status.as_deref())?,
                parent_entity_id: wire.parent_entity_id,
                metadata: wire.metadata,
                expected_version: wire.version,
            };
            let dynamic = dynamic_inputs(request.payload.dynamic)?;
            to_data(&service.update(organization_id, actor, id, patch, &dynamic)?)
        }
        CrudAction::Delete => {
            let wire: EntityWire = decode_section(request.payload.entity, "entity")?;
            let id = target_id(&request.options, wire.id, Noun::Entity)?;
            to_data(&service.delete(organization_id, actor, id)?)
        }
        CrudAction::Archive => {
            let wire: EntityWire = decode_section(request.payload.entity, "entity")?;
            let id = target_id(&request.options, wire.id, Noun::Entity)?;
            to_data(&service.archive(organization_id, actor, id)?)
        }
        CrudAction::List => {
            let mut query = request
                .options
                .where_predicate::<EntityPredicate>()?
                .into_query()?;
            query.page = orchestrator
                .limits
                .page(request.options.limit, request.options.offset);
            let page = query.page;
            let items = service.list(organization_id, query, options)?;
            to_data(&ListData {
                count: items.len(),
                items,
                limit: page.limit,
                offset: page.offset,
            })
        }
        CrudAction::Void => Err(unsupported(Noun::Entity, action)),
    }
}

fn dynamic_inputs(section: Option<Map<String, Value>>) -> EngineResult<Vec<DynamicFieldInput>> {
    match section {
        Some(map) => Ok(DynamicFieldInput::from_json_map(map)?),
        None => Ok(Vec::new()),
    }
}

fn parse_link(value: Value) -> EngineResult<NewEntityLink> {
    let wire: LinkWire = serde_json::from_value(value)
        .map_err(|err| EngineError::validation(format!("invalid relationships entry: {err}")))?;
    Ok(NewEntityLink {
        to_entity_id: wire.to_entity_id,
        relationship_type: wire.relationship_type,
        smart_code: optional_smart_code(wire.smart_code.as_deref())?,
        relationship_data: wire.relationship_data.unwrap_or(Value::Null),
    })
}
