//! Organization noun handler.
//!
//! Organizations are the tenant roots, so this handler never runs the
//! organization guard; `organization_id` is only a fallback target id.

use crate::orchestrator::envelope::{
    decode_section, parse_record_status, require_section, target_id, to_data, CrudAction,
    ListData, RequestEnvelope,
};
use crate::orchestrator::{unsupported, Noun, Orchestrator};
use crate::repo::organization_repo::OrganizationListQuery;
use crate::service::error::EngineResult;
use crate::service::organization_service::{
    NewOrganization, OrganizationPatch, OrganizationService,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OrganizationWire {
    id: Option<Uuid>,
    organization_name: Option<String>,
    organization_code: Option<String>,
    organization_type: Option<String>,
    industry: Option<String>,
    parent_organization_id: Option<Uuid>,
    settings: Option<Value>,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct OrganizationPredicate {
    parent_organization_id: Option<Uuid>,
}

pub(super) fn handle(
    orchestrator: &Orchestrator<'_>,
    action: CrudAction,
    request: RequestEnvelope,
) -> EngineResult<Value> {
    if action == CrudAction::Void {
        return Err(unsupported(Noun::Organization, action));
    }
    let service = OrganizationService::new(orchestrator.conn);

    match action {
        CrudAction::Create => {
            let wire: OrganizationWire =
                require_section(request.payload.organization, "organization")?;
            let input = NewOrganization {
                organization_name: wire.organization_name.unwrap_or_default(),
                organization_code: wire.organization_code.unwrap_or_default(),
                organization_type: wire.organization_type,
                industry: wire.industry,
                parent_organization_id: wire.parent_organization_id,
                settings: wire.settings.unwrap_or(Value::Null),
            };
            to_data(&service.create(input)?)
        }
        CrudAction::Read => {
            let id = target_id(&request.options, request.organization_id, Noun::Organization)?;
            to_data(&service.get(id, request.options.include_deleted)?)
        }
        CrudAction::Update => {
            let section = request.payload.patch.or(request.payload.organization);
            let wire: OrganizationWire = decode_section(section, "patch")?;
            let fallback = wire.id.or(request.organization_id);
            let id = target_id(&request.options, fallback, Noun::Organization)?;
            let patch = OrganizationPatch {
                organization_name: wire.organization_name,
                organization_type: wire.organization_type,
                industry: wire.industry,
                status: parse_record_status(wire.status.as_deref())?,
                settings: wire.settings,
            };
            to_data(&service.update(id, patch)?)
        }
        CrudAction::Archive => {
            let id = target_id(&request.options, request.organization_id, Noun::Organization)?;
            to_data(&service.archive(id)?)
        }
        CrudAction::Delete => {
            let id = target_id(&request.options, request.organization_id, Noun::Organization)?;
            to_data(&service.delete(id)?)
        }
        CrudAction::List => {
            let predicate: OrganizationPredicate = request.options.where_predicate()?;
            let query = OrganizationListQuery {
                include_archived: request.options.include_deleted,
                parent_organization_id: predicate.parent_organization_id,
                page: orchestrator
                    .limits
                    .page(request.options.limit, request.options.offset),
            };
            let items = service.list(&query)?;
            to_data(&ListData {
                count: items.len(),
                items,
                limit: query.page.limit,
                offset: query.page.offset,
            })
        }
        CrudAction::Void => Err(unsupported(Noun::Organization, action)),
    }
}
