//! Transaction noun handler.

use crate::model::status::TransactionStatus;
use crate::orchestrator::envelope::{
    decode_section, optional_smart_code, require_section, require_smart_code, target_id,
    to_data, CrudAction, ListData, RequestEnvelope,
};
use crate::orchestrator::{unsupported, Noun, Orchestrator};
use crate::repo::transaction_repo::TransactionListQuery;
use crate::service::error::{EngineError, EngineResult};
use crate::service::transaction_service::{
    NewTransaction, NewTransactionLine, TransactionPatch, TransactionService,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HeaderWire {
    id: Option<Uuid>,
    transaction_type: Option<String>,
    transaction_code: Option<String>,
    transaction_date: Option<String>,
    status: Option<String>,
    total_amount: Option<f64>,
    currency: Option<String>,
    smart_code: Option<String>,
    source_entity_id: Option<Uuid>,
    target_entity_id: Option<Uuid>,
    reference_transaction_id: Option<Uuid>,
    description: Option<String>,
    metadata: Option<Value>,
    idempotency_key: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LineWire {
    line_number: Option<i64>,
    line_type: Option<String>,
    entity_id: Option<Uuid>,
    description: Option<String>,
    quantity: Option<f64>,
    unit_amount: Option<f64>,
    line_amount: Option<f64>,
    smart_code: Option<String>,
    line_data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TransactionPredicate {
    transaction_type: Option<String>,
    status: Option<String>,
    smart_code: Option<String>,
    source_entity_id: Option<Uuid>,
    target_entity_id: Option<Uuid>,
    date_from: Option<String>,
    date_to: Option<String>,
}

pub(super) fn handle(
    orchestrator: &Orchestrator<'_>,
    action: CrudAction,
    request: RequestEnvelope,
) -> EngineResult<Value> {
    if action == CrudAction::Archive {
        return Err(unsupported(Noun::Transaction, action));
    }
    let organization_id = request.require_organization()?;
    let actor = request.actor_user_id;
    let service = TransactionService::new(orchestrator.conn, orchestrator.registry);

    match action {
        CrudAction::Create => {
            let wire: HeaderWire = require_section(request.payload.header, "header")?;
            let input = NewTransaction {
                transaction_type: wire.transaction_type.unwrap_or_default(),
                transaction_code: wire.transaction_code,
                transaction_date: wire.transaction_date,
                status: parse_transaction_status(wire.status.as_deref())?,
                total_amount: wire.total_amount,
                currency: wire.currency,
                smart_code: require_smart_code(wire.smart_code.as_deref())?,
                source_entity_id: wire.source_entity_id,
                target_entity_id: wire.target_entity_id,
                reference_transaction_id: wire.reference_transaction_id,
                description: wire.description,
                metadata: wire.metadata.unwrap_or(Value::Null),
                idempotency_key: wire.idempotency_key,
            };
            let lines = request
                .payload
                .lines
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(index, value)| parse_line(index, value))
                .collect::<EngineResult<Vec<_>>>()?;
            to_data(&service.create(organization_id, actor, input, lines)?)
        }
        CrudAction::Read => {
            let wire: HeaderWire = decode_section(request.payload.header, "header")?;
            let id = target_id(&request.options, wire.id, Noun::Transaction)?;
            to_data(&service.read(organization_id, id, request.options.include_deleted)?)
        }
        CrudAction::Update => {
            let patch_section = request.payload.patch.or(request.payload.header);
            let wire: HeaderWire = decode_section(patch_section, "patch")?;
            let id = target_id(&request.options, wire.id, Noun::Transaction)?;
            let patch = TransactionPatch {
                status: parse_transaction_status(wire.status.as_deref())?,
                description: wire.description,
                transaction_date: wire.transaction_date,
                metadata: wire.metadata,
            };
            to_data(&service.update(organization_id, actor, id, patch)?)
        }
        CrudAction::Void => {
            let patch_section = request.payload.patch.or(request.payload.header);
            let wire: HeaderWire = decode_section(patch_section, "patch")?;
            let id = target_id(&request.options, wire.id, Noun::Transaction)?;
            let reason = request.payload.reason.or(wire.reason).unwrap_or_default();
            to_data(&service.void(organization_id, actor, id, &reason)?)
        }
        CrudAction::Delete => {
            let wire: HeaderWire = decode_section(request.payload.header, "header")?;
            let id = target_id(&request.options, wire.id, Noun::Transaction)?;
            to_data(&service.delete(organization_id, id)?)
        }
        CrudAction::List => {
            let predicate: TransactionPredicate = request.options.where_predicate()?;
            let query = TransactionListQuery {
                transaction_type: predicate.transaction_type,
                status: parse_transaction_status(predicate.status.as_deref())?,
                smart_code: predicate.smart_code,
                source_entity_id: predicate.source_entity_id,
                target_entity_id: predicate.target_entity_id,
                date_from: predicate.date_from,
                date_to: predicate.date_to,
                include_hidden: request.options.include_deleted,
                page: orchestrator
                    .limits
                    .page(request.options.limit, request.options.offset),
            };
            let items = service.list(organization_id, &query)?;
            to_data(&ListData {
                count: items.len(),
                items,
                limit: query.page.limit,
                offset: query.page.offset,
            })
        }
        CrudAction::Archive => Err(unsupported(Noun::Transaction, action)),
    }
}

fn parse_transaction_status(value: Option<&str>) -> EngineResult<Option<TransactionStatus>> {
    value
        .map(|raw| {
            TransactionStatus::parse(raw)
                .ok_or_else(|| EngineError::validation(format!("unknown status `{raw}`")))
        })
        .transpose()
}

fn parse_line(index: usize, value: Value) -> EngineResult<NewTransactionLine> {
    let wire: LineWire = serde_json::from_value(value)
        .map_err(|err| EngineError::validation(format!("invalid lines[{index}]: {err}")))?;
    Ok(NewTransactionLine {
        line_number: wire.line_number,
        line_type: wire.line_type.unwrap_or_default(),
        entity_id: wire.entity_id,
        description: wire.description,
        quantity: wire.quantity,
        unit_amount: wire.unit_amount,
        line_amount: wire.line_amount,
        smart_code: optional_smart_code(wire.smart_code.as_deref())?,
        line_data: wire.line_data.unwrap_or(Value::Null),
    })
}
