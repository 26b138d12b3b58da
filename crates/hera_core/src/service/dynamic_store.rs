//! Dynamic attribute store.
//!
//! # Responsibility
//! - Upsert typed attributes by `(entity_id, field_name)` with rule checks.
//! - Render an entity's attributes as a `field_name -> value` map.
//!
//! # Invariants
//! - Fields missing from a patch are never touched.
//! - A `None` value removes the field unless it is required.
//! - Rules and metadata not supplied by the input carry over from the
//!   existing row.

use crate::model::dynamic::{DynamicField, DynamicFieldError, DynamicFieldInput, ValidationRules};
use crate::model::entity::EntityId;
use crate::model::organization::OrganizationId;
use crate::repo::dynamic_repo::DynamicFieldRepository;
use crate::service::error::EngineResult;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Attribute store over a dynamic field repository.
pub struct DynamicAttributeStore<R: DynamicFieldRepository> {
    repo: R,
}

impl<R: DynamicFieldRepository> DynamicAttributeStore<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Applies one attribute change.
    ///
    /// Returns the stored row, or `None` when the field was cleared.
    ///
    /// # Errors
    /// - `VALIDATION_ERROR` for rule violations or clearing a required field.
    pub fn set(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
        input: &DynamicFieldInput,
        now: i64,
    ) -> EngineResult<Option<DynamicField>> {
        let existing = self
            .repo
            .get_field(organization_id, entity_id, &input.field_name)?;

        let is_required = input
            .is_required
            .or(existing.as_ref().map(|field| field.is_required))
            .unwrap_or(false);

        let Some(value) = input.value.clone() else {
            if is_required {
                return Err(
                    DynamicFieldError::RequiredFieldCleared(input.field_name.clone()).into(),
                );
            }
            self.repo
                .delete_field(organization_id, entity_id, &input.field_name)?;
            return Ok(None);
        };

        let validation_rules = input
            .validation_rules
            .clone()
            .or_else(|| existing.as_ref().map(|field| field.validation_rules.clone()))
            .unwrap_or_else(|| Value::Object(Map::new()));
        ValidationRules::from_json(&input.field_name, &validation_rules)?
            .check(&input.field_name, &value)?;

        let field = DynamicField {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |field| field.id),
            organization_id,
            entity_id,
            field_name: input.field_name.clone(),
            field_type: value.field_type(),
            value,
            smart_code: input
                .smart_code
                .clone()
                .or_else(|| existing.as_ref().and_then(|field| field.smart_code.clone())),
            validation_rules,
            is_required,
            is_searchable: input
                .is_searchable
                .or(existing.as_ref().map(|field| field.is_searchable))
                .unwrap_or(true),
            created_at: existing.as_ref().map_or(now, |field| field.created_at),
            updated_at: now,
        };
        self.repo.upsert_field(&field)?;
        Ok(Some(field))
    }

    /// Applies a batch of changes in input order.
    pub fn merge(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
        inputs: &[DynamicFieldInput],
        now: i64,
    ) -> EngineResult<()> {
        for input in inputs {
            self.set(organization_id, entity_id, input, now)?;
        }
        Ok(())
    }

    /// Returns every attribute of the entity as `field_name -> value`.
    pub fn get(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
    ) -> EngineResult<Map<String, Value>> {
        let fields = self.repo.list_fields(organization_id, entity_id)?;
        Ok(fields
            .into_iter()
            .map(|field| (field.field_name, field.value.to_json()))
            .collect())
    }

    /// Returns the full attribute rows, including rules and metadata.
    pub fn fields(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
    ) -> EngineResult<Vec<DynamicField>> {
        Ok(self.repo.list_fields(organization_id, entity_id)?)
    }

    pub(crate) fn clear_entity(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
    ) -> EngineResult<()> {
        self.repo
            .delete_fields_for_entity(organization_id, entity_id)?;
        Ok(())
    }
}
