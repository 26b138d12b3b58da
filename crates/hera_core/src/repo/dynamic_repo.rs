//! Dynamic attribute (EAV) repository.
//!
//! # Responsibility
//! - Store typed attribute rows keyed by `(entity_id, field_name)`.
//! - Map `DynamicValue` variants onto exactly one value column.
//!
//! # Invariants
//! - `upsert_field` keeps one live row per key; the row id and `created_at`
//!   of an existing row survive the upsert.
//! - Switching `field_type` nulls every other value column in the same write.

use crate::model::dynamic::{DynamicField, DynamicValue, FieldType};
use crate::model::entity::EntityId;
use crate::model::organization::OrganizationId;
use crate::repo::{
    bool_to_int, ensure_connection_ready, int_to_bool, json_to_db, parse_json, parse_uuid,
    RepoError, RepoResult,
};
use crate::smart_code::code::SmartCode;
use rusqlite::{params, Connection, Row};

const DYNAMIC_SELECT_SQL: &str = "SELECT
    id,
    organization_id,
    entity_id,
    field_name,
    field_type,
    field_value_text,
    field_value_number,
    field_value_boolean,
    field_value_date,
    field_value_json,
    smart_code,
    validation_rules,
    is_required,
    is_searchable,
    created_at,
    updated_at
FROM dynamic_data";

/// Repository interface for attribute rows.
pub trait DynamicFieldRepository {
    /// Inserts or replaces the row for `(entity_id, field_name)`.
    fn upsert_field(&self, field: &DynamicField) -> RepoResult<()>;
    fn get_field(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
        field_name: &str,
    ) -> RepoResult<Option<DynamicField>>;
    /// Lists every attribute of one entity ordered by `field_name`.
    fn list_fields(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
    ) -> RepoResult<Vec<DynamicField>>;
    /// Returns `true` when a row was removed.
    fn delete_field(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
        field_name: &str,
    ) -> RepoResult<bool>;
    fn delete_fields_for_entity(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
    ) -> RepoResult<usize>;
}

/// SQLite-backed attribute repository.
pub struct SqliteDynamicFieldRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDynamicFieldRepository<'conn> {
    /// Creates a repository from a migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, &["dynamic_data"])?;
        Ok(Self { conn })
    }

    pub(crate) fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

/// One populated column out of the five value columns.
#[derive(Default)]
struct ValueColumns {
    text: Option<String>,
    number: Option<f64>,
    boolean: Option<i64>,
    date: Option<String>,
    json: Option<String>,
}

impl ValueColumns {
    fn from_value(value: &DynamicValue) -> Self {
        let mut columns = Self::default();
        match value {
            DynamicValue::Text(text) => columns.text = Some(text.clone()),
            DynamicValue::Number(number) => columns.number = Some(*number),
            DynamicValue::Boolean(flag) => columns.boolean = Some(bool_to_int(*flag)),
            DynamicValue::Date(date) => columns.date = Some(date.clone()),
            DynamicValue::Json(value) => columns.json = Some(value.to_string()),
        }
        columns
    }
}

impl DynamicFieldRepository for SqliteDynamicFieldRepository<'_> {
    fn upsert_field(&self, field: &DynamicField) -> RepoResult<()> {
        let columns = ValueColumns::from_value(&field.value);
        self.conn.execute(
            "INSERT INTO dynamic_data (
                id,
                organization_id,
                entity_id,
                field_name,
                field_type,
                field_value_text,
                field_value_number,
                field_value_boolean,
                field_value_date,
                field_value_json,
                smart_code,
                validation_rules,
                is_required,
                is_searchable,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(entity_id, field_name) DO UPDATE SET
                field_type = excluded.field_type,
                field_value_text = excluded.field_value_text,
                field_value_number = excluded.field_value_number,
                field_value_boolean = excluded.field_value_boolean,
                field_value_date = excluded.field_value_date,
                field_value_json = excluded.field_value_json,
                smart_code = excluded.smart_code,
                validation_rules = excluded.validation_rules,
                is_required = excluded.is_required,
                is_searchable = excluded.is_searchable,
                updated_at = excluded.updated_at
            WHERE dynamic_data.organization_id = excluded.organization_id;",
            params![
                field.id.to_string(),
                field.organization_id.to_string(),
                field.entity_id.to_string(),
                field.field_name.as_str(),
                field.field_type.as_str(),
                columns.text,
                columns.number,
                columns.boolean,
                columns.date,
                columns.json,
                field.smart_code.as_ref().map(SmartCode::as_str),
                json_to_db(&field.validation_rules),
                bool_to_int(field.is_required),
                bool_to_int(field.is_searchable),
                field.created_at,
                field.updated_at,
            ],
        )?;
        Ok(())
    }

    fn get_field(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
        field_name: &str,
    ) -> RepoResult<Option<DynamicField>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DYNAMIC_SELECT_SQL}
             WHERE organization_id = ?1 AND entity_id = ?2 AND field_name = ?3;"
        ))?;
        let mut rows = stmt.query(params![
            organization_id.to_string(),
            entity_id.to_string(),
            field_name
        ])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_dynamic_row(row)?));
        }
        Ok(None)
    }

    fn list_fields(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
    ) -> RepoResult<Vec<DynamicField>> {
        let mut stmt = self.conn.prepare(&format!(
            "{DYNAMIC_SELECT_SQL}
             WHERE organization_id = ?1 AND entity_id = ?2
             ORDER BY field_name ASC;"
        ))?;
        let mut rows = stmt.query(params![organization_id.to_string(), entity_id.to_string()])?;
        let mut fields = Vec::new();
        while let Some(row) = rows.next()? {
            fields.push(parse_dynamic_row(row)?);
        }
        Ok(fields)
    }

    fn delete_field(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
        field_name: &str,
    ) -> RepoResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM dynamic_data
             WHERE organization_id = ?1 AND entity_id = ?2 AND field_name = ?3;",
            params![organization_id.to_string(), entity_id.to_string(), field_name],
        )?;
        Ok(changed > 0)
    }

    fn delete_fields_for_entity(
        &self,
        organization_id: OrganizationId,
        entity_id: EntityId,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "DELETE FROM dynamic_data WHERE organization_id = ?1 AND entity_id = ?2;",
            params![organization_id.to_string(), entity_id.to_string()],
        )?;
        Ok(changed)
    }
}

fn parse_dynamic_row(row: &Row<'_>) -> RepoResult<DynamicField> {
    let id_text: String = row.get("id")?;
    let organization_text: String = row.get("organization_id")?;
    let entity_text: String = row.get("entity_id")?;
    let field_name: String = row.get("field_name")?;

    let type_text: String = row.get("field_type")?;
    let field_type = FieldType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid field_type `{type_text}` in dynamic_data.field_type"
        ))
    })?;

    let value = match field_type {
        FieldType::Text => row
            .get::<_, Option<String>>("field_value_text")?
            .map(DynamicValue::Text),
        FieldType::Number => row
            .get::<_, Option<f64>>("field_value_number")?
            .map(DynamicValue::Number),
        FieldType::Boolean => row
            .get::<_, Option<i64>>("field_value_boolean")?
            .map(|flag| int_to_bool(flag, "dynamic_data.field_value_boolean"))
            .transpose()?
            .map(DynamicValue::Boolean),
        FieldType::Date => row
            .get::<_, Option<String>>("field_value_date")?
            .map(DynamicValue::Date),
        FieldType::Json => row
            .get::<_, Option<String>>("field_value_json")?
            .map(|text| parse_json(&text, "dynamic_data.field_value_json"))
            .transpose()?
            .map(DynamicValue::Json),
    };
    let value = value.ok_or_else(|| {
        RepoError::InvalidData(format!(
            "dynamic field `{field_name}` has no value in its {} column",
            field_type.as_str()
        ))
    })?;

    let smart_code = row
        .get::<_, Option<String>>("smart_code")?
        .map(|text| {
            SmartCode::parse(&text)
                .map_err(|err| RepoError::InvalidData(format!("{err} in dynamic_data.smart_code")))
        })
        .transpose()?;

    let rules_text: String = row.get("validation_rules")?;

    Ok(DynamicField {
        id: parse_uuid(&id_text, "dynamic_data.id")?,
        organization_id: parse_uuid(&organization_text, "dynamic_data.organization_id")?,
        entity_id: parse_uuid(&entity_text, "dynamic_data.entity_id")?,
        field_name,
        field_type,
        value,
        smart_code,
        validation_rules: parse_json(&rules_text, "dynamic_data.validation_rules")?,
        is_required: int_to_bool(row.get("is_required")?, "dynamic_data.is_required")?,
        is_searchable: int_to_bool(row.get("is_searchable")?, "dynamic_data.is_searchable")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
