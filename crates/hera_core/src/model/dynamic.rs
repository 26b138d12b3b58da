//! Dynamic (EAV) attribute model.
//!
//! # Responsibility
//! - Represent typed attribute values with a single `field_type` discriminator.
//! - Parse caller-supplied JSON into typed values and enforce field rules.
//!
//! # Invariants
//! - A `DynamicValue` populates exactly one storage column.
//! - Date values are `YYYY-MM-DD`.

use crate::model::entity::EntityId;
use crate::model::organization::OrganizationId;
use crate::smart_code::code::{SmartCode, SmartCodeError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static FIELD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,99}$").expect("valid field name regex"));
static ISO_DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]{4})-(0[1-9]|1[0-2])-(0[1-9]|[12][0-9]|3[01])$").expect("valid date regex")
});

/// Largest magnitude an `f64` carries without losing integer precision.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Returns whether `value` is a `YYYY-MM-DD` calendar date.
pub fn is_iso_date(value: &str) -> bool {
    let Some(captures) = ISO_DATE_RE.captures(value) else {
        return false;
    };
    let parts = (
        captures[1].parse::<u32>(),
        captures[2].parse::<u32>(),
        captures[3].parse::<u32>(),
    );
    match parts {
        (Ok(year), Ok(month), Ok(day)) => day <= days_in_month(year, month),
        _ => false,
    }
}

fn days_in_month(year: u32, month: u32) -> u32 {
    match month {
        2 if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Storage discriminator selecting the populated value column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Boolean,
    Date,
    Json,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Json => "json",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(Self::Text),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Typed attribute value. Serializes as the bare JSON value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DynamicValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(String),
    Json(Value),
}

impl DynamicValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Text(_) => FieldType::Text,
            Self::Number(_) => FieldType::Number,
            Self::Boolean(_) => FieldType::Boolean,
            Self::Date(_) => FieldType::Date,
            Self::Json(_) => FieldType::Json,
        }
    }

    /// Infers a value from bare JSON. `null` yields `None`.
    pub fn infer(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(text) => Some(Self::Text(text)),
            Value::Bool(flag) => Some(Self::Boolean(flag)),
            Value::Number(number) => number.as_f64().map(Self::Number),
            other => Some(Self::Json(other)),
        }
    }

    /// Converts JSON into a value of the declared type.
    pub fn from_typed(
        field_name: &str,
        field_type: FieldType,
        value: Value,
    ) -> Result<Self, DynamicFieldError> {
        let mismatch = || DynamicFieldError::TypeMismatch {
            field_name: field_name.to_string(),
            expected: field_type,
        };
        match field_type {
            FieldType::Text => match value {
                Value::String(text) => Ok(Self::Text(text)),
                _ => Err(mismatch()),
            },
            FieldType::Number => value.as_f64().map(Self::Number).ok_or_else(mismatch),
            FieldType::Boolean => value.as_bool().map(Self::Boolean).ok_or_else(mismatch),
            FieldType::Date => match value {
                Value::String(text) if is_iso_date(&text) => Ok(Self::Date(text)),
                Value::String(text) => Err(DynamicFieldError::InvalidDate {
                    field_name: field_name.to_string(),
                    value: text,
                }),
                _ => Err(mismatch()),
            },
            FieldType::Json => Ok(Self::Json(value)),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Text(text) | Self::Date(text) => Value::String(text.clone()),
            Self::Number(number) if number.fract() == 0.0 && number.abs() < MAX_EXACT_INTEGER => {
                Value::from(*number as i64)
            }
            Self::Number(number) => serde_json::Number::from_f64(*number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Boolean(flag) => Value::Bool(*flag),
            Self::Json(value) => value.clone(),
        }
    }
}

/// One live attribute row keyed by `(entity_id, field_name)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DynamicField {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub entity_id: EntityId,
    pub field_name: String,
    pub field_type: FieldType,
    pub value: DynamicValue,
    pub smart_code: Option<SmartCode>,
    pub validation_rules: Value,
    pub is_required: bool,
    pub is_searchable: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Requested change to one attribute.
///
/// `value = None` clears the attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicFieldInput {
    pub field_name: String,
    pub value: Option<DynamicValue>,
    pub smart_code: Option<SmartCode>,
    pub validation_rules: Option<Value>,
    pub is_required: Option<bool>,
    pub is_searchable: Option<bool>,
}

impl DynamicFieldInput {
    /// Builds an input with an already-typed value and default metadata.
    pub fn new(
        field_name: impl Into<String>,
        value: DynamicValue,
    ) -> Result<Self, DynamicFieldError> {
        let field_name = normalize_field_name(field_name.into())?;
        Ok(Self {
            field_name,
            value: Some(value),
            smart_code: None,
            validation_rules: None,
            is_required: None,
            is_searchable: None,
        })
    }

    /// Parses one `name -> json` pair from a request payload.
    ///
    /// Accepts a bare value (type inferred) or a descriptor object carrying
    /// `field_type` and `value` plus optional `smart_code`,
    /// `validation_rules`, `is_required` and `is_searchable`.
    pub fn from_json(field_name: &str, raw: Value) -> Result<Self, DynamicFieldError> {
        let field_name = normalize_field_name(field_name.to_string())?;
        let descriptor = match raw {
            Value::Object(map) if map.contains_key("field_type") => map,
            other => {
                return Ok(Self {
                    value: DynamicValue::infer(other),
                    field_name,
                    smart_code: None,
                    validation_rules: None,
                    is_required: None,
                    is_searchable: None,
                })
            }
        };
        parse_descriptor(field_name, descriptor)
    }

    /// Parses every entry of a `dynamic` payload object, in key order.
    pub fn from_json_map(map: Map<String, Value>) -> Result<Vec<Self>, DynamicFieldError> {
        map.into_iter()
            .map(|(name, value)| Self::from_json(&name, value))
            .collect()
    }
}

fn parse_descriptor(
    field_name: String,
    mut descriptor: Map<String, Value>,
) -> Result<DynamicFieldInput, DynamicFieldError> {
    let type_text = match descriptor.remove("field_type") {
        Some(Value::String(text)) => text,
        _ => {
            return Err(DynamicFieldError::UnknownFieldType {
                field_name,
                value: "<non-string>".to_string(),
            })
        }
    };
    let field_type =
        FieldType::parse(type_text.trim()).ok_or_else(|| DynamicFieldError::UnknownFieldType {
            field_name: field_name.clone(),
            value: type_text.clone(),
        })?;

    let value = match descriptor.remove("value") {
        None | Some(Value::Null) => None,
        Some(raw) => Some(DynamicValue::from_typed(&field_name, field_type, raw)?),
    };

    let smart_code = match descriptor.remove("smart_code") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(SmartCode::parse(&text)?),
        Some(_) => return Err(SmartCodeError::Malformed("<non-string>".to_string()).into()),
    };

    let validation_rules = match descriptor.remove("validation_rules") {
        None | Some(Value::Null) => None,
        Some(rules @ Value::Object(_)) => {
            ValidationRules::from_json(&field_name, &rules)?;
            Some(rules)
        }
        Some(_) => {
            return Err(DynamicFieldError::InvalidRules {
                field_name,
                message: "validation_rules must be an object".to_string(),
            })
        }
    };

    Ok(DynamicFieldInput {
        field_name,
        value,
        smart_code,
        validation_rules,
        is_required: descriptor.remove("is_required").and_then(|v| v.as_bool()),
        is_searchable: descriptor.remove("is_searchable").and_then(|v| v.as_bool()),
    })
}

fn normalize_field_name(value: String) -> Result<String, DynamicFieldError> {
    let trimmed = value.trim();
    if !FIELD_NAME_RE.is_match(trimmed) {
        return Err(DynamicFieldError::InvalidFieldName(value));
    }
    Ok(trimmed.to_string())
}

/// Declarative per-field rules stored alongside the value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ValidationRules {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<String>,
    pub max_length: Option<usize>,
}

impl ValidationRules {
    pub fn from_json(field_name: &str, value: &Value) -> Result<Self, DynamicFieldError> {
        let rules: Self =
            serde_json::from_value(value.clone()).map_err(|err| DynamicFieldError::InvalidRules {
                field_name: field_name.to_string(),
                message: err.to_string(),
            })?;
        if let Some(pattern) = rules.pattern.as_deref() {
            Regex::new(pattern).map_err(|err| DynamicFieldError::InvalidRules {
                field_name: field_name.to_string(),
                message: err.to_string(),
            })?;
        }
        Ok(rules)
    }

    /// Checks one value against the rules that apply to its type.
    pub fn check(&self, field_name: &str, value: &DynamicValue) -> Result<(), DynamicFieldError> {
        let violation = |rule: &str| DynamicFieldError::RuleViolation {
            field_name: field_name.to_string(),
            rule: rule.to_string(),
        };
        match value {
            DynamicValue::Number(number) => {
                if self.min.is_some_and(|min| *number < min) {
                    return Err(violation("min"));
                }
                if self.max.is_some_and(|max| *number > max) {
                    return Err(violation("max"));
                }
            }
            DynamicValue::Text(text) => {
                if self
                    .max_length
                    .is_some_and(|max_length| text.chars().count() > max_length)
                {
                    return Err(violation("max_length"));
                }
                if let Some(pattern) = self.pattern.as_deref() {
                    let regex = Regex::new(pattern).map_err(|err| DynamicFieldError::InvalidRules {
                        field_name: field_name.to_string(),
                        message: err.to_string(),
                    })?;
                    if !regex.is_match(text) {
                        return Err(violation("pattern"));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Attribute parsing and rule errors.
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicFieldError {
    InvalidFieldName(String),
    UnknownFieldType { field_name: String, value: String },
    TypeMismatch { field_name: String, expected: FieldType },
    InvalidDate { field_name: String, value: String },
    InvalidRules { field_name: String, message: String },
    RuleViolation { field_name: String, rule: String },
    RequiredFieldCleared(String),
    SmartCode(SmartCodeError),
}

impl Display for DynamicFieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidFieldName(value) => write!(f, "invalid dynamic field name `{value}`"),
            Self::UnknownFieldType { field_name, value } => {
                write!(f, "dynamic field `{field_name}` has unknown field_type `{value}`")
            }
            Self::TypeMismatch {
                field_name,
                expected,
            } => write!(
                f,
                "dynamic field `{field_name}` expects a {} value",
                expected.as_str()
            ),
            Self::InvalidDate { field_name, value } => write!(
                f,
                "dynamic field `{field_name}` expects YYYY-MM-DD, got `{value}`"
            ),
            Self::InvalidRules {
                field_name,
                message,
            } => write!(
                f,
                "dynamic field `{field_name}` has invalid validation_rules: {message}"
            ),
            Self::RuleViolation { field_name, rule } => {
                write!(f, "dynamic field `{field_name}` violates rule `{rule}`")
            }
            Self::RequiredFieldCleared(field_name) => {
                write!(f, "dynamic field `{field_name}` is required and cannot be cleared")
            }
            Self::SmartCode(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DynamicFieldError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SmartCode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SmartCodeError> for DynamicFieldError {
    fn from(value: SmartCodeError) -> Self {
        Self::SmartCode(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        is_iso_date, DynamicFieldError, DynamicFieldInput, DynamicValue, FieldType,
        ValidationRules,
    };
    use serde_json::json;

    #[test]
    fn infers_types_from_bare_json() {
        let price = DynamicFieldInput::from_json("price", json!(10)).expect("price");
        assert_eq!(price.value, Some(DynamicValue::Number(10.0)));

        let vip = DynamicFieldInput::from_json("vip", json!(true)).expect("vip");
        assert_eq!(vip.value.map(|v| v.field_type()), Some(FieldType::Boolean));

        let tags = DynamicFieldInput::from_json("tags", json!(["a", "b"])).expect("tags");
        assert_eq!(tags.value, Some(DynamicValue::Json(json!(["a", "b"]))));

        let cleared = DynamicFieldInput::from_json("notes", json!(null)).expect("notes");
        assert_eq!(cleared.value, None);
    }

    #[test]
    fn descriptor_object_declares_type_and_metadata() {
        let input = DynamicFieldInput::from_json(
            "birthday",
            json!({
                "field_type": "date",
                "value": "1990-04-12",
                "smart_code": "HERA.CRM.CUSTOMER.DYN.BIRTHDAY.v1",
                "is_required": true
            }),
        )
        .expect("descriptor");
        assert_eq!(input.value, Some(DynamicValue::Date("1990-04-12".to_string())));
        assert_eq!(input.is_required, Some(true));
        assert!(input.smart_code.is_some());
    }

    #[test]
    fn descriptor_rejects_wrong_value_type_and_bad_dates() {
        let err = DynamicFieldInput::from_json(
            "price",
            json!({ "field_type": "number", "value": "ten" }),
        )
        .expect_err("text for number");
        assert!(matches!(err, DynamicFieldError::TypeMismatch { .. }));

        let err = DynamicFieldInput::from_json(
            "due",
            json!({ "field_type": "date", "value": "12/04/1990" }),
        )
        .expect_err("bad date");
        assert!(matches!(err, DynamicFieldError::InvalidDate { .. }));

        let err = DynamicFieldInput::from_json("x", json!({ "field_type": "money", "value": 1 }))
            .expect_err("unknown type");
        assert!(matches!(err, DynamicFieldError::UnknownFieldType { .. }));
    }

    #[test]
    fn date_check_knows_month_lengths() {
        assert!(is_iso_date("2024-02-29"));
        assert!(is_iso_date("2000-02-29"));
        assert!(is_iso_date("2026-12-31"));
        assert!(!is_iso_date("2024-02-30"));
        assert!(!is_iso_date("2023-02-29"));
        assert!(!is_iso_date("1900-02-29"));
        assert!(!is_iso_date("2026-04-31"));

        let err = DynamicFieldInput::from_json(
            "due",
            json!({ "field_type": "date", "value": "2024-02-31" }),
        )
        .expect_err("February 31st");
        assert!(matches!(err, DynamicFieldError::InvalidDate { .. }));
    }

    #[test]
    fn rejects_invalid_field_names() {
        let err = DynamicFieldInput::from_json("unit price", json!(1)).expect_err("space");
        assert_eq!(
            err,
            DynamicFieldError::InvalidFieldName("unit price".to_string())
        );
    }

    #[test]
    fn validation_rules_check_bounds_length_and_pattern() {
        let rules = ValidationRules::from_json(
            "sku",
            &json!({ "min": 0, "max": 100, "max_length": 6, "pattern": "^[A-Z]+-[0-9]+$" }),
        )
        .expect("rules");

        assert!(rules.check("qty", &DynamicValue::Number(50.0)).is_ok());
        assert!(rules.check("qty", &DynamicValue::Number(-1.0)).is_err());
        assert!(rules.check("qty", &DynamicValue::Number(101.0)).is_err());
        assert!(rules.check("sku", &DynamicValue::Text("AB-12".to_string())).is_ok());
        assert!(rules.check("sku", &DynamicValue::Text("ab-12".to_string())).is_err());
        assert!(rules
            .check("sku", &DynamicValue::Text("ABCD-123".to_string()))
            .is_err());
    }

    #[test]
    fn values_serialize_as_bare_json() {
        assert_eq!(
            serde_json::to_value(DynamicValue::Number(10.0)).expect("serialize"),
            json!(10.0)
        );
        assert_eq!(DynamicValue::Text("x".to_string()).to_json(), json!("x"));
        assert_eq!(DynamicValue::Number(10.0).to_json(), json!(10));
        assert_eq!(DynamicValue::Number(2.5).to_json(), json!(2.5));
    }
}
