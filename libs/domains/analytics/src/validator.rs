//! Record validation against the schema catalog.
//!
//! Validation happens before anything is buffered: a rejected record never
//! reaches a queue. The validator is a pure function over (catalog, input) —
//! same input, same outcome, no side effects.

use crate::catalog::{Catalog, Category, DataType, PropertyDef};
use crate::error::SchemaError;
use crate::models::{ProfileOpKind, Properties};
use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use std::sync::Arc;

/// Date format the primary backend expects for date-valued properties.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// An event that passed validation, with date values normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedEvent {
    pub name: String,
    pub properties: Properties,
}

/// A profile operation that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedProfileOp {
    pub kind: ProfileOpKind,
    pub distinct_id: String,
    pub properties: Properties,
    pub meta: Properties,
}

/// Validates candidate records against a [`Catalog`].
#[derive(Debug, Clone)]
pub struct RecordValidator {
    catalog: Arc<Catalog>,
    allow_unknown_properties: bool,
}

impl RecordValidator {
    pub fn new(catalog: Arc<Catalog>, allow_unknown_properties: bool) -> Self {
        Self {
            catalog,
            allow_unknown_properties,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Validate an event and its properties.
    ///
    /// Fails if the event name is unknown, or if a property key is unknown
    /// while strict mode is active, or if a value does not satisfy its
    /// declared type.
    pub fn validate_event(
        &self,
        name: &str,
        properties: &Properties,
    ) -> Result<ValidatedEvent, SchemaError> {
        if self.catalog.event(name).is_none() {
            return Err(SchemaError::UnknownEvent(name.to_string()));
        }

        let mut validated = Properties::new();
        for (key, value) in properties {
            match self.catalog.event_property(key) {
                Some(def) => {
                    validated.insert(key.clone(), check_value(def, value)?);
                }
                None if self.allow_unknown_properties => {
                    validated.insert(key.clone(), value.clone());
                }
                None => {
                    return Err(SchemaError::UnknownProperty {
                        name: key.clone(),
                        category: Category::EventProperty,
                    });
                }
            }
        }

        Ok(ValidatedEvent {
            name: name.to_string(),
            properties: validated,
        })
    }

    /// Validate a profile operation.
    ///
    /// The strict/loose toggle applies to profile properties the same way
    /// it does to event properties. Meta keys are always strict — they are
    /// backend behavior flags, not free-form data. `union` requires list
    /// values and `increment` numeric values regardless of the declared
    /// type.
    pub fn validate_profile_op(
        &self,
        kind: ProfileOpKind,
        distinct_id: &str,
        properties: &Properties,
        meta: &Properties,
    ) -> Result<ValidatedProfileOp, SchemaError> {
        if distinct_id.is_empty() {
            return Err(SchemaError::MissingDistinctId);
        }

        let mut validated = Properties::new();
        for (key, value) in properties {
            check_kind_constraint(kind, key, value)?;
            match self.catalog.profile_property(key) {
                Some(def) => {
                    validated.insert(key.clone(), check_value(def, value)?);
                }
                None if self.allow_unknown_properties => {
                    validated.insert(key.clone(), value.clone());
                }
                None => {
                    return Err(SchemaError::UnknownProperty {
                        name: key.clone(),
                        category: Category::ProfileProperty,
                    });
                }
            }
        }

        let mut validated_meta = Properties::new();
        for (key, value) in meta {
            let def =
                self.catalog
                    .meta_property(key)
                    .ok_or_else(|| SchemaError::UnknownProperty {
                        name: key.clone(),
                        category: Category::ProfileMeta,
                    })?;
            validated_meta.insert(key.clone(), check_value(def, value)?);
        }

        Ok(ValidatedProfileOp {
            kind,
            distinct_id: distinct_id.to_string(),
            properties: validated,
            meta: validated_meta,
        })
    }
}

/// Operation-specific value constraints, applied before the type check.
fn check_kind_constraint(
    kind: ProfileOpKind,
    key: &str,
    value: &Value,
) -> Result<(), SchemaError> {
    match kind {
        ProfileOpKind::Union if !value.is_array() => Err(SchemaError::InvalidValue {
            name: key.to_string(),
            expected: DataType::List,
            got: type_name(value).to_string(),
        }),
        ProfileOpKind::Increment if !value.is_number() => Err(SchemaError::InvalidValue {
            name: key.to_string(),
            expected: DataType::Number,
            got: type_name(value).to_string(),
        }),
        _ => Ok(()),
    }
}

/// Check a value against a property's declared type, coercing dates into
/// the backend's canonical format.
fn check_value(def: &PropertyDef, value: &Value) -> Result<Value, SchemaError> {
    let ok = match def.data_type {
        DataType::Text => value.is_string(),
        DataType::Number => value.is_number(),
        DataType::Boolean => value.is_boolean(),
        DataType::List => value.is_array(),
        DataType::Any => true,
        DataType::DateTime => {
            return coerce_date(value).ok_or_else(|| SchemaError::InvalidValue {
                name: def.name.clone(),
                expected: DataType::DateTime,
                got: preview(value),
            });
        }
    };

    if ok {
        Ok(value.clone())
    } else {
        Err(SchemaError::InvalidValue {
            name: def.name.clone(),
            expected: def.data_type,
            got: type_name(value).to_string(),
        })
    }
}

/// Parse a date value and normalize it to [`DATE_FORMAT`].
fn coerce_date(value: &Value) -> Option<Value> {
    let text = value.as_str()?;

    let naive = NaiveDateTime::parse_from_str(text, DATE_FORMAT)
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_utc())
        })?;

    Some(Value::String(naive.format(DATE_FORMAT).to_string()))
}

/// Parse a normalized date string back to unix seconds. Used when mirroring
/// to a backend that expects epoch timestamps.
pub(crate) fn date_to_unix_seconds(value: &Value) -> Option<i64> {
    let text = value.as_str()?;
    NaiveDateTime::parse_from_str(text, DATE_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn preview(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        other => type_name(other).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator(allow_unknown: bool) -> RecordValidator {
        let catalog = Catalog::builder()
            .event("Signed Up")
            .event_property("Title", DataType::Text)
            .event_property("Count", DataType::Number)
            .profile_property("plan", DataType::Text)
            .profile_property("teams", DataType::List)
            .profile_property("logins", DataType::Number)
            .build()
            .unwrap();
        RecordValidator::new(Arc::new(catalog), allow_unknown)
    }

    #[test]
    fn test_unknown_event_rejected() {
        let err = validator(false)
            .validate_event("Bogus Event Name", &Properties::new())
            .unwrap_err();
        assert_eq!(err, SchemaError::UnknownEvent("Bogus Event Name".into()));
    }

    #[test]
    fn test_unknown_event_property_rejected_in_strict_mode() {
        let props = Properties::from([("Color".to_string(), json!("red"))]);
        let err = validator(false)
            .validate_event("Signed Up", &props)
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownProperty {
                name: "Color".to_string(),
                category: Category::EventProperty,
            }
        );
    }

    #[test]
    fn test_unknown_event_property_allowed_in_loose_mode() {
        let props = Properties::from([("Color".to_string(), json!("red"))]);
        let validated = validator(true).validate_event("Signed Up", &props).unwrap();
        assert_eq!(validated.properties["Color"], json!("red"));
    }

    #[test]
    fn test_wrong_value_type_rejected() {
        let props = Properties::from([("Count".to_string(), json!("three"))]);
        let err = validator(false)
            .validate_event("Signed Up", &props)
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::InvalidValue { ref name, expected: DataType::Number, .. } if name == "Count"
        ));
    }

    #[test]
    fn test_missing_distinct_id_rejected() {
        let err = validator(false)
            .validate_profile_op(ProfileOpKind::Set, "", &Properties::new(), &Properties::new())
            .unwrap_err();
        assert_eq!(err, SchemaError::MissingDistinctId);
    }

    #[test]
    fn test_unknown_profile_property_follows_the_toggle() {
        let props = Properties::from([("nickname".to_string(), json!("jo"))]);

        let err = validator(false)
            .validate_profile_op(ProfileOpKind::Set, "u1", &props, &Properties::new())
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownProperty {
                name: "nickname".to_string(),
                category: Category::ProfileProperty,
            }
        );

        let validated = validator(true)
            .validate_profile_op(ProfileOpKind::Set, "u1", &props, &Properties::new())
            .unwrap();
        assert_eq!(validated.properties["nickname"], json!("jo"));
    }

    #[test]
    fn test_date_coercion_from_rfc3339() {
        let props = Properties::from([("$created".to_string(), json!("2026-03-01T10:30:00Z"))]);
        let validated = validator(false)
            .validate_profile_op(ProfileOpKind::Set, "u1", &props, &Properties::new())
            .unwrap();
        assert_eq!(validated.properties["$created"], json!("2026-03-01T10:30:00"));
    }

    #[test]
    fn test_unparsable_date_rejected() {
        let props = Properties::from([("$created".to_string(), json!("yesterday"))]);
        let err = validator(false)
            .validate_profile_op(ProfileOpKind::Set, "u1", &props, &Properties::new())
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::InvalidValue { ref name, expected: DataType::DateTime, .. }
                if name == "$created"
        ));
    }

    #[test]
    fn test_union_requires_list_values() {
        let props = Properties::from([("teams".to_string(), json!("core"))]);
        let err = validator(false)
            .validate_profile_op(ProfileOpKind::Union, "u1", &props, &Properties::new())
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::InvalidValue { expected: DataType::List, .. }
        ));

        let props = Properties::from([("teams".to_string(), json!(["core"]))]);
        assert!(validator(false)
            .validate_profile_op(ProfileOpKind::Union, "u1", &props, &Properties::new())
            .is_ok());
    }

    #[test]
    fn test_increment_requires_numeric_values() {
        let props = Properties::from([("logins".to_string(), json!("1"))]);
        let err = validator(false)
            .validate_profile_op(ProfileOpKind::Increment, "u1", &props, &Properties::new())
            .unwrap_err();
        assert!(matches!(
            err,
            SchemaError::InvalidValue { expected: DataType::Number, .. }
        ));
    }

    #[test]
    fn test_unknown_meta_property_rejected() {
        let meta = Properties::from([("$nonsense".to_string(), json!(true))]);
        let err = validator(false)
            .validate_profile_op(ProfileOpKind::Set, "u1", &Properties::new(), &meta)
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::UnknownProperty {
                name: "$nonsense".to_string(),
                category: Category::ProfileMeta,
            }
        );
    }

    #[test]
    fn test_validation_is_deterministic() {
        let v = validator(false);
        let props = Properties::from([("Title".to_string(), json!("Home"))]);
        let first = v.validate_event("Signed Up", &props).unwrap();
        let second = v.validate_event("Signed Up", &props).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_date_to_unix_seconds() {
        assert_eq!(
            date_to_unix_seconds(&json!("1970-01-01T00:01:40")),
            Some(100)
        );
        assert_eq!(date_to_unix_seconds(&json!("not a date")), None);
    }
}
