//! Object validation against the class schema
//!
//! Validation semantics:
//! - Every value is typed from its JSON shape, `__type` tag or `__op` operator
//! - A typed value must agree with the declared field type
//! - Unknown fields are reported back so the caller can register them
//! - A class holds at most one geopoint field
//! - Required columns must be present on create and cannot be deleted on update
//!
//! Validation is pure: it never touches the store.

use serde_json::Value;

use super::errors::{SchemaError, SchemaResult};
use super::names::{field_name_is_valid, required_columns, DEFAULT_FIELDS};
use super::types::{FieldType, Schema};
use crate::storage::Document;

/// Fields of a validated object that the schema does not know yet
pub type NewFields = Vec<(String, FieldType)>;

fn required_str<'a>(field: &str, value: &'a Value, key: &str, tag: &str) -> SchemaResult<&'a str> {
    value
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SchemaError::invalid_value(field, format!("{} needs a string {}", tag, key)))
}

/// Infer the field type a value implies. `None` means the value carries no
/// type information (null, or a `Delete` operation).
pub fn infer_type(field: &str, value: &Value) -> SchemaResult<Option<FieldType>> {
    let ty = match value {
        Value::Null => return Ok(None),
        Value::Bool(_) => FieldType::Boolean,
        Value::Number(_) => FieldType::Number,
        Value::String(_) => FieldType::String,
        Value::Array(_) => FieldType::Array,
        Value::Object(obj) => {
            if let Some(tag) = obj.get("__type") {
                match tag.as_str().unwrap_or_default() {
                    "Pointer" => {
                        FieldType::Pointer(required_str(field, value, "className", "Pointer")?.to_string())
                    }
                    "Relation" => {
                        FieldType::Relation(required_str(field, value, "className", "Relation")?.to_string())
                    }
                    "Date" => {
                        required_str(field, value, "iso", "Date")?;
                        FieldType::Date
                    }
                    "File" => {
                        required_str(field, value, "name", "File")?;
                        FieldType::File
                    }
                    "GeoPoint" => {
                        let lat = value.get("latitude").and_then(Value::as_f64);
                        let lng = value.get("longitude").and_then(Value::as_f64);
                        match (lat, lng) {
                            (Some(lat), Some(lng))
                                if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng) => {}
                            _ => {
                                return Err(SchemaError::invalid_value(
                                    field,
                                    "GeoPoint needs latitude in [-90, 90] and longitude in [-180, 180]",
                                ))
                            }
                        }
                        FieldType::GeoPoint
                    }
                    other => {
                        return Err(SchemaError::invalid_value(
                            field,
                            format!("unsupported __type {:?}", other),
                        ))
                    }
                }
            } else if let Some(op) = obj.get("__op") {
                return infer_op_type(field, value, op.as_str().unwrap_or_default());
            } else {
                FieldType::Object
            }
        }
    };
    Ok(Some(ty))
}

fn infer_op_type(field: &str, value: &Value, op: &str) -> SchemaResult<Option<FieldType>> {
    let ty = match op {
        "Delete" => return Ok(None),
        "Increment" => FieldType::Number,
        "Add" | "AddUnique" | "Remove" => FieldType::Array,
        "AddRelation" | "RemoveRelation" => {
            let class = value
                .get("objects")
                .and_then(Value::as_array)
                .and_then(|objects| objects.first())
                .and_then(|first| first.get("className"))
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    SchemaError::invalid_value(field, format!("{} needs pointer objects", op))
                })?;
            FieldType::Relation(class.to_string())
        }
        "Batch" => {
            let first = value
                .get("ops")
                .and_then(Value::as_array)
                .and_then(|ops| ops.first())
                .ok_or_else(|| SchemaError::invalid_value(field, "Batch needs at least one op"))?;
            return infer_type(field, first);
        }
        other => {
            return Err(SchemaError::invalid_value(
                field,
                format!("unsupported __op {:?}", other),
            ))
        }
    };
    Ok(Some(ty))
}

fn is_delete_op(value: &Value) -> bool {
    value.get("__op").and_then(Value::as_str) == Some("Delete")
}

/// Check `object` against the declared schema of `class_name`.
///
/// `query` is `None` for creates and the update's target query otherwise.
/// Returns the fields that are valid but not yet declared.
pub fn validate_against(
    schema: &Schema,
    class_name: &str,
    object: &Document,
    query: Option<&Document>,
) -> SchemaResult<NewFields> {
    let class = schema.class(class_name);
    let mut new_fields = NewFields::new();
    let mut geopoint = class
        .and_then(|c| c.geopoint_field())
        .map(str::to_string);

    for (field, value) in object {
        if DEFAULT_FIELDS.contains(&field.as_str()) {
            continue;
        }
        if !field_name_is_valid(field) {
            // Internal columns such as _hashed_password are written by trusted
            // upstream code and are not part of the declared schema.
            if field.starts_with('_') {
                continue;
            }
            return Err(SchemaError::InvalidFieldName(field.clone()));
        }

        let Some(actual) = infer_type(field, value)? else {
            continue;
        };

        if actual == FieldType::GeoPoint {
            match &geopoint {
                Some(existing) if existing != field => {
                    return Err(SchemaError::GeoPointConflict {
                        class_name: class_name.to_string(),
                        existing: existing.clone(),
                        field: field.clone(),
                    })
                }
                _ => geopoint = Some(field.clone()),
            }
        }

        match schema.expected_type(class_name, field) {
            Some(expected) if expected != actual => {
                return Err(SchemaError::TypeMismatch {
                    class_name: class_name.to_string(),
                    field: field.clone(),
                    expected: expected.to_string(),
                    actual: actual.to_string(),
                })
            }
            Some(_) => {}
            None => new_fields.push((field.clone(), actual)),
        }
    }

    for column in required_columns(class_name) {
        let value = object.get(*column);
        let missing = match query {
            None => value.map_or(true, Value::is_null),
            Some(_) => value.map_or(false, is_delete_op),
        };
        if missing {
            return Err(SchemaError::RequiredField {
                class_name: class_name.to_string(),
                field: column.to_string(),
            });
        }
    }

    Ok(new_fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ClassSchema;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn post_schema() -> Schema {
        Schema::new().with_class(
            "Post",
            ClassSchema::default()
                .with_field("title", FieldType::String)
                .with_field("views", FieldType::Number)
                .with_field("location", FieldType::GeoPoint)
                .with_field("likes", FieldType::Relation("_User".into())),
        )
    }

    #[test]
    fn test_infer_types() {
        assert_eq!(infer_type("f", &json!("x")).unwrap(), Some(FieldType::String));
        assert_eq!(
            infer_type("f", &json!({"__type": "Pointer", "className": "_User", "objectId": "u1"})).unwrap(),
            Some(FieldType::Pointer("_User".into()))
        );
        assert_eq!(
            infer_type("f", &json!({"__op": "Increment", "amount": 1})).unwrap(),
            Some(FieldType::Number)
        );
        assert_eq!(infer_type("f", &json!({"__op": "Delete"})).unwrap(), None);
        assert_eq!(
            infer_type(
                "f",
                &json!({"__op": "Batch", "ops": [
                    {"__op": "AddRelation", "objects": [{"__type": "Pointer", "className": "_User", "objectId": "u1"}]}
                ]})
            )
            .unwrap(),
            Some(FieldType::Relation("_User".into()))
        );
        assert!(infer_type("f", &json!({"__op": "Explode"})).is_err());
        assert!(infer_type("f", &json!({"__type": "GeoPoint", "latitude": 120.0, "longitude": 0.0})).is_err());
    }

    #[test]
    fn test_matching_object_passes() {
        let object = doc(json!({
            "title": "A",
            "views": {"__op": "Increment", "amount": 1},
            "likes": {"__op": "AddRelation", "objects": [{"__type": "Pointer", "className": "_User", "objectId": "u1"}]},
            "objectId": "p1"
        }));
        let new_fields = validate_against(&post_schema(), "Post", &object, None).unwrap();
        assert!(new_fields.is_empty());
    }

    #[test]
    fn test_type_mismatch() {
        let object = doc(json!({"title": 5}));
        let err = validate_against(&post_schema(), "Post", &object, None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "schema mismatch for Post.title; expected string but got number"
        );
    }

    #[test]
    fn test_new_fields_reported() {
        let object = doc(json!({"body": "text", "tags": ["a"]}));
        let new_fields = validate_against(&post_schema(), "Post", &object, None).unwrap();
        assert_eq!(
            new_fields,
            vec![
                ("body".to_string(), FieldType::String),
                ("tags".to_string(), FieldType::Array)
            ]
        );
    }

    #[test]
    fn test_second_geopoint_rejected() {
        let object = doc(json!({"origin": {"__type": "GeoPoint", "latitude": 1.0, "longitude": 2.0}}));
        assert!(matches!(
            validate_against(&post_schema(), "Post", &object, None),
            Err(SchemaError::GeoPointConflict { .. })
        ));
    }

    #[test]
    fn test_invalid_field_name() {
        let object = doc(json!({"bad-name": 1}));
        assert!(matches!(
            validate_against(&post_schema(), "Post", &object, None),
            Err(SchemaError::InvalidFieldName(_))
        ));
    }

    #[test]
    fn test_required_columns() {
        let schema = Schema::new();
        let missing_acl = doc(json!({"name": "admins"}));
        assert!(matches!(
            validate_against(&schema, "_Role", &missing_acl, None),
            Err(SchemaError::RequiredField { .. })
        ));

        let query = doc(json!({"objectId": "r1"}));
        let update = doc(json!({"users": {"__op": "AddRelation", "objects": [{"__type": "Pointer", "className": "_User", "objectId": "u1"}]}}));
        assert!(validate_against(&schema, "_Role", &update, Some(&query)).is_ok());

        let delete_name = doc(json!({"name": {"__op": "Delete"}}));
        assert!(matches!(
            validate_against(&schema, "_Role", &delete_name, Some(&query)),
            Err(SchemaError::RequiredField { .. })
        ));
    }
}
