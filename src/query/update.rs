//! Typed update operators
//!
//! Object payloads carry plain values or `__op`-tagged operators. Both are
//! parsed into `UpdateOp` up front so that relation operators can be split
//! off before anything is translated for the store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};

use super::errors::{QueryError, QueryResult};
use crate::storage::Document;

/// Reference to a single object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "__type", rename = "Pointer")]
pub struct Pointer {
    #[serde(rename = "className")]
    pub class_name: String,
    #[serde(rename = "objectId")]
    pub object_id: String,
}

impl Pointer {
    pub fn new(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            object_id: object_id.into(),
        }
    }

    /// Parse a `{__type: "Pointer", className, objectId}` value
    pub fn from_value(value: &Value) -> Option<Self> {
        if value.get("__type").and_then(Value::as_str) != Some("Pointer") {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    /// Store encoding of a pointer field: `<Class>$<id>`
    pub fn encode(&self) -> String {
        format!("{}${}", self.class_name, self.object_id)
    }

    /// Inverse of `encode`
    pub fn decode(encoded: &str) -> Option<Self> {
        let (class_name, object_id) = encoded.split_once('$')?;
        if class_name.is_empty() || object_id.is_empty() {
            return None;
        }
        Some(Self::new(class_name, object_id))
    }
}

/// One field's worth of an update payload
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Plain value
    Set(Value),
    Delete,
    Increment(Number),
    Add(Vec<Value>),
    AddUnique(Vec<Value>),
    Remove(Vec<Value>),
    AddRelation(Vec<Pointer>),
    RemoveRelation(Vec<Pointer>),
    Batch(Vec<UpdateOp>),
}

#[derive(Deserialize)]
#[serde(tag = "__op")]
enum TaggedOp {
    Delete,
    Increment { amount: Number },
    Add { objects: Vec<Value> },
    AddUnique { objects: Vec<Value> },
    Remove { objects: Vec<Value> },
    AddRelation { objects: Vec<Pointer> },
    RemoveRelation { objects: Vec<Pointer> },
    Batch { ops: Vec<Value> },
}

impl UpdateOp {
    /// Parse the payload value of `key`
    pub fn from_value(key: &str, value: &Value) -> QueryResult<Self> {
        let Some(op) = value.get("__op") else {
            return Ok(UpdateOp::Set(value.clone()));
        };
        let op_name = op.as_str().unwrap_or_default().to_string();
        let tagged: TaggedOp =
            serde_json::from_value(value.clone()).map_err(|e| QueryError::MalformedOperation {
                key: key.to_string(),
                op: op_name,
                reason: e.to_string(),
            })?;

        let parsed = match tagged {
            TaggedOp::Delete => UpdateOp::Delete,
            TaggedOp::Increment { amount } => UpdateOp::Increment(amount),
            TaggedOp::Add { objects } => UpdateOp::Add(objects),
            TaggedOp::AddUnique { objects } => UpdateOp::AddUnique(objects),
            TaggedOp::Remove { objects } => UpdateOp::Remove(objects),
            TaggedOp::AddRelation { objects } => UpdateOp::AddRelation(objects),
            TaggedOp::RemoveRelation { objects } => UpdateOp::RemoveRelation(objects),
            TaggedOp::Batch { ops } => UpdateOp::Batch(
                ops.iter()
                    .map(|op| UpdateOp::from_value(key, op))
                    .collect::<QueryResult<_>>()?,
            ),
        };
        Ok(parsed)
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, UpdateOp::AddRelation(_) | UpdateOp::RemoveRelation(_))
    }

    /// Whether the store computes the field's new value (so callers need
    /// it back after an update)
    pub fn is_store_computed(&self) -> bool {
        matches!(
            self,
            UpdateOp::Increment(_) | UpdateOp::Add(_) | UpdateOp::AddUnique(_) | UpdateOp::Remove(_)
        )
    }
}

/// A parsed update payload, field name -> operator
pub type Update = BTreeMap<String, UpdateOp>;

/// Parse every field of an object payload
pub fn parse_update(payload: &Document) -> QueryResult<Update> {
    payload
        .iter()
        .map(|(key, value)| Ok((key.clone(), UpdateOp::from_value(key, value)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_operators() {
        let payload = json!({
            "title": "A",
            "views": {"__op": "Increment", "amount": 2},
            "tags": {"__op": "AddUnique", "objects": ["x"]},
            "body": {"__op": "Delete"},
            "likes": {"__op": "Batch", "ops": [
                {"__op": "AddRelation", "objects": [{"__type": "Pointer", "className": "_User", "objectId": "u1"}]},
                {"__op": "RemoveRelation", "objects": [{"__type": "Pointer", "className": "_User", "objectId": "u2"}]}
            ]}
        });
        let update = parse_update(payload.as_object().unwrap()).unwrap();

        assert_eq!(update["title"], UpdateOp::Set(json!("A")));
        assert_eq!(update["views"], UpdateOp::Increment(Number::from(2)));
        assert_eq!(update["tags"], UpdateOp::AddUnique(vec![json!("x")]));
        assert_eq!(update["body"], UpdateOp::Delete);
        assert_eq!(
            update["likes"],
            UpdateOp::Batch(vec![
                UpdateOp::AddRelation(vec![Pointer::new("_User", "u1")]),
                UpdateOp::RemoveRelation(vec![Pointer::new("_User", "u2")]),
            ])
        );
    }

    #[test]
    fn test_malformed_operation() {
        let err = UpdateOp::from_value("views", &json!({"__op": "Increment"})).unwrap_err();
        assert!(matches!(err, QueryError::MalformedOperation { ref op, .. } if op == "Increment"));

        let err = UpdateOp::from_value("views", &json!({"__op": "Explode"})).unwrap_err();
        assert!(matches!(err, QueryError::MalformedOperation { .. }));
    }

    #[test]
    fn test_pointer_encoding() {
        let pointer = Pointer::new("_User", "u1");
        assert_eq!(pointer.encode(), "_User$u1");
        assert_eq!(Pointer::decode("_User$u1"), Some(pointer.clone()));
        assert_eq!(Pointer::decode("no-dollar"), None);
        assert_eq!(
            serde_json::to_value(&pointer).unwrap(),
            json!({"__type": "Pointer", "className": "_User", "objectId": "u1"})
        );
        assert_eq!(Pointer::from_value(&json!({"__type": "Date", "iso": "x"})), None);
    }
}
