//! Response Projector
//!
//! Converts store documents back into the public object shape and hides
//! credentials on user records from anyone but master callers and the user
//! themself.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::query::Pointer;
use crate::schema::{FieldType, Schema};
use crate::storage::Document;

/// Store keys that never leave the access layer
const HIDDEN_KEYS: &[&str] = &["_hashed_password", "_email_verify_token", "_perishable_token"];

/// Public keys stripped from user records for other callers
const SENSITIVE_USER_KEYS: &[&str] = &["authData", "sessionToken"];

pub struct ResponseProjector<'a> {
    schema: &'a Schema,
    user_class: &'a str,
}

fn acl_from(read: Option<&Value>, write: Option<&Value>) -> Value {
    let mut acl: Map<String, Value> = Map::new();
    for (perm, groups) in [("read", read), ("write", write)] {
        for group in groups.and_then(Value::as_array).into_iter().flatten() {
            if let Some(group) = group.as_str() {
                let entry = acl
                    .entry(group.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Value::Object(entry) = entry {
                    entry.insert(perm.to_string(), Value::Bool(true));
                }
            }
        }
    }
    Value::Object(acl)
}

impl<'a> ResponseProjector<'a> {
    pub fn new(schema: &'a Schema, user_class: &'a str) -> Self {
        Self { schema, user_class }
    }

    /// Re-wrap a stored value of a typed field
    fn untransform(&self, class_name: &str, key: &str, value: Value) -> Value {
        match (self.schema.expected_type(class_name, key), value) {
            (Some(FieldType::Date), Value::String(iso)) => json!({ "__type": "Date", "iso": iso }),
            (Some(FieldType::GeoPoint), Value::Array(coords)) if coords.len() == 2 => json!({
                "__type": "GeoPoint",
                "latitude": coords[1],
                "longitude": coords[0]
            }),
            (Some(FieldType::File), Value::String(name)) => json!({ "__type": "File", "name": name }),
            (_, value) => value,
        }
    }

    /// Project one store document for a caller holding `acl` (`None` for master)
    pub fn project(&self, class_name: &str, stored: Document, acl: Option<&[String]>) -> Document {
        let mut out = Document::new();
        let mut auth_data = Map::new();
        let read = stored.get("_rperm").cloned();
        let write = stored.get("_wperm").cloned();

        for (key, value) in stored {
            match key.as_str() {
                "_id" => {
                    out.insert("objectId".to_string(), value);
                }
                "_created_at" => {
                    out.insert("createdAt".to_string(), value);
                }
                "_updated_at" => {
                    out.insert("updatedAt".to_string(), value);
                }
                "_session_token" => {
                    out.insert("sessionToken".to_string(), value);
                }
                "_rperm" | "_wperm" => {}
                k if HIDDEN_KEYS.contains(&k) => {}
                k => {
                    if let Some(provider) = k.strip_prefix("_auth_data_") {
                        auth_data.insert(provider.to_string(), value);
                    } else if let Some(field) = k.strip_prefix("_p_") {
                        match value.as_str().and_then(Pointer::decode) {
                            Some(pointer) => {
                                out.insert(field.to_string(), json!(pointer));
                            }
                            None => debug!(class = %class_name, key = %k, "skipping malformed pointer"),
                        }
                    } else if k.starts_with('_') {
                        debug!(class = %class_name, key = %k, "dropping internal key");
                    } else {
                        let value = self.untransform(class_name, k, value);
                        out.insert(k.to_string(), value);
                    }
                }
            }
        }

        if read.is_some() || write.is_some() {
            out.insert("ACL".to_string(), acl_from(read.as_ref(), write.as_ref()));
        }
        if !auth_data.is_empty() {
            out.insert("authData".to_string(), Value::Object(auth_data));
        }
        for (field, target) in self.schema.relation_fields(class_name) {
            out.insert(field, json!({ "__type": "Relation", "className": target }));
        }

        if class_name == self.user_class {
            if let Some(groups) = acl {
                let own_record = out
                    .get("objectId")
                    .and_then(Value::as_str)
                    .map_or(false, |id| groups.iter().any(|g| g == id));
                if !own_record {
                    for key in SENSITIVE_USER_KEYS {
                        out.remove(*key);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ClassSchema;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn schema() -> Schema {
        Schema::new().with_class(
            "Post",
            ClassSchema::default()
                .with_field("owner", FieldType::Pointer("_User".into()))
                .with_field("location", FieldType::GeoPoint)
                .with_field("publishedAt", FieldType::Date)
                .with_field("cover", FieldType::File)
                .with_field("likes", FieldType::Relation("_User".into())),
        )
    }

    #[test]
    fn test_project_post() {
        let schema = schema();
        let projector = ResponseProjector::new(&schema, "_User");
        let stored = doc(json!({
            "_id": "p1",
            "_created_at": "2024-01-02T03:04:05.000Z",
            "title": "A",
            "_p_owner": "_User$u1",
            "location": [2.5, 1.5],
            "publishedAt": "2024-01-02T03:04:05.678Z",
            "cover": "cover.png",
            "_rperm": ["*", "u1"],
            "_wperm": ["u1"]
        }));

        let out = projector.project("Post", stored, None);
        assert_eq!(
            Value::Object(out),
            json!({
                "objectId": "p1",
                "createdAt": "2024-01-02T03:04:05.000Z",
                "title": "A",
                "owner": {"__type": "Pointer", "className": "_User", "objectId": "u1"},
                "location": {"__type": "GeoPoint", "latitude": 1.5, "longitude": 2.5},
                "publishedAt": {"__type": "Date", "iso": "2024-01-02T03:04:05.678Z"},
                "cover": {"__type": "File", "name": "cover.png"},
                "ACL": {"*": {"read": true}, "u1": {"read": true, "write": true}},
                "likes": {"__type": "Relation", "className": "_User"}
            })
        );
    }

    fn stored_user() -> Document {
        doc(json!({
            "_id": "u1",
            "username": "ann",
            "_hashed_password": "hash",
            "_session_token": "r:abc",
            "_auth_data_github": {"id": "42"}
        }))
    }

    #[test]
    fn test_user_credentials_hidden_from_others() {
        let schema = Schema::new();
        let projector = ResponseProjector::new(&schema, "_User");
        let other = vec!["u2".to_string()];
        let out = projector.project("_User", stored_user(), Some(&other));
        assert_eq!(Value::Object(out), json!({"objectId": "u1", "username": "ann"}));
    }

    #[test]
    fn test_user_credentials_visible_to_self_and_master() {
        let schema = Schema::new();
        let projector = ResponseProjector::new(&schema, "_User");
        let own = vec!["u1".to_string()];

        for acl in [Some(&own[..]), None] {
            let out = projector.project("_User", stored_user(), acl);
            assert_eq!(out["sessionToken"], json!("r:abc"));
            assert_eq!(out["authData"], json!({"github": {"id": "42"}}));
            assert!(!out.contains_key("_hashed_password"));
        }
    }
}
