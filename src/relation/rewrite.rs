//! Relation query rewrites
//!
//! The store cannot follow relations, so relation predicates are resolved
//! against the join collections into `objectId $in [...]` constraints. Both
//! rewrites return a new query tree; the input is never modified.

use std::collections::BTreeSet;

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use super::errors::{RelationError, RelationResult};
use super::join::RelationManager;
use crate::query::Pointer;
use crate::schema::{FieldType, Schema};
use crate::storage::Document;

/// Constrain `objectId` to `ids`, unioned with any existing `objectId.$in`
pub fn add_in_object_ids(query: &mut Document, ids: BTreeSet<String>) {
    match query.get_mut("objectId") {
        Some(Value::Object(constraint)) => {
            let mut merged = ids;
            if let Some(Value::Array(existing)) = constraint.get("$in") {
                merged.extend(existing.iter().filter_map(Value::as_str).map(str::to_string));
            }
            constraint.insert("$in".to_string(), json!(merged));
        }
        Some(equal) => {
            let id = equal.take();
            *equal = json!({ "$eq": id, "$in": ids });
        }
        None => {
            query.insert("objectId".to_string(), json!({ "$in": ids }));
        }
    }
}

/// Ids named by a relation constraint: a single pointer or an `$in` list
/// of pointers (or bare ids). `None` for any other constraint shape.
fn constraint_ids(key: &str, value: &Value) -> RelationResult<Option<BTreeSet<String>>> {
    if let Some(pointer) = Pointer::from_value(value) {
        return Ok(Some(BTreeSet::from([pointer.object_id])));
    }
    let Some(list) = value.get("$in") else {
        return Ok(None);
    };
    let items = list.as_array().ok_or_else(|| RelationError::MalformedConstraint {
        key: key.to_string(),
        reason: "$in needs an array".to_string(),
    })?;
    items
        .iter()
        .map(|item| match item {
            Value::String(id) => Ok(id.clone()),
            other => Pointer::from_value(other)
                .map(|p| p.object_id)
                .ok_or_else(|| RelationError::MalformedConstraint {
                    key: key.to_string(),
                    reason: "$in entries must be pointers".to_string(),
                }),
        })
        .collect::<RelationResult<_>>()
        .map(Some)
}

fn branches<'a>(key: &str, value: &'a Value) -> RelationResult<Vec<&'a Document>> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .map(|branch| {
            branch.as_object().ok_or_else(|| RelationError::MalformedConstraint {
                key: key.to_string(),
                reason: "expected an array of queries".to_string(),
            })
        })
        .collect()
}

impl RelationManager {
    /// Replace `$relatedTo` clauses, at any `$or`/`$and`/`$nor` depth, with the ids
    /// related to the named object
    pub fn resolve_related_to<'a>(
        &'a self,
        class_name: &'a str,
        query: &'a Document,
    ) -> BoxFuture<'a, RelationResult<Document>> {
        Box::pin(async move {
            let mut out = Document::new();
            let mut related = None;

            for (key, value) in query {
                match key.as_str() {
                    "$or" | "$and" | "$nor" => {
                        let mut rewritten = Vec::new();
                        for branch in branches(key, value)? {
                            rewritten.push(Value::Object(self.resolve_related_to(class_name, branch).await?));
                        }
                        out.insert(key.clone(), Value::Array(rewritten));
                    }
                    "$relatedTo" => {
                        let owner = value
                            .get("object")
                            .and_then(Pointer::from_value)
                            .ok_or_else(|| RelationError::MalformedRelatedTo("object must be a pointer".into()))?;
                        let relation_key = value
                            .get("key")
                            .and_then(Value::as_str)
                            .ok_or_else(|| RelationError::MalformedRelatedTo("key must be a string".into()))?;
                        let ids = self
                            .related_ids(&owner.class_name, relation_key, &owner.object_id)
                            .await?;
                        debug!(
                            class = %class_name,
                            owner = %owner.encode(),
                            key = %relation_key,
                            matches = ids.len(),
                            "resolved $relatedTo"
                        );
                        related = Some(ids);
                    }
                    _ => {
                        out.insert(key.clone(), value.clone());
                    }
                }
            }

            if let Some(ids) = related {
                add_in_object_ids(&mut out, ids);
            }
            Ok(out)
        })
    }

    /// Replace pointer and `$in` constraints on relation fields, at any
    /// `$or`/`$and` depth, with the ids of the objects owning those edges
    pub fn resolve_relation_predicates<'a>(
        &'a self,
        class_name: &'a str,
        query: &'a Document,
        schema: &'a Schema,
    ) -> BoxFuture<'a, RelationResult<Document>> {
        Box::pin(async move {
            let mut out = Document::new();
            let mut owners: Option<BTreeSet<String>> = None;

            for (key, value) in query {
                if matches!(key.as_str(), "$or" | "$and" | "$nor") {
                    let mut rewritten = Vec::new();
                    for branch in branches(key, value)? {
                        rewritten.push(Value::Object(
                            self.resolve_relation_predicates(class_name, branch, schema).await?,
                        ));
                    }
                    out.insert(key.clone(), Value::Array(rewritten));
                    continue;
                }

                let is_relation = matches!(schema.expected_type(class_name, key), Some(FieldType::Relation(_)));
                let ids = if is_relation { constraint_ids(key, value)? } else { None };
                let Some(ids) = ids else {
                    out.insert(key.clone(), value.clone());
                    continue;
                };

                let found = self.owning_ids(class_name, key, &ids).await?;
                debug!(class = %class_name, key = %key, matches = found.len(), "resolved relation predicate");
                owners.get_or_insert_with(BTreeSet::new).extend(found);
            }

            if let Some(ids) = owners {
                add_in_object_ids(&mut out, ids);
            }
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ClassSchema;
    use crate::storage::MemoryAdapter;
    use std::sync::Arc;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    async fn seeded() -> RelationManager {
        let manager = RelationManager::new(Arc::new(MemoryAdapter::new()), "");
        manager.add_relation("likes", "Post", "p1", "u1").await.unwrap();
        manager.add_relation("likes", "Post", "p1", "u2").await.unwrap();
        manager.add_relation("likes", "Post", "p2", "u3").await.unwrap();
        manager
    }

    fn post_schema() -> Schema {
        Schema::new().with_class(
            "Post",
            ClassSchema::default().with_field("likes", FieldType::Relation("_User".into())),
        )
    }

    #[test]
    fn test_add_in_object_ids_unions() {
        let mut query = doc(json!({"objectId": {"$in": ["u9"]}}));
        add_in_object_ids(&mut query, BTreeSet::from(["u1".to_string()]));
        assert_eq!(query["objectId"], json!({"$in": ["u1", "u9"]}));

        let mut query = doc(json!({"objectId": "u1"}));
        add_in_object_ids(&mut query, BTreeSet::from(["u2".to_string()]));
        assert_eq!(query["objectId"], json!({"$eq": "u1", "$in": ["u2"]}));
    }

    #[tokio::test]
    async fn test_related_to_rewrite() {
        let manager = seeded().await;
        let query = doc(json!({
            "$relatedTo": {"object": {"__type": "Pointer", "className": "Post", "objectId": "p1"}, "key": "likes"}
        }));
        let out = manager.resolve_related_to("_User", &query).await.unwrap();
        assert_eq!(Value::Object(out), json!({"objectId": {"$in": ["u1", "u2"]}}));
    }

    #[tokio::test]
    async fn test_related_to_in_nested_or() {
        let manager = seeded().await;
        let related = json!({"object": {"__type": "Pointer", "className": "Post", "objectId": "p2"}, "key": "likes"});
        let query = doc(json!({
            "$or": [
                {"name": "x"},
                {"$or": [{"$relatedTo": related}]}
            ]
        }));
        let out = manager.resolve_related_to("_User", &query).await.unwrap();
        assert_eq!(
            Value::Object(out.clone()),
            json!({"$or": [{"name": "x"}, {"$or": [{"objectId": {"$in": ["u3"]}}]}]})
        );

        let again = manager.resolve_related_to("_User", &out).await.unwrap();
        assert_eq!(again, out);
    }

    #[tokio::test]
    async fn test_malformed_related_to() {
        let manager = seeded().await;
        let query = doc(json!({"$relatedTo": {"key": "likes"}}));
        assert!(matches!(
            manager.resolve_related_to("_User", &query).await,
            Err(RelationError::MalformedRelatedTo(_))
        ));
    }

    #[tokio::test]
    async fn test_relation_predicates() {
        let manager = seeded().await;
        let schema = post_schema();

        let pointer = doc(json!({"likes": {"__type": "Pointer", "className": "_User", "objectId": "u3"}}));
        let out = manager.resolve_relation_predicates("Post", &pointer, &schema).await.unwrap();
        assert_eq!(Value::Object(out), json!({"objectId": {"$in": ["p2"]}}));

        let listed = doc(json!({
            "title": "A",
            "$or": [{"likes": {"$in": [
                {"__type": "Pointer", "className": "_User", "objectId": "u1"},
                {"__type": "Pointer", "className": "_User", "objectId": "u3"}
            ]}}]
        }));
        let out = manager.resolve_relation_predicates("Post", &listed, &schema).await.unwrap();
        assert_eq!(
            Value::Object(out),
            json!({"title": "A", "$or": [{"objectId": {"$in": ["p1", "p2"]}}]})
        );
    }

    #[tokio::test]
    async fn test_rewrites_descend_into_nor() {
        let manager = seeded().await;
        let query = doc(json!({
            "$nor": [{"likes": {"__type": "Pointer", "className": "_User", "objectId": "u1"}}]
        }));
        let out = manager
            .resolve_relation_predicates("Post", &query, &post_schema())
            .await
            .unwrap();
        assert_eq!(Value::Object(out), json!({"$nor": [{"objectId": {"$in": ["p1"]}}]}));

        let related = json!({"object": {"__type": "Pointer", "className": "Post", "objectId": "p2"}, "key": "likes"});
        let query = doc(json!({"$nor": [{"$relatedTo": related}]}));
        let out = manager.resolve_related_to("_User", &query).await.unwrap();
        assert_eq!(Value::Object(out), json!({"$nor": [{"objectId": {"$in": ["u3"]}}]}));
    }

    #[tokio::test]
    async fn test_non_relation_keys_untouched() {
        let manager = seeded().await;
        let query = doc(json!({"author": {"__type": "Pointer", "className": "_User", "objectId": "u1"}}));
        let out = manager
            .resolve_relation_predicates("Post", &query, &post_schema())
            .await
            .unwrap();
        assert_eq!(out, query);
    }
}
