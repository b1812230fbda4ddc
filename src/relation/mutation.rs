//! Relation operators in update payloads
//!
//! `AddRelation`/`RemoveRelation` (alone or inside a `Batch`) never reach the
//! store update. They are split off into edge mutations on the join
//! collection before the payload is translated.

use super::errors::{RelationError, RelationResult};
use crate::query::{Update, UpdateOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeOp {
    Add,
    Remove,
}

/// One pending join-collection write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationMutation {
    pub op: EdgeOp,
    pub key: String,
    pub owning_class: String,
    pub owning_id: String,
    pub related_id: String,
}

impl RelationMutation {
    pub fn new(
        op: EdgeOp,
        key: impl Into<String>,
        owning_class: impl Into<String>,
        owning_id: impl Into<String>,
        related_id: impl Into<String>,
    ) -> Self {
        Self {
            op,
            key: key.into(),
            owning_class: owning_class.into(),
            owning_id: owning_id.into(),
            related_id: related_id.into(),
        }
    }
}

/// Split relation operators off `update`.
///
/// Returns the update without them plus the edge mutations they describe.
/// A `Batch` keeps whatever non-relation operators it held.
pub fn extract_relation_mutations(
    class_name: &str,
    object_id: Option<&str>,
    update: &Update,
) -> RelationResult<(Update, Vec<RelationMutation>)> {
    let mut remaining = Update::new();
    let mut mutations = Vec::new();

    for (key, op) in update {
        let mut relation_ops = Vec::new();
        match op {
            UpdateOp::AddRelation(_) | UpdateOp::RemoveRelation(_) => relation_ops.push(op),
            UpdateOp::Batch(ops) => {
                let (relations, others): (Vec<&UpdateOp>, Vec<&UpdateOp>) =
                    ops.iter().partition(|op| op.is_relation());
                relation_ops.extend(relations);
                if !others.is_empty() {
                    remaining.insert(
                        key.clone(),
                        UpdateOp::Batch(others.into_iter().cloned().collect()),
                    );
                }
            }
            other => {
                remaining.insert(key.clone(), other.clone());
            }
        }
        if relation_ops.is_empty() {
            continue;
        }

        let owning_id = object_id.ok_or_else(|| RelationError::MissingOwner(key.clone()))?;
        for relation_op in relation_ops {
            let (edge_op, pointers) = match relation_op {
                UpdateOp::AddRelation(pointers) => (EdgeOp::Add, pointers),
                UpdateOp::RemoveRelation(pointers) => (EdgeOp::Remove, pointers),
                _ => continue,
            };
            mutations.extend(pointers.iter().map(|pointer| {
                RelationMutation::new(edge_op, key.as_str(), class_name, owning_id, pointer.object_id.as_str())
            }));
        }
    }

    Ok((remaining, mutations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{parse_update, Pointer};
    use serde_json::{json, Value};

    fn update(value: Value) -> Update {
        parse_update(value.as_object().unwrap()).unwrap()
    }

    #[test]
    fn test_extracts_and_strips_relation_ops() {
        let payload = update(json!({
            "title": "A",
            "likes": {"__op": "AddRelation", "objects": [
                {"__type": "Pointer", "className": "_User", "objectId": "u1"},
                {"__type": "Pointer", "className": "_User", "objectId": "u2"}
            ]}
        }));
        let (remaining, mutations) = extract_relation_mutations("Post", Some("p1"), &payload).unwrap();

        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining["title"], UpdateOp::Set(json!("A")));
        assert_eq!(
            mutations,
            vec![
                RelationMutation::new(EdgeOp::Add, "likes", "Post", "p1", "u1"),
                RelationMutation::new(EdgeOp::Add, "likes", "Post", "p1", "u2"),
            ]
        );
    }

    #[test]
    fn test_batch_is_unpacked() {
        let payload = update(json!({
            "likes": {"__op": "Batch", "ops": [
                {"__op": "AddRelation", "objects": [{"__type": "Pointer", "className": "_User", "objectId": "u1"}]},
                {"__op": "RemoveRelation", "objects": [{"__type": "Pointer", "className": "_User", "objectId": "u2"}]}
            ]}
        }));
        let (remaining, mutations) = extract_relation_mutations("Post", Some("p1"), &payload).unwrap();

        assert!(remaining.is_empty());
        assert_eq!(
            mutations,
            vec![
                RelationMutation::new(EdgeOp::Add, "likes", "Post", "p1", "u1"),
                RelationMutation::new(EdgeOp::Remove, "likes", "Post", "p1", "u2"),
            ]
        );
    }

    #[test]
    fn test_mixed_batch_keeps_other_ops() {
        let mut payload = Update::new();
        payload.insert(
            "likes".to_string(),
            UpdateOp::Batch(vec![
                UpdateOp::AddRelation(vec![Pointer::new("_User", "u1")]),
                UpdateOp::Delete,
            ]),
        );
        let (remaining, mutations) = extract_relation_mutations("Post", Some("p1"), &payload).unwrap();
        assert_eq!(remaining["likes"], UpdateOp::Batch(vec![UpdateOp::Delete]));
        assert_eq!(mutations.len(), 1);
    }

    #[test]
    fn test_missing_owner() {
        let payload = update(json!({
            "likes": {"__op": "RemoveRelation", "objects": [{"__type": "Pointer", "className": "_User", "objectId": "u1"}]}
        }));
        assert!(matches!(
            extract_relation_mutations("Post", None, &payload),
            Err(RelationError::MissingOwner(ref key)) if key == "likes"
        ));

        let plain = update(json!({"title": "A"}));
        let (remaining, mutations) = extract_relation_mutations("Post", None, &plain).unwrap();
        assert_eq!(remaining, plain);
        assert!(mutations.is_empty());
    }
}
