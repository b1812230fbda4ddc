//! Join collections
//!
//! Each (owning class, relation key) pair has its own collection named
//! `_Join:<key>:<owningClass>` holding `{owningId, relatedId}` edges. Other
//! tooling reads these names, so the format is fixed.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::try_join_all;
use serde_json::{json, Value};
use tracing::debug;

use super::errors::RelationResult;
use super::mutation::{EdgeOp, RelationMutation};
use crate::storage::{Document, FindOptions, ResilientCollection, StorageAdapter};

/// Name of the join collection for `key` on `owning_class`
pub fn join_class_name(key: &str, owning_class: &str) -> String {
    format!("_Join:{}:{}", key, owning_class)
}

fn edge(owning_id: &str, related_id: &str) -> Document {
    let mut doc = Document::new();
    doc.insert("owningId".to_string(), Value::String(owning_id.to_string()));
    doc.insert("relatedId".to_string(), Value::String(related_id.to_string()));
    doc
}

fn ids_from(documents: Vec<Document>, field: &str) -> BTreeSet<String> {
    documents
        .iter()
        .filter_map(|doc| doc.get(field).and_then(Value::as_str))
        .map(str::to_string)
        .collect()
}

pub struct RelationManager {
    adapter: Arc<dyn StorageAdapter>,
    collection_prefix: String,
}

impl RelationManager {
    pub fn new(adapter: Arc<dyn StorageAdapter>, collection_prefix: impl Into<String>) -> Self {
        Self {
            adapter,
            collection_prefix: collection_prefix.into(),
        }
    }

    fn join_collection(&self, key: &str, owning_class: &str) -> ResilientCollection {
        let name = format!("{}{}", self.collection_prefix, join_class_name(key, owning_class));
        ResilientCollection::new(self.adapter.collection(&name))
    }

    /// Record the edge `owning_id -> related_id`. Idempotent.
    pub async fn add_relation(
        &self,
        key: &str,
        owning_class: &str,
        owning_id: &str,
        related_id: &str,
    ) -> RelationResult<()> {
        debug!(key, owning_class, owning_id, related_id, "add relation edge");
        let pair = edge(owning_id, related_id);
        let mut update = Document::new();
        update.insert("$set".to_string(), Value::Object(pair.clone()));
        self.join_collection(key, owning_class)
            .upsert(&pair, &update)
            .await?;
        Ok(())
    }

    /// Remove the edge `owning_id -> related_id`; absent edges are fine
    pub async fn remove_relation(
        &self,
        key: &str,
        owning_class: &str,
        owning_id: &str,
        related_id: &str,
    ) -> RelationResult<()> {
        debug!(key, owning_class, owning_id, related_id, "remove relation edge");
        self.join_collection(key, owning_class)
            .remove(&edge(owning_id, related_id))
            .await?;
        Ok(())
    }

    /// Every object related to `owning_id` through `key`
    pub async fn related_ids(
        &self,
        owning_class: &str,
        key: &str,
        owning_id: &str,
    ) -> RelationResult<BTreeSet<String>> {
        let mut filter = Document::new();
        filter.insert("owningId".to_string(), Value::String(owning_id.to_string()));
        let docs = self
            .join_collection(key, owning_class)
            .find(&filter, &FindOptions::default())
            .await?;
        Ok(ids_from(docs, "relatedId"))
    }

    /// Every owner related through `key` to any of `related_ids`
    pub async fn owning_ids(
        &self,
        owning_class: &str,
        key: &str,
        related_ids: &BTreeSet<String>,
    ) -> RelationResult<BTreeSet<String>> {
        let mut filter = Document::new();
        filter.insert("relatedId".to_string(), json!({ "$in": related_ids }));
        let docs = self
            .join_collection(key, owning_class)
            .find(&filter, &FindOptions::default())
            .await?;
        Ok(ids_from(docs, "owningId"))
    }

    /// Apply edge mutations concurrently. Any failure fails the batch;
    /// edges already written stay written.
    pub async fn apply(&self, mutations: &[RelationMutation]) -> RelationResult<()> {
        try_join_all(mutations.iter().map(|m| async move {
            match m.op {
                EdgeOp::Add => {
                    self.add_relation(&m.key, &m.owning_class, &m.owning_id, &m.related_id)
                        .await
                }
                EdgeOp::Remove => {
                    self.remove_relation(&m.key, &m.owning_class, &m.owning_id, &m.related_id)
                        .await
                }
            }
        }))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAdapter;

    fn manager() -> (MemoryAdapter, RelationManager) {
        let adapter = MemoryAdapter::new();
        let manager = RelationManager::new(Arc::new(adapter.clone()), "");
        (adapter, manager)
    }

    #[test]
    fn test_join_class_name() {
        assert_eq!(join_class_name("likes", "Post"), "_Join:likes:Post");
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let (adapter, manager) = manager();
        manager.add_relation("likes", "Post", "p1", "u1").await.unwrap();
        manager.add_relation("likes", "Post", "p1", "u1").await.unwrap();
        assert_eq!(adapter.documents("_Join:likes:Post").len(), 1);
    }

    #[tokio::test]
    async fn test_add_then_remove() {
        let (adapter, manager) = manager();
        manager.add_relation("likes", "Post", "p1", "u1").await.unwrap();
        manager.add_relation("likes", "Post", "p1", "u2").await.unwrap();
        manager.remove_relation("likes", "Post", "p1", "u1").await.unwrap();

        let related = manager.related_ids("Post", "likes", "p1").await.unwrap();
        assert_eq!(related.into_iter().collect::<Vec<_>>(), vec!["u2"]);

        manager.remove_relation("likes", "Post", "p9", "u9").await.unwrap();
        assert_eq!(adapter.documents("_Join:likes:Post").len(), 1);
    }

    #[tokio::test]
    async fn test_owning_ids() {
        let (_, manager) = manager();
        manager.add_relation("likes", "Post", "p1", "u1").await.unwrap();
        manager.add_relation("likes", "Post", "p2", "u2").await.unwrap();
        manager.add_relation("likes", "Post", "p3", "u3").await.unwrap();

        let wanted: BTreeSet<String> = ["u1", "u3"].iter().map(|s| s.to_string()).collect();
        let owners = manager.owning_ids("Post", "likes", &wanted).await.unwrap();
        assert_eq!(owners.into_iter().collect::<Vec<_>>(), vec!["p1", "p3"]);
    }

    #[tokio::test]
    async fn test_prefix_applies_to_join_collections() {
        let adapter = MemoryAdapter::new();
        let manager = RelationManager::new(Arc::new(adapter.clone()), "test_");
        manager.add_relation("likes", "Post", "p1", "u1").await.unwrap();
        assert_eq!(adapter.documents("test__Join:likes:Post").len(), 1);
    }

    #[tokio::test]
    async fn test_apply_mutations() {
        let (_, manager) = manager();
        manager.add_relation("likes", "Post", "p1", "u1").await.unwrap();
        let mutations = vec![
            RelationMutation::new(EdgeOp::Add, "likes", "Post", "p1", "u2"),
            RelationMutation::new(EdgeOp::Remove, "likes", "Post", "p1", "u1"),
        ];
        manager.apply(&mutations).await.unwrap();
        let related = manager.related_ids("Post", "likes", "p1").await.unwrap();
        assert_eq!(related.into_iter().collect::<Vec<_>>(), vec!["u2"]);
    }
}
