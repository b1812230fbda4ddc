//! In-memory storage adapter
//!
//! A complete `StorageAdapter` kept in process memory. Every call is recorded
//! so callers can observe exactly which round trips an operation issued, and
//! failures can be injected per operation name.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use futures_util::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use super::adapter::{
    Document, FindOptions, IndexKind, RawCollection, StorageAdapter, UpdateAck,
};
use super::errors::{AdapterError, StorageResult};
use super::evaluator;

/// One recorded adapter round trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterCall {
    pub operation: &'static str,
    pub collection: String,
}

#[derive(Debug, Default)]
struct CollectionData {
    documents: Vec<Document>,
    geo_indexes: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: BTreeMap<String, CollectionData>,
    calls: Vec<AdapterCall>,
    failures: VecDeque<(&'static str, AdapterError)>,
}

/// Thread-safe in-memory document store
#[derive(Debug, Clone, Default)]
pub struct MemoryAdapter {
    state: Arc<RwLock<MemoryState>>,
}

fn lock_poisoned() -> AdapterError {
    AdapterError::internal("memory store lock poisoned")
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, MemoryState>> {
        self.state.write().map_err(|_| lock_poisoned())
    }

    /// Every call recorded since creation or the last `clear_calls`
    pub fn calls(&self) -> Vec<AdapterCall> {
        self.state
            .read()
            .map(|s| s.calls.clone())
            .unwrap_or_default()
    }

    /// Operation names recorded against one collection, in call order
    pub fn operations_on(&self, collection: &str) -> Vec<&'static str> {
        self.calls()
            .into_iter()
            .filter(|c| c.collection == collection)
            .map(|c| c.operation)
            .collect()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut state) = self.write() {
            state.calls.clear();
        }
    }

    /// Make the next call of `operation` (on any collection) fail with `error`.
    /// Injected failures queue up in order.
    pub fn fail_next(&self, operation: &'static str, error: AdapterError) {
        if let Ok(mut state) = self.write() {
            state.failures.push_back((operation, error));
        }
    }

    pub fn has_geo_index(&self, collection: &str, field: &str) -> bool {
        self.state
            .read()
            .map(|s| {
                s.collections
                    .get(collection)
                    .map_or(false, |c| c.geo_indexes.contains(field))
            })
            .unwrap_or(false)
    }

    /// Snapshot of a collection's documents, without recording a call
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.state
            .read()
            .map(|s| {
                s.collections
                    .get(collection)
                    .map(|c| c.documents.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

impl StorageAdapter for MemoryAdapter {
    fn collection(&self, name: &str) -> Arc<dyn RawCollection> {
        Arc::new(MemoryCollection {
            name: name.to_string(),
            state: Arc::clone(&self.state),
        })
    }

    fn collection_names<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, StorageResult<Vec<String>>> {
        Box::pin(async move {
            let mut state = self.write()?;
            state.calls.push(AdapterCall {
                operation: "collection_names",
                collection: prefix.to_string(),
            });
            Ok(state
                .collections
                .keys()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect())
        })
    }
}

struct MemoryCollection {
    name: String,
    state: Arc<RwLock<MemoryState>>,
}

fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_string()
}

fn first_match(documents: &[Document], filter: &Document) -> StorageResult<Option<usize>> {
    for (idx, doc) in documents.iter().enumerate() {
        if evaluator::matches(doc, filter)? {
            return Ok(Some(idx));
        }
    }
    Ok(None)
}

fn matching(
    data: Option<&CollectionData>,
    namespace: &str,
    query: &Document,
    options: &FindOptions,
) -> StorageResult<Vec<Document>> {
    for field in evaluator::geo_fields(query) {
        if !data.map_or(false, |d| d.geo_indexes.contains(&field)) {
            return Err(AdapterError::missing_geo_index(namespace, &field));
        }
    }

    let Some(data) = data else {
        return Ok(Vec::new());
    };

    let mut docs = Vec::new();
    for doc in &data.documents {
        if evaluator::matches(doc, query)? {
            docs.push(doc.clone());
        }
    }

    if !options.sort.is_empty() {
        evaluator::sort_documents(&mut docs, &options.sort);
    } else if let Some((field, target)) = evaluator::near_target(query) {
        let distance = |d: &Document| {
            evaluator::lookup(d, &field)
                .and_then(Value::as_array)
                .and_then(|p| Some((p.first()?.as_f64()?, p.get(1)?.as_f64()?)))
                .map_or(f64::INFINITY, |p| evaluator::spherical_distance(p, target))
        };
        docs.sort_by(|a, b| distance(a).total_cmp(&distance(b)));
    }

    let skip = options.skip.unwrap_or(0);
    let limit = options.limit.unwrap_or(usize::MAX);
    Ok(docs.into_iter().skip(skip).take(limit).collect())
}

impl MemoryCollection {
    /// Record the call, honour injected failures, then run `f` under the lock
    fn with_state<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut MemoryState) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut state = self.state.write().map_err(|_| lock_poisoned())?;
        state.calls.push(AdapterCall {
            operation,
            collection: self.name.clone(),
        });
        if let Some(pos) = state.failures.iter().position(|(op, _)| *op == operation) {
            if let Some((_, err)) = state.failures.remove(pos) {
                return Err(err);
            }
        }
        f(&mut state)
    }
}

impl RawCollection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn find<'a>(
        &'a self,
        query: &'a Document,
        options: &'a FindOptions,
    ) -> BoxFuture<'a, StorageResult<Vec<Document>>> {
        Box::pin(async move {
            self.with_state("find", |state| {
                matching(state.collections.get(&self.name), &self.name, query, options)
            })
        })
    }

    fn count<'a>(
        &'a self,
        query: &'a Document,
        options: &'a FindOptions,
    ) -> BoxFuture<'a, StorageResult<u64>> {
        Box::pin(async move {
            self.with_state("count", |state| {
                let docs = matching(state.collections.get(&self.name), &self.name, query, options)?;
                Ok(docs.len() as u64)
            })
        })
    }

    fn insert(&self, documents: Vec<Document>) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            self.with_state("insert", |state| {
                let data = state.collections.entry(self.name.clone()).or_default();
                for mut doc in documents {
                    let id = match doc.get("_id").and_then(Value::as_str) {
                        Some(id) => id.to_string(),
                        None => {
                            let id = generate_id();
                            doc.insert("_id".to_string(), Value::String(id.clone()));
                            id
                        }
                    };
                    if data.documents.iter().any(|d| d.get("_id") == doc.get("_id")) {
                        return Err(AdapterError::duplicate_key(&self.name, &id));
                    }
                    data.documents.push(doc);
                }
                Ok(())
            })
        })
    }

    fn update<'a>(
        &'a self,
        filter: &'a Document,
        update: &'a Document,
        upsert: bool,
    ) -> BoxFuture<'a, StorageResult<UpdateAck>> {
        Box::pin(async move {
            self.with_state("update", |state| {
                let data = state.collections.entry(self.name.clone()).or_default();
                if let Some(idx) = first_match(&data.documents, filter)? {
                    evaluator::apply_update(&mut data.documents[idx], update)?;
                    return Ok(UpdateAck {
                        matched: 1,
                        modified: 1,
                        upserted: false,
                    });
                }
                if !upsert {
                    return Ok(UpdateAck::default());
                }
                let mut doc = evaluator::seed_from_filter(filter);
                evaluator::apply_update(&mut doc, update)?;
                let id = doc
                    .entry("_id".to_string())
                    .or_insert_with(|| Value::String(generate_id()))
                    .clone();
                if data.documents.iter().any(|d| d.get("_id") == Some(&id)) {
                    let id = id.as_str().map(str::to_string).unwrap_or_else(|| id.to_string());
                    return Err(AdapterError::duplicate_key(&self.name, &id));
                }
                data.documents.push(doc);
                Ok(UpdateAck {
                    matched: 0,
                    modified: 0,
                    upserted: true,
                })
            })
        })
    }

    fn remove<'a>(&'a self, filter: &'a Document) -> BoxFuture<'a, StorageResult<u64>> {
        Box::pin(async move {
            self.with_state("remove", |state| {
                let Some(data) = state.collections.get_mut(&self.name) else {
                    return Ok(0);
                };
                let mut keep = Vec::with_capacity(data.documents.len());
                let mut removed = 0;
                for doc in data.documents.drain(..) {
                    if evaluator::matches(&doc, filter)? {
                        removed += 1;
                    } else {
                        keep.push(doc);
                    }
                }
                data.documents = keep;
                Ok(removed)
            })
        })
    }

    fn find_one_and_update<'a>(
        &'a self,
        filter: &'a Document,
        update: &'a Document,
    ) -> BoxFuture<'a, StorageResult<Option<Document>>> {
        Box::pin(async move {
            self.with_state("find_one_and_update", |state| {
                let Some(data) = state.collections.get_mut(&self.name) else {
                    return Ok(None);
                };
                let Some(idx) = first_match(&data.documents, filter)? else {
                    return Ok(None);
                };
                let mut updated = data.documents[idx].clone();
                evaluator::apply_update(&mut updated, update)?;
                data.documents[idx] = updated.clone();
                Ok(Some(updated))
            })
        })
    }

    fn find_one_and_delete<'a>(
        &'a self,
        filter: &'a Document,
    ) -> BoxFuture<'a, StorageResult<Option<Document>>> {
        Box::pin(async move {
            self.with_state("find_one_and_delete", |state| {
                let Some(data) = state.collections.get_mut(&self.name) else {
                    return Ok(None);
                };
                let Some(idx) = first_match(&data.documents, filter)? else {
                    return Ok(None);
                };
                Ok(Some(data.documents.remove(idx)))
            })
        })
    }

    fn create_index<'a>(
        &'a self,
        field: &'a str,
        kind: IndexKind,
    ) -> BoxFuture<'a, StorageResult<()>> {
        Box::pin(async move {
            self.with_state("create_index", |state| {
                let data = state.collections.entry(self.name.clone()).or_default();
                match kind {
                    IndexKind::Geo2d => {
                        data.geo_indexes.insert(field.to_string());
                    }
                }
                Ok(())
            })
        })
    }

    fn drop_collection(&self) -> BoxFuture<'_, StorageResult<()>> {
        Box::pin(async move {
            self.with_state("drop", |state| {
                state.collections.remove(&self.name);
                Ok(())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SortKey;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_find_with_paging() {
        let adapter = MemoryAdapter::new();
        let coll = adapter.collection("Post");
        let docs = (0..5)
            .map(|i| doc(json!({"_id": format!("p{}", i), "n": i})))
            .collect();
        coll.insert(docs).await.unwrap();

        let options = FindOptions {
            skip: Some(1),
            limit: Some(2),
            sort: vec![SortKey::desc("n")],
        };
        let found = coll.find(&Document::new(), &options).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|d| d["_id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["p3", "p2"]);

        let total = coll
            .count(&doc(json!({"n": {"$gte": 2}})), &FindOptions::default())
            .await
            .unwrap();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let adapter = MemoryAdapter::new();
        let coll = adapter.collection("Post");
        coll.insert(vec![doc(json!({"_id": "p1"}))]).await.unwrap();
        let err = coll.insert(vec![doc(json!({"_id": "p1"}))]).await.unwrap_err();
        assert_eq!(err.code, Some(crate::storage::errors::DUPLICATE_KEY));
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let adapter = MemoryAdapter::new();
        let coll = adapter.collection("_Join:likes:Post");
        let edge = doc(json!({"owningId": "p1", "relatedId": "u1"}));
        let set = doc(json!({"$set": {"owningId": "p1", "relatedId": "u1"}}));

        let first = coll.update(&edge, &set, true).await.unwrap();
        let second = coll.update(&edge, &set, true).await.unwrap();

        assert!(first.upserted);
        assert!(!second.upserted);
        assert_eq!(adapter.documents("_Join:likes:Post").len(), 1);
    }

    #[tokio::test]
    async fn test_remove_counts() {
        let adapter = MemoryAdapter::new();
        let coll = adapter.collection("Post");
        coll.insert(vec![doc(json!({"a": 1})), doc(json!({"a": 1})), doc(json!({"a": 2}))])
            .await
            .unwrap();

        assert_eq!(coll.remove(&doc(json!({"a": 1}))).await.unwrap(), 2);
        assert_eq!(coll.remove(&doc(json!({"a": 1}))).await.unwrap(), 0);
        assert_eq!(adapter.documents("Post").len(), 1);
    }

    #[tokio::test]
    async fn test_collection_names_by_prefix() {
        let adapter = MemoryAdapter::new();
        adapter
            .collection("test_Post")
            .insert(vec![doc(json!({}))])
            .await
            .unwrap();
        adapter
            .collection("other_Post")
            .insert(vec![doc(json!({}))])
            .await
            .unwrap();

        let names = adapter.collection_names("test_").await.unwrap();
        assert_eq!(names, vec!["test_Post".to_string()]);
    }

    #[tokio::test]
    async fn test_calls_are_recorded() {
        let adapter = MemoryAdapter::new();
        let coll = adapter.collection("Post");
        coll.find(&Document::new(), &FindOptions::default()).await.unwrap();
        coll.remove(&Document::new()).await.unwrap();

        assert_eq!(adapter.operations_on("Post"), vec!["find", "remove"]);
        adapter.clear_calls();
        assert!(adapter.calls().is_empty());
    }
}
