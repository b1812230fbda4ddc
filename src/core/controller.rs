//! Data Controller
//!
//! Orchestrates every operation against a class:
//!
//! 1. Validate the class name
//! 2. Load the schema (reloading once if the query names unknown fields)
//! 3. Check class-level permissions, unless the caller is master
//! 4. Resolve relation predicates / extract relation operators
//! 5. Translate into the store language and add the row-level ACL clause
//! 6. Execute through a resilient collection
//!
//! Permission checks come before any relation lookup or store access, so a
//! denied caller causes no store traffic beyond the schema read.

use std::sync::Arc;

use futures_util::future::try_join_all;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::ControllerConfig;
use super::context::QueryOptions;
use super::error::{CoreError, CoreResult};
use super::projector::ResponseProjector;
use crate::query::{
    conjoin, parse_update, read_permission_clause, transform_create, transform_key,
    transform_sort, transform_update, transform_where, write_permission_clause,
};
use crate::relation::{extract_relation_mutations, RelationManager};
use crate::schema::{class_name_is_valid, keys_for_query, Action, Schema, SchemaCache};
use crate::storage::{Document, FindOptions, ResilientCollection, StorageAdapter};

/// Result of `find`
#[derive(Debug, Clone, PartialEq)]
pub enum FindResult {
    Objects(Vec<Document>),
    Count(u64),
}

impl FindResult {
    /// Matched objects; empty for a count
    pub fn into_objects(self) -> Vec<Document> {
        match self {
            FindResult::Objects(objects) => objects,
            FindResult::Count(_) => Vec::new(),
        }
    }
}

fn new_object_id() -> String {
    Uuid::new_v4().simple().to_string()[..10].to_string()
}

fn check_class_name(class_name: &str) -> CoreResult<()> {
    if class_name_is_valid(class_name) {
        Ok(())
    } else {
        Err(CoreError::InvalidClassName(class_name.to_string()))
    }
}

/// A query that is exactly `{objectId: <id>}` is a `get`
fn is_get(query: &Document) -> bool {
    query.len() == 1 && query.get("objectId").map_or(false, Value::is_string)
}

pub struct DataController {
    adapter: Arc<dyn StorageAdapter>,
    config: ControllerConfig,
    schema_cache: SchemaCache,
    relations: RelationManager,
}

impl DataController {
    pub fn new(adapter: Arc<dyn StorageAdapter>, config: ControllerConfig) -> Self {
        let schema_cache = SchemaCache::new(
            Arc::clone(&adapter),
            config.collection_name(&config.schema_collection),
            config.auto_register_fields,
        );
        let relations = RelationManager::new(Arc::clone(&adapter), config.collection_prefix.clone());
        Self {
            adapter,
            config,
            schema_cache,
            relations,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema_cache
    }

    pub fn relations(&self) -> &RelationManager {
        &self.relations
    }

    fn collection(&self, class_name: &str) -> ResilientCollection {
        ResilientCollection::new(self.adapter.collection(&self.config.collection_name(class_name)))
    }

    /// Load the schema, reloading once if `acceptor` rejects the cached one
    pub async fn load_schema<F>(&self, acceptor: F) -> CoreResult<Arc<Schema>>
    where
        F: FnOnce(&Schema) -> bool,
    {
        Ok(self.schema_cache.load_with(acceptor).await?)
    }

    async fn load_for_query(&self, class_name: &str, query: &Document) -> CoreResult<Arc<Schema>> {
        let keys = keys_for_query(query);
        self.load_schema(|schema| schema.has_keys(class_name, keys.iter().map(String::as_str)))
            .await
    }

    /// Validate an object payload, registering new fields where allowed
    pub async fn validate_object(
        &self,
        class_name: &str,
        object: &Document,
        query: Option<&Document>,
        options: &QueryOptions,
    ) -> CoreResult<Arc<Schema>> {
        Ok(self
            .schema_cache
            .validate_object(class_name, object, query, options.acl.as_deref())
            .await?)
    }

    /// Find objects matching `query`, or count them when `options.count`
    pub async fn find(
        &self,
        class_name: &str,
        query: &Document,
        options: &QueryOptions,
    ) -> CoreResult<FindResult> {
        check_class_name(class_name)?;
        let schema = self.load_for_query(class_name, query).await?;
        if let Some(acl) = &options.acl {
            let action = if is_get(query) { Action::Get } else { Action::Find };
            schema.validate_permission(class_name, acl, action)?;
        }

        let resolved = self.relations.resolve_related_to(class_name, query).await?;
        let resolved = self
            .relations
            .resolve_relation_predicates(class_name, &resolved, &schema)
            .await?;

        let mut store_query = transform_where(&schema, class_name, &resolved)?;
        let sort = transform_sort(&schema, class_name, &options.sort)?;
        if let Some(acl) = &options.acl {
            store_query = conjoin(store_query, read_permission_clause(acl));
        }
        debug!(class = %class_name, query = ?store_query, "find");

        let collection = self.collection(class_name);
        let find_options = options.find_options(sort);
        if options.count {
            let count = collection.count(&store_query, &find_options).await?;
            return Ok(FindResult::Count(count));
        }

        let documents = collection.find(&store_query, &find_options).await?;
        let projector = ResponseProjector::new(&schema, &self.config.user_class);
        Ok(FindResult::Objects(
            documents
                .into_iter()
                .map(|doc| projector.project(class_name, doc, options.acl.as_deref()))
                .collect(),
        ))
    }

    /// Insert a new object and return its objectId. An objectId is generated
    /// when the payload has none.
    pub async fn create(
        &self,
        class_name: &str,
        object: &Document,
        options: &QueryOptions,
    ) -> CoreResult<String> {
        check_class_name(class_name)?;
        let schema = self.load_schema(|_| true).await?;
        if let Some(acl) = &options.acl {
            schema.validate_permission(class_name, acl, Action::Create)?;
        }
        let schema = self.validate_object(class_name, object, None, options).await?;

        let object_id = match object.get("objectId") {
            Some(Value::String(id)) => id.clone(),
            Some(_) => return Err(CoreError::validation("objectId must be a string")),
            None => new_object_id(),
        };
        let payload = parse_update(object)?;
        let (payload, mutations) = extract_relation_mutations(class_name, Some(&object_id), &payload)?;

        let mut document = transform_create(&schema, class_name, &payload)?;
        document.insert("_id".to_string(), Value::String(object_id.clone()));

        self.collection(class_name).insert(vec![document]).await?;
        self.relations.apply(&mutations).await?;
        debug!(class = %class_name, object_id = %object_id, edges = mutations.len(), "created");
        Ok(object_id)
    }

    /// Update the object matching `query`.
    ///
    /// Returns the post-update values of fields the store computed
    /// (increments and array operators); other new values are already known
    /// to the caller.
    pub async fn update(
        &self,
        class_name: &str,
        query: &Document,
        update: &Document,
        options: &QueryOptions,
    ) -> CoreResult<Document> {
        check_class_name(class_name)?;
        let schema = self.load_for_query(class_name, query).await?;
        if let Some(acl) = &options.acl {
            schema.validate_permission(class_name, acl, Action::Update)?;
        }
        let schema = self.validate_object(class_name, update, Some(query), options).await?;

        let payload = parse_update(update)?;
        let owning_id = update
            .get("objectId")
            .or_else(|| query.get("objectId"))
            .and_then(Value::as_str);
        let (payload, mutations) = extract_relation_mutations(class_name, owning_id, &payload)?;

        let mut store_query = transform_where(&schema, class_name, query)?;
        let store_update = transform_update(&schema, class_name, &payload)?;
        if let Some(acl) = &options.acl {
            store_query = conjoin(store_query, write_permission_clause(acl));
        }

        let collection = self.collection(class_name);
        let updated = if store_update.is_empty() {
            // Only relation operators: the object itself is untouched
            let probe = FindOptions {
                limit: Some(1),
                ..FindOptions::default()
            };
            collection.find(&store_query, &probe).await?.into_iter().next()
        } else {
            collection.find_one_and_update(&store_query, &store_update).await?
        };

        let Some(updated) = updated else {
            if class_name == self.config.session_class {
                warn!(class = %class_name, "update matched no session, ignoring");
                return Ok(Document::new());
            }
            return Err(CoreError::ObjectNotFound);
        };

        // Edges only change once the write clause has matched the object
        self.relations.apply(&mutations).await?;

        // Top-level ops only: `transform_update` rejects any `Batch` left
        // after relation extraction.
        let mut response = Document::new();
        for (key, op) in &payload {
            if !op.is_store_computed() {
                continue;
            }
            if let Some(value) = updated.get(&transform_key(&schema, class_name, key)) {
                response.insert(key.clone(), value.clone());
            }
        }
        Ok(response)
    }

    /// Remove every object matching `query`
    pub async fn destroy(
        &self,
        class_name: &str,
        query: &Document,
        options: &QueryOptions,
    ) -> CoreResult<()> {
        check_class_name(class_name)?;
        let schema = self.load_for_query(class_name, query).await?;
        if let Some(acl) = &options.acl {
            schema.validate_permission(class_name, acl, Action::Delete)?;
        }

        let mut store_query = transform_where(&schema, class_name, query)?;
        if let Some(acl) = &options.acl {
            store_query = conjoin(store_query, write_permission_clause(acl));
        }

        let removed = self.collection(class_name).remove(&store_query).await?;
        if removed == 0 {
            if class_name == self.config.session_class {
                warn!(class = %class_name, "destroy matched no session, ignoring");
                return Ok(());
            }
            return Err(CoreError::ObjectNotFound);
        }
        debug!(class = %class_name, removed, "destroyed");
        Ok(())
    }

    /// Drop every collection under the configured prefix and forget the
    /// cached schema
    pub async fn delete_everything(&self) -> CoreResult<()> {
        let names = self
            .adapter
            .collection_names(&self.config.collection_prefix)
            .await?;
        try_join_all(names.iter().map(|name| {
            let collection = ResilientCollection::new(self.adapter.collection(name));
            async move { collection.drop().await }
        }))
        .await?;
        self.schema_cache.clear().await;
        info!(prefix = %self.config.collection_prefix, dropped = names.len(), "deleted everything");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryAdapter;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn controller() -> (MemoryAdapter, DataController) {
        let adapter = MemoryAdapter::new();
        let controller = DataController::new(Arc::new(adapter.clone()), ControllerConfig::default());
        (adapter, controller)
    }

    #[test]
    fn test_is_get() {
        assert!(is_get(&doc(json!({"objectId": "p1"}))));
        assert!(!is_get(&doc(json!({"objectId": "p1", "title": "A"}))));
        assert!(!is_get(&doc(json!({"objectId": {"$in": ["p1"]}}))));
    }

    #[tokio::test]
    async fn test_invalid_class_name_touches_nothing() {
        let (adapter, controller) = controller();
        let err = controller
            .find("Bad-Name", &Document::new(), &QueryOptions::master())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CLASS_NAME");
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_then_find() {
        let (_, controller) = controller();
        let id = controller
            .create("Post", &doc(json!({"title": "A"})), &QueryOptions::master())
            .await
            .unwrap();
        assert_eq!(id.len(), 10);

        let found = controller
            .find("Post", &doc(json!({"objectId": id})), &QueryOptions::master())
            .await
            .unwrap()
            .into_objects();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0]["title"], json!("A"));
    }

    #[tokio::test]
    async fn test_count() {
        let (_, controller) = controller();
        for title in ["A", "B", "C"] {
            controller
                .create("Post", &doc(json!({"title": title})), &QueryOptions::master())
                .await
                .unwrap();
        }
        let result = controller
            .find("Post", &doc(json!({"title": {"$ne": "B"}})), &QueryOptions::master().count())
            .await
            .unwrap();
        assert_eq!(result, FindResult::Count(2));
    }

    #[tokio::test]
    async fn test_non_relation_batch_rejected_before_write() {
        let (adapter, controller) = controller();
        controller
            .create("Post", &doc(json!({"objectId": "p1", "views": 1})), &QueryOptions::master())
            .await
            .unwrap();
        adapter.clear_calls();

        let update = doc(json!({"views": {"__op": "Batch", "ops": [
            {"__op": "Increment", "amount": 1},
            {"__op": "Increment", "amount": 2}
        ]}}));
        let err = controller
            .update("Post", &doc(json!({"objectId": "p1"})), &update, &QueryOptions::master())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(adapter.operations_on("Post").is_empty());
        assert_eq!(adapter.documents("Post")[0]["views"], json!(1));
    }

    #[tokio::test]
    async fn test_destroy_missing_object() {
        let (_, controller) = controller();
        let err = controller
            .destroy("Post", &doc(json!({"objectId": "nope"})), &QueryOptions::master())
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ObjectNotFound));

        controller
            .destroy("_Session", &doc(json!({"objectId": "nope"})), &QueryOptions::master())
            .await
            .unwrap();
    }
}
