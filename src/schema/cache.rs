//! Schema Cache
//!
//! Holds the live class schema read from the schema collection.
//!
//! The cache lock is held for the whole duration of a load, so callers that
//! arrive while a load is in flight wait for it and then share its result:
//! at most one read of the schema collection is outstanding at any time.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::errors::{SchemaError, SchemaResult};
use super::names::class_name_is_valid;
use super::types::{Action, Schema};
use super::validator::validate_against;
use crate::storage::{
    Document, FindOptions, ResilientCollection, StorageAdapter, DUPLICATE_KEY,
};

pub struct SchemaCache {
    adapter: Arc<dyn StorageAdapter>,
    collection_name: String,
    auto_register_fields: bool,
    cached: Mutex<Option<Arc<Schema>>>,
}

impl SchemaCache {
    pub fn new(
        adapter: Arc<dyn StorageAdapter>,
        collection_name: impl Into<String>,
        auto_register_fields: bool,
    ) -> Self {
        Self {
            adapter,
            collection_name: collection_name.into(),
            auto_register_fields,
            cached: Mutex::new(None),
        }
    }

    fn collection(&self) -> ResilientCollection {
        ResilientCollection::new(self.adapter.collection(&self.collection_name))
    }

    async fn read(&self) -> SchemaResult<Schema> {
        let documents = self
            .collection()
            .find(&Document::new(), &FindOptions::default())
            .await?;
        let schema = Schema::from_documents(&documents)?;
        info!(
            collection = %self.collection_name,
            classes = documents.len(),
            "schema loaded"
        );
        Ok(schema)
    }

    /// Return the cached schema, loading it on first use
    pub async fn load(&self) -> SchemaResult<Arc<Schema>> {
        self.load_with(|_| true).await
    }

    /// Return the cached schema if `acceptor` accepts it, otherwise reload
    /// once. The acceptor is not consulted again after the reload.
    pub async fn load_with<F>(&self, acceptor: F) -> SchemaResult<Arc<Schema>>
    where
        F: FnOnce(&Schema) -> bool,
    {
        let mut cached = self.cached.lock().await;
        if let Some(schema) = cached.as_ref() {
            if acceptor(schema) {
                return Ok(Arc::clone(schema));
            }
            debug!("cached schema rejected, reloading");
        }

        let schema = Arc::new(self.read().await?);
        *cached = Some(Arc::clone(&schema));
        Ok(schema)
    }

    /// Unconditionally replace the cached schema with a fresh read
    pub async fn reload(&self) -> SchemaResult<Arc<Schema>> {
        self.load_with(|_| false).await
    }

    /// Forget the cached schema; the next `load` reads the store
    pub async fn clear(&self) {
        *self.cached.lock().await = None;
    }

    /// Validate `object` for `class_name`, registering fields the schema
    /// does not know yet.
    ///
    /// `query` is `None` for creates. `acl` is the caller's group, `None` for
    /// master callers, and is checked against the `addField` permission before
    /// any field is registered.
    pub async fn validate_object(
        &self,
        class_name: &str,
        object: &Document,
        query: Option<&Document>,
        acl: Option<&[String]>,
    ) -> SchemaResult<Arc<Schema>> {
        if !class_name_is_valid(class_name) {
            return Err(SchemaError::InvalidClassName(class_name.to_string()));
        }

        let schema = self.load().await?;
        let new_fields = validate_against(&schema, class_name, object, query)?;
        if new_fields.is_empty() {
            return Ok(schema);
        }

        if !self.auto_register_fields {
            let (field, _) = &new_fields[0];
            return Err(SchemaError::UnknownField {
                class_name: class_name.to_string(),
                field: field.clone(),
            });
        }
        if let Some(acl) = acl {
            schema.validate_permission(class_name, acl, Action::AddField)?;
        }

        let collection = self.collection();
        for (field, field_type) in &new_fields {
            let mut filter = Document::new();
            filter.insert("_id".to_string(), Value::String(class_name.to_string()));
            filter.insert(field.clone(), json!({ "$exists": false }));
            let mut set = Document::new();
            set.insert(field.clone(), Value::String(field_type.to_string()));
            let mut update = Document::new();
            update.insert("$set".to_string(), Value::Object(set));

            info!(class = %class_name, field = %field, field_type = %field_type, "registering field");
            match collection.upsert(&filter, &update).await {
                Ok(_) => {}
                // Another writer registered the field first; the reload below
                // decides whether its type agrees with ours.
                Err(err) if err.code == Some(DUPLICATE_KEY) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let schema = self.reload().await?;
        validate_against(&schema, class_name, object, query)?;
        Ok(schema)
    }
}
