//! Resilient Collection
//!
//! Wraps a raw collection. A `find` or `count` that fails because a geo query
//! hit an unindexed field provisions a 2D index on that field and is retried
//! exactly once. Every other failure, and a second failure, propagates
//! unchanged.

use std::sync::Arc;

use tracing::{debug, warn};

use super::adapter::{Document, FindOptions, IndexKind, RawCollection, UpdateAck};
use super::errors::{AdapterError, StorageResult};

#[derive(Clone)]
pub struct ResilientCollection {
    raw: Arc<dyn RawCollection>,
}

impl ResilientCollection {
    pub fn new(raw: Arc<dyn RawCollection>) -> Self {
        Self { raw }
    }

    pub fn name(&self) -> &str {
        self.raw.name()
    }

    /// Create the index a missing-geo-index error names, or hand the error back
    async fn heal(&self, err: AdapterError) -> StorageResult<()> {
        let Some(field) = err.missing_geo_index_field() else {
            return Err(err);
        };
        warn!(
            collection = %self.raw.name(),
            field = %field,
            "geo query without index, creating 2d index and retrying"
        );
        self.raw.create_index(&field, IndexKind::Geo2d).await
    }

    /// Find matching documents, self-healing a missing geo index once
    pub async fn find(&self, query: &Document, options: &FindOptions) -> StorageResult<Vec<Document>> {
        match self.raw.find(query, options).await {
            Ok(docs) => Ok(docs),
            Err(err) => {
                self.heal(err).await?;
                self.raw.find(query, options).await
            }
        }
    }

    /// Count matching documents, self-healing a missing geo index once
    pub async fn count(&self, query: &Document, options: &FindOptions) -> StorageResult<u64> {
        match self.raw.count(query, options).await {
            Ok(count) => Ok(count),
            Err(err) => {
                self.heal(err).await?;
                self.raw.count(query, options).await
            }
        }
    }

    pub async fn insert(&self, documents: Vec<Document>) -> StorageResult<()> {
        debug!(collection = %self.raw.name(), count = documents.len(), "insert");
        self.raw.insert(documents).await
    }

    pub async fn upsert(&self, filter: &Document, update: &Document) -> StorageResult<UpdateAck> {
        self.raw.update(filter, update, true).await
    }

    pub async fn remove(&self, filter: &Document) -> StorageResult<u64> {
        self.raw.remove(filter).await
    }

    /// Atomically update one document, returning it as it is after the update
    pub async fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
    ) -> StorageResult<Option<Document>> {
        self.raw.find_one_and_update(filter, update).await
    }

    /// Atomically delete one document, returning it as it was before removal
    pub async fn find_one_and_delete(&self, filter: &Document) -> StorageResult<Option<Document>> {
        self.raw.find_one_and_delete(filter).await
    }

    pub async fn drop(&self) -> StorageResult<()> {
        self.raw.drop_collection().await
    }
}
