//! Storage Adapter contract
//!
//! The access layer never executes queries itself. It rewrites requests into
//! store-native documents and hands them to a `StorageAdapter`, which owns the
//! connection lifecycle and exposes named collections.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use super::errors::StorageResult;

/// A store-native document (or query, or update)
pub type Document = Map<String, Value>;

/// Sort specification for one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub ascending: bool,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// Paging and ordering for `find` and `count`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub sort: Vec<SortKey>,
}

/// Index kinds the access layer may ask a store to provision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Flat 2D geospatial index
    Geo2d,
}

/// Acknowledgement of an `update` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateAck {
    pub matched: u64,
    pub modified: u64,
    pub upserted: bool,
}

/// A named collection inside the store.
///
/// `find_one_and_update` returns the document as it is after the update;
/// `find_one_and_delete` returns it as it was before removal. The store
/// guarantees no interleaved mutation between match and mutate.
pub trait RawCollection: Send + Sync {
    /// Collection name, including any configured prefix
    fn name(&self) -> &str;

    fn find<'a>(
        &'a self,
        query: &'a Document,
        options: &'a FindOptions,
    ) -> BoxFuture<'a, StorageResult<Vec<Document>>>;

    fn count<'a>(
        &'a self,
        query: &'a Document,
        options: &'a FindOptions,
    ) -> BoxFuture<'a, StorageResult<u64>>;

    fn insert(&self, documents: Vec<Document>) -> BoxFuture<'_, StorageResult<()>>;

    fn update<'a>(
        &'a self,
        filter: &'a Document,
        update: &'a Document,
        upsert: bool,
    ) -> BoxFuture<'a, StorageResult<UpdateAck>>;

    /// Remove every matching document, returning the removed count
    fn remove<'a>(&'a self, filter: &'a Document) -> BoxFuture<'a, StorageResult<u64>>;

    fn find_one_and_update<'a>(
        &'a self,
        filter: &'a Document,
        update: &'a Document,
    ) -> BoxFuture<'a, StorageResult<Option<Document>>>;

    fn find_one_and_delete<'a>(
        &'a self,
        filter: &'a Document,
    ) -> BoxFuture<'a, StorageResult<Option<Document>>>;

    fn create_index<'a>(
        &'a self,
        field: &'a str,
        kind: IndexKind,
    ) -> BoxFuture<'a, StorageResult<()>>;

    fn drop_collection(&self) -> BoxFuture<'_, StorageResult<()>>;
}

/// Entry point to a document store
pub trait StorageAdapter: Send + Sync {
    /// Handle to a named collection. Collections are created lazily by the store.
    fn collection(&self, name: &str) -> Arc<dyn RawCollection>;

    /// Names of all existing collections starting with `prefix`
    fn collection_names<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, StorageResult<Vec<String>>>;
}
