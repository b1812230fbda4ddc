//! Storage subsystem
//!
//! The document store is an external collaborator. This module defines the
//! contract the access layer needs from it, the resilient wrapper every
//! collection access goes through, and an in-memory reference adapter.
//!
//! # Design Principles
//!
//! - Adapter errors surface unchanged
//! - Exactly one automatic retry, for a missing geo index
//! - No query execution in the access layer itself

mod adapter;
mod errors;
mod evaluator;
pub mod memory;
mod resilient;

pub use adapter::{
    Document, FindOptions, IndexKind, RawCollection, SortKey, StorageAdapter, UpdateAck,
};
pub use errors::{AdapterError, StorageResult, DUPLICATE_KEY, GEO_INDEX_MISSING};
pub use memory::{AdapterCall, MemoryAdapter};
pub use resilient::ResilientCollection;
