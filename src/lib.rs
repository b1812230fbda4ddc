//! docaccess - A schema- and permission-aware data access layer over
//! document stores
//!
//! Requests arrive as class name, query or object payload, and caller
//! groups. The controller enforces the class schema, class-level and
//! row-level permissions and relation semantics, then hands store-native
//! operations to a `StorageAdapter`.

pub mod core;
pub mod query;
pub mod relation;
pub mod schema;
pub mod storage;

pub use crate::core::{
    ControllerConfig, CoreError, CoreResult, DataController, FindResult, QueryOptions,
    ResponseProjector,
};
pub use crate::storage::{MemoryAdapter, StorageAdapter};
