//! Schema subsystem
//!
//! The schema collection is the single source of truth for which fields a
//! class has, what type each holds, and which caller groups may perform
//! which action on the class.
//!
//! # Design Principles
//!
//! - One cached snapshot shared by every request
//! - At most one load in flight
//! - Reload only when a caller's acceptor rejects the snapshot
//! - Validation is pure; registration of new fields goes through the cache

mod cache;
mod errors;
mod names;
mod types;
mod validator;

pub use cache::SchemaCache;
pub use errors::{SchemaError, SchemaResult};
pub use names::{
    class_name_is_valid, default_field_type, default_relation_fields, field_name_is_valid,
    is_default_field, required_columns, DEFAULT_FIELDS, SYSTEM_CLASSES,
};
pub use types::{keys_for_query, Action, ClassPermissions, ClassSchema, FieldType, Schema};
pub use validator::{infer_type, validate_against, NewFields};
