//! Query/update translation
//!
//! Turns public queries and update payloads into the store's native
//! language. Relation predicates and relation operators are resolved by the
//! relation subsystem before anything here runs; the translator rejects any
//! that are left over.

mod acl;
mod errors;
mod translate;
mod update;

pub use acl::{conjoin, read_permission_clause, write_permission_clause};
pub use errors::{QueryError, QueryResult};
pub use translate::{
    transform_create, transform_key, transform_sort, transform_update, transform_where,
    INTERNAL_KEYS,
};
pub use update::{parse_update, Pointer, Update, UpdateOp};
