//! Relation subsystem
//!
//! Many-to-many relation fields are not stored on the object. Each edge
//! lives in a join collection per (owning class, relation key), and queries
//! and updates that mention relations are rewritten around those
//! collections.
//!
//! Edges are not cascade-deleted when either endpoint is destroyed.

mod errors;
mod join;
mod mutation;
mod rewrite;

pub use errors::{RelationError, RelationResult};
pub use join::{join_class_name, RelationManager};
pub use mutation::{extract_relation_mutations, EdgeOp, RelationMutation};
pub use rewrite::add_in_object_ids;
