//! Relation subsystem errors

use thiserror::Error;

use crate::storage::AdapterError;

/// Result type for relation operations
pub type RelationResult<T> = Result<T, RelationError>;

#[derive(Debug, Clone, Error)]
pub enum RelationError {
    /// `$relatedTo` without a pointer object and a key
    #[error("malformed $relatedTo: {0}")]
    MalformedRelatedTo(String),

    /// Relation predicate value is neither a pointer nor an `$in` list
    #[error("malformed relation constraint on {key}: {reason}")]
    MalformedConstraint { key: String, reason: String },

    /// Relation operators need to know which object owns the edges
    #[error("relation operation on {0} without an owning objectId")]
    MissingOwner(String),

    /// Store failure on a join collection
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}
