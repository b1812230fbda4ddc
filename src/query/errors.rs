//! Query and update translation errors

use thiserror::Error;

/// Result type for translation
pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Key cannot be used as a field name
    #[error("invalid key name: {0}")]
    InvalidKey(String),

    /// Value cannot be encoded for the store
    #[error("bad value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    /// Query operator the store language has no equivalent for
    #[error("unsupported query operator: {0}")]
    UnsupportedOperator(String),

    /// Malformed `__op` payload
    #[error("malformed {op} operation on {key}: {reason}")]
    MalformedOperation {
        key: String,
        op: String,
        reason: String,
    },

    /// `$relatedTo` must be rewritten into an id constraint first
    #[error("$relatedTo reached the query translator unresolved")]
    UnresolvedRelatedTo,

    /// Relation operators are handled by join tables, never by the store update
    #[error("relation operation on {0} reached the update translator")]
    RelationOperation(String),
}

impl QueryError {
    pub fn invalid_value(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            reason: reason.into(),
        }
    }
}
