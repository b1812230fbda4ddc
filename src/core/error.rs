//! Core Error Types
//!
//! The public failure taxonomy. Every subsystem error folds into one of
//! five kinds, each with a stable machine code.

use thiserror::Error;

use crate::query::QueryError;
use crate::relation::RelationError;
use crate::schema::SchemaError;
use crate::storage::AdapterError;

/// Core module result type
pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Malformed class (collection) name
    #[error("invalid class name: {0}")]
    InvalidClassName(String),

    /// Class-level permissions deny the action to the caller
    #[error("{0}")]
    PermissionDenied(String),

    /// A mutation matched no object
    #[error("Object not found.")]
    ObjectNotFound,

    /// Object or query shape violates the schema
    #[error("{0}")]
    Validation(String),

    /// Failure reported by the storage adapter, unchanged
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl CoreError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidClassName(_) => "INVALID_CLASS_NAME",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::ObjectNotFound => "OBJECT_NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Adapter(_) => "ADAPTER_ERROR",
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<SchemaError> for CoreError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::InvalidClassName(name) => Self::InvalidClassName(name),
            SchemaError::PermissionDenied { .. } => Self::PermissionDenied(err.to_string()),
            SchemaError::Adapter(inner) => Self::Adapter(inner),
            other => Self::Validation(other.to_string()),
        }
    }
}

impl From<QueryError> for CoreError {
    fn from(err: QueryError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<RelationError> for CoreError {
    fn from(err: RelationError) -> Self {
        match err {
            RelationError::Adapter(inner) => Self::Adapter(inner),
            other => Self::Validation(other.to_string()),
        }
    }
}
