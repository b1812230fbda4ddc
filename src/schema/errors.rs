//! Schema error types

use thiserror::Error;

use crate::storage::AdapterError;

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Schema loading, permission and validation failures
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    // ==================
    // Naming
    // ==================
    /// Class name is not a valid identifier
    #[error("invalid class name: {0}")]
    InvalidClassName(String),

    /// Field name is not a valid identifier
    #[error("invalid field name: {0}")]
    InvalidFieldName(String),

    // ==================
    // Permissions
    // ==================
    /// Class-level permissions do not grant the action to any caller group
    #[error("Permission denied for action {action} on class {class_name}.")]
    PermissionDenied { class_name: String, action: String },

    // ==================
    // Validation
    // ==================
    /// Value type disagrees with the declared field type
    #[error("schema mismatch for {class_name}.{field}; expected {expected} but got {actual}")]
    TypeMismatch {
        class_name: String,
        field: String,
        expected: String,
        actual: String,
    },

    /// Value cannot be typed at all (bad `__type`/`__op` payload)
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Field is not in the schema and may not be added
    #[error("field {field} does not exist on class {class_name}")]
    UnknownField { class_name: String, field: String },

    /// Required column missing on create, or deleted on update
    #[error("{field} is required on class {class_name}")]
    RequiredField { class_name: String, field: String },

    /// A class may only hold one geopoint field
    #[error("there can only be one geopoint field in class {class_name} (has {existing}, got {field})")]
    GeoPointConflict {
        class_name: String,
        existing: String,
        field: String,
    },

    // ==================
    // Loading
    // ==================
    /// A schema document could not be parsed
    #[error("malformed schema for {class_name}: {reason}")]
    MalformedSchema { class_name: String, reason: String },

    /// Store failure while reading or writing the schema collection
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

impl SchemaError {
    pub fn permission_denied(class_name: impl Into<String>, action: impl Into<String>) -> Self {
        Self::PermissionDenied {
            class_name: class_name.into(),
            action: action.into(),
        }
    }

    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn malformed(class_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedSchema {
            class_name: class_name.into(),
            reason: reason.into(),
        }
    }
}
