//! Storage adapter error types
//!
//! Adapter failures are opaque to the access layer. They are classified by a
//! stable numeric code so the resilient collection can recognise the one
//! failure it knows how to heal:
//! - 17007 with an "unable to find index for $geoNear query" message (missing geo index)
//! - 11000 (duplicate key)

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Result type for storage adapter operations
pub type StorageResult<T> = Result<T, AdapterError>;

/// Store code raised when a geo query runs without a geospatial index
pub const GEO_INDEX_MISSING: i32 = 17007;

/// Store code raised when an insert collides with an existing `_id`
pub const DUPLICATE_KEY: i32 = 11000;

static GEO_INDEX_MESSAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"unable to find index for .geoNear").expect("valid regex"));

static GEO_INDEX_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"field=([A-Za-z_0-9]+) ").expect("valid regex"));

/// Failure surfaced by a storage adapter.
///
/// The message is kept exactly as the store produced it so callers keep the
/// adapter-specific diagnostic detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct AdapterError {
    /// Store-specific error code, when the store reports one
    pub code: Option<i32>,
    /// Store-provided message
    pub message: String,
}

impl AdapterError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Error without a store code (lock poisoning, malformed documents, ...)
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    /// The error a store raises for a `$nearSphere` on an unindexed field
    pub fn missing_geo_index(namespace: &str, field: &str) -> Self {
        Self::new(
            GEO_INDEX_MISSING,
            format!(
                "error processing query: ns={} planner returned error: \
                 unable to find index for $geoNear query field={} ",
                namespace, field
            ),
        )
    }

    pub fn duplicate_key(namespace: &str, id: &str) -> Self {
        Self::new(
            DUPLICATE_KEY,
            format!("E11000 duplicate key error collection: {} _id: {}", namespace, id),
        )
    }

    /// Whether this is the recoverable "missing geo index" failure
    pub fn is_missing_geo_index(&self) -> bool {
        self.code == Some(GEO_INDEX_MISSING) && GEO_INDEX_MESSAGE.is_match(&self.message)
    }

    /// Field that needs a geo index, if this is the recoverable failure and
    /// the message names it.
    pub fn missing_geo_index_field(&self) -> Option<String> {
        if !self.is_missing_geo_index() {
            return None;
        }
        GEO_INDEX_FIELD
            .captures(&self.message)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}
