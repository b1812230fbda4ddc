//! Controller configuration

use serde::{Deserialize, Serialize};

fn default_schema_collection() -> String {
    "_SCHEMA".to_string()
}

fn default_user_class() -> String {
    "_User".to_string()
}

fn default_session_class() -> String {
    "_Session".to_string()
}

fn default_true() -> bool {
    true
}

/// Configuration for the data controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Prepended to every collection name (classes, schema, join tables)
    #[serde(default)]
    pub collection_prefix: String,

    /// Collection holding one schema document per class
    #[serde(default = "default_schema_collection")]
    pub schema_collection: String,

    /// Class whose records hide credentials from other callers
    #[serde(default = "default_user_class")]
    pub user_class: String,

    /// Class whose deletes tolerate zero matches
    #[serde(default = "default_session_class")]
    pub session_class: String,

    /// Register unknown fields on write instead of rejecting them
    #[serde(default = "default_true")]
    pub auto_register_fields: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            collection_prefix: String::new(),
            schema_collection: default_schema_collection(),
            user_class: default_user_class(),
            session_class: default_session_class(),
            auto_register_fields: true,
        }
    }
}

impl ControllerConfig {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.collection_prefix = prefix.into();
        self
    }

    /// Full store name of a class collection
    pub fn collection_name(&self, class_name: &str) -> String {
        format!("{}{}", self.collection_prefix, class_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_from_empty_object() {
        let config: ControllerConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.schema_collection, "_SCHEMA");
        assert!(config.auto_register_fields);
    }

    #[test]
    fn test_partial_override() {
        let config: ControllerConfig = serde_json::from_value(json!({
            "collection_prefix": "app_",
            "auto_register_fields": false
        }))
        .unwrap();
        assert_eq!(config.collection_name("Post"), "app_Post");
        assert_eq!(config.session_class, "_Session");
        assert!(!config.auto_register_fields);
    }
}
