//! Schema type definitions
//!
//! Field types are persisted as strings in the schema collection:
//! - string, number, boolean, date, object, array, geopoint, file
//! - `*<Class>`: pointer to one object of `<Class>`
//! - `relation<<Class>>`: set of references materialized in a join collection

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{SchemaError, SchemaResult};
use super::names::{default_field_type, default_relation_fields, is_default_field};
use crate::storage::Document;

/// Declared type of a field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array,
    GeoPoint,
    File,
    /// Single reference to an object of the named class
    Pointer(String),
    /// Many-to-many reference set to objects of the named class
    Relation(String),
}

impl FieldType {
    pub fn is_relation(&self) -> bool {
        matches!(self, FieldType::Relation(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, FieldType::Pointer(_))
    }

    /// Target class of a pointer or relation
    pub fn target_class(&self) -> Option<&str> {
        match self {
            FieldType::Pointer(c) | FieldType::Relation(c) => Some(c),
            _ => None,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => write!(f, "string"),
            FieldType::Number => write!(f, "number"),
            FieldType::Boolean => write!(f, "boolean"),
            FieldType::Date => write!(f, "date"),
            FieldType::Object => write!(f, "object"),
            FieldType::Array => write!(f, "array"),
            FieldType::GeoPoint => write!(f, "geopoint"),
            FieldType::File => write!(f, "file"),
            FieldType::Pointer(class) => write!(f, "*{}", class),
            FieldType::Relation(class) => write!(f, "relation<{}>", class),
        }
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parsed = match s {
            "string" => FieldType::String,
            "number" => FieldType::Number,
            "boolean" => FieldType::Boolean,
            "date" => FieldType::Date,
            "object" => FieldType::Object,
            "array" => FieldType::Array,
            "geopoint" => FieldType::GeoPoint,
            "file" => FieldType::File,
            _ => {
                if let Some(class) = s.strip_prefix('*').filter(|c| !c.is_empty()) {
                    FieldType::Pointer(class.to_string())
                } else if let Some(class) = s
                    .strip_prefix("relation<")
                    .and_then(|rest| rest.strip_suffix('>'))
                    .filter(|c| !c.is_empty())
                {
                    FieldType::Relation(class.to_string())
                } else {
                    return Err(format!("unknown field type: {}", s));
                }
            }
        };
        Ok(parsed)
    }
}

impl TryFrom<String> for FieldType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FieldType> for String {
    fn from(value: FieldType) -> Self {
        value.to_string()
    }
}

/// Actions governed by class-level permissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Get,
    Find,
    Create,
    Update,
    Delete,
    AddField,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Get => "get",
            Action::Find => "find",
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::AddField => "addField",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action name -> caller groups granted that action
pub type ClassPermissions = BTreeMap<String, BTreeMap<String, bool>>;

/// Declared fields and permissions of one class
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassSchema {
    pub fields: BTreeMap<String, FieldType>,
    pub permissions: ClassPermissions,
}

impl ClassSchema {
    pub fn with_field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Grant `action` to exactly the listed groups (`"*"` for everyone)
    pub fn with_permission(mut self, action: Action, groups: &[&str]) -> Self {
        let grants = groups.iter().map(|g| (g.to_string(), true)).collect();
        self.permissions.insert(action.as_str().to_string(), grants);
        self
    }

    /// Relation fields of the class with their target class
    pub fn relation_fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().filter_map(|(name, ty)| match ty {
            FieldType::Relation(target) => Some((name.as_str(), target.as_str())),
            _ => None,
        })
    }

    /// Name of the geopoint field, if the class has one
    pub fn geopoint_field(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, ty)| **ty == FieldType::GeoPoint)
            .map(|(name, _)| name.as_str())
    }

    /// Render as a schema-collection document
    pub fn to_document(&self, class_name: &str) -> Document {
        let mut doc = Document::new();
        doc.insert("_id".to_string(), Value::String(class_name.to_string()));
        for (name, ty) in &self.fields {
            doc.insert(name.clone(), Value::String(ty.to_string()));
        }
        if !self.permissions.is_empty() {
            let perms = serde_json::to_value(&self.permissions).unwrap_or(Value::Null);
            doc.insert(
                "_metadata".to_string(),
                serde_json::json!({ "class_permissions": perms }),
            );
        }
        doc
    }
}

/// Snapshot of the live class schema
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    classes: BTreeMap<String, ClassSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_class(mut self, name: impl Into<String>, class: ClassSchema) -> Self {
        self.classes.insert(name.into(), class);
        self
    }

    /// Build a schema from the documents of the schema collection
    pub fn from_documents(documents: &[Document]) -> SchemaResult<Self> {
        let mut classes = BTreeMap::new();
        for doc in documents {
            let class_name = doc
                .get("_id")
                .and_then(Value::as_str)
                .ok_or_else(|| SchemaError::malformed("<unknown>", "schema document without _id"))?;

            let mut class = ClassSchema::default();
            for (key, value) in doc {
                if key == "_metadata" {
                    if let Some(perms) = value.get("class_permissions") {
                        class.permissions = serde_json::from_value(perms.clone())
                            .map_err(|e| SchemaError::malformed(class_name, e.to_string()))?;
                    }
                    continue;
                }
                if key.starts_with('_') {
                    continue;
                }
                let type_name = value.as_str().ok_or_else(|| {
                    SchemaError::malformed(class_name, format!("type of {} is not a string", key))
                })?;
                let field_type = type_name
                    .parse()
                    .map_err(|e: String| SchemaError::malformed(class_name, e))?;
                class.fields.insert(key.clone(), field_type);
            }
            classes.insert(class_name.to_string(), class);
        }
        Ok(Self { classes })
    }

    pub fn class(&self, class_name: &str) -> Option<&ClassSchema> {
        self.classes.get(class_name)
    }

    pub fn has_class(&self, class_name: &str) -> bool {
        self.classes.contains_key(class_name)
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Declared type of `key` on `class_name`
    pub fn expected_type(&self, class_name: &str, key: &str) -> Option<FieldType> {
        self.classes
            .get(class_name)
            .and_then(|c| c.fields.get(key))
            .cloned()
            .or_else(|| default_field_type(class_name, key))
    }

    /// Relation fields of `class_name`, built-in ones included, with their
    /// target class
    pub fn relation_fields(&self, class_name: &str) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = default_relation_fields(class_name)
            .iter()
            .map(|(name, target)| (name.to_string(), target.to_string()))
            .collect();
        if let Some(class) = self.classes.get(class_name) {
            for (name, target) in class.relation_fields() {
                if !fields.iter().any(|(known, _)| known == name) {
                    fields.push((name.to_string(), target.to_string()));
                }
            }
        }
        fields
    }

    /// Whether every key is known for the class. Built-in fields and
    /// `$`-operators always count as known.
    pub fn has_keys<'a>(&self, class_name: &str, keys: impl IntoIterator<Item = &'a str>) -> bool {
        let class = self.classes.get(class_name);
        keys.into_iter().all(|key| {
            key.starts_with('$')
                || is_default_field(class_name, key)
                || class.map_or(false, |c| c.fields.contains_key(key))
        })
    }

    /// Check class-level permissions for `action`.
    ///
    /// No permissions for the action means allowed; `"*"` allows everyone;
    /// otherwise at least one of the caller's groups must be granted.
    pub fn validate_permission(
        &self,
        class_name: &str,
        acl_group: &[String],
        action: Action,
    ) -> SchemaResult<()> {
        let Some(grants) = self
            .classes
            .get(class_name)
            .and_then(|c| c.permissions.get(action.as_str()))
        else {
            return Ok(());
        };

        let granted = |group: &str| grants.get(group).copied().unwrap_or(false);
        if granted("*") || acl_group.iter().any(|g| granted(g)) {
            return Ok(());
        }
        Err(SchemaError::permission_denied(class_name, action.as_str()))
    }
}

/// Key set of a query, descending into `$and`/`$or`/`$nor` branches
pub fn keys_for_query(query: &Document) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    collect_query_keys(query, &mut keys);
    keys
}

fn collect_query_keys(query: &Document, keys: &mut BTreeSet<String>) {
    for (key, value) in query {
        if matches!(key.as_str(), "$and" | "$or" | "$nor") {
            for sub in value.as_array().into_iter().flatten().filter_map(Value::as_object) {
                collect_query_keys(sub, keys);
            }
        } else if !key.starts_with('$') {
            keys.insert(key.clone());
        }
    }
}
