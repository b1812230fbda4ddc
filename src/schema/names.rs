//! Class and field naming rules, plus the built-in fields every class knows

use once_cell::sync::Lazy;
use regex::Regex;

use super::types::FieldType;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid regex"));

static JOIN_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^_Join:[A-Za-z0-9_]+:[A-Za-z0-9_]+$").expect("valid regex")
});

/// Classes owned by the platform rather than by applications
pub const SYSTEM_CLASSES: &[&str] = &["_User", "_Installation", "_Role", "_Session", "_Product"];

/// Fields every class has without declaring them
pub const DEFAULT_FIELDS: &[&str] = &["objectId", "createdAt", "updatedAt", "ACL"];

/// Whether `name` can be used as a class (collection) name
pub fn class_name_is_valid(name: &str) -> bool {
    SYSTEM_CLASSES.contains(&name) || JOIN_CLASS.is_match(name) || IDENTIFIER.is_match(name)
}

/// Whether `name` can be used as a field name
pub fn field_name_is_valid(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// Built-in type of `field` on `class_name`, if it is a built-in field
pub fn default_field_type(class_name: &str, field: &str) -> Option<FieldType> {
    let ty = match (class_name, field) {
        (_, "objectId") => FieldType::String,
        (_, "createdAt") | (_, "updatedAt") => FieldType::Date,
        (_, "ACL") => FieldType::Object,
        ("_User", "username") | ("_User", "password") | ("_User", "email") => FieldType::String,
        ("_User", "emailVerified") => FieldType::Boolean,
        ("_User", "authData") => FieldType::Object,
        ("_Session", "sessionToken") | ("_Session", "installationId") => FieldType::String,
        ("_Session", "user") => FieldType::Pointer("_User".to_string()),
        ("_Session", "expiresAt") => FieldType::Date,
        ("_Session", "restricted") => FieldType::Boolean,
        ("_Session", "createdWith") => FieldType::Object,
        ("_Role", "name") => FieldType::String,
        ("_Role", "users") => FieldType::Relation("_User".to_string()),
        ("_Role", "roles") => FieldType::Relation("_Role".to_string()),
        ("_Installation", "installationId")
        | ("_Installation", "deviceToken")
        | ("_Installation", "deviceType") => FieldType::String,
        ("_Installation", "channels") => FieldType::Array,
        _ => return None,
    };
    Some(ty)
}

/// Built-in relation fields of `class_name` with their target class
pub fn default_relation_fields(class_name: &str) -> &'static [(&'static str, &'static str)] {
    match class_name {
        "_Role" => &[("users", "_User"), ("roles", "_Role")],
        _ => &[],
    }
}

/// Whether `field` is built in for `class_name`
pub fn is_default_field(class_name: &str, field: &str) -> bool {
    default_field_type(class_name, field).is_some()
}

/// Columns that must be present when an object of `class_name` is created
pub fn required_columns(class_name: &str) -> &'static [&'static str] {
    match class_name {
        "_Role" => &["name", "ACL"],
        "_Product" => &["productIdentifier", "icon", "order", "title", "subtitle"],
        _ => &[],
    }
}
