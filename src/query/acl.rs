//! Row-level access control predicates
//!
//! Objects carry `_rperm` (readers) and `_wperm` (writers) group arrays. A
//! missing array means unrestricted; `"*"` means everyone.

use serde_json::{json, Value};

use crate::storage::Document;

fn permission_clause(field: &str, acl_group: &[String]) -> Document {
    let mut groups = vec![Value::String("*".to_string())];
    groups.extend(
        acl_group
            .iter()
            .filter(|g| g.as_str() != "*")
            .map(|g| Value::String(g.clone())),
    );
    let clause = json!({
        "$or": [
            { field: { "$exists": false } },
            { field: { "$in": groups } }
        ]
    });
    match clause {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

/// Objects `acl_group` may read: `_rperm` absent, public, or shared with
/// one of the groups
pub fn read_permission_clause(acl_group: &[String]) -> Document {
    permission_clause("_rperm", acl_group)
}

/// Objects `acl_group` may modify
pub fn write_permission_clause(acl_group: &[String]) -> Document {
    permission_clause("_wperm", acl_group)
}

/// `query AND clause`, leaving an empty query as just the clause
pub fn conjoin(query: Document, clause: Document) -> Document {
    if query.is_empty() {
        return clause;
    }
    let mut out = Document::new();
    out.insert(
        "$and".to_string(),
        Value::Array(vec![Value::Object(query), Value::Object(clause)]),
    );
    out
}
