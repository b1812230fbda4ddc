//! Store-native translation
//!
//! Public field names and typed values are rewritten into the store's
//! representation:
//!
//! | public | store |
//! |---|---|
//! | `objectId`, `createdAt`, `updatedAt` | `_id`, `_created_at`, `_updated_at` |
//! | `sessionToken` | `_session_token` |
//! | pointer field `owner` | `_p_owner` holding `"<Class>$<id>"` |
//! | `ACL` | `_rperm` / `_wperm` group arrays |
//! | `authData.<provider>` | `_auth_data_<provider>` |
//! | Date / GeoPoint / File | ISO-8601 string / `[lng, lat]` / file name |
//!
//! Values nested inside arrays and objects keep their tagged form.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

use super::errors::{QueryError, QueryResult};
use super::update::{Pointer, Update, UpdateOp};
use crate::schema::{field_name_is_valid, FieldType, Schema};
use crate::storage::{Document, SortKey};

/// Store keys written by trusted upstream code and passed through untouched
pub const INTERNAL_KEYS: &[&str] = &[
    "_rperm",
    "_wperm",
    "_hashed_password",
    "_email_verify_token",
    "_perishable_token",
];

const EARTH_RADIUS_KM: f64 = 6371.0;
const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Store name of a top-level public key
pub fn transform_key(schema: &Schema, class_name: &str, key: &str) -> String {
    match key {
        "objectId" => "_id".to_string(),
        "createdAt" => "_created_at".to_string(),
        "updatedAt" => "_updated_at".to_string(),
        "sessionToken" => "_session_token".to_string(),
        _ => match schema.expected_type(class_name, key) {
            Some(FieldType::Pointer(_)) => format!("_p_{}", key),
            _ => key.to_string(),
        },
    }
}

fn check_key(key: &str) -> QueryResult<()> {
    if key.split('.').all(field_name_is_valid) {
        Ok(())
    } else {
        Err(QueryError::InvalidKey(key.to_string()))
    }
}

/// Normalize a Date value (tagged or bare ISO string) to the stored form
fn encode_date(key: &str, value: &Value) -> QueryResult<String> {
    let iso = match value {
        Value::String(s) => s.as_str(),
        _ => value
            .get("iso")
            .and_then(Value::as_str)
            .ok_or_else(|| QueryError::invalid_value(key, "Date needs an iso string"))?,
    };
    let parsed = DateTime::parse_from_rfc3339(iso)
        .map_err(|e| QueryError::invalid_value(key, format!("invalid date {:?}: {}", iso, e)))?;
    Ok(parsed
        .with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn encode_geopoint(key: &str, value: &Value) -> QueryResult<Value> {
    let lat = value.get("latitude").and_then(Value::as_f64);
    let lng = value.get("longitude").and_then(Value::as_f64);
    match (lat, lng) {
        (Some(lat), Some(lng)) => Ok(json!([lng, lat])),
        _ => Err(QueryError::invalid_value(key, "GeoPoint needs latitude and longitude")),
    }
}

/// Encode a top-level field value
fn transform_atom(key: &str, value: &Value) -> QueryResult<Value> {
    match value {
        Value::Object(obj) => match obj.get("__type").and_then(Value::as_str) {
            Some("Pointer") => Pointer::from_value(value)
                .map(|p| Value::String(p.encode()))
                .ok_or_else(|| QueryError::invalid_value(key, "malformed Pointer")),
            Some("Date") => Ok(Value::String(encode_date(key, value)?)),
            Some("GeoPoint") => encode_geopoint(key, value),
            Some("File") => obj
                .get("name")
                .cloned()
                .ok_or_else(|| QueryError::invalid_value(key, "File needs a name")),
            Some(other) => Err(QueryError::invalid_value(
                key,
                format!("cannot store __type {:?}", other),
            )),
            None => transform_interior(key, value),
        },
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| transform_interior(key, item))
                .collect::<QueryResult<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

/// Encode a value nested inside an array or object. Tagged values stay
/// tagged; nested keys may not look like operators or paths.
fn transform_interior(key: &str, value: &Value) -> QueryResult<Value> {
    match value {
        Value::Object(obj) => {
            if let Some(pointer) = Pointer::from_value(value) {
                return serde_json::to_value(pointer)
                    .map_err(|e| QueryError::invalid_value(key, e.to_string()));
            }
            if obj.contains_key("__type") {
                return Ok(value.clone());
            }
            let mut out = Map::new();
            for (k, v) in obj {
                if k.starts_with('$') || k.contains('.') {
                    return Err(QueryError::invalid_value(
                        key,
                        format!("nested key {:?} cannot start with $ or contain a dot", k),
                    ));
                }
                out.insert(k.clone(), transform_interior(key, v)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|item| transform_interior(key, item))
                .collect::<QueryResult<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}

fn atom_list(key: &str, op: &str, value: &Value) -> QueryResult<Value> {
    let items = value
        .as_array()
        .ok_or_else(|| QueryError::invalid_value(key, format!("{} needs an array", op)))?;
    Ok(Value::Array(
        items
            .iter()
            .map(|item| transform_atom(key, item))
            .collect::<QueryResult<_>>()?,
    ))
}

fn number(key: &str, op: &str, value: &Value) -> QueryResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| QueryError::invalid_value(key, format!("{} needs a number", op)))
}

/// Translate one field constraint. Operator objects are translated operator
/// by operator; anything else is an equality on the encoded atom.
fn transform_constraint(key: &str, constraint: &Value) -> QueryResult<Value> {
    let Some(ops) = constraint
        .as_object()
        .filter(|obj| obj.keys().any(|k| k.starts_with('$')))
    else {
        return transform_atom(key, constraint);
    };

    let mut out = Map::new();
    for (op, value) in ops {
        match op.as_str() {
            "$lt" | "$lte" | "$gt" | "$gte" | "$ne" | "$eq" => {
                out.insert(op.clone(), transform_atom(key, value)?);
            }
            "$in" | "$nin" | "$all" => {
                out.insert(op.clone(), atom_list(key, op, value)?);
            }
            "$exists" => {
                let flag = value
                    .as_bool()
                    .ok_or_else(|| QueryError::invalid_value(key, "$exists needs a boolean"))?;
                out.insert(op.clone(), Value::Bool(flag));
            }
            "$regex" | "$options" => {
                if !value.is_string() {
                    return Err(QueryError::invalid_value(key, format!("{} needs a string", op)));
                }
                out.insert(op.clone(), value.clone());
            }
            "$nearSphere" => {
                out.insert(op.clone(), encode_geopoint(key, value)?);
            }
            "$maxDistance" | "$maxDistanceInRadians" => {
                out.insert("$maxDistance".to_string(), json!(number(key, op, value)?));
            }
            "$maxDistanceInKilometers" => {
                let km = number(key, op, value)?;
                out.insert("$maxDistance".to_string(), json!(km / EARTH_RADIUS_KM));
            }
            "$maxDistanceInMiles" => {
                let miles = number(key, op, value)?;
                out.insert("$maxDistance".to_string(), json!(miles / EARTH_RADIUS_MILES));
            }
            "$within" => {
                let corners = value
                    .get("$box")
                    .and_then(Value::as_array)
                    .filter(|corners| corners.len() == 2)
                    .ok_or_else(|| QueryError::invalid_value(key, "$within needs a $box of two GeoPoints"))?;
                let corners = corners
                    .iter()
                    .map(|c| encode_geopoint(key, c))
                    .collect::<QueryResult<Vec<_>>>()?;
                out.insert(op.clone(), json!({ "$box": corners }));
            }
            other => return Err(QueryError::UnsupportedOperator(other.to_string())),
        }
    }
    Ok(Value::Object(out))
}

fn constrains_pointer(value: &Value) -> bool {
    if Pointer::from_value(value).is_some() {
        return true;
    }
    ["$in", "$nin", "$ne", "$eq"].iter().any(|op| match value.get(*op) {
        Some(Value::Array(items)) => items.first().map_or(false, |v| Pointer::from_value(v).is_some()),
        Some(v) => Pointer::from_value(v).is_some(),
        None => false,
    })
}

/// Translate a query into the store language, descending into `$and`/`$or`/`$nor`
pub fn transform_where(schema: &Schema, class_name: &str, query: &Document) -> QueryResult<Document> {
    let mut out = Document::new();
    for (key, value) in query {
        match key.as_str() {
            "$or" | "$and" | "$nor" => {
                let branches = value
                    .as_array()
                    .ok_or_else(|| QueryError::invalid_value(key.as_str(), "expected an array of queries"))?;
                let translated = branches
                    .iter()
                    .map(|branch| {
                        let branch = branch.as_object().ok_or_else(|| {
                            QueryError::invalid_value(key.as_str(), "expected an array of queries")
                        })?;
                        transform_where(schema, class_name, branch).map(Value::Object)
                    })
                    .collect::<QueryResult<_>>()?;
                out.insert(key.clone(), Value::Array(translated));
            }
            "$relatedTo" => return Err(QueryError::UnresolvedRelatedTo),
            "ACL" => return Err(QueryError::InvalidKey("cannot query on ACL".to_string())),
            k if k.starts_with('$') => return Err(QueryError::UnsupportedOperator(k.to_string())),
            k if INTERNAL_KEYS.contains(&k) => {
                out.insert(key.clone(), value.clone());
            }
            k => {
                if let Some(rest) = k.strip_prefix("authData.") {
                    let (provider, path) = rest.split_once('.').unwrap_or((rest, ""));
                    check_key(provider)?;
                    let store_key = if path.is_empty() {
                        format!("_auth_data_{}", provider)
                    } else {
                        format!("_auth_data_{}.{}", provider, path)
                    };
                    out.insert(store_key, value.clone());
                    continue;
                }
                check_key(k)?;
                let mut store_key = transform_key(schema, class_name, k);
                if store_key == k && !k.contains('.') && constrains_pointer(value) {
                    store_key = format!("_p_{}", k);
                }
                let store_value = match k {
                    "createdAt" | "updatedAt" => transform_date_constraint(k, value)?,
                    _ => transform_constraint(k, value)?,
                };
                out.insert(store_key, store_value);
            }
        }
    }
    Ok(out)
}

/// `createdAt`/`updatedAt` accept bare ISO strings as well as Date values
fn transform_date_constraint(key: &str, value: &Value) -> QueryResult<Value> {
    if let Value::String(_) = value {
        return Ok(Value::String(encode_date(key, value)?));
    }
    let mut translated = transform_constraint(key, value)?;
    if let Some(ops) = translated.as_object_mut() {
        for (op, operand) in ops.iter_mut() {
            if matches!(op.as_str(), "$lt" | "$lte" | "$gt" | "$gte" | "$ne" | "$eq") && operand.is_string() {
                *operand = Value::String(encode_date(key, operand)?);
            }
        }
    }
    Ok(translated)
}

/// Translate sort keys to store field names
pub fn transform_sort(schema: &Schema, class_name: &str, sort: &[SortKey]) -> QueryResult<Vec<SortKey>> {
    sort.iter()
        .map(|key| {
            check_key(&key.field)?;
            Ok(SortKey {
                field: transform_key(schema, class_name, &key.field),
                ascending: key.ascending,
            })
        })
        .collect()
}

/// Split an ACL map into read and write group arrays
fn transform_acl(value: &Value) -> QueryResult<(Vec<Value>, Vec<Value>)> {
    let entries = value
        .as_object()
        .ok_or_else(|| QueryError::invalid_value("ACL", "ACL must be an object"))?;
    let mut read = Vec::new();
    let mut write = Vec::new();
    for (entity, perms) in entries {
        if perms.get("read").and_then(Value::as_bool) == Some(true) {
            read.push(Value::String(entity.clone()));
        }
        if perms.get("write").and_then(Value::as_bool) == Some(true) {
            write.push(Value::String(entity.clone()));
        }
    }
    Ok((read, write))
}

fn auth_data_entries(value: &Value) -> QueryResult<impl Iterator<Item = (String, &Value)> + '_> {
    let providers = value
        .as_object()
        .ok_or_else(|| QueryError::invalid_value("authData", "authData must be an object"))?;
    for provider in providers.keys() {
        check_key(provider)?;
    }
    Ok(providers
        .iter()
        .map(|(provider, data)| (format!("_auth_data_{}", provider), data)))
}

/// Translate a create payload into the document to insert. Relation
/// operators must have been extracted already.
pub fn transform_create(schema: &Schema, class_name: &str, object: &Update) -> QueryResult<Document> {
    let mut out = Document::new();
    for (key, op) in object {
        if INTERNAL_KEYS.contains(&key.as_str()) {
            if let UpdateOp::Set(value) = op {
                out.insert(key.clone(), value.clone());
            }
            continue;
        }
        match (key.as_str(), op) {
            (_, UpdateOp::Delete) => continue,
            (_, op) if op.is_relation() => return Err(QueryError::RelationOperation(key.clone())),
            (_, UpdateOp::Batch(_)) => return Err(QueryError::RelationOperation(key.clone())),
            ("ACL", UpdateOp::Set(value)) => {
                let (read, write) = transform_acl(value)?;
                out.insert("_rperm".to_string(), Value::Array(read));
                out.insert("_wperm".to_string(), Value::Array(write));
            }
            ("authData", UpdateOp::Set(value)) => {
                for (store_key, data) in auth_data_entries(value)? {
                    if !data.is_null() {
                        out.insert(store_key, data.clone());
                    }
                }
            }
            (_, op) => {
                check_key(key)?;
                if matches!(schema.expected_type(class_name, key), Some(FieldType::Relation(_))) {
                    continue;
                }
                let value = match op {
                    UpdateOp::Set(Value::Object(obj))
                        if obj.get("__type").and_then(Value::as_str) == Some("Relation") =>
                    {
                        continue
                    }
                    UpdateOp::Set(value) => match key.as_str() {
                        "createdAt" | "updatedAt" => Value::String(encode_date(key, value)?),
                        _ => transform_atom(key, value)?,
                    },
                    UpdateOp::Increment(amount) => Value::Number(amount.clone()),
                    UpdateOp::Add(objects) | UpdateOp::AddUnique(objects) => {
                        transform_atom(key, &Value::Array(objects.clone()))?
                    }
                    UpdateOp::Remove(_) => Value::Array(Vec::new()),
                    _ => continue,
                };
                let mut store_key = transform_key(schema, class_name, key);
                if store_key == *key && value.is_string() && matches!(op, UpdateOp::Set(v) if Pointer::from_value(v).is_some()) {
                    store_key = format!("_p_{}", key);
                }
                out.insert(store_key, value);
            }
        }
    }
    Ok(out)
}

/// Store update under construction, operator -> fields
#[derive(Default)]
struct UpdateSections(BTreeMap<&'static str, Map<String, Value>>);

impl UpdateSections {
    fn get(&mut self, op: &'static str) -> &mut Map<String, Value> {
        self.0.entry(op).or_default()
    }

    fn into_document(self) -> Document {
        self.0
            .into_iter()
            .map(|(op, fields)| (op.to_string(), Value::Object(fields)))
            .collect()
    }
}

/// Translate an update payload into a store update document. `objectId` is
/// never written. Relation operators must have been extracted already.
pub fn transform_update(schema: &Schema, class_name: &str, update: &Update) -> QueryResult<Document> {
    let mut out = UpdateSections::default();
    for (key, op) in update {
        if key == "objectId" {
            continue;
        }
        if INTERNAL_KEYS.contains(&key.as_str()) {
            match op {
                UpdateOp::Set(value) => {
                    out.get("$set").insert(key.clone(), value.clone());
                }
                UpdateOp::Delete => {
                    out.get("$unset").insert(key.clone(), json!(""));
                }
                _ => return Err(QueryError::invalid_value(key.as_str(), "internal keys only take plain values")),
            }
            continue;
        }
        if op.is_relation() || matches!(op, UpdateOp::Batch(_)) {
            return Err(QueryError::RelationOperation(key.clone()));
        }

        match (key.as_str(), op) {
            ("ACL", UpdateOp::Set(value)) => {
                let (read, write) = transform_acl(value)?;
                let set = out.get("$set");
                set.insert("_rperm".to_string(), Value::Array(read));
                set.insert("_wperm".to_string(), Value::Array(write));
                continue;
            }
            ("ACL", UpdateOp::Delete) => {
                let unset = out.get("$unset");
                unset.insert("_rperm".to_string(), json!(""));
                unset.insert("_wperm".to_string(), json!(""));
                continue;
            }
            ("authData", UpdateOp::Set(value)) => {
                for (store_key, data) in auth_data_entries(value)? {
                    if data.is_null() {
                        out.get("$unset").insert(store_key, json!(""));
                    } else {
                        out.get("$set").insert(store_key, data.clone());
                    }
                }
                continue;
            }
            _ => {}
        }

        check_key(key)?;
        let mut store_key = transform_key(schema, class_name, key);
        match op {
            UpdateOp::Set(value) => {
                if store_key == *key && Pointer::from_value(value).is_some() {
                    store_key = format!("_p_{}", key);
                }
                let encoded = match key.as_str() {
                    "createdAt" | "updatedAt" => Value::String(encode_date(key, value)?),
                    _ => transform_atom(key, value)?,
                };
                out.get("$set").insert(store_key, encoded);
            }
            UpdateOp::Delete => {
                out.get("$unset").insert(store_key, json!(""));
            }
            UpdateOp::Increment(amount) => {
                out.get("$inc").insert(store_key, Value::Number(amount.clone()));
            }
            UpdateOp::Add(objects) => {
                let each = transform_atom(key, &Value::Array(objects.clone()))?;
                out.get("$push").insert(store_key, json!({ "$each": each }));
            }
            UpdateOp::AddUnique(objects) => {
                let each = transform_atom(key, &Value::Array(objects.clone()))?;
                out.get("$addToSet").insert(store_key, json!({ "$each": each }));
            }
            UpdateOp::Remove(objects) => {
                let items = transform_atom(key, &Value::Array(objects.clone()))?;
                out.get("$pullAll").insert(store_key, items);
            }
            UpdateOp::AddRelation(_) | UpdateOp::RemoveRelation(_) | UpdateOp::Batch(_) => {
                return Err(QueryError::RelationOperation(key.clone()))
            }
        }
    }
    Ok(out.into_document())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::update::parse_update;
    use crate::schema::ClassSchema;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn schema() -> Schema {
        Schema::new().with_class(
            "Post",
            ClassSchema::default()
                .with_field("title", FieldType::String)
                .with_field("owner", FieldType::Pointer("_User".into()))
                .with_field("location", FieldType::GeoPoint)
                .with_field("publishedAt", FieldType::Date)
                .with_field("likes", FieldType::Relation("_User".into())),
        )
    }

    #[test]
    fn test_transform_key() {
        let schema = schema();
        assert_eq!(transform_key(&schema, "Post", "objectId"), "_id");
        assert_eq!(transform_key(&schema, "Post", "updatedAt"), "_updated_at");
        assert_eq!(transform_key(&schema, "Post", "owner"), "_p_owner");
        assert_eq!(transform_key(&schema, "Post", "title"), "title");
        assert_eq!(transform_key(&schema, "_Session", "user"), "_p_user");
    }

    #[test]
    fn test_where_translation() {
        let query = doc(json!({
            "objectId": {"$in": ["p1", "p2"]},
            "owner": {"__type": "Pointer", "className": "_User", "objectId": "u1"},
            "$or": [{"title": "A"}, {"createdAt": {"$gt": {"__type": "Date", "iso": "2024-01-02T03:04:05Z"}}}]
        }));
        let out = transform_where(&schema(), "Post", &query).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({
                "_id": {"$in": ["p1", "p2"]},
                "_p_owner": "_User$u1",
                "$or": [{"title": "A"}, {"_created_at": {"$gt": "2024-01-02T03:04:05.000Z"}}]
            })
        );
    }

    #[test]
    fn test_where_geo_operators() {
        let query = doc(json!({
            "location": {
                "$nearSphere": {"__type": "GeoPoint", "latitude": 10.0, "longitude": 20.0},
                "$maxDistanceInKilometers": 6371.0
            }
        }));
        let out = transform_where(&schema(), "Post", &query).unwrap();
        assert_eq!(out["location"], json!({"$nearSphere": [20.0, 10.0], "$maxDistance": 1.0}));
    }

    #[test]
    fn test_where_rejects_unresolved_and_unknown() {
        let schema = schema();
        let related = doc(json!({"$relatedTo": {"object": {}, "key": "likes"}}));
        assert_eq!(
            transform_where(&schema, "Post", &related),
            Err(QueryError::UnresolvedRelatedTo)
        );
        let unknown = doc(json!({"title": {"$select": {}}}));
        assert_eq!(
            transform_where(&schema, "Post", &unknown),
            Err(QueryError::UnsupportedOperator("$select".into()))
        );
        let bad_key = doc(json!({"bad-key": 1}));
        assert!(matches!(
            transform_where(&schema, "Post", &bad_key),
            Err(QueryError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_create_translation() {
        let object = parse_update(&doc(json!({
            "objectId": "p1",
            "title": "A",
            "owner": {"__type": "Pointer", "className": "_User", "objectId": "u1"},
            "location": {"__type": "GeoPoint", "latitude": 1.5, "longitude": 2.5},
            "publishedAt": {"__type": "Date", "iso": "2024-01-02T03:04:05.678Z"},
            "tags": [{"__type": "Pointer", "className": "Tag", "objectId": "t1"}],
            "ACL": {"*": {"read": true}, "u1": {"read": true, "write": true}},
            "authData": {"github": {"id": "42"}},
            "_hashed_password": "hash"
        })))
        .unwrap();
        let out = transform_create(&schema(), "Post", &object).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({
                "_id": "p1",
                "title": "A",
                "_p_owner": "_User$u1",
                "location": [2.5, 1.5],
                "publishedAt": "2024-01-02T03:04:05.678Z",
                "tags": [{"__type": "Pointer", "className": "Tag", "objectId": "t1"}],
                "_rperm": ["*", "u1"],
                "_wperm": ["u1"],
                "_auth_data_github": {"id": "42"},
                "_hashed_password": "hash"
            })
        );
    }

    #[test]
    fn test_update_translation() {
        let update = parse_update(&doc(json!({
            "objectId": "p1",
            "title": "B",
            "body": {"__op": "Delete"},
            "views": {"__op": "Increment", "amount": 1},
            "tags": {"__op": "Add", "objects": ["x"]},
            "labels": {"__op": "AddUnique", "objects": ["y"]},
            "flags": {"__op": "Remove", "objects": ["z"]}
        })))
        .unwrap();
        let out = transform_update(&schema(), "Post", &update).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({
                "$set": {"title": "B"},
                "$unset": {"body": ""},
                "$inc": {"views": 1},
                "$push": {"tags": {"$each": ["x"]}},
                "$addToSet": {"labels": {"$each": ["y"]}},
                "$pullAll": {"flags": ["z"]}
            })
        );
    }

    #[test]
    fn test_relation_operation_rejected() {
        let update = parse_update(&doc(json!({
            "likes": {"__op": "AddRelation", "objects": [{"__type": "Pointer", "className": "_User", "objectId": "u1"}]}
        })))
        .unwrap();
        assert_eq!(
            transform_update(&schema(), "Post", &update),
            Err(QueryError::RelationOperation("likes".into()))
        );
    }

    #[test]
    fn test_sort_translation() {
        let sorted = transform_sort(&schema(), "Post", &[SortKey::desc("createdAt"), SortKey::asc("title")]).unwrap();
        assert_eq!(sorted, vec![SortKey::desc("_created_at"), SortKey::asc("title")]);
    }
}
