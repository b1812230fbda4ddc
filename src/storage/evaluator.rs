//! Store-native query and update evaluation for the in-memory adapter
//!
//! Implements the subset of the document-store language the access layer
//! emits: field equality with array-contains semantics, comparison and set
//! operators, `$or`/`$and`/`$nor`, regular expressions, and `$nearSphere` /
//! `$within` geo predicates over `[longitude, latitude]` pairs.
//! Updates support `$set`, `$unset`, `$inc`, `$push`, `$addToSet` and
//! `$pullAll`, or whole-document replacement.

use std::cmp::Ordering;

use regex::RegexBuilder;
use serde_json::{Number, Value};

use super::adapter::{Document, SortKey};
use super::errors::{AdapterError, StorageResult};

/// Store code for malformed queries and updates
const BAD_VALUE: i32 = 2;

fn bad_value(message: impl Into<String>) -> AdapterError {
    AdapterError::new(BAD_VALUE, message)
}

/// Resolve a dotted path inside a document
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn operator_doc(value: &Value) -> Option<&Document> {
    value
        .as_object()
        .filter(|obj| !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')))
}

fn sub_queries<'a>(op: &str, value: &'a Value) -> StorageResult<Vec<&'a Document>> {
    let items = value
        .as_array()
        .ok_or_else(|| bad_value(format!("{} must be an array", op)))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| bad_value(format!("{} entries must be objects", op)))
        })
        .collect()
}

/// Whether `doc` satisfies `query`
pub fn matches(doc: &Document, query: &Document) -> StorageResult<bool> {
    for (key, condition) in query {
        let ok = match key.as_str() {
            "$or" => {
                let mut any = false;
                for sub in sub_queries(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$and" => {
                let mut all = true;
                for sub in sub_queries(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$nor" => {
                let mut none = true;
                for sub in sub_queries(key, condition)? {
                    if matches(doc, sub)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(bad_value(format!("unknown top level operator: {}", op)))
            }
            _ => matches_field(lookup(doc, key), condition)?,
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_field(actual: Option<&Value>, condition: &Value) -> StorageResult<bool> {
    let Some(ops) = operator_doc(condition) else {
        return Ok(equals(actual, condition));
    };

    for (op, operand) in ops {
        let ok = match op.as_str() {
            "$eq" => equals(actual, operand),
            "$ne" => !equals(actual, operand),
            "$in" => in_list(actual, operand)?,
            "$nin" => !in_list(actual, operand)?,
            "$lt" => compare_any(actual, operand, |o| o == Ordering::Less),
            "$lte" => compare_any(actual, operand, |o| o != Ordering::Greater),
            "$gt" => compare_any(actual, operand, |o| o == Ordering::Greater),
            "$gte" => compare_any(actual, operand, |o| o != Ordering::Less),
            "$exists" => operand.as_bool().unwrap_or(true) == actual.is_some(),
            "$all" => all_of(actual, operand)?,
            "$regex" => regex_match(actual, operand, ops.get("$options"))?,
            "$nearSphere" | "$near" => near(actual, operand, ops.get("$maxDistance"))?,
            "$within" | "$geoWithin" => within(actual, operand)?,
            "$options" | "$maxDistance" => true,
            other => return Err(bad_value(format!("unknown operator: {}", other))),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => {
            items.iter().any(|item| values_equal(item, expected))
        }
        Some(value) => values_equal(value, expected),
    }
}

fn in_list(actual: Option<&Value>, operand: &Value) -> StorageResult<bool> {
    let candidates = operand
        .as_array()
        .ok_or_else(|| bad_value("$in/$nin needs an array"))?;
    Ok(candidates.iter().any(|c| equals(actual, c)))
}

fn comparable(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn compare_any(actual: Option<&Value>, operand: &Value, pred: impl Fn(Ordering) -> bool) -> bool {
    match actual {
        None => false,
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| comparable(item, operand).map_or(false, &pred)),
        Some(value) => comparable(value, operand).map_or(false, pred),
    }
}

fn all_of(actual: Option<&Value>, operand: &Value) -> StorageResult<bool> {
    let wanted = operand
        .as_array()
        .ok_or_else(|| bad_value("$all needs an array"))?;
    let Some(Value::Array(items)) = actual else {
        return Ok(false);
    };
    Ok(wanted
        .iter()
        .all(|w| items.iter().any(|item| values_equal(item, w))))
}

fn regex_match(actual: Option<&Value>, pattern: &Value, options: Option<&Value>) -> StorageResult<bool> {
    let pattern = pattern
        .as_str()
        .ok_or_else(|| bad_value("$regex has to be a string"))?;
    let flags = options.and_then(Value::as_str).unwrap_or("");

    let regex = RegexBuilder::new(pattern)
        .case_insensitive(flags.contains('i'))
        .multi_line(flags.contains('m'))
        .dot_matches_new_line(flags.contains('s'))
        .ignore_whitespace(flags.contains('x'))
        .build()
        .map_err(|e| bad_value(format!("invalid regular expression: {}", e)))?;

    Ok(match actual {
        Some(Value::String(s)) => regex.is_match(s),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .any(|s| regex.is_match(s)),
        _ => false,
    })
}

/// Read a `[longitude, latitude]` pair
fn point(value: &Value) -> Option<(f64, f64)> {
    match value.as_array()?.as_slice() {
        [lng, lat] => Some((lng.as_f64()?, lat.as_f64()?)),
        _ => None,
    }
}

/// Great-circle distance between two points, in radians
pub fn spherical_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lng1, lat1) = (a.0.to_radians(), a.1.to_radians());
    let (lng2, lat2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlng = lng2 - lng1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

fn near(actual: Option<&Value>, operand: &Value, max_distance: Option<&Value>) -> StorageResult<bool> {
    let target = point(operand).ok_or_else(|| bad_value("$nearSphere needs a [lng, lat] pair"))?;
    let Some(here) = actual.and_then(point) else {
        return Ok(false);
    };
    let limit = max_distance.and_then(Value::as_f64).unwrap_or(f64::INFINITY);
    Ok(spherical_distance(here, target) <= limit)
}

fn within(actual: Option<&Value>, operand: &Value) -> StorageResult<bool> {
    let corners = operand
        .get("$box")
        .and_then(Value::as_array)
        .filter(|c| c.len() == 2)
        .ok_or_else(|| bad_value("$within needs a $box of two points"))?;
    let (a, b) = match (point(&corners[0]), point(&corners[1])) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(bad_value("$box corners must be [lng, lat] pairs")),
    };
    let Some((lng, lat)) = actual.and_then(point) else {
        return Ok(false);
    };
    Ok(lng >= a.0.min(b.0) && lng <= a.0.max(b.0) && lat >= a.1.min(b.1) && lat <= a.1.max(b.1))
}

/// Fields targeted by a `$nearSphere`/`$near` anywhere in the query
pub fn geo_fields(query: &Document) -> Vec<String> {
    let mut fields = Vec::new();
    collect_geo_fields(query, &mut fields);
    fields
}

fn collect_geo_fields(query: &Document, out: &mut Vec<String>) {
    for (key, value) in query {
        if matches!(key.as_str(), "$or" | "$and" | "$nor") {
            for sub in value.as_array().into_iter().flatten().filter_map(Value::as_object) {
                collect_geo_fields(sub, out);
            }
        } else if let Some(ops) = operator_doc(value) {
            if ops.contains_key("$nearSphere") || ops.contains_key("$near") {
                out.push(key.clone());
            }
        }
    }
}

/// Top-level `$nearSphere` target, used to order results by distance
pub fn near_target(query: &Document) -> Option<(String, (f64, f64))> {
    query.iter().find_map(|(key, value)| {
        let ops = operator_doc(value)?;
        let target = ops.get("$nearSphere").or_else(|| ops.get("$near"))?;
        Some((key.clone(), point(target)?))
    })
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used for sorting
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(x), Some(y)) => comparable(x, y).unwrap_or_else(|| x.to_string().cmp(&y.to_string())),
        _ => Ordering::Equal,
    }
}

pub fn sort_documents(docs: &mut [Document], keys: &[SortKey]) {
    docs.sort_by(|a, b| {
        for key in keys {
            let ord = compare_values(lookup(a, &key.field), lookup(b, &key.field));
            let ord = if key.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Equality fields of a filter, used to seed an upserted document
pub fn seed_from_filter(filter: &Document) -> Document {
    filter
        .iter()
        .filter(|(k, v)| !k.starts_with('$') && operator_doc(v).is_none())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Apply a store-native update to a document in place
pub fn apply_update(doc: &mut Document, update: &Document) -> StorageResult<()> {
    if !update.keys().any(|k| k.starts_with('$')) {
        let id = doc.get("_id").cloned();
        *doc = update.clone();
        if let Some(id) = id {
            doc.insert("_id".to_string(), id);
        }
        return Ok(());
    }

    for (op, fields) in update {
        let fields = fields
            .as_object()
            .ok_or_else(|| bad_value(format!("{} needs an object of fields", op)))?;
        for (path, operand) in fields {
            if path == "_id" {
                return Err(bad_value("the _id field cannot be modified"));
            }
            match op.as_str() {
                "$set" => *entry_mut(doc, path)? = operand.clone(),
                "$unset" => unset_path(doc, path),
                "$inc" => {
                    let slot = entry_mut(doc, path)?;
                    *slot = add_numbers(slot, operand)?;
                }
                "$push" => {
                    let items = each_items(operand);
                    array_mut(doc, path, op)?.extend(items);
                }
                "$addToSet" => {
                    let items = each_items(operand);
                    let target = array_mut(doc, path, op)?;
                    for item in items {
                        if !target.iter().any(|existing| values_equal(existing, &item)) {
                            target.push(item);
                        }
                    }
                }
                "$pullAll" => {
                    let items = operand
                        .as_array()
                        .ok_or_else(|| bad_value("$pullAll needs an array"))?
                        .clone();
                    array_mut(doc, path, op)?
                        .retain(|existing| !items.iter().any(|i| values_equal(existing, i)));
                }
                other => return Err(bad_value(format!("unknown update operator: {}", other))),
            }
        }
    }
    Ok(())
}

fn each_items(operand: &Value) -> Vec<Value> {
    match operand.get("$each").and_then(Value::as_array) {
        Some(items) => items.clone(),
        None => vec![operand.clone()],
    }
}

/// Mutable slot at `path`, creating intermediate objects and a null leaf
fn entry_mut<'a>(doc: &'a mut Document, path: &str) -> StorageResult<&'a mut Value> {
    let mut parts = path.split('.');
    let first = parts.next().unwrap_or(path);
    let mut current = doc.entry(first.to_string()).or_insert(Value::Null);
    for part in parts {
        if current.is_null() {
            *current = Value::Object(Document::new());
        }
        current = current
            .as_object_mut()
            .ok_or_else(|| bad_value(format!("cannot create field {} in a non-object", path)))?
            .entry(part.to_string())
            .or_insert(Value::Null);
    }
    Ok(current)
}

fn array_mut<'a>(doc: &'a mut Document, path: &str, op: &str) -> StorageResult<&'a mut Vec<Value>> {
    let slot = entry_mut(doc, path)?;
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut()
        .ok_or_else(|| bad_value(format!("cannot apply {} to non-array field {}", op, path)))
}

fn unset_path(doc: &mut Document, path: &str) {
    match path.rsplit_once('.') {
        None => {
            doc.remove(path);
        }
        Some((parent, leaf)) => {
            let mut current = Some(&mut *doc);
            for part in parent.split('.') {
                current = current
                    .and_then(|obj| obj.get_mut(part))
                    .and_then(Value::as_object_mut);
            }
            if let Some(obj) = current {
                obj.remove(leaf);
            }
        }
    }
}

fn add_numbers(current: &Value, amount: &Value) -> StorageResult<Value> {
    let Value::Number(delta) = amount else {
        return Err(bad_value("$inc needs a numeric amount"));
    };
    let base = match current {
        Value::Null => return Ok(amount.clone()),
        Value::Number(n) => n,
        _ => return Err(bad_value("cannot apply $inc to a non-numeric field")),
    };
    if let (Some(a), Some(b)) = (base.as_i64(), delta.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Ok(Value::Number(sum.into()));
        }
    }
    let sum = base.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
    Number::from_f64(sum)
        .map(Value::Number)
        .ok_or_else(|| bad_value("$inc produced a non-finite number"))
}
