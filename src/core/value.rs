//! Records are schemaless; rather than mirror them into typed Rust structs we
//! carry them as a generic tagged-sum tree. `serde_json::Value` already is
//! that tree (Null/Bool/Number/String/Array/Object) and ships pointer-style
//! lookups, so we reuse it instead of hand-rolling a parallel enum.

/// A record body, or any value projected out of one by a field/sorter source.
pub type Value = serde_json::Value;

/// A record identifier. Stable, caller-chosen, opaque to the store.
pub type RecordId = String;

/// Resolve a field/sorter `source` path against a record.
///
/// Sources are `/`-delimited paths into the record, e.g. `/Status` or
/// `/Comments/Comment/length`. Ordinary segments are object keys or (if
/// numeric) array indices, exactly like RFC 6901 JSON Pointer. As an
/// extension, a trailing `length` segment whose parent resolves to an array
/// yields that array's length as a number, so a field can project "how many
/// comments does this record have" without the IndexEngine understanding
/// arrays at all.
pub fn resolve_source(record: &Value, source: &str) -> Option<Value> {
    let source = source.strip_prefix('/').unwrap_or(source);
    if source.is_empty() {
        return Some(record.clone());
    }

    let pointer = format!("/{source}");
    if let Some(v) = record.pointer(&pointer) {
        return Some(v.clone());
    }

    // Fall back to the `length` extension: drop the last segment and check
    // whether the parent is an array.
    let (prefix, last) = source.rsplit_once('/').unwrap_or(("", source));
    if last == "length" {
        let parent = if prefix.is_empty() {
            Some(record)
        } else {
            record.pointer(&format!("/{prefix}"))
        };
        if let Some(Value::Array(items)) = parent {
            return Some(Value::Number(items.len().into()));
        }
    }

    None
}

/// Render a resolved value as the canonical string used for tokenisation,
/// tag-list membership, and summary bucketing.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(to_text).collect::<Vec<_>>().join(", "),
        Value::Object(_) => value.to_string(),
    }
}

/// Render a resolved value as an `f64`, for numeric fields/sorters.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_plain_field() {
        let record = json!({"Status": "Open"});
        assert_eq!(resolve_source(&record, "/Status"), Some(json!("Open")));
    }

    #[test]
    fn resolves_nested_field() {
        let record = json!({"Meta": {"Createdate": "2020-01-01"}});
        assert_eq!(
            resolve_source(&record, "/Meta/Createdate"),
            Some(json!("2020-01-01"))
        );
    }

    #[test]
    fn resolves_array_length_extension() {
        let record = json!({"Comments": {"Comment": [{"text": "a"}, {"text": "b"}]}});
        assert_eq!(
            resolve_source(&record, "/Comments/Comment/length"),
            Some(json!(2))
        );
    }

    #[test]
    fn missing_path_is_none() {
        let record = json!({"Status": "Open"});
        assert_eq!(resolve_source(&record, "/Nope"), None);
    }

    #[test]
    fn to_text_joins_arrays() {
        assert_eq!(to_text(&json!(["a", "b"])), "a, b");
    }
}
