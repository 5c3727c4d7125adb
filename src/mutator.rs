use crate::core::error::{EntityKind, Error, Result};
use crate::core::value::{resolve_source, RecordId, Value};
use crate::index_engine::IndexEngine;
use crate::query::types::IdxData;
use crate::record::{id_hash_path, RecordStore};
use crate::schema::{IndexRegistry, IndexSchema};
use crate::view_manager::ViewManager;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug_span;

/// What happened to a record, handed to the `ViewManager` after a write's
/// lock is released. Both insert and update report `Upsert`: they differ
/// only in `new_record`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Upsert,
    Delete,
}

#[derive(Debug, Clone)]
pub struct WriteState {
    pub action: Action,
    pub id: RecordId,
    pub idx_data: IdxData,
    pub new_record: bool,
    /// Per schema-field id: did this write change the field's resolved
    /// value? Drives `SummaryView`'s recompute trigger.
    pub changed: HashMap<String, bool>,
}

/// Applies writes under the record's exclusive lock, in the sequence
/// lock → store → index → notify → unlock, and surfaces any storage or
/// index failure without completing the remaining steps.
pub struct Mutator {
    store: Arc<RecordStore>,
    index_engine: Arc<dyn IndexEngine>,
    registry: Arc<IndexRegistry>,
    view_manager: Arc<ViewManager>,
}

impl Mutator {
    pub fn new(
        store: Arc<RecordStore>,
        index_engine: Arc<dyn IndexEngine>,
        registry: Arc<IndexRegistry>,
        view_manager: Arc<ViewManager>,
    ) -> Self {
        Mutator { store, index_engine, registry, view_manager }
    }

    pub async fn insert(&self, index_id: &str, id: &RecordId, record: Value) -> Result<()> {
        let _span = debug_span!("write", op = "insert", index = index_id, id = %id).entered();
        let _guard = self.store.lock(index_id, id).await;
        let schema = self.registry.get(index_id)?;

        self.store.put(index_id, id, &record).await?;
        self.store.hash_put(&id_hash_path(index_id), id, Value::Bool(true)).await?;
        let idx_data = self.index_engine.index_record(index_id, id, &record, &schema).await?;

        let changed = schema.fields.iter().map(|f| (f.id.clone(), true)).collect();
        self.view_manager.notify(
            index_id,
            WriteState { action: Action::Upsert, id: id.clone(), idx_data, new_record: true, changed },
        );
        Ok(())
    }

    /// Sparse-merge `patch` onto the current record. `"+N"`/`"-N"` on an
    /// existing numeric field increments/decrements; `"±tag, ±tag"` tokens
    /// (comma- or whitespace-separated) on an existing comma-separated tag
    /// string add/remove tags. All other values replace.
    pub async fn update(&self, index_id: &str, id: &RecordId, patch: Value) -> Result<()> {
        self.update_with(index_id, id, move |current| Some(apply_patch(&current, &patch))).await
    }

    /// A variant of `update` accepting a caller-supplied transform over the
    /// loaded record. Returning `None` aborts the write with `Error::Aborted`
    /// and leaves the record untouched.
    pub async fn update_with<F>(&self, index_id: &str, id: &RecordId, transform: F) -> Result<()>
    where
        F: FnOnce(Value) -> Option<Value>,
    {
        let _span = debug_span!("write", op = "update", index = index_id, id = %id).entered();
        let _guard = self.store.lock(index_id, id).await;
        let schema = self.registry.get(index_id)?;

        let current = self
            .store
            .get(index_id, id)
            .await?
            .ok_or_else(|| Error::not_found(EntityKind::Record, id.clone()))?;

        let updated = transform(current.clone()).ok_or(Error::Aborted)?;

        self.store.put(index_id, id, &updated).await?;
        let idx_data = self.index_engine.index_record(index_id, id, &updated, &schema).await?;
        let changed = compute_changed(&schema, &current, &updated);

        self.view_manager.notify(
            index_id,
            WriteState { action: Action::Upsert, id: id.clone(), idx_data, new_record: false, changed },
        );
        Ok(())
    }

    pub async fn delete(&self, index_id: &str, id: &RecordId) -> Result<()> {
        let _span = debug_span!("write", op = "delete", index = index_id, id = %id).entered();
        let _guard = self.store.lock(index_id, id).await;
        let schema = self.registry.get(index_id)?;

        let idx_data = self.index_engine.unindex_record(index_id, id, &schema).await?;
        self.store.delete(index_id, id).await?;
        self.store.hash_delete(&id_hash_path(index_id), id).await?;

        self.view_manager.notify(
            index_id,
            WriteState { action: Action::Delete, id: id.clone(), idx_data, new_record: false, changed: HashMap::new() },
        );
        Ok(())
    }
}

fn compute_changed(schema: &IndexSchema, old: &Value, new: &Value) -> HashMap<String, bool> {
    schema
        .fields
        .iter()
        .map(|f| {
            let old_val = resolve_source(old, &f.source);
            let new_val = resolve_source(new, &f.source);
            (f.id.clone(), old_val != new_val)
        })
        .collect()
}

fn numeric_delta_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]\d+(\.\d+)?$").unwrap())
}

fn tag_token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[+-]\w+$").unwrap())
}

fn tag_delta_tokens(s: &str) -> Vec<&str> {
    s.split([',', ' ', '\t', '\n']).map(str::trim).filter(|t| !t.is_empty()).collect()
}

fn is_tag_delta(s: &str) -> bool {
    let tokens = tag_delta_tokens(s);
    !tokens.is_empty() && tokens.iter().all(|t| tag_token_re().is_match(t))
}

fn apply_numeric_delta(current: f64, delta: &str) -> Value {
    let parsed: f64 = delta.parse().unwrap_or(0.0);
    serde_json::Number::from_f64(current + parsed).map(Value::Number).unwrap_or(Value::Null)
}

fn apply_tag_delta(existing: &str, patch: &str) -> Value {
    let mut tags: Vec<String> = existing.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
    for token in tag_delta_tokens(patch) {
        let (sign, word) = token.split_at(1);
        match sign {
            "+" => {
                if !tags.iter().any(|t| t == word) {
                    tags.push(word.to_string());
                }
            }
            "-" => tags.retain(|t| t != word),
            _ => {}
        }
    }
    Value::String(tags.join(", "))
}

/// Sparse-merge `patch`'s top-level fields onto `current`, applying the
/// sugared numeric-delta and tag-delta forms where they apply.
pub fn apply_patch(current: &Value, patch: &Value) -> Value {
    let (Value::Object(patch_map), Value::Object(_)) = (patch, current) else {
        return patch.clone();
    };
    let mut merged = current.clone();
    let Value::Object(merged_map) = &mut merged else { unreachable!() };

    for (key, patch_value) in patch_map {
        let new_value = match (merged_map.get(key), patch_value) {
            (Some(Value::Number(n)), Value::String(s)) if numeric_delta_re().is_match(s) => {
                apply_numeric_delta(n.as_f64().unwrap_or(0.0), s)
            }
            (Some(Value::String(existing)), Value::String(s)) if is_tag_delta(s) => apply_tag_delta(existing, s),
            _ => patch_value.clone(),
        };
        merged_map.insert(key.clone(), new_value);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_delta_increments_existing_number() {
        let current = json!({"count": 5});
        let patch = json!({"count": "+3"});
        assert_eq!(apply_patch(&current, &patch), json!({"count": 8.0}));
    }

    #[test]
    fn numeric_delta_decrements_existing_number() {
        let current = json!({"count": 5});
        let patch = json!({"count": "-2"});
        assert_eq!(apply_patch(&current, &patch), json!({"count": 3.0}));
    }

    #[test]
    fn tag_delta_adds_and_removes_tags() {
        let current = json!({"tags": "red, green"});
        let patch = json!({"tags": "+blue -red"});
        assert_eq!(apply_patch(&current, &patch), json!({"tags": "green, blue"}));
    }

    #[test]
    fn tag_delta_accepts_comma_separated_form() {
        let current = json!({"tags": "red, green"});
        let patch = json!({"tags": "+blue, -red"});
        assert_eq!(apply_patch(&current, &patch), json!({"tags": "green, blue"}));
    }

    #[test]
    fn non_sugared_string_replaces_value() {
        let current = json!({"status": "open"});
        let patch = json!({"status": "closed"});
        assert_eq!(apply_patch(&current, &patch), json!({"status": "closed"}));
    }

    #[test]
    fn unrelated_fields_are_untouched() {
        let current = json!({"status": "open", "count": 1});
        let patch = json!({"status": "closed"});
        assert_eq!(apply_patch(&current, &patch), json!({"status": "closed", "count": 1}));
    }
}
