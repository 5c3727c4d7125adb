use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::analysis::analyzer::Analyzer;
use crate::core::error::{Error, Result};
use crate::core::value::{resolve_source, to_number, to_text, RecordId, Value};
use crate::index::inverted::InvertedIndex;
use crate::query::ast::Query;
use crate::query::matcher;
use crate::query::parser;
use crate::query::types::IdxData;
use crate::schema::{IndexSchema, SorterType};

/// Contract fulfilled by the inverted-index + query-evaluation layer. A
/// `Mutator` calls `index_record`/`unindex_record` inside its lock; a
/// `View` calls `search_records`/`sort_records` on initial search and
/// `search_single` on every subsequent write to the index.
#[async_trait]
pub trait IndexEngine: Send + Sync {
    async fn index_record(
        &self,
        index_id: &str,
        id: &RecordId,
        record: &Value,
        schema: &IndexSchema,
    ) -> Result<IdxData>;

    async fn unindex_record(&self, index_id: &str, id: &RecordId, schema: &IndexSchema) -> Result<IdxData>;

    /// Drop all state for an index, used by `deleteIndex`.
    fn drop_index(&self, index_id: &str);

    fn search_records(&self, index_id: &str, query: &Query, schema: &IndexSchema) -> Result<HashMap<RecordId, f64>>;

    fn search_single(&self, query: &Query, idx_data: &IdxData) -> bool {
        matcher::matches(idx_data, query)
    }

    fn sort_records(
        &self,
        index_id: &str,
        results: &HashMap<RecordId, f64>,
        sort_by: &str,
        sort_dir: i32,
        schema: &IndexSchema,
    ) -> Result<Vec<(RecordId, Value)>>;

    fn get_field_summary(&self, index_id: &str, field_id: &str, schema: &IndexSchema) -> Result<HashMap<String, u64>>;

    fn parse_query(&self, q: &str) -> Result<Query> {
        parser::parse_query(q)
    }

    fn parse_grammar(&self, q: &str) -> Result<Query> {
        parser::parse_grammar(q)
    }

    fn parse_search_query(&self, q: &str) -> Result<Query> {
        parser::parse_search_query(q)
    }
}

#[derive(Default)]
struct FieldState {
    inverted: InvertedIndex,
    /// Raw resolved value per record, used for range comparisons and as
    /// the `idx_data.raw` snapshot handed back to callers.
    raw: HashMap<RecordId, Value>,
    /// Populated only for fields with `master_list: true`: canonical text
    /// value → count of records currently holding it.
    summary: HashMap<String, u64>,
}

#[derive(Default)]
struct SorterState {
    values: HashMap<RecordId, Value>,
}

#[derive(Default)]
struct IndexState {
    fields: HashMap<String, FieldState>,
    sorters: HashMap<String, SorterState>,
    all_ids: HashSet<RecordId>,
}

/// In-memory inverted index + sort index, one [`IndexState`] per configured
/// index. This is the minimal concrete `IndexEngine`: it gives the crate a
/// runnable end-to-end implementation without chasing ranking quality or a
/// durable on-disk posting format, both explicitly out of scope.
#[derive(Default)]
pub struct DefaultIndexEngine {
    state: RwLock<HashMap<String, IndexState>>,
}

impl DefaultIndexEngine {
    pub fn new() -> Self {
        DefaultIndexEngine::default()
    }
}

fn summary_key(value: &Value) -> String {
    to_text(value)
}

fn compare_values(a: &Value, b: &Value, sorter_type: SorterType) -> std::cmp::Ordering {
    match sorter_type {
        SorterType::Number => {
            let an = to_number(a).unwrap_or(f64::NEG_INFINITY);
            let bn = to_number(b).unwrap_or(f64::NEG_INFINITY);
            an.partial_cmp(&bn).unwrap_or(std::cmp::Ordering::Equal)
        }
        SorterType::String => to_text(a).cmp(&to_text(b)),
    }
}

#[async_trait]
impl IndexEngine for DefaultIndexEngine {
    async fn index_record(
        &self,
        index_id: &str,
        id: &RecordId,
        record: &Value,
        schema: &IndexSchema,
    ) -> Result<IdxData> {
        let mut guard = self.state.write();
        let index_state = guard.entry(index_id.to_string()).or_default();
        index_state.all_ids.insert(id.clone());

        let mut idx_data = IdxData::new();

        for field in &schema.fields {
            if field.delete {
                let field_state = index_state.fields.entry(field.id.clone()).or_default();
                field_state.inverted.unindex_record(id);
                if let Some(old) = field_state.raw.remove(id) {
                    if field.master_list {
                        let key = summary_key(&old);
                        if let Some(count) = field_state.summary.get_mut(&key) {
                            *count = count.saturating_sub(1);
                            if *count == 0 {
                                field_state.summary.remove(&key);
                            }
                        }
                    }
                }
                continue;
            }

            let resolved = resolve_source(record, &field.source)
                .or_else(|| field.default_value.clone())
                .unwrap_or(Value::Null);

            let field_state = index_state.fields.entry(field.id.clone()).or_default();

            // Clear this record's prior contribution before re-indexing so
            // updates don't leave stale terms/summary counts behind.
            field_state.inverted.unindex_record(id);
            if let Some(old) = field_state.raw.remove(id) {
                if field.master_list {
                    let key = summary_key(&old);
                    if let Some(count) = field_state.summary.get_mut(&key) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            field_state.summary.remove(&key);
                        }
                    }
                }
            }

            let text = to_text(&resolved);
            let analyzer = Analyzer::for_field(field, &schema.remove_words);
            let tokens: HashSet<String> = analyzer.analyze(&text).into_iter().map(|t| t.text).collect();

            let mut freqs = HashMap::new();
            for t in &tokens {
                *freqs.entry(t.clone()).or_insert(0u32) += 1;
            }
            field_state.inverted.index_record(id, &freqs);
            field_state.raw.insert(id.clone(), resolved.clone());

            if field.master_list {
                *field_state.summary.entry(summary_key(&resolved)).or_insert(0) += 1;
            }

            idx_data.tokens.insert(field.id.clone(), tokens);
            idx_data.raw.insert(field.id.clone(), resolved);
        }

        for sorter in &schema.sorters {
            let resolved = resolve_source(record, &sorter.source).unwrap_or(Value::Null);
            let sorter_state = index_state.sorters.entry(sorter.id.clone()).or_default();
            sorter_state.values.insert(id.clone(), resolved.clone());
            idx_data.sorters.insert(sorter.id.clone(), resolved);
        }

        Ok(idx_data)
    }

    async fn unindex_record(&self, index_id: &str, id: &RecordId, schema: &IndexSchema) -> Result<IdxData> {
        let mut guard = self.state.write();
        let Some(index_state) = guard.get_mut(index_id) else {
            return Ok(IdxData::new());
        };
        index_state.all_ids.remove(id);

        let mut idx_data = IdxData::new();

        for field in &schema.fields {
            let Some(field_state) = index_state.fields.get_mut(&field.id) else { continue };
            let tokens: HashSet<String> = field_state
                .inverted
                .terms()
                .filter(|t| field_state.inverted.term(t).is_some_and(|l| l.term_freq(id).is_some()))
                .cloned()
                .collect();
            field_state.inverted.unindex_record(id);

            if let Some(old) = field_state.raw.remove(id) {
                if field.master_list {
                    let key = summary_key(&old);
                    if let Some(count) = field_state.summary.get_mut(&key) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            field_state.summary.remove(&key);
                        }
                    }
                }
                idx_data.raw.insert(field.id.clone(), old);
            }
            idx_data.tokens.insert(field.id.clone(), tokens);
        }

        for sorter in &schema.sorters {
            if let Some(sorter_state) = index_state.sorters.get_mut(&sorter.id) {
                if let Some(old) = sorter_state.values.remove(id) {
                    idx_data.sorters.insert(sorter.id.clone(), old);
                }
            }
        }

        Ok(idx_data)
    }

    fn drop_index(&self, index_id: &str) {
        self.state.write().remove(index_id);
    }

    fn search_records(&self, index_id: &str, query: &Query, schema: &IndexSchema) -> Result<HashMap<RecordId, f64>> {
        validate_query_fields(query, schema)?;
        let guard = self.state.read();
        let Some(index_state) = guard.get(index_id) else {
            return Ok(HashMap::new());
        };
        let matched = eval_query(index_state, query)?;
        Ok(matched.into_iter().map(|id| (id, 1.0)).collect())
    }

    fn sort_records(
        &self,
        index_id: &str,
        results: &HashMap<RecordId, f64>,
        sort_by: &str,
        sort_dir: i32,
        schema: &IndexSchema,
    ) -> Result<Vec<(RecordId, Value)>> {
        let sorter = schema.require_sorter(sort_by)?;
        let guard = self.state.read();
        let empty = HashMap::new();
        let values = guard
            .get(index_id)
            .and_then(|s| s.sorters.get(sort_by))
            .map(|s| &s.values)
            .unwrap_or(&empty);

        let mut pairs: Vec<(RecordId, Value)> = results
            .keys()
            .map(|id| (id.clone(), values.get(id).cloned().unwrap_or(Value::Null)))
            .collect();

        pairs.sort_by(|a, b| {
            let ord = compare_values(&a.1, &b.1, sorter.sorter_type);
            if sort_dir < 0 {
                ord.reverse()
            } else {
                ord
            }
        });

        Ok(pairs)
    }

    fn get_field_summary(&self, index_id: &str, field_id: &str, schema: &IndexSchema) -> Result<HashMap<String, u64>> {
        let field = schema.require_field(field_id)?;
        if !field.master_list {
            return Err(Error::InvalidQuery(format!(
                "field '{field_id}' is not a master list field"
            )));
        }
        let guard = self.state.read();
        Ok(guard
            .get(index_id)
            .and_then(|s| s.fields.get(field_id))
            .map(|f| f.summary.clone())
            .unwrap_or_default())
    }
}

/// Reject a query naming a field the schema doesn't define. `_all` is the
/// one reserved field id that is always valid on a `Term` query (it fans out
/// across every indexed field rather than naming one).
fn validate_query_fields(query: &Query, schema: &IndexSchema) -> Result<()> {
    let mut check = |field: &str| -> Result<()> {
        if field == "_all" || schema.field(field).is_some() {
            Ok(())
        } else {
            Err(Error::InvalidQuery(format!("unknown field '{field}' referenced in query")))
        }
    };
    match query {
        Query::MatchAll => Ok(()),
        Query::Term(q) => check(&q.field),
        Query::Prefix(q) => check(&q.field),
        Query::Wildcard(q) => check(&q.field),
        Query::Range(q) => check(&q.field),
        Query::Bool(q) => {
            for clause in q.must.iter().chain(q.should.iter()).chain(q.must_not.iter()) {
                validate_query_fields(clause, schema)?;
            }
            Ok(())
        }
    }
}

fn eval_query(index_state: &IndexState, query: &Query) -> Result<HashSet<RecordId>> {
    Ok(match query {
        Query::MatchAll => index_state.all_ids.clone(),
        Query::Term(q) => {
            if q.field == "_all" {
                index_state
                    .fields
                    .values()
                    .flat_map(|f| {
                        f.inverted
                            .term(&q.value.to_lowercase())
                            .map(|l| l.record_ids().cloned().collect::<Vec<_>>())
                            .unwrap_or_default()
                    })
                    .collect()
            } else {
                index_state
                    .fields
                    .get(&q.field)
                    .and_then(|f| f.inverted.term(&q.value.to_lowercase()))
                    .map(|l| l.record_ids().cloned().collect())
                    .unwrap_or_default()
            }
        }
        Query::Prefix(q) => index_state
            .fields
            .get(&q.field)
            .map(|f| f.inverted.prefix_matches(&q.prefix.to_lowercase()))
            .unwrap_or_default(),
        Query::Wildcard(q) => index_state
            .fields
            .get(&q.field)
            .map(|f| f.inverted.wildcard_matches(&q.pattern.to_lowercase()))
            .transpose()?
            .unwrap_or_default(),
        Query::Range(q) => {
            let Some(field_state) = index_state.fields.get(&q.field) else { return Ok(HashSet::new()) };
            field_state
                .raw
                .iter()
                .filter(|(_, v)| range_matches(v, q))
                .map(|(id, _)| id.clone())
                .collect()
        }
        Query::Bool(q) => {
            let mut result: Option<HashSet<RecordId>> = None;
            for clause in &q.must {
                let set = eval_query(index_state, clause)?;
                result = Some(match result {
                    Some(acc) => acc.intersection(&set).cloned().collect(),
                    None => set,
                });
            }
            if !q.should.is_empty() {
                let mut union = HashSet::new();
                for clause in &q.should {
                    union.extend(eval_query(index_state, clause)?);
                }
                result = Some(match result {
                    Some(acc) => acc.intersection(&union).cloned().collect(),
                    None => union,
                });
            }
            let mut result = result.unwrap_or_else(|| index_state.all_ids.clone());
            for clause in &q.must_not {
                let set = eval_query(index_state, clause)?;
                result = result.difference(&set).cloned().collect();
            }
            result
        }
    })
}

fn range_matches(value: &Value, q: &crate::query::ast::RangeQuery) -> bool {
    if let Some(num) = to_number(value) {
        if let Some(gt) = q.gt.as_ref().and_then(to_number) {
            if !(num > gt) {
                return false;
            }
        }
        if let Some(gte) = q.gte.as_ref().and_then(to_number) {
            if !(num >= gte) {
                return false;
            }
        }
        if let Some(lt) = q.lt.as_ref().and_then(to_number) {
            if !(num < lt) {
                return false;
            }
        }
        if let Some(lte) = q.lte.as_ref().and_then(to_number) {
            if !(num <= lte) {
                return false;
            }
        }
        return true;
    }
    let text = to_text(value);
    if let Some(gt) = q.gt.as_ref().map(to_text) {
        if !(text > gt) {
            return false;
        }
    }
    if let Some(gte) = q.gte.as_ref().map(to_text) {
        if !(text >= gte) {
            return false;
        }
    }
    if let Some(lt) = q.lt.as_ref().map(to_text) {
        if !(text < lt) {
            return false;
        }
    }
    if let Some(lte) = q.lte.as_ref().map(to_text) {
        if !(text <= lte) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, SorterDef};
    use serde_json::json;

    fn schema() -> IndexSchema {
        let mut s = IndexSchema::new(
            "tickets",
            vec![FieldDef::new("status", "/Status"), FieldDef::new("body", "/Body").with_master_list(true)],
        )
        .unwrap();
        s.add_sorter(SorterDef::new("created", "/Created", SorterType::Number)).unwrap();
        s
    }

    #[tokio::test]
    async fn search_rejects_query_naming_unknown_field() {
        let engine = DefaultIndexEngine::new();
        let schema = schema();
        let query = Query::Term(crate::query::ast::TermQuery { field: "nope".into(), value: "x".into() });
        let err = engine.search_records("tickets", &query, &schema).unwrap_err();
        assert!(matches!(err, Error::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn search_accepts_all_field_sentinel() {
        let engine = DefaultIndexEngine::new();
        let schema = schema();
        let query = Query::Term(crate::query::ast::TermQuery { field: "_all".into(), value: "urgent".into() });
        assert!(engine.search_records("tickets", &query, &schema).is_ok());
    }

    #[tokio::test]
    async fn index_then_search_finds_record() {
        let engine = DefaultIndexEngine::new();
        let schema = schema();
        let record = json!({"Status": "open", "Body": "urgent issue", "Created": 5});
        engine.index_record("tickets", &"r1".to_string(), &record, &schema).await.unwrap();

        let query = Query::Term(crate::query::ast::TermQuery { field: "status".into(), value: "open".into() });
        let results = engine.search_records("tickets", &query, &schema).unwrap();
        assert!(results.contains_key("r1"));
    }

    #[tokio::test]
    async fn unindex_removes_record_from_search() {
        let engine = DefaultIndexEngine::new();
        let schema = schema();
        let record = json!({"Status": "open", "Body": "urgent issue", "Created": 5});
        engine.index_record("tickets", &"r1".to_string(), &record, &schema).await.unwrap();
        engine.unindex_record("tickets", &"r1".to_string(), &schema).await.unwrap();

        let query = Query::Term(crate::query::ast::TermQuery { field: "status".into(), value: "open".into() });
        let results = engine.search_records("tickets", &query, &schema).unwrap();
        assert!(!results.contains_key("r1"));
    }

    #[tokio::test]
    async fn field_summary_requires_master_list() {
        let engine = DefaultIndexEngine::new();
        let schema = schema();
        assert!(engine.get_field_summary("tickets", "status", &schema).is_err());
        assert!(engine.get_field_summary("tickets", "body", &schema).is_ok());
    }

    #[tokio::test]
    async fn sort_records_orders_by_numeric_sorter() {
        let engine = DefaultIndexEngine::new();
        let schema = schema();
        engine
            .index_record("tickets", &"r1".to_string(), &json!({"Status": "open", "Body": "a", "Created": 10}), &schema)
            .await
            .unwrap();
        engine
            .index_record("tickets", &"r2".to_string(), &json!({"Status": "open", "Body": "b", "Created": 2}), &schema)
            .await
            .unwrap();

        let mut results = HashMap::new();
        results.insert("r1".to_string(), 1.0);
        results.insert("r2".to_string(), 1.0);
        let sorted = engine.sort_records("tickets", &results, "created", 1, &schema).unwrap();
        assert_eq!(sorted[0].0, "r2");
    }
}
