use crate::core::value::to_number;
use crate::query::ast::{BoolQuery, PrefixQuery, Query, RangeQuery, TermQuery, WildcardQuery};
use crate::query::types::IdxData;
use regex::Regex;

const ALL_FIELDS: &str = "_all";

/// Evaluates a parsed [`Query`] against one record's cached [`IdxData`],
/// without touching storage or the inverted index. This is what backs
/// `IndexEngine::search_single`: a predicate check used to decide whether a
/// record newly enters or leaves a view after a write.
pub fn matches(idx: &IdxData, query: &Query) -> bool {
    match query {
        Query::MatchAll => true,
        Query::Term(q) => matches_term(idx, q),
        Query::Bool(q) => matches_bool(idx, q),
        Query::Range(q) => matches_range(idx, q),
        Query::Prefix(q) => matches_prefix(idx, q),
        Query::Wildcard(q) => matches_wildcard(idx, q),
    }
}

fn matches_term(idx: &IdxData, query: &TermQuery) -> bool {
    let needle = query.value.to_lowercase();
    if query.field == ALL_FIELDS {
        return idx.tokens.values().any(|tokens| tokens.contains(&needle));
    }
    idx.tokens.get(&query.field).is_some_and(|tokens| tokens.contains(&needle))
}

fn matches_prefix(idx: &IdxData, query: &PrefixQuery) -> bool {
    let prefix = query.prefix.to_lowercase();
    let field_matches = |tokens: &std::collections::HashSet<String>| tokens.iter().any(|t| t.starts_with(&prefix));
    if query.field == ALL_FIELDS {
        return idx.tokens.values().any(field_matches);
    }
    idx.tokens.get(&query.field).is_some_and(field_matches)
}

fn matches_wildcard(idx: &IdxData, query: &WildcardQuery) -> bool {
    let escaped = regex::escape(&query.pattern.to_lowercase());
    let pattern = format!("^{}$", escaped.replace(r"\*", ".*").replace(r"\?", "."));
    let Ok(regex) = Regex::new(&pattern) else { return false };
    let field_matches = |tokens: &std::collections::HashSet<String>| tokens.iter().any(|t| regex.is_match(t));
    if query.field == ALL_FIELDS {
        return idx.tokens.values().any(field_matches);
    }
    idx.tokens.get(&query.field).is_some_and(field_matches)
}

fn matches_range(idx: &IdxData, query: &RangeQuery) -> bool {
    let Some(value) = idx.raw.get(&query.field) else { return false };

    if let (Some(num), true) = (to_number(value), true) {
        if let Some(gt) = query.gt.as_ref().and_then(to_number) {
            if !(num > gt) {
                return false;
            }
        }
        if let Some(gte) = query.gte.as_ref().and_then(to_number) {
            if !(num >= gte) {
                return false;
            }
        }
        if let Some(lt) = query.lt.as_ref().and_then(to_number) {
            if !(num < lt) {
                return false;
            }
        }
        if let Some(lte) = query.lte.as_ref().and_then(to_number) {
            if !(num <= lte) {
                return false;
            }
        }
        return true;
    }

    let text = crate::core::value::to_text(value);
    let as_text = |v: &crate::core::value::Value| crate::core::value::to_text(v);
    if let Some(gt) = query.gt.as_ref().map(as_text) {
        if !(text > gt) {
            return false;
        }
    }
    if let Some(gte) = query.gte.as_ref().map(as_text) {
        if !(text >= gte) {
            return false;
        }
    }
    if let Some(lt) = query.lt.as_ref().map(as_text) {
        if !(text < lt) {
            return false;
        }
    }
    if let Some(lte) = query.lte.as_ref().map(as_text) {
        if !(text <= lte) {
            return false;
        }
    }
    true
}

fn matches_bool(idx: &IdxData, query: &BoolQuery) -> bool {
    for clause in &query.must {
        if !matches(idx, clause) {
            return false;
        }
    }
    for clause in &query.must_not {
        if matches(idx, clause) {
            return false;
        }
    }
    if !query.should.is_empty() && !query.should.iter().any(|c| matches(idx, c)) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::{PrefixQuery, TermQuery};
    use serde_json::json;

    fn idx_with(field: &str, tokens: &[&str], raw: serde_json::Value) -> IdxData {
        let mut idx = IdxData::new();
        idx.tokens.insert(field.to_string(), tokens.iter().map(|s| s.to_string()).collect());
        idx.raw.insert(field.to_string(), raw);
        idx
    }

    #[test]
    fn term_query_matches_indexed_token() {
        let idx = idx_with("body", &["rust", "async"], json!("Rust Async"));
        assert!(matches_term(&idx, &TermQuery { field: "body".into(), value: "rust".into() }));
        assert!(!matches_term(&idx, &TermQuery { field: "body".into(), value: "python".into() }));
    }

    #[test]
    fn bool_must_not_excludes() {
        let idx = idx_with("status", &["open"], json!("open"));
        let query = BoolQuery {
            must: vec![Query::Term(TermQuery { field: "status".into(), value: "open".into() })],
            should: vec![],
            must_not: vec![Query::Term(TermQuery { field: "status".into(), value: "open".into() })],
        };
        assert!(!matches_bool(&idx, &query));
    }

    #[test]
    fn range_query_numeric_bounds() {
        let idx = idx_with("age", &[], json!(42));
        let query = RangeQuery { field: "age".into(), gt: None, gte: Some(json!(40)), lt: None, lte: Some(json!(50)) };
        assert!(matches_range(&idx, &query));
    }

    #[test]
    fn prefix_query_scans_tokens() {
        let idx = idx_with("tag", &["urgent", "followup"], json!("urgent followup"));
        assert!(matches_prefix(&idx, &PrefixQuery { field: "tag".into(), prefix: "urg".into() }));
    }

    #[test]
    fn empty_idx_rejects_everything_but_matchall() {
        let idx = IdxData::new();
        assert!(matches(&idx, &Query::MatchAll));
        assert!(!matches(&idx, &Query::Term(TermQuery { field: "x".into(), value: "y".into() })));
    }
}
