use crate::core::error::Result;
use crate::core::value::RecordId;
use crate::index::posting::PostingList;
use regex::Regex;
use std::collections::{HashMap, HashSet};

/// A single field's term dictionary and posting lists. One of these exists
/// per indexed text field of an index, keyed by the field's id in
/// [`crate::index_engine::DefaultIndexEngine`].
#[derive(Default)]
pub struct InvertedIndex {
    postings: HashMap<String, PostingList>,
}

impl InvertedIndex {
    pub fn new() -> Self {
        InvertedIndex::default()
    }

    /// Replace (or add) this record's postings for every term it produced.
    /// Analysis dedupes/counts occurrences before this call.
    pub fn index_record(&mut self, record_id: &RecordId, term_freqs: &HashMap<String, u32>) {
        for (term, freq) in term_freqs {
            self.postings.entry(term.clone()).or_default().add(record_id.clone(), *freq);
        }
    }

    /// Drop every trace of `record_id`, used both on delete and before
    /// re-indexing an updated record. Empty posting lists are pruned so a
    /// term that no longer occurs anywhere stops showing up in term counts.
    pub fn unindex_record(&mut self, record_id: &str) {
        for list in self.postings.values_mut() {
            list.remove(record_id);
        }
        self.postings.retain(|_, list| !list.is_empty());
    }

    pub fn term(&self, term: &str) -> Option<&PostingList> {
        self.postings.get(term)
    }

    pub fn terms(&self) -> impl Iterator<Item = &String> {
        self.postings.keys()
    }

    pub fn prefix_matches(&self, prefix: &str) -> HashSet<RecordId> {
        self.postings
            .iter()
            .filter(|(term, _)| term.starts_with(prefix))
            .flat_map(|(_, list)| list.record_ids().cloned())
            .collect()
    }

    pub fn wildcard_matches(&self, pattern: &str) -> Result<HashSet<RecordId>> {
        let escaped = regex::escape(pattern);
        let regex_pattern = format!("^{}$", escaped.replace(r"\*", ".*").replace(r"\?", "."));
        let regex = Regex::new(&regex_pattern)
            .map_err(|e| crate::core::error::Error::InvalidQuery(format!("invalid wildcard pattern: {e}")))?;
        Ok(self
            .postings
            .iter()
            .filter(|(term, _)| regex.is_match(term))
            .flat_map(|(_, list)| list.record_ids().cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn freqs(terms: &[&str]) -> HashMap<String, u32> {
        let mut m = HashMap::new();
        for t in terms {
            *m.entry(t.to_string()).or_insert(0) += 1;
        }
        m
    }

    #[test]
    fn index_then_unindex_empties_postings() {
        let mut idx = InvertedIndex::new();
        idx.index_record(&"r1".to_string(), &freqs(&["rust", "async"]));
        assert!(idx.term("rust").is_some());
        idx.unindex_record("r1");
        assert!(idx.term("rust").is_none());
    }

    #[test]
    fn prefix_matches_finds_all_terms_sharing_prefix() {
        let mut idx = InvertedIndex::new();
        idx.index_record(&"r1".to_string(), &freqs(&["async"]));
        idx.index_record(&"r2".to_string(), &freqs(&["asynchronous"]));
        let matches = idx.prefix_matches("async");
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn wildcard_matches_glob_style_pattern() {
        let mut idx = InvertedIndex::new();
        idx.index_record(&"r1".to_string(), &freqs(&["testing"]));
        let matches = idx.wildcard_matches("test*").unwrap();
        assert!(matches.contains("r1"));
    }
}
