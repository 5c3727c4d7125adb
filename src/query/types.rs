use crate::core::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Sort direction, applied as a multiplier (`+1`/`-1`) to a comparator's
/// result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn multiplier(self) -> i32 {
        match self {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        }
    }
}

/// The per-record projection an `IndexEngine` keeps in memory: analyzed
/// tokens per field (for term/prefix/wildcard matching) plus the raw
/// resolved value per field and sorter (for range comparisons and sort
/// key lookups). `View`'s incremental update reads `sorters` directly to
/// decide whether a record's position needs to move.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdxData {
    pub tokens: HashMap<String, HashSet<String>>,
    pub raw: HashMap<String, Value>,
    pub sorters: HashMap<String, Value>,
}

impl IdxData {
    pub fn new() -> Self {
        IdxData::default()
    }
}
