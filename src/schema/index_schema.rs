use crate::core::error::{EntityKind, Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn id_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\w+$").unwrap())
}

const RESERVED_FIELD_IDS: &[&str] = &["_id", "_data", "_sorters"];
const RESERVED_SORTER_IDS: &[&str] = &["_id", "_data"];

/// The capability a field projects its resolved value through before it
/// reaches the inverted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Text,
    Number,
    Date,
    Boolean,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SorterType {
    /// Numeric comparison.
    Number,
    /// Locale-aware string comparison.
    String,
}

/// One configured projection of record data into the inverted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub id: String,
    /// `/`-delimited path into the record; see [`crate::core::value::resolve_source`].
    pub source: String,
    pub field_type: Option<FieldType>,
    /// Name of a token filter capability (`lowercase`, `stopword`, `stemmer`).
    pub filter: Option<String>,
    pub min_word_length: Option<usize>,
    pub max_word_length: Option<usize>,
    pub use_remove_words: bool,
    pub use_stemmer: bool,
    /// When set, the index engine maintains a value histogram for this
    /// field, enabling `#summary:<field>` queries.
    pub master_list: bool,
    pub default_value: Option<crate::core::value::Value>,
    /// Transient: set only for the duration of a reindex pass that removes
    /// this field from the physical index.
    #[serde(skip)]
    pub delete: bool,
}

impl FieldDef {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        FieldDef {
            id: id.into(),
            source: source.into(),
            field_type: None,
            filter: None,
            min_word_length: None,
            max_word_length: None,
            use_remove_words: false,
            use_stemmer: false,
            master_list: false,
            default_value: None,
            delete: false,
        }
    }

    pub fn with_type(mut self, field_type: FieldType) -> Self {
        self.field_type = Some(field_type);
        self
    }

    pub fn with_master_list(mut self, master_list: bool) -> Self {
        self.master_list = master_list;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SorterDef {
    pub id: String,
    pub source: String,
    pub sorter_type: SorterType,
}

impl SorterDef {
    pub fn new(id: impl Into<String>, source: impl Into<String>, sorter_type: SorterType) -> Self {
        SorterDef { id: id.into(), source: source.into(), sorter_type }
    }
}

/// The persistent schema for one named index. `base_path` is deliberately
/// not part of this struct: it is derived as `<config.base_path>/index/<id>`
/// and never persisted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSchema {
    pub id: String,
    pub fields: Vec<FieldDef>,
    pub sorters: Vec<SorterDef>,
    pub remove_words: Vec<String>,
}

fn validate_id(id: &str) -> Result<()> {
    if !id_pattern().is_match(id) {
        return Err(Error::InvalidSchema(format!(
            "id '{id}' must match /^\\w+$/"
        )));
    }
    Ok(())
}

impl IndexSchema {
    /// Construct and validate a brand-new schema, per §3's create-time
    /// invariant that `fields` is non-empty and ids don't collide.
    pub fn new(id: impl Into<String>, fields: Vec<FieldDef>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        if fields.is_empty() {
            return Err(Error::InvalidSchema(
                "a new index must declare at least one field".into(),
            ));
        }
        let schema = IndexSchema { id, fields, sorters: Vec::new(), remove_words: Vec::new() };
        schema.validate_fields()?;
        Ok(schema)
    }

    pub fn validate_fields(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for field in &self.fields {
            validate_id(&field.id)?;
            if RESERVED_FIELD_IDS.contains(&field.id.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "field id '{}' is reserved",
                    field.id
                )));
            }
            if !seen.insert(field.id.clone()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate field id '{}'",
                    field.id
                )));
            }
        }
        Ok(())
    }

    pub fn validate_sorters(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for sorter in &self.sorters {
            validate_id(&sorter.id)?;
            if RESERVED_SORTER_IDS.contains(&sorter.id.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "sorter id '{}' is reserved",
                    sorter.id
                )));
            }
            if !seen.insert(sorter.id.clone()) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate sorter id '{}'",
                    sorter.id
                )));
            }
        }
        Ok(())
    }

    pub fn field(&self, id: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn sorter(&self, id: &str) -> Option<&SorterDef> {
        self.sorters.iter().find(|s| s.id == id)
    }

    pub fn require_field(&self, id: &str) -> Result<&FieldDef> {
        self.field(id).ok_or_else(|| Error::not_found(EntityKind::Field, id))
    }

    pub fn require_sorter(&self, id: &str) -> Result<&SorterDef> {
        self.sorter(id).ok_or_else(|| Error::not_found(EntityKind::Sorter, id))
    }

    pub fn add_field(&mut self, field: FieldDef) -> Result<()> {
        validate_id(&field.id)?;
        if RESERVED_FIELD_IDS.contains(&field.id.as_str()) {
            return Err(Error::InvalidSchema(format!("field id '{}' is reserved", field.id)));
        }
        if self.field(&field.id).is_some() {
            return Err(Error::already_exists(EntityKind::Field, field.id));
        }
        self.fields.push(field);
        Ok(())
    }

    pub fn remove_field(&mut self, id: &str) -> Result<FieldDef> {
        let pos = self.fields.iter().position(|f| f.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::Field, id))?;
        Ok(self.fields.remove(pos))
    }

    pub fn add_sorter(&mut self, sorter: SorterDef) -> Result<()> {
        validate_id(&sorter.id)?;
        if RESERVED_SORTER_IDS.contains(&sorter.id.as_str()) {
            return Err(Error::InvalidSchema(format!("sorter id '{}' is reserved", sorter.id)));
        }
        if self.sorter(&sorter.id).is_some() {
            return Err(Error::already_exists(EntityKind::Sorter, sorter.id));
        }
        self.sorters.push(sorter);
        Ok(())
    }

    pub fn remove_sorter(&mut self, id: &str) -> Result<SorterDef> {
        let pos = self.sorters.iter().position(|s| s.id == id)
            .ok_or_else(|| Error::not_found(EntityKind::Sorter, id))?;
        Ok(self.sorters.remove(pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_field_list() {
        assert!(IndexSchema::new("myapp", vec![]).is_err());
    }

    #[test]
    fn rejects_reserved_field_id() {
        let fields = vec![FieldDef::new("_id", "/Status")];
        assert!(IndexSchema::new("myapp", fields).is_err());
    }

    #[test]
    fn rejects_duplicate_field_ids() {
        let fields = vec![FieldDef::new("status", "/Status"), FieldDef::new("status", "/Other")];
        assert!(IndexSchema::new("myapp", fields).is_err());
    }

    #[test]
    fn add_sorter_rejects_reserved_id() {
        let mut schema = IndexSchema::new("myapp", vec![FieldDef::new("status", "/Status")]).unwrap();
        let err = schema.add_sorter(SorterDef::new("_id", "/x", SorterType::String));
        assert!(err.is_err());
    }
}
