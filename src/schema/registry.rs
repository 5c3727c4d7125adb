use crate::core::error::{EntityKind, Error, Result};
use crate::schema::IndexSchema;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// In-memory catalog of index schemas, persisted as one bincode-encoded hash
/// file at `<base_path>/indexes`. Every admin mutation (`create_index`,
/// `add_field`, ...) goes through here and is flushed to disk before the
/// call returns, so a crash never leaves the catalog ahead of disk.
pub struct IndexRegistry {
    path: PathBuf,
    schemas: RwLock<HashMap<String, Arc<IndexSchema>>>,
}

impl IndexRegistry {
    /// Load the catalog from `<base_path>/indexes`, or start empty if the
    /// file doesn't exist yet.
    ///
    /// Persisted as JSON rather than bincode: a schema's `default_value`
    /// fields are arbitrary `core::value::Value`, and `serde_json::Value`'s
    /// `Deserialize` impl requires a self-describing format (it calls
    /// `deserialize_any`), which bincode's deserializer doesn't implement.
    pub async fn open(base_path: &Path) -> Result<Self> {
        let path = base_path.join("indexes");
        let schemas = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<HashMap<String, IndexSchema>>(&bytes)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        let schemas = schemas.into_iter().map(|(k, v)| (k, Arc::new(v))).collect();
        Ok(IndexRegistry { path, schemas: RwLock::new(schemas) })
    }

    fn persist(&self) -> Result<()> {
        let snapshot: HashMap<String, &IndexSchema> = self
            .schemas
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.as_ref()))
            .collect();
        let bytes = serde_json::to_vec(&snapshot)?;
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Arc<IndexSchema>> {
        self.schemas
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Index, id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.schemas.read().contains_key(id)
    }

    pub fn list(&self) -> Vec<Arc<IndexSchema>> {
        self.schemas.read().values().cloned().collect()
    }

    pub fn insert(&self, schema: IndexSchema) -> Result<()> {
        if self.schemas.read().contains_key(&schema.id) {
            return Err(Error::already_exists(EntityKind::Index, schema.id));
        }
        self.schemas.write().insert(schema.id.clone(), Arc::new(schema));
        self.persist()
    }

    pub fn remove(&self, id: &str) -> Result<Arc<IndexSchema>> {
        let removed = self
            .schemas
            .write()
            .remove(id)
            .ok_or_else(|| Error::not_found(EntityKind::Index, id))?;
        self.persist()?;
        Ok(removed)
    }

    /// Apply `f` to a clone of the current schema and persist the result,
    /// returning the updated schema. Callers hold the per-index job slot for
    /// the duration, so no additional locking is needed here.
    pub fn update<F>(&self, id: &str, f: F) -> Result<Arc<IndexSchema>>
    where
        F: FnOnce(&mut IndexSchema) -> Result<()>,
    {
        let mut schema = (*self.get(id)?).clone();
        f(&mut schema)?;
        let updated = Arc::new(schema);
        self.schemas.write().insert(id.to_string(), updated.clone());
        self.persist()?;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldDef;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = IndexRegistry::open(dir.path()).await.unwrap();
        let schema = IndexSchema::new("myapp", vec![FieldDef::new("status", "/Status")]).unwrap();
        registry.insert(schema).unwrap();
        assert_eq!(registry.get("myapp").unwrap().id, "myapp");
    }

    #[tokio::test]
    async fn insert_duplicate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = IndexRegistry::open(dir.path()).await.unwrap();
        let schema = IndexSchema::new("myapp", vec![FieldDef::new("status", "/Status")]).unwrap();
        registry.insert(schema.clone()).unwrap();
        assert!(registry.insert(schema).is_err());
    }

    #[tokio::test]
    async fn reopen_reloads_persisted_catalog() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = IndexRegistry::open(dir.path()).await.unwrap();
            let schema = IndexSchema::new("myapp", vec![FieldDef::new("status", "/Status")]).unwrap();
            registry.insert(schema).unwrap();
        }
        let reopened = IndexRegistry::open(dir.path()).await.unwrap();
        assert!(reopened.contains("myapp"));
    }
}
