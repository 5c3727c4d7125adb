use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::core::error::{EntityKind, Error, Result};
use crate::index_engine::IndexEngine;
use crate::job::{Job, JobManager};
use crate::record::{id_hash_path, RecordStore};
use crate::schema::{FieldDef, IndexRegistry, IndexSchema, SorterDef};
use crate::view_manager::ViewManager;

/// Page size for the id-hash pager a reindex pass walks; matches the page
/// size `RecordStore::hash_each_page`'s own tests exercise.
const REINDEX_PAGE_SIZE: usize = 256;

/// Lifecycle operations over index schemas: create/update/delete the index
/// itself, and add/update/delete individual fields and sorters. Every
/// mutating call here goes through the same gate: reject if the index is
/// missing (except `create_index`, which rejects if it already exists),
/// reject with `Busy` if a job is already running for it, then run under a
/// freshly created `Job` whose progress the per-record reindex loop
/// advances.
pub struct Admin {
    registry: Arc<IndexRegistry>,
    record_store: Arc<RecordStore>,
    index_engine: Arc<dyn IndexEngine>,
    jobs: Arc<JobManager>,
    view_manager: Arc<ViewManager>,
}

impl Admin {
    pub fn new(
        registry: Arc<IndexRegistry>,
        record_store: Arc<RecordStore>,
        index_engine: Arc<dyn IndexEngine>,
        jobs: Arc<JobManager>,
        view_manager: Arc<ViewManager>,
    ) -> Self {
        Admin { registry, record_store, index_engine, jobs, view_manager }
    }

    fn start_job(&self, index_id: &str, title: &str) -> Result<Job> {
        if !self.registry.contains(index_id) {
            return Err(Error::not_found(EntityKind::Index, index_id));
        }
        if self.jobs.count_for(index_id) > 0 {
            return Err(Error::Busy(index_id.to_string()));
        }
        self.jobs.create(index_id, title)
    }

    pub fn get_index(&self, index_id: &str) -> Result<Arc<IndexSchema>> {
        self.registry.get(index_id)
    }

    /// Register a brand-new index. No records exist for it yet, so there is
    /// nothing to reindex.
    pub async fn create_index(&self, index_id: &str, fields: Vec<FieldDef>) -> Result<()> {
        if self.registry.contains(index_id) {
            return Err(Error::already_exists(EntityKind::Index, index_id));
        }
        let job = self.jobs.create(index_id, "create_index")?;
        let schema = IndexSchema::new(index_id, fields);
        let schema = match schema {
            Ok(s) => s,
            Err(err) => {
                self.jobs.finish(&job.index);
                return Err(err);
            }
        };
        let result = self.registry.insert(schema);
        self.jobs.finish(index_id);
        result
    }

    /// Replace an index's `remove_words` list. Since tokenisation depends on
    /// it for every field, this reindexes the whole schema in one pass.
    pub async fn update_index(&self, index_id: &str, remove_words: Vec<String>) -> Result<()> {
        let job = self.start_job(index_id, "update_index")?;
        let schema = self.registry.update(index_id, |s| {
            s.remove_words = remove_words;
            Ok(())
        });
        let schema = match schema {
            Ok(s) => s,
            Err(err) => {
                self.jobs.finish(&job.index);
                return Err(err);
            }
        };
        let result = self.full_reindex(index_id, &schema, (0.0, 1.0)).await;
        self.jobs.finish(index_id);
        result
    }

    /// Tear down an index: destroy its live views first (so subscribers see
    /// a clean `Destroy` rather than errors from a half-deleted index), then
    /// drop every record, the inverted index, and the schema itself.
    pub async fn delete_index(&self, index_id: &str) -> Result<()> {
        let job = self.start_job(index_id, "delete_index")?;
        self.view_manager.destroy_index(index_id).await;
        self.index_engine.drop_index(index_id);

        let path = id_hash_path(index_id);
        let ids = self.record_store.hash_get_all(&path).await?;
        for id in ids.keys() {
            self.record_store.delete(index_id, id).await?;
            self.record_store.hash_delete(&path, id).await?;
        }

        let result = self.registry.remove(index_id).map(|_| ());
        self.jobs.finish(&job.index);
        result
    }

    /// Re-derive every field and sorter projection for an index from the
    /// stored record bodies, without changing the schema. `field_ids`, when
    /// given, restricts which fields to refresh; `None` reindexes all of
    /// them. Like `updateField`, this runs the per-record loop twice: a
    /// scrub pass under `delete: true` (0.0→0.5) followed by the rebuild
    /// pass (0.5→1.0). The scrub is the admin-level contract with the
    /// `IndexEngine` trait in the abstract, not an artifact of the concrete
    /// engine's self-clearing `index_record` behavior.
    pub async fn reindex(&self, index_id: &str, field_ids: Option<Vec<String>>) -> Result<()> {
        let job = self.start_job(index_id, "reindex")?;
        let schema = match self.registry.get(index_id) {
            Ok(s) => s,
            Err(err) => {
                self.jobs.finish(&job.index);
                return Err(err);
            }
        };
        let schema = match field_ids {
            None => schema,
            Some(ids) => {
                let mut restricted = (*schema).clone();
                restricted.fields.retain(|f| ids.contains(&f.id));
                Arc::new(restricted)
            }
        };
        let result = self.reindex_two_pass(index_id, &schema).await;
        self.jobs.finish(index_id);
        result
    }

    async fn reindex_two_pass(&self, index_id: &str, schema: &IndexSchema) -> Result<()> {
        let mut scrub_schema = schema.clone();
        for f in scrub_schema.fields.iter_mut() {
            f.delete = true;
        }
        self.full_reindex(index_id, &scrub_schema, (0.0, 0.5)).await?;
        self.full_reindex(index_id, schema, (0.5, 1.0)).await
    }

    /// Add a field, persisting the schema before the single reindex pass
    /// that populates it for every existing record.
    pub async fn add_field(&self, index_id: &str, field: FieldDef) -> Result<()> {
        let job = self.start_job(index_id, "add_field")?;
        let schema = self.registry.update(index_id, |s| s.add_field(field.clone()));
        let schema = match schema {
            Ok(s) => s,
            Err(err) => {
                self.jobs.finish(&job.index);
                return Err(err);
            }
        };
        let result = self.full_reindex(index_id, &schema, (0.0, 1.0)).await;
        self.jobs.finish(index_id);
        result
    }

    /// Replace a field's definition. Runs the per-record loop twice: once
    /// under the old definition with `delete: true`, to scrub whatever the
    /// `IndexEngine` held for it, then once under the new definition to
    /// rebuild it. The two-pass sequence is the admin-level contract with
    /// the `IndexEngine` trait, not an artifact of the concrete engine (the
    /// in-memory one already clears a field's prior contribution on every
    /// `index_record` call, but a different implementation need not).
    pub async fn update_field(&self, index_id: &str, field_id: &str, new_def: FieldDef) -> Result<()> {
        let job = self.start_job(index_id, "update_field")?;
        let result = self.update_field_inner(index_id, field_id, new_def).await;
        self.jobs.finish(&job.index);
        result
    }

    async fn update_field_inner(&self, index_id: &str, field_id: &str, new_def: FieldDef) -> Result<()> {
        let current = self.registry.get(index_id)?;
        current.require_field(field_id)?;

        let mut scrub_schema = (*current).clone();
        if let Some(f) = scrub_schema.fields.iter_mut().find(|f| f.id == field_id) {
            f.delete = true;
        }
        self.full_reindex(index_id, &scrub_schema, (0.0, 0.5)).await?;

        let updated = self.registry.update(index_id, |s| {
            let pos = s.fields.iter().position(|f| f.id == field_id).ok_or_else(|| Error::not_found(EntityKind::Field, field_id))?;
            s.fields[pos] = new_def.clone();
            Ok(())
        })?;
        self.full_reindex(index_id, &updated, (0.5, 1.0)).await
    }

    /// Remove a field: scrub it from the `IndexEngine` under `delete: true`
    /// first, then drop the definition from the schema.
    pub async fn delete_field(&self, index_id: &str, field_id: &str) -> Result<()> {
        let job = self.start_job(index_id, "delete_field")?;
        let result = self.delete_field_inner(index_id, field_id).await;
        self.jobs.finish(&job.index);
        result
    }

    async fn delete_field_inner(&self, index_id: &str, field_id: &str) -> Result<()> {
        let current = self.registry.get(index_id)?;
        current.require_field(field_id)?;

        let mut scrub_schema = (*current).clone();
        if let Some(f) = scrub_schema.fields.iter_mut().find(|f| f.id == field_id) {
            f.delete = true;
        }
        self.full_reindex(index_id, &scrub_schema, (0.0, 1.0)).await?;

        self.registry.update(index_id, |s| s.remove_field(field_id).map(|_| ()))?;
        Ok(())
    }

    /// Add a sorter, persisting first, then one reindex pass to populate it.
    pub async fn add_sorter(&self, index_id: &str, sorter: SorterDef) -> Result<()> {
        let job = self.start_job(index_id, "add_sorter")?;
        let schema = self.registry.update(index_id, |s| s.add_sorter(sorter.clone()));
        let schema = match schema {
            Ok(s) => s,
            Err(err) => {
                self.jobs.finish(&job.index);
                return Err(err);
            }
        };
        let result = self.full_reindex(index_id, &schema, (0.0, 1.0)).await;
        self.jobs.finish(index_id);
        result
    }

    /// Replace a sorter's definition and recompute its values in one pass.
    /// Sorters have no `delete` flag: a sorter's stored value is simply
    /// overwritten on each `index_record` call, so no scrub pass is needed.
    pub async fn update_sorter(&self, index_id: &str, sorter_id: &str, new_def: SorterDef) -> Result<()> {
        let job = self.start_job(index_id, "update_sorter")?;
        let result = self.update_sorter_inner(index_id, sorter_id, new_def).await;
        self.jobs.finish(&job.index);
        result
    }

    async fn update_sorter_inner(&self, index_id: &str, sorter_id: &str, new_def: SorterDef) -> Result<()> {
        self.registry.get(index_id)?.require_sorter(sorter_id)?;
        let updated = self.registry.update(index_id, |s| {
            let pos = s.sorters.iter().position(|x| x.id == sorter_id).ok_or_else(|| Error::not_found(EntityKind::Sorter, sorter_id))?;
            s.sorters[pos] = new_def.clone();
            Ok(())
        })?;
        self.full_reindex(index_id, &updated, (0.0, 1.0)).await
    }

    /// Remove a sorter. The reindex pass is run against the already-trimmed
    /// schema; with the sorter definition gone, the `IndexEngine` simply
    /// stops being asked to populate it.
    pub async fn delete_sorter(&self, index_id: &str, sorter_id: &str) -> Result<()> {
        let job = self.start_job(index_id, "delete_sorter")?;
        let result = self.delete_sorter_inner(index_id, sorter_id).await;
        self.jobs.finish(&job.index);
        result
    }

    async fn delete_sorter_inner(&self, index_id: &str, sorter_id: &str) -> Result<()> {
        self.registry.get(index_id)?.require_sorter(sorter_id)?;
        let updated = self.registry.update(index_id, |s| s.remove_sorter(sorter_id).map(|_| ()))?;
        self.full_reindex(index_id, &updated, (0.0, 1.0)).await
    }

    /// Walk every record id for `index_id` (via the id-hash pager, which
    /// share-locks the hash for the whole call so concurrent writes see a
    /// consistent snapshot instead of deadlocking it) and re-run
    /// `index_record` against `schema`, advancing the running job's progress
    /// linearly across `progress_range`.
    async fn full_reindex(&self, index_id: &str, schema: &IndexSchema, progress_range: (f64, f64)) -> Result<()> {
        let (start, end) = progress_range;
        let path = id_hash_path(index_id);
        let total = self.record_store.hash_get_all(&path).await?.len().max(1);
        let processed = Arc::new(AtomicUsize::new(0));

        let record_store = self.record_store.clone();
        let index_engine = self.index_engine.clone();
        let jobs = self.jobs.clone();
        let schema = schema.clone();
        let index_id = index_id.to_string();

        self.record_store
            .hash_each_page(&path, REINDEX_PAGE_SIZE, move |page| {
                let record_store = record_store.clone();
                let index_engine = index_engine.clone();
                let jobs = jobs.clone();
                let schema = schema.clone();
                let index_id = index_id.clone();
                let processed = processed.clone();
                async move {
                    for id in &page {
                        if let Some(body) = record_store.get(&index_id, id).await? {
                            index_engine.index_record(&index_id, id, &body, &schema).await?;
                        }
                        let done = processed.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                        let progress = start + (end - start) * (done as f64 / total as f64);
                        jobs.update(&index_id, progress)?;
                    }
                    Ok(())
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_engine::DefaultIndexEngine;
    use crate::query::ast::{Query, TermQuery};
    use crate::schema::SorterType;
    use serde_json::json;
    use std::time::Duration;

    async fn setup() -> (Admin, Arc<IndexRegistry>, Arc<RecordStore>, Arc<dyn IndexEngine>) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(IndexRegistry::open(dir.path()).await.unwrap());
        let record_store = RecordStore::new(dir.path());
        let index_engine: Arc<dyn IndexEngine> = Arc::new(DefaultIndexEngine::new());
        let jobs = Arc::new(JobManager::new(Duration::from_millis(5)));
        let view_manager = ViewManager::new(index_engine.clone(), registry.clone(), record_store.clone());
        let admin = Admin::new(registry.clone(), record_store.clone(), index_engine.clone(), jobs, view_manager);
        (admin, registry, record_store, index_engine)
    }

    #[tokio::test]
    async fn create_index_then_get_index_round_trips() {
        let (admin, registry, _store, _engine) = setup().await;
        admin.create_index("tickets", vec![FieldDef::new("status", "/Status")]).await.unwrap();
        assert!(registry.contains("tickets"));
        assert_eq!(admin.get_index("tickets").unwrap().id, "tickets");
    }

    #[tokio::test]
    async fn create_index_rejects_duplicate() {
        let (admin, _registry, _store, _engine) = setup().await;
        admin.create_index("tickets", vec![FieldDef::new("status", "/Status")]).await.unwrap();
        assert!(admin.create_index("tickets", vec![FieldDef::new("status", "/Status")]).await.is_err());
    }

    #[tokio::test]
    async fn add_field_reindexes_existing_records() {
        let (admin, _registry, record_store, index_engine) = setup().await;
        admin.create_index("tickets", vec![FieldDef::new("status", "/Status")]).await.unwrap();

        record_store.put("tickets", "r1", &json!({"Status": "open", "Body": "urgent fix"})).await.unwrap();
        record_store.hash_put(&id_hash_path("tickets"), "r1", json!(true)).await.unwrap();

        admin.add_field("tickets", FieldDef::new("body", "/Body")).await.unwrap();

        let schema = admin.get_index("tickets").unwrap();
        let query = Query::Term(TermQuery { field: "body".into(), value: "urgent".into() });
        let results = index_engine.search_records("tickets", &query, &schema).unwrap();
        assert!(results.contains_key("r1"));
    }

    #[tokio::test]
    async fn delete_field_scrubs_before_removing_definition() {
        let (admin, _registry, record_store, index_engine) = setup().await;
        admin
            .create_index("tickets", vec![FieldDef::new("status", "/Status"), FieldDef::new("body", "/Body")])
            .await
            .unwrap();
        record_store.put("tickets", "r1", &json!({"Status": "open", "Body": "urgent fix"})).await.unwrap();
        record_store.hash_put(&id_hash_path("tickets"), "r1", json!(true)).await.unwrap();
        let schema = admin.get_index("tickets").unwrap();
        index_engine.index_record("tickets", &"r1".to_string(), &json!({"Status": "open", "Body": "urgent fix"}), &schema).await.unwrap();

        admin.delete_field("tickets", "body").await.unwrap();

        let schema = admin.get_index("tickets").unwrap();
        assert!(schema.field("body").is_none());
        let query = Query::Term(TermQuery { field: "body".into(), value: "urgent".into() });
        let results = index_engine.search_records("tickets", &query, &schema).unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn update_field_rebuilds_under_new_definition() {
        let (admin, _registry, record_store, index_engine) = setup().await;
        admin.create_index("tickets", vec![FieldDef::new("status", "/Status")]).await.unwrap();
        record_store.put("tickets", "r1", &json!({"Status": "Open"})).await.unwrap();
        record_store.hash_put(&id_hash_path("tickets"), "r1", json!(true)).await.unwrap();
        let schema = admin.get_index("tickets").unwrap();
        index_engine.index_record("tickets", &"r1".to_string(), &json!({"Status": "Open"}), &schema).await.unwrap();

        admin.update_field("tickets", "status", FieldDef::new("status", "/Status").with_master_list(true)).await.unwrap();

        let schema = admin.get_index("tickets").unwrap();
        assert!(schema.field("status").unwrap().master_list);
        let summary = index_engine.get_field_summary("tickets", "status", &schema).unwrap();
        assert_eq!(summary.get("open"), Some(&1));
    }

    #[tokio::test]
    async fn add_sorter_then_delete_sorter_round_trip() {
        let (admin, _registry, _store, _engine) = setup().await;
        admin.create_index("tickets", vec![FieldDef::new("status", "/Status")]).await.unwrap();
        admin.add_sorter("tickets", SorterDef::new("created", "/Created", SorterType::Number)).await.unwrap();
        assert!(admin.get_index("tickets").unwrap().sorter("created").is_some());

        admin.delete_sorter("tickets", "created").await.unwrap();
        assert!(admin.get_index("tickets").unwrap().sorter("created").is_none());
    }

    #[tokio::test]
    async fn delete_index_removes_schema_and_records() {
        let (admin, registry, record_store, _engine) = setup().await;
        admin.create_index("tickets", vec![FieldDef::new("status", "/Status")]).await.unwrap();
        record_store.put("tickets", "r1", &json!({"Status": "open"})).await.unwrap();
        record_store.hash_put(&id_hash_path("tickets"), "r1", json!(true)).await.unwrap();

        admin.delete_index("tickets").await.unwrap();

        assert!(!registry.contains("tickets"));
        assert_eq!(record_store.get("tickets", "r1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn mutating_op_rejects_busy_index() {
        let (admin, _registry, _store, _engine) = setup().await;
        admin.create_index("tickets", vec![FieldDef::new("status", "/Status")]).await.unwrap();
        let _job = admin.jobs.create("tickets", "manual").unwrap();
        assert!(admin.update_index("tickets", vec!["the".into()]).await.is_err());
    }
}
