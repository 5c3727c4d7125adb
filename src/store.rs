use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::admin::Admin;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::value::{to_number, RecordId, Value};
use crate::index_engine::{DefaultIndexEngine, IndexEngine};
use crate::job::{Job, JobManager};
use crate::mutator::Mutator;
use crate::record::RecordStore;
use crate::schema::{FieldDef, IndexRegistry, IndexSchema, SorterDef, SorterType};
use crate::subscriber::Subscriber;
use crate::view_manager::{summary_field, SubscribeOptions, ViewManager};

/// Options accepted by [`Store::search`]. Distinct from
/// [`SubscribeOptions`](crate::view_manager::SubscribeOptions) because a
/// one-shot search never materialises a persistent `View`.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub offset: usize,
    pub limit: Option<usize>,
    pub sort_by: Option<String>,
    pub sort_dir: i32,
    pub sort_type: SorterType,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions { offset: 0, limit: None, sort_by: None, sort_dir: 1, sort_type: SorterType::String }
    }
}

/// Result of [`Store::search`]. A `#summary:<field>` query short-circuits to
/// `Summary`; every other query returns a paginated `Records` page.
#[derive(Debug, Clone)]
pub enum SearchResult {
    Records { records: Vec<Value>, total: usize },
    Summary { values: HashMap<String, u64> },
}

/// Snapshot of process-wide state, returned by [`Store::get_stats`].
#[derive(Debug, Clone)]
pub struct Stats {
    pub index_count: usize,
    pub jobs: Vec<Job>,
}

/// The public facade: admin lifecycle, record CRUD, ad-hoc search, and live
/// subscriptions, all backed by a shared `RecordStore` + `IndexEngine` +
/// `IndexRegistry` and wired through a `Mutator`/`Admin`/`ViewManager` trio.
pub struct Store {
    registry: Arc<IndexRegistry>,
    record_store: Arc<RecordStore>,
    index_engine: Arc<dyn IndexEngine>,
    jobs: Arc<JobManager>,
    view_manager: Arc<ViewManager>,
    mutator: Mutator,
    admin: Admin,
}

impl Store {
    /// Open (or create) a store rooted at `config.base_path`, reloading any
    /// persisted index schemas.
    pub async fn open(config: Config) -> Result<Arc<Self>> {
        tokio::fs::create_dir_all(&config.base_path).await?;
        let registry = Arc::new(IndexRegistry::open(&config.base_path).await?);
        let record_store = RecordStore::new(&config.base_path);
        let index_engine: Arc<dyn IndexEngine> = Arc::new(DefaultIndexEngine::new());
        let jobs = Arc::new(JobManager::new(config.job_poll_interval));
        let view_manager = ViewManager::new(index_engine.clone(), registry.clone(), record_store.clone());

        let mutator = Mutator::new(record_store.clone(), index_engine.clone(), registry.clone(), view_manager.clone());
        let admin = Admin::new(registry.clone(), record_store.clone(), index_engine.clone(), jobs.clone(), view_manager.clone());

        Ok(Arc::new(Store { registry, record_store, index_engine, jobs, view_manager, mutator, admin }))
    }

    // ---- admin ----

    pub async fn create_index(&self, index_id: &str, fields: Vec<FieldDef>) -> Result<()> {
        self.admin.create_index(index_id, fields).await
    }

    pub async fn update_index(&self, index_id: &str, remove_words: Vec<String>) -> Result<()> {
        self.admin.update_index(index_id, remove_words).await
    }

    pub async fn delete_index(&self, index_id: &str) -> Result<()> {
        self.admin.delete_index(index_id).await
    }

    pub async fn reindex(&self, index_id: &str, field_ids: Option<Vec<String>>) -> Result<()> {
        self.admin.reindex(index_id, field_ids).await
    }

    pub async fn add_field(&self, index_id: &str, field: FieldDef) -> Result<()> {
        self.admin.add_field(index_id, field).await
    }

    pub async fn update_field(&self, index_id: &str, field_id: &str, new_def: FieldDef) -> Result<()> {
        self.admin.update_field(index_id, field_id, new_def).await
    }

    pub async fn delete_field(&self, index_id: &str, field_id: &str) -> Result<()> {
        self.admin.delete_field(index_id, field_id).await
    }

    pub async fn add_sorter(&self, index_id: &str, sorter: SorterDef) -> Result<()> {
        self.admin.add_sorter(index_id, sorter).await
    }

    pub async fn update_sorter(&self, index_id: &str, sorter_id: &str, new_def: SorterDef) -> Result<()> {
        self.admin.update_sorter(index_id, sorter_id, new_def).await
    }

    pub async fn delete_sorter(&self, index_id: &str, sorter_id: &str) -> Result<()> {
        self.admin.delete_sorter(index_id, sorter_id).await
    }

    pub fn get_index(&self, index_id: &str) -> Result<Arc<IndexSchema>> {
        self.admin.get_index(index_id)
    }

    // ---- records ----

    pub async fn insert(&self, index_id: &str, id: &RecordId, record: Value) -> Result<()> {
        self.mutator.insert(index_id, id, record).await
    }

    pub async fn update(&self, index_id: &str, id: &RecordId, patch: Value) -> Result<()> {
        self.mutator.update(index_id, id, patch).await
    }

    pub async fn update_with<F>(&self, index_id: &str, id: &RecordId, transform: F) -> Result<()>
    where
        F: FnOnce(Value) -> Option<Value>,
    {
        self.mutator.update_with(index_id, id, transform).await
    }

    pub async fn delete(&self, index_id: &str, id: &RecordId) -> Result<()> {
        self.mutator.delete(index_id, id).await
    }

    pub async fn get(&self, index_id: &str, id: &RecordId) -> Result<Option<Value>> {
        self.record_store.get(index_id, id).await
    }

    pub async fn get_many(&self, index_id: &str, ids: &[RecordId]) -> Result<HashMap<RecordId, Value>> {
        self.record_store.get_multi(index_id, ids).await
    }

    /// Insert every `(id, record)` pair. Aborts at the first failure;
    /// records already inserted are not rolled back, matching the
    /// not-transactional contract admin bulk ops share with `reindex`.
    pub async fn bulk_insert(&self, index_id: &str, records: Vec<(RecordId, Value)>) -> Result<()> {
        for (id, record) in records {
            self.mutator.insert(index_id, &id, record).await?;
        }
        Ok(())
    }

    pub async fn bulk_update(&self, index_id: &str, ids: &[RecordId], patch: Value) -> Result<()> {
        for id in ids {
            self.mutator.update(index_id, id, patch.clone()).await?;
        }
        Ok(())
    }

    pub async fn bulk_delete(&self, index_id: &str, ids: &[RecordId]) -> Result<()> {
        for id in ids {
            self.mutator.delete(index_id, id).await?;
        }
        Ok(())
    }

    // ---- queries ----

    /// One-shot search. A query matching `/^\s*#summary:(\w+)/i` is routed
    /// directly to `IndexEngine::get_field_summary`, bypassing the
    /// `IndexEngine::search_records`/`sort_records`/pagination path entirely
    /// — this is the one-shot analogue of subscribing to a `SummaryView`.
    pub async fn search(&self, index_id: &str, query: &str, opts: SearchOptions) -> Result<SearchResult> {
        let schema = self.registry.get(index_id)?;

        if let Some(field_id) = summary_field(query) {
            let values = self.index_engine.get_field_summary(index_id, &field_id, &schema)?;
            return Ok(SearchResult::Summary { values });
        }

        let sort_by = opts.sort_by.clone().unwrap_or_else(|| "_id".to_string());
        let parsed = self.index_engine.parse_query(query)?;
        let matched = self.index_engine.search_records(index_id, &parsed, &schema)?;

        let sort_pairs: Vec<(RecordId, Value)> = if sort_by == "_id" {
            sort_by_id(matched.keys().cloned().collect(), opts.sort_type, opts.sort_dir)
        } else {
            self.index_engine.sort_records(index_id, &matched, &sort_by, opts.sort_dir, &schema)?
        };

        let total = sort_pairs.len();
        let (start, end) = paginate(total, opts.offset, opts.limit);
        let ids: Vec<RecordId> = sort_pairs[start..end].iter().map(|(id, _)| id.clone()).collect();
        let bodies = self.record_store.get_multi(index_id, &ids).await?;
        let records = ids.iter().filter_map(|id| bodies.get(id).cloned()).collect();

        Ok(SearchResult::Records { records, total })
    }

    pub async fn subscribe(&self, index_id: &str, query: &str, opts: SubscribeOptions) -> Result<Arc<Subscriber>> {
        self.view_manager.subscribe(index_id, query, opts).await
    }

    // ---- ops ----

    pub fn get_stats(&self) -> Stats {
        Stats {
            index_count: self.registry.list().len(),
            jobs: self.registry.list().iter().filter_map(|s| self.jobs.get(&s.id)).collect(),
        }
    }

    pub async fn wait_for_all_jobs(&self) {
        self.jobs.wait_for_all().await
    }

    /// Drain in-flight admin jobs, then tear down every live view so
    /// subscribers see a clean `destroy` rather than silently stalling.
    pub async fn shutdown(&self) {
        self.wait_for_all_jobs().await;
        for schema in self.registry.list() {
            self.view_manager.destroy_index(&schema.id).await;
        }
    }
}

fn sort_by_id(mut ids: Vec<RecordId>, sort_type: SorterType, sort_dir: i32) -> Vec<(RecordId, Value)> {
    ids.sort_by(|a, b| {
        let ord = match sort_type {
            SorterType::Number => match (to_number(&Value::String(a.clone())), to_number(&Value::String(b.clone()))) {
                (Some(an), Some(bn)) => an.partial_cmp(&bn).unwrap_or(Ordering::Equal),
                _ => a.cmp(b),
            },
            SorterType::String => a.cmp(b),
        };
        if sort_dir < 0 {
            ord.reverse()
        } else {
            ord
        }
    });
    ids.into_iter().map(|id| (id.clone(), Value::String(id))).collect()
}

fn paginate(total: usize, offset: usize, limit: Option<usize>) -> (usize, usize) {
    let start = offset.min(total);
    let end = match limit {
        Some(l) => start.saturating_add(l).min(total),
        None => total,
    };
    (start, end)
}
