use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::core::error::Result;
use crate::index_engine::IndexEngine;
use crate::mutator::WriteState;
use crate::query::ast::Query;
use crate::record::RecordStore;
use crate::schema::{IndexRegistry, SorterType};
use crate::subscriber::Subscriber;
use crate::summary_view::SummaryView;
use crate::view::View;

pub struct SubscribeOptions {
    pub offset: usize,
    pub limit: Option<usize>,
    pub sort_by: Option<String>,
    pub sort_dir: i32,
    pub sort_type: SorterType,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        SubscribeOptions { offset: 0, limit: None, sort_by: None, sort_dir: 1, sort_type: SorterType::String }
    }
}

pub(crate) fn summary_field(query: &str) -> Option<String> {
    let trimmed = query.trim_start();
    let rest = trimmed.strip_prefix("#summary:").or_else(|| {
        let lower = trimmed.to_ascii_lowercase();
        lower.starts_with("#summary:").then(|| &trimmed[9..])
    })?;
    let field: String = rest.chars().take_while(|c| c.is_alphanumeric() || *c == '_').collect();
    (!field.is_empty()).then_some(field)
}

fn search_id_for(query: &Query, sort_by: &str, sort_dir: i32) -> String {
    let signature = serde_json::to_string(query).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    signature.hash(&mut hasher);
    sort_by.hash(&mut hasher);
    sort_dir.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Owns every live `View` and `SummaryView`, keyed by `(index_id, search_id)`
/// and `(index_id, field_id)` respectively. Write notifications are handed
/// off to the `RecordStore`'s single-consumer background queue so a writer
/// never blocks on view recomputation.
pub struct ViewManager {
    index_engine: Arc<dyn IndexEngine>,
    registry: Arc<IndexRegistry>,
    record_store: Arc<RecordStore>,
    views: AsyncMutex<HashMap<(String, String), Arc<View>>>,
    summary_views: AsyncMutex<HashMap<(String, String), Arc<SummaryView>>>,
}

impl ViewManager {
    pub fn new(index_engine: Arc<dyn IndexEngine>, registry: Arc<IndexRegistry>, record_store: Arc<RecordStore>) -> Arc<Self> {
        Arc::new(ViewManager {
            index_engine,
            registry,
            record_store,
            views: AsyncMutex::new(HashMap::new()),
            summary_views: AsyncMutex::new(HashMap::new()),
        })
    }

    pub async fn subscribe(self: &Arc<Self>, index_id: &str, query: &str, opts: SubscribeOptions) -> Result<Arc<Subscriber>> {
        if let Some(field_id) = summary_field(query) {
            return self.subscribe_summary(index_id, &field_id, opts).await;
        }
        self.subscribe_view(index_id, query, opts).await
    }

    async fn subscribe_view(self: &Arc<Self>, index_id: &str, query: &str, opts: SubscribeOptions) -> Result<Arc<Subscriber>> {
        let parsed = self.index_engine.parse_query(query)?;
        let sort_by = opts.sort_by.clone().unwrap_or_else(|| "_id".to_string());
        let search_id = search_id_for(&parsed, &sort_by, opts.sort_dir);
        let key = (index_id.to_string(), search_id.clone());

        let view = {
            let mut views = self.views.lock().await;
            if let Some(view) = views.get(&key) {
                view.clone()
            } else {
                let view = View::new(
                    index_id.to_string(),
                    search_id.clone(),
                    parsed,
                    sort_by,
                    opts.sort_dir,
                    opts.sort_type,
                    self.index_engine.clone(),
                    self.registry.clone(),
                    self.record_store.clone(),
                    Arc::downgrade(self),
                )
                .await?;
                views.insert(key.clone(), view.clone());
                view
            }
        };

        let sub = Subscriber::new(index_id.to_string(), search_id, opts.offset, opts.limit, Arc::downgrade(&view));
        view.attach(sub.clone()).await;
        Ok(sub)
    }

    async fn subscribe_summary(
        self: &Arc<Self>,
        index_id: &str,
        field_id: &str,
        opts: SubscribeOptions,
    ) -> Result<Arc<Subscriber>> {
        let key = (index_id.to_string(), field_id.to_string());
        let view = {
            let mut summary_views = self.summary_views.lock().await;
            if let Some(view) = summary_views.get(&key) {
                view.clone()
            } else {
                let view = SummaryView::new(
                    index_id.to_string(),
                    field_id.to_string(),
                    self.index_engine.clone(),
                    self.registry.clone(),
                    Arc::downgrade(self),
                )
                .await?;
                summary_views.insert(key.clone(), view.clone());
                view
            }
        };

        let sub = Subscriber::new(index_id.to_string(), field_id.to_string(), opts.offset, opts.limit, Arc::downgrade(&view));
        view.attach(sub.clone()).await;
        Ok(sub)
    }

    /// Enqueue `updateViews` for `index_id` onto the background queue. The
    /// write's caller gets control back immediately; view recomputation runs
    /// later, in FIFO order relative to other enqueued work.
    pub fn notify(self: &Arc<Self>, index_id: &str, state: WriteState) {
        let this = Arc::clone(self);
        let index_id = index_id.to_string();
        self.record_store.enqueue(move || async move { this.apply(&index_id, &state).await });
    }

    async fn apply(&self, index_id: &str, state: &WriteState) {
        if !self.registry.contains(index_id) {
            warn!(index = index_id, id = %state.id, "view update queued for an index with no registered schema, dropping");
            return;
        }
        let views: Vec<Arc<View>> = self
            .views
            .lock()
            .await
            .iter()
            .filter(|((idx, _), _)| idx == index_id)
            .map(|(_, v)| v.clone())
            .collect();
        for view in views {
            view.update(state).await;
        }

        let summaries: Vec<Arc<SummaryView>> = self
            .summary_views
            .lock()
            .await
            .iter()
            .filter(|((idx, _), _)| idx == index_id)
            .map(|(_, v)| v.clone())
            .collect();
        for summary in summaries {
            summary.update(state).await;
        }
    }

    pub(crate) async fn deregister_view(&self, index_id: &str, search_id: &str) {
        self.views.lock().await.remove(&(index_id.to_string(), search_id.to_string()));
    }

    pub(crate) async fn deregister_summary(&self, index_id: &str, field_id: &str) {
        self.summary_views.lock().await.remove(&(index_id.to_string(), field_id.to_string()));
    }

    /// Tear down every `View` and `SummaryView` for an index. Called by
    /// admin's `deleteIndex` before it iterates records.
    pub async fn destroy_index(&self, index_id: &str) {
        let views: Vec<Arc<View>> = {
            let mut guard = self.views.lock().await;
            let keys: Vec<_> = guard.keys().filter(|(idx, _)| idx == index_id).cloned().collect();
            keys.iter().filter_map(|k| guard.remove(k)).collect()
        };
        for view in views {
            view.destroy().await;
        }

        let summaries: Vec<Arc<SummaryView>> = {
            let mut guard = self.summary_views.lock().await;
            let keys: Vec<_> = guard.keys().filter(|(idx, _)| idx == index_id).cloned().collect();
            keys.iter().filter_map(|k| guard.remove(k)).collect()
        };
        for summary in summaries {
            summary.destroy().await;
        }
    }
}
