use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex as AsyncMutex;

use crate::core::error::Result;
use crate::core::value::{to_number, to_text, RecordId, Value};
use crate::index_engine::IndexEngine;
use crate::mutator::{Action, WriteState};
use crate::query::ast::Query;
use crate::record::RecordStore;
use crate::schema::{IndexRegistry, IndexSchema, SorterType};
use crate::subscriber::{Subscriber, SubscriberEvent, SubscriptionHost};
use crate::view_manager::ViewManager;

struct ViewInner {
    sort_pairs: Vec<(RecordId, Value)>,
    results: HashMap<RecordId, usize>,
    subscribers: HashMap<String, Arc<Subscriber>>,
}

/// One canonical `(query, sort)` result set, incrementally maintained as
/// writes arrive. Multiple subscribers with the same `(index, search_id)`
/// share one `View`; each keeps only its own visible window.
pub struct View {
    index_id: String,
    search_id: String,
    query: Query,
    sort_by: String,
    sort_dir: i32,
    sort_type: SorterType,
    index_engine: Arc<dyn IndexEngine>,
    registry: Arc<IndexRegistry>,
    record_store: Arc<RecordStore>,
    manager: Weak<ViewManager>,
    inner: AsyncMutex<ViewInner>,
}

impl View {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn new(
        index_id: String,
        search_id: String,
        query: Query,
        sort_by: String,
        sort_dir: i32,
        sort_type: SorterType,
        index_engine: Arc<dyn IndexEngine>,
        registry: Arc<IndexRegistry>,
        record_store: Arc<RecordStore>,
        manager: Weak<ViewManager>,
    ) -> Result<Arc<Self>> {
        let schema = registry.get(&index_id)?;
        let results = index_engine.search_records(&index_id, &query, &schema)?;
        let sort_pairs = build_sort_pairs(&index_engine, &index_id, &schema, &results, &sort_by, sort_dir, sort_type)?;
        let positions = index_positions(&sort_pairs);

        Ok(Arc::new(View {
            index_id,
            search_id,
            query,
            sort_by,
            sort_dir,
            sort_type,
            index_engine,
            registry,
            record_store,
            manager,
            inner: AsyncMutex::new(ViewInner { sort_pairs, results: positions, subscribers: HashMap::new() }),
        }))
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn search_id(&self) -> &str {
        &self.search_id
    }

    pub(crate) async fn attach(&self, sub: Arc<Subscriber>) {
        let mut inner = self.inner.lock().await;
        let (start, end) = window_bounds(sub.window(), inner.sort_pairs.len());
        let total = inner.sort_pairs.len();
        let bodies = self.load_bodies(&inner.sort_pairs[start..end]).await;
        deliver_slice(&sub, &inner.sort_pairs[start..end], &bodies, total);
        inner.subscribers.insert(sub.id().to_string(), sub);
    }

    fn effective_sort_type(&self, schema: &IndexSchema) -> SorterType {
        if self.sort_by == "_id" {
            self.sort_type
        } else {
            schema.sorter(&self.sort_by).map(|s| s.sorter_type).unwrap_or(SorterType::String)
        }
    }

    fn compare(&self, a: &Value, b: &Value, sort_type: SorterType) -> Ordering {
        let ord = match sort_type {
            SorterType::Number => to_number(a)
                .unwrap_or(f64::NEG_INFINITY)
                .partial_cmp(&to_number(b).unwrap_or(f64::NEG_INFINITY))
                .unwrap_or(Ordering::Equal),
            SorterType::String => to_text(a).cmp(&to_text(b)),
        };
        if self.sort_dir < 0 {
            ord.reverse()
        } else {
            ord
        }
    }

    fn resort(&self, inner: &mut ViewInner, schema: &IndexSchema) {
        let sort_type = self.effective_sort_type(schema);
        inner.sort_pairs.sort_by(|a, b| self.compare(&a.1, &b.1, sort_type));
        inner.results = index_positions(&inner.sort_pairs);
    }

    async fn load_bodies(&self, slice: &[(RecordId, Value)]) -> HashMap<RecordId, Value> {
        let ids: Vec<RecordId> = slice.iter().map(|(id, _)| id.clone()).collect();
        self.record_store.get_multi(&self.index_id, &ids).await.unwrap_or_default()
    }

    /// Batch-load the union of all subscribers' visible windows once, then
    /// hand each its own slice. Used when the result set or sort order may
    /// have shifted (add/remove/resort).
    async fn notify_all(&self, inner: &ViewInner) {
        let total = inner.sort_pairs.len();
        let targets: Vec<(Arc<Subscriber>, usize, usize)> = inner
            .subscribers
            .values()
            .map(|sub| {
                let (start, end) = window_bounds(sub.window(), total);
                (sub.clone(), start, end)
            })
            .collect();
        self.deliver(inner, targets).await;
    }

    /// Notify only subscribers whose window currently includes `pos`. Used
    /// when a record's membership and sort value are both unchanged, so
    /// other subscribers have nothing new to see.
    async fn notify_visible(&self, inner: &ViewInner, pos: usize) {
        let total = inner.sort_pairs.len();
        let targets: Vec<(Arc<Subscriber>, usize, usize)> = inner
            .subscribers
            .values()
            .filter_map(|sub| {
                let (start, end) = window_bounds(sub.window(), total);
                (pos >= start && pos < end).then(|| (sub.clone(), start, end))
            })
            .collect();
        self.deliver(inner, targets).await;
    }

    async fn deliver(&self, inner: &ViewInner, targets: Vec<(Arc<Subscriber>, usize, usize)>) {
        if targets.is_empty() {
            return;
        }
        let total = inner.sort_pairs.len();
        let mut needed: HashSet<RecordId> = HashSet::new();
        for (_, start, end) in &targets {
            needed.extend(inner.sort_pairs[*start..*end].iter().map(|(id, _)| id.clone()));
        }
        let ids: Vec<RecordId> = needed.into_iter().collect();
        let bodies = match self.record_store.get_multi(&self.index_id, &ids).await {
            Ok(b) => b,
            Err(err) => {
                for (sub, _, _) in &targets {
                    sub.emit(SubscriberEvent::Error(err.to_string()));
                }
                return;
            }
        };
        for (sub, start, end) in targets {
            deliver_slice(&sub, &inner.sort_pairs[start..end], &bodies, total);
        }
    }

    fn remove_record(&self, inner: &mut ViewInner, id: &RecordId) {
        if let Some(pos) = inner.results.remove(id) {
            inner.sort_pairs.remove(pos);
            inner.results = index_positions(&inner.sort_pairs);
        }
    }

    /// Apply a change reported by the `Mutator`. Runs off the writer's
    /// critical section, on the `ViewManager`'s single-consumer queue.
    pub(crate) async fn update(&self, state: &WriteState) {
        let Ok(schema) = self.registry.get(&self.index_id) else { return };
        let mut inner = self.inner.lock().await;
        let old_hit = inner.results.contains_key(&state.id);

        match state.action {
            Action::Delete => {
                if old_hit {
                    self.remove_record(&mut inner, &state.id);
                    self.notify_all(&inner).await;
                }
            }
            Action::Upsert => {
                let new_hit = self.index_engine.search_single(&self.query, &state.idx_data);
                match (old_hit, new_hit) {
                    (false, true) => {
                        let value = sort_value(&state.id, &state.idx_data, &self.sort_by);
                        inner.sort_pairs.push((state.id.clone(), value));
                        self.resort(&mut inner, &schema);
                        self.notify_all(&inner).await;
                    }
                    (true, false) => {
                        self.remove_record(&mut inner, &state.id);
                        self.notify_all(&inner).await;
                    }
                    (true, true) if self.sort_by != "_id" => {
                        let pos = inner.results[&state.id];
                        let new_value = state.idx_data.sorters.get(&self.sort_by).cloned().unwrap_or(Value::Null);
                        if inner.sort_pairs[pos].1 != new_value {
                            inner.sort_pairs[pos].1 = new_value;
                            self.resort(&mut inner, &schema);
                            self.notify_all(&inner).await;
                        } else {
                            self.notify_visible(&inner, pos).await;
                        }
                    }
                    (true, true) => {
                        let pos = inner.results[&state.id];
                        self.notify_visible(&inner, pos).await;
                    }
                    (false, false) => {}
                }
            }
        }
    }

    pub(crate) async fn destroy(&self) {
        let subs: Vec<Arc<Subscriber>> = {
            let mut inner = self.inner.lock().await;
            let subs = inner.subscribers.values().cloned().collect();
            inner.subscribers.clear();
            subs
        };
        for sub in subs {
            sub.emit(SubscriberEvent::Destroy);
        }
        if let Some(manager) = self.manager.upgrade() {
            manager.deregister_view(&self.index_id, &self.search_id).await;
        }
    }
}

#[async_trait]
impl SubscriptionHost for View {
    async fn detach(&self, sub_id: &str) {
        let empty = {
            let mut inner = self.inner.lock().await;
            inner.subscribers.remove(sub_id);
            inner.subscribers.is_empty()
        };
        if empty {
            self.destroy().await;
        }
    }

    async fn recompute(&self, sub_id: &str) {
        let inner = self.inner.lock().await;
        let Some(sub) = inner.subscribers.get(sub_id) else { return };
        let (start, end) = window_bounds(sub.window(), inner.sort_pairs.len());
        let total = inner.sort_pairs.len();
        let bodies = self.load_bodies(&inner.sort_pairs[start..end]).await;
        deliver_slice(sub, &inner.sort_pairs[start..end], &bodies, total);
    }
}

fn window_bounds(window: (usize, Option<usize>), total: usize) -> (usize, usize) {
    let (offset, limit) = window;
    let start = offset.min(total);
    let end = limit.map(|l| start.saturating_add(l).min(total)).unwrap_or(total);
    (start, end)
}

fn deliver_slice(sub: &Subscriber, slice: &[(RecordId, Value)], bodies: &HashMap<RecordId, Value>, total: usize) {
    let records: Vec<Value> = slice.iter().filter_map(|(id, _)| bodies.get(id).cloned()).collect();
    sub.emit(SubscriberEvent::Change { records, total });
}

fn index_positions(pairs: &[(RecordId, Value)]) -> HashMap<RecordId, usize> {
    pairs.iter().enumerate().map(|(i, (id, _))| (id.clone(), i)).collect()
}

fn sort_value(id: &RecordId, idx_data: &crate::query::types::IdxData, sort_by: &str) -> Value {
    if sort_by == "_id" {
        Value::String(id.clone())
    } else {
        idx_data.sorters.get(sort_by).cloned().unwrap_or(Value::Null)
    }
}

#[allow(clippy::too_many_arguments)]
fn build_sort_pairs(
    index_engine: &Arc<dyn IndexEngine>,
    index_id: &str,
    schema: &IndexSchema,
    results: &HashMap<RecordId, f64>,
    sort_by: &str,
    sort_dir: i32,
    sort_type: SorterType,
) -> Result<Vec<(RecordId, Value)>> {
    if sort_by == "_id" {
        let mut pairs: Vec<(RecordId, Value)> =
            results.keys().map(|id| (id.clone(), Value::String(id.clone()))).collect();
        pairs.sort_by(|a, b| {
            let ord = match sort_type {
                SorterType::Number => to_number(&a.1)
                    .unwrap_or(f64::NEG_INFINITY)
                    .partial_cmp(&to_number(&b.1).unwrap_or(f64::NEG_INFINITY))
                    .unwrap_or(Ordering::Equal),
                SorterType::String => to_text(&a.1).cmp(&to_text(&b.1)),
            };
            if sort_dir < 0 {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(pairs)
    } else {
        index_engine.sort_records(index_id, results, sort_by, sort_dir, schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_engine::DefaultIndexEngine;
    use crate::query::ast::TermQuery;
    use crate::schema::FieldDef;
    use serde_json::json;
    use std::path::Path;

    async fn setup(dir: &Path) -> (Arc<dyn IndexEngine>, Arc<IndexRegistry>, Arc<RecordStore>) {
        let registry = Arc::new(IndexRegistry::open(dir).await.unwrap());
        let schema = IndexSchema::new("tickets", vec![FieldDef::new("status", "/Status")]).unwrap();
        registry.insert(schema).unwrap();
        (Arc::new(DefaultIndexEngine::new()), registry, RecordStore::new(dir))
    }

    struct NoopHost;

    #[async_trait]
    impl SubscriptionHost for NoopHost {
        async fn detach(&self, _sub_id: &str) {}
        async fn recompute(&self, _sub_id: &str) {}
    }

    fn noop_host() -> Weak<dyn SubscriptionHost> {
        Arc::downgrade(&(Arc::new(NoopHost) as Arc<dyn SubscriptionHost>))
    }

    #[tokio::test]
    async fn initial_search_finds_existing_matches() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, registry, store) = setup(dir.path()).await;
        let schema = registry.get("tickets").unwrap();
        store.put("tickets", "r1", &json!({"Status": "open"})).await.unwrap();
        engine.index_record("tickets", &"r1".to_string(), &json!({"Status": "open"}), &schema).await.unwrap();

        let query = Query::Term(TermQuery { field: "status".into(), value: "open".into() });
        let view = View::new(
            "tickets".into(),
            "sid".into(),
            query,
            "_id".into(),
            1,
            SorterType::String,
            engine,
            registry,
            store,
            Weak::new(),
        )
        .await
        .unwrap();

        let sub = Subscriber::new("tickets".into(), "sid".into(), 0, None, noop_host());
        view.attach(sub.clone()).await;
        match sub.recv().await {
            Some(SubscriberEvent::Change { records, total }) => {
                assert_eq!(total, 1);
                assert_eq!(records, vec![json!({"Status": "open"})]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_adds_newly_matching_record() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, registry, store) = setup(dir.path()).await;
        let schema = registry.get("tickets").unwrap();

        let query = Query::Term(TermQuery { field: "status".into(), value: "open".into() });
        let view = View::new(
            "tickets".into(),
            "sid".into(),
            query,
            "_id".into(),
            1,
            SorterType::String,
            engine.clone(),
            registry,
            store.clone(),
            Weak::new(),
        )
        .await
        .unwrap();

        let sub = Subscriber::new("tickets".into(), "sid".into(), 0, None, noop_host());
        view.attach(sub.clone()).await;
        let _ = sub.recv().await;

        let record = json!({"Status": "open"});
        store.put("tickets", "r1", &record).await.unwrap();
        let idx_data = engine.index_record("tickets", &"r1".to_string(), &record, &schema).await.unwrap();
        view.update(&WriteState {
            action: Action::Upsert,
            id: "r1".to_string(),
            idx_data,
            new_record: true,
            changed: HashMap::new(),
        })
        .await;

        match sub.recv().await {
            Some(SubscriberEvent::Change { records, total }) => {
                assert_eq!(total, 1);
                assert_eq!(records, vec![record]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
