use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::Mutex as AsyncMutex;

use crate::core::error::Result;
use crate::index_engine::IndexEngine;
use crate::mutator::{Action, WriteState};
use crate::schema::IndexRegistry;
use crate::subscriber::{Subscriber, SubscriberEvent, SubscriptionHost};
use crate::view_manager::ViewManager;

struct SummaryInner {
    values: HashMap<String, u64>,
    subscribers: HashMap<String, Arc<Subscriber>>,
}

/// A live value histogram over one `master_list` field, recomputed whenever
/// a write touches that field. Unlike `View`, membership is the whole
/// index — there is no incremental add/remove logic, only "recompute or
/// don't".
pub struct SummaryView {
    index_id: String,
    field_id: String,
    index_engine: Arc<dyn IndexEngine>,
    registry: Arc<IndexRegistry>,
    manager: Weak<ViewManager>,
    inner: AsyncMutex<SummaryInner>,
}

impl SummaryView {
    pub(crate) async fn new(
        index_id: String,
        field_id: String,
        index_engine: Arc<dyn IndexEngine>,
        registry: Arc<IndexRegistry>,
        manager: Weak<ViewManager>,
    ) -> Result<Arc<Self>> {
        let schema = registry.get(&index_id)?;
        let values = index_engine.get_field_summary(&index_id, &field_id, &schema)?;
        Ok(Arc::new(SummaryView {
            index_id,
            field_id,
            index_engine,
            registry,
            manager,
            inner: AsyncMutex::new(SummaryInner { values, subscribers: HashMap::new() }),
        }))
    }

    /// Attach a subscriber; it synchronously receives the cached values,
    /// even if they predate this subscription.
    pub(crate) async fn attach(&self, sub: Arc<Subscriber>) {
        let mut inner = self.inner.lock().await;
        sub.emit(SubscriberEvent::Summary { values: inner.values.clone() });
        inner.subscribers.insert(sub.id().to_string(), sub);
    }

    fn should_recompute(&self, state: &WriteState) -> bool {
        state.action == Action::Delete || state.new_record || state.changed.get(&self.field_id).copied().unwrap_or(false)
    }

    pub(crate) async fn update(&self, state: &WriteState) {
        if !self.should_recompute(state) {
            return;
        }
        self.recompute_and_notify().await;
    }

    async fn recompute_and_notify(&self) {
        let schema = match self.registry.get(&self.index_id) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut inner = self.inner.lock().await;
        match self.index_engine.get_field_summary(&self.index_id, &self.field_id, &schema) {
            Ok(values) => {
                inner.values = values.clone();
                for sub in inner.subscribers.values() {
                    sub.emit(SubscriberEvent::Summary { values: values.clone() });
                }
            }
            Err(err) => {
                for sub in inner.subscribers.values() {
                    sub.emit(SubscriberEvent::Error(err.to_string()));
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
            manager.deregister_summary(&self.index_id, &self.field_id).await;
        }
    }
}

#[async_trait]
impl SubscriptionHost for SummaryView {
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

    /// A `SummaryView` has no per-subscriber window, so recompute just
    /// resends the current cached values.
    async fn recompute(&self, sub_id: &str) {
        let inner = self.inner.lock().await;
        if let Some(sub) = inner.subscribers.get(sub_id) {
            sub.emit(SubscriberEvent::Summary { values: inner.values.clone() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_engine::DefaultIndexEngine;
    use crate::query::types::IdxData;
    use crate::schema::{FieldDef, IndexSchema};
    use serde_json::json;

    async fn setup() -> (Arc<dyn IndexEngine>, Arc<IndexRegistry>) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(IndexRegistry::open(dir.path()).await.unwrap());
        let schema = IndexSchema::new("tickets", vec![FieldDef::new("status", "/Status").with_master_list(true)]).unwrap();
        registry.insert(schema).unwrap();
        (Arc::new(DefaultIndexEngine::new()), registry)
    }

    #[tokio::test]
    async fn attach_delivers_cached_values_synchronously() {
        let (engine, registry) = setup().await;
        let schema = registry.get("tickets").unwrap();
        engine.index_record("tickets", &"r1".to_string(), &json!({"Status": "open"}), &schema).await.unwrap();

        let view = SummaryView::new("tickets".into(), "status".into(), engine, registry, Weak::new()).await.unwrap();
        let sub = Subscriber::new("tickets".into(), "status".into(), 0, None, Weak::<SummaryView>::new());
        view.attach(sub.clone()).await;

        match sub.recv().await {
            Some(SubscriberEvent::Summary { values }) => assert_eq!(values.get("open"), Some(&1)),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_recomputes_only_on_relevant_changes() {
        let (engine, registry) = setup().await;
        let view = SummaryView::new("tickets".into(), "status".into(), engine, registry, Weak::new()).await.unwrap();
        let sub = Subscriber::new("tickets".into(), "status".into(), 0, None, Weak::<SummaryView>::new());
        view.attach(sub.clone()).await;
        let _ = sub.recv().await;

        let unrelated = WriteState {
            action: Action::Upsert,
            id: "r1".to_string(),
            idx_data: IdxData::new(),
            new_record: false,
            changed: HashMap::from([("other".to_string(), true)]),
        };
        view.update(&unrelated).await;
        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(20), sub.recv()).await.is_err();
        assert!(timed_out);

        let relevant = WriteState {
            action: Action::Upsert,
            id: "r1".to_string(),
            idx_data: IdxData::new(),
            new_record: false,
            changed: HashMap::from([("status".to_string(), true)]),
        };
        view.update(&relevant).await;
        assert!(matches!(sub.recv().await, Some(SubscriberEvent::Summary { .. })));
    }
}
