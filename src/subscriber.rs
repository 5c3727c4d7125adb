use crate::core::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use parking_lot::RwLock;

/// Implemented by whatever backs a subscription (`View` or `SummaryView`), so
/// a `Subscriber` can ask its host to detach or recompute its slice without
/// depending on either concrete type.
#[async_trait]
pub trait SubscriptionHost: Send + Sync {
    async fn detach(&self, sub_id: &str);
    async fn recompute(&self, sub_id: &str);
}

/// Delivered over a subscriber's channel. The Rust-idiomatic analogue of a
/// local `change`/`error`/`destroy` event emitter: no network protocol is
/// implied, just an mpsc pair the embedding application polls or awaits.
#[derive(Debug, Clone)]
pub enum SubscriberEvent {
    /// A `View`'s result slice, reconstituted into bodies, after some write.
    Change { records: Vec<Value>, total: usize },
    /// A `SummaryView`'s value histogram.
    Summary { values: HashMap<String, u64> },
    /// Delivered on any IndexEngine/storage failure. Never fatal: a
    /// subscriber with no one polling `recv` simply accumulates nothing,
    /// since the channel itself is the default no-op listener.
    Error(String),
    /// The view was torn down (index deleted, or this was shutdown).
    Destroy,
}

/// A live handle to one subscription. Sort parameters are fixed at
/// `subscribe` time; only the visible window (`offset`/`limit`) can change
/// afterward, via [`Subscriber::change_options`].
pub struct Subscriber {
    id: String,
    index_id: String,
    search_id: String,
    window: RwLock<(usize, Option<usize>)>,
    host: Weak<dyn SubscriptionHost>,
    tx: UnboundedSender<SubscriberEvent>,
    rx: AsyncMutex<UnboundedReceiver<SubscriberEvent>>,
}

impl Subscriber {
    pub(crate) fn new(
        index_id: String,
        search_id: String,
        offset: usize,
        limit: Option<usize>,
        host: Weak<dyn SubscriptionHost>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Subscriber {
            id: Uuid::new_v4().to_string(),
            index_id,
            search_id,
            window: RwLock::new((offset, limit)),
            host,
            tx,
            rx: AsyncMutex::new(rx),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn index_id(&self) -> &str {
        &self.index_id
    }

    pub fn search_id(&self) -> &str {
        &self.search_id
    }

    pub fn window(&self) -> (usize, Option<usize>) {
        *self.window.read()
    }

    /// Receive the next event. Returns `None` once the subscriber has been
    /// dropped on the sending side (equivalent to an implicit `destroy`).
    pub async fn recv(&self) -> Option<SubscriberEvent> {
        self.rx.lock().await.recv().await
    }

    pub(crate) fn emit(&self, event: SubscriberEvent) {
        let _ = self.tx.send(event);
    }

    /// Mutate the visible window and trigger a local recomputation of this
    /// subscriber's slice from the host's current state. Sort parameters are
    /// immutable after subscribe, so only `offset`/`limit` are accepted.
    pub async fn change_options(&self, offset: Option<usize>, limit: Option<Option<usize>>) {
        {
            let mut window = self.window.write();
            if let Some(o) = offset {
                window.0 = o;
            }
            if let Some(l) = limit {
                window.1 = l;
            }
        }
        if let Some(host) = self.host.upgrade() {
            host.recompute(&self.id).await;
        }
    }

    /// Detach from the view/summary view. If that was the last subscriber,
    /// the host destroys itself and deregisters from its manager.
    pub async fn unsubscribe(&self) {
        if let Some(host) = self.host.upgrade() {
            host.detach(&self.id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHost;

    #[async_trait]
    impl SubscriptionHost for NoopHost {
        async fn detach(&self, _sub_id: &str) {}
        async fn recompute(&self, _sub_id: &str) {}
    }

    fn test_host() -> Weak<dyn SubscriptionHost> {
        let host: Arc<dyn SubscriptionHost> = Arc::new(NoopHost);
        Arc::downgrade(&host)
    }

    #[tokio::test]
    async fn emit_then_recv_round_trips() {
        let sub = Subscriber::new("tickets".into(), "abc".into(), 0, Some(10), Weak::<NoopHost>::new());
        sub.emit(SubscriberEvent::Destroy);
        match sub.recv().await {
            Some(SubscriberEvent::Destroy) => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn window_starts_at_subscribe_time_values() {
        let sub = Subscriber::new("tickets".into(), "abc".into(), 5, Some(20), Weak::<NoopHost>::new());
        assert_eq!(sub.window(), (5, Some(20)));
    }

    #[tokio::test]
    async fn change_options_updates_window_and_calls_host() {
        let sub = Subscriber::new("tickets".into(), "abc".into(), 0, Some(10), test_host());
        sub.change_options(Some(5), Some(Some(20))).await;
        assert_eq!(sub.window(), (5, Some(20)));
    }

    #[tokio::test]
    async fn unsubscribe_calls_host_detach() {
        let sub = Subscriber::new("tickets".into(), "abc".into(), 0, Some(10), test_host());
        sub.unsubscribe().await;
    }
}
