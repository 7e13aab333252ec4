use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// A typed event subject with queued, non-overlapping delivery.
///
/// Every listener owns an unbounded FIFO queue drained by a dedicated task,
/// so an async callback finishes before the next event for that listener is
/// handed over. Emission never blocks on listeners. Listeners added or
/// removed during delivery are observed by the next emission.
pub struct Subject<T> {
    name: &'static str,
    inner: Arc<Mutex<SubjectInner<T>>>,
}

struct SubjectInner<T> {
    next_id: u64,
    listeners: Vec<ListenerEntry<T>>,
}

struct ListenerEntry<T> {
    id: u64,
    tx: mpsc::UnboundedSender<T>,
}

/// Handle returned by `subscribe`; dropping it does NOT unsubscribe.
pub struct Subscription {
    id: u64,
    detach: Arc<dyn Fn(u64) + Send + Sync>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        (self.detach)(self.id);
    }
}

impl<T: Clone + Send + 'static> Subject<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(SubjectInner {
                next_id: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a listener. Events already queued before `unsubscribe` are
    /// still delivered; nothing emitted afterwards is.
    pub fn subscribe<F, Fut>(&self, callback: F) -> Subscription
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        let id = {
            let mut inner = self.inner.lock().expect("subject lock poisoned");
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push(ListenerEntry { id, tx });
            id
        };

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                callback(event).await;
            }
        });

        Subscription {
            id,
            detach: self.detach_fn(),
        }
    }

    /// Deliver at most one event matching `filter`, then auto-unsubscribe.
    pub fn subscribe_once<P, F, Fut>(&self, filter: P, callback: F) -> Subscription
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<T>();
        let id = {
            let mut inner = self.inner.lock().expect("subject lock poisoned");
            let id = inner.next_id;
            inner.next_id += 1;
            inner.listeners.push(ListenerEntry { id, tx });
            id
        };

        let detach = self.detach_fn();
        let detach_for_task = Arc::clone(&detach);
        tokio::spawn(async move {
            let mut callback = Some(callback);
            while let Some(event) = rx.recv().await {
                if filter(&event) {
                    detach_for_task(id);
                    if let Some(callback) = callback.take() {
                        callback(event).await;
                    }
                    break;
                }
            }
        });

        Subscription { id, detach }
    }

    /// Emit to every currently subscribed listener, in subscription order.
    pub fn emit(&self, event: T) {
        let mut inner = self.inner.lock().expect("subject lock poisoned");
        inner
            .listeners
            .retain(|listener| listener.tx.send(event.clone()).is_ok());
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().expect("subject lock poisoned").listeners.len()
    }

    fn detach_fn(&self) -> Arc<dyn Fn(u64) + Send + Sync> {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |id| {
            let mut inner = inner.lock().expect("subject lock poisoned");
            inner.listeners.retain(|listener| listener.id != id);
        })
    }
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: Arc::clone(&self.inner),
        }
    }
}
