//! Typed fan-out notification bus.
//!
//! Every entity of the subscription engine exposes a handful of these buses
//! (new topic, status change, published, ...). Registering a listener
//! returns a [`ListenerId`] that removes it again.
//!
//! Emitting never waits for listeners: each one is dispatched as its own
//! tokio task, so there is no ordering between listeners of one event nor
//! between a listener and the code that emitted the event.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

type Listener<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

/// Handle returned by [`NotificationBus::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Registry of callbacks fired for every emitted `T`.
pub struct NotificationBus<T> {
    next_id: AtomicU64,
    listeners: RwLock<HashMap<ListenerId, Listener<T>>>,
}

impl<T> NotificationBus<T>
where
    T: Clone + Send + 'static,
{
    /// Create a bus without listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: RwLock::new(HashMap::new()),
        }
    }

    /// Register a listener.
    pub fn listen<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().insert(id, Arc::new(listener));
        id
    }

    /// Register a listener that forwards every event into a channel.
    ///
    /// Dropping the receiver does not unregister the listener; call
    /// [`remove`](Self::remove) with the returned id for that.
    pub fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.listen(move |item| {
            // A dropped receiver only means nobody is interested anymore.
            let _ = tx.send(item);
        });
        (id, rx)
    }

    /// Remove a listener. Returns `false` if the id was unknown.
    pub fn remove(&self, id: ListenerId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }

    /// Ids of all registered listeners.
    pub fn listener_ids(&self) -> Vec<ListenerId> {
        self.listeners.read().keys().copied().collect()
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Fire `item` at every listener.
    ///
    /// Inside a tokio runtime each listener runs on its own task. Outside a
    /// runtime listeners are invoked inline, one after another.
    pub fn emit(&self, item: T) {
        let listeners: Vec<Listener<T>> = self.listeners.read().values().cloned().collect();
        if listeners.is_empty() {
            return;
        }

        match Handle::try_current() {
            Ok(handle) => {
                for listener in listeners {
                    let item = item.clone();
                    handle.spawn(async move { listener(item) });
                }
            }
            Err(_) => {
                for listener in listeners {
                    listener(item.clone());
                }
            }
        }
    }
}

impl<T> Default for NotificationBus<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for NotificationBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationBus")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}
