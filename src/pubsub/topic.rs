//! Topics: named delivery channels.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::envelope::{ConnectionData, EventData};
use super::instance::{Instance, WeakInstance};
use crate::error::Result;
use crate::flow::NotificationBus;
use crate::generate_id;
use crate::observability::metrics::record_publish;

/// Visibility class of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicKind {
    /// Visible to every instance.
    Public,
    /// Visible only to the instance that owns it.
    Private,
    /// Visible to the current members of one group.
    Group,
}

impl TopicKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
            Self::Group => "group",
        }
    }
}

impl fmt::Display for TopicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events of a topic.
#[derive(Debug, Default)]
pub struct TopicEvents {
    /// An instance can now see this topic.
    pub on_new_instance: NotificationBus<Instance>,
    /// An instance subscribed.
    pub on_new_sub_of_instance: NotificationBus<Instance>,
    /// Data was published. Carries the rendered update.
    pub on_pub: NotificationBus<Arc<EventData>>,
    /// An instance can no longer see this topic.
    pub on_remove_instance: NotificationBus<Instance>,
    /// An instance unsubscribed.
    pub on_unsub_of_instance: NotificationBus<Instance>,
}

struct TopicInner {
    id: String,
    kind: TopicKind,
    subscribers: Mutex<HashMap<String, WeakInstance>>,
    events: TopicEvents,
}

/// A named delivery channel. Cloning yields another handle to the same
/// topic; equality is identity.
#[derive(Clone)]
pub struct Topic {
    inner: Arc<TopicInner>,
}

impl Topic {
    pub(crate) fn new(kind: TopicKind) -> Self {
        Self {
            inner: Arc::new(TopicInner {
                id: generate_id("T"),
                kind,
                subscribers: Mutex::new(HashMap::new()),
                events: TopicEvents::default(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TopicKind {
        self.inner.kind
    }

    pub fn events(&self) -> &TopicEvents {
        &self.inner.events
    }

    /// Snapshot of the subscribed instances.
    pub fn instances(&self) -> HashMap<String, Instance> {
        self.inner
            .subscribers
            .lock()
            .iter()
            .filter_map(|(id, weak)| weak.upgrade().map(|i| (id.clone(), i)))
            .collect()
    }

    pub fn is_subscribed(&self, instance: &Instance) -> bool {
        self.inner
            .subscribers
            .lock()
            .get(instance.id())
            .is_some_and(|weak| weak.is(instance))
    }

    pub(crate) fn add_instance(&self, instance: &Instance) {
        self.inner
            .subscribers
            .lock()
            .insert(instance.id().to_string(), instance.downgrade());

        self.inner.events.on_new_sub_of_instance.emit(instance.clone());
    }

    pub(crate) fn remove_instance(&self, instance: &Instance) -> bool {
        let removed = {
            let mut subscribers = self.inner.subscribers.lock();
            let subscribed = subscribers
                .get(instance.id())
                .is_some_and(|weak| weak.is(instance));
            if subscribed {
                subscribers.remove(instance.id());
            }
            subscribed
        };

        if removed {
            self.inner.events.on_unsub_of_instance.emit(instance.clone());
        }
        removed
    }

    /// Publish `data` to every subscribed instance.
    ///
    /// Delivery is fire-and-forget: a subscriber whose stream is full or not
    /// receiving is logged and skipped. Only a payload that cannot be
    /// rendered to JSON fails the call.
    pub async fn publish<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_value(data)?;
        let event = EventData::update(self.id(), payload);
        let subscribers = self.instances();

        let deliveries = subscribers.values().map(|instance| {
            let frame = ConnectionData::for_instance(instance.id(), event.clone());
            async move {
                if let Err(e) = instance.send(&frame).await {
                    tracing::warn!(
                        topic_id = %self.id(),
                        instance_id = %instance.id(),
                        error = %e,
                        "Dropped update for subscriber"
                    );
                }
            }
        });
        join_all(deliveries).await;

        record_publish(self.kind().as_str(), subscribers.len());
        tracing::debug!(
            topic_id = %self.id(),
            subscribers = subscribers.len(),
            "Published update"
        );

        self.inner.events.on_pub.emit(Arc::new(event));
        Ok(())
    }
}

impl PartialEq for Topic {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Topic {}

impl fmt::Debug for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .finish()
    }
}
