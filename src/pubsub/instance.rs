//! Instances: logical subscriber identities.
//!
//! An instance owns its private topics and its group memberships, resolves
//! the set of topics it can see, and subscribes to them. Frames addressed
//! to it travel over whichever connection currently carries it.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::connection::{Connection, ConnectionStatus, WeakConnection};
use super::envelope::{ConnectionData, EventData, Frame, InstanceData, SysEvent};
use super::group::{Group, GroupTopic, WeakGroup};
use super::service::PubSubService;
use super::topic::{Topic, TopicKind};
use crate::error::{PubSubError, Result};
use crate::flow::NotificationBus;
use crate::generate_id;

/// Lifecycle events observed by one instance.
#[derive(Debug, Default)]
pub struct InstanceEvents {
    pub on_status_change: NotificationBus<ConnectionStatus>,
    pub on_new_topic: NotificationBus<Topic>,
    pub on_new_public_topic: NotificationBus<Topic>,
    pub on_new_private_topic: NotificationBus<Topic>,
    pub on_new_group_topic: NotificationBus<GroupTopic>,
    pub on_new_group: NotificationBus<Group>,
    pub on_sub_to_topic: NotificationBus<Topic>,
    pub on_remove_topic: NotificationBus<Topic>,
    pub on_remove_public_topic: NotificationBus<Topic>,
    pub on_remove_private_topic: NotificationBus<Topic>,
    pub on_remove_group_topic: NotificationBus<GroupTopic>,
    pub on_remove_group: NotificationBus<Group>,
    pub on_unsub_from_topic: NotificationBus<Topic>,
}

struct InstanceState {
    connection: WeakConnection,
    private_topics: HashMap<String, Topic>,
    groups: HashMap<String, WeakGroup>,
}

pub(crate) struct InstanceInner {
    id: String,
    state: Mutex<InstanceState>,
    events: InstanceEvents,
}

/// A logical subscriber. Cloning yields another handle to the same
/// instance; equality is identity.
#[derive(Clone)]
pub struct Instance {
    inner: Arc<InstanceInner>,
}

impl Instance {
    pub(crate) fn new(connection: &Connection) -> Self {
        Self {
            inner: Arc::new(InstanceInner {
                id: generate_id("I"),
                state: Mutex::new(InstanceState {
                    connection: connection.downgrade(),
                    private_topics: HashMap::new(),
                    groups: HashMap::new(),
                }),
                events: InstanceEvents::default(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn events(&self) -> &InstanceEvents {
        &self.inner.events
    }

    /// The connection currently carrying this instance.
    pub fn connection(&self) -> Option<Connection> {
        self.inner.state.lock().connection.upgrade()
    }

    pub fn connection_id(&self) -> Option<String> {
        self.connection().map(|c| c.id().to_string())
    }

    /// Status of the carrying connection; `Stopped` once it is gone.
    pub fn status(&self) -> ConnectionStatus {
        self.connection()
            .map_or(ConnectionStatus::Stopped, |c| c.status())
    }

    pub(crate) fn set_connection(&self, connection: &Connection) {
        self.inner.state.lock().connection = connection.downgrade();
    }

    pub(crate) fn clear_connection(&self) {
        self.inner.state.lock().connection = WeakConnection::default();
    }

    fn service(&self) -> Option<PubSubService> {
        self.connection().and_then(|c| c.service())
    }

    pub fn public_topics(&self) -> HashMap<String, Topic> {
        self.service()
            .map(|s| s.public_topics())
            .unwrap_or_default()
    }

    pub fn public_topic_by_id(&self, id: &str) -> Option<Topic> {
        self.service().and_then(|s| s.public_topic_by_id(id))
    }

    pub fn private_topics(&self) -> HashMap<String, Topic> {
        self.inner.state.lock().private_topics.clone()
    }

    pub fn private_topic_by_id(&self, id: &str) -> Option<Topic> {
        self.inner.state.lock().private_topics.get(id).cloned()
    }

    pub fn groups(&self) -> HashMap<String, Group> {
        self.inner
            .state
            .lock()
            .groups
            .iter()
            .filter_map(|(id, weak)| weak.upgrade().map(|g| (id.clone(), g)))
            .collect()
    }

    pub fn group_by_id(&self, id: &str) -> Option<Group> {
        self.inner
            .state
            .lock()
            .groups
            .get(id)
            .and_then(WeakGroup::upgrade)
    }

    /// Every topic this instance can see: public, then the topics of each
    /// joined group, then its own private topics.
    pub fn all_topics(&self) -> HashMap<String, Topic> {
        let mut topics = self.public_topics();
        for group in self.groups().values() {
            topics.extend(group.topics());
        }
        topics.extend(self.private_topics());
        topics
    }

    pub fn topic_by_id(&self, id: &str) -> Option<Topic> {
        self.all_topics().remove(id)
    }

    /// The visible topics this instance is subscribed to.
    pub fn subscribed_topics(&self) -> HashMap<String, Topic> {
        self.all_topics()
            .into_iter()
            .filter(|(_, topic)| topic.is_subscribed(self))
            .collect()
    }

    /// Create a private topic owned by this instance.
    pub async fn new_private_topic(&self) -> Topic {
        let topic = Topic::new(TopicKind::Private);
        self.inner
            .state
            .lock()
            .private_topics
            .insert(topic.id().to_string(), topic.clone());

        if let Err(e) = self.send_topic_list().await {
            log_push_failure(self.id(), "topic list", &e);
        }

        self.inner.events.on_new_topic.emit(topic.clone());
        self.inner.events.on_new_private_topic.emit(topic.clone());
        topic.events().on_new_instance.emit(self.clone());

        topic
    }

    /// Remove one of this instance's private topics, unsubscribing every
    /// current subscriber first.
    pub async fn remove_private_topic(&self, topic: &Topic) -> Result<()> {
        if self.private_topic_by_id(topic.id()).as_ref() != Some(topic) {
            tracing::error!(
                instance_id = %self.id(),
                topic_id = %topic.id(),
                "Private topic does not exist"
            );
            return Err(PubSubError::not_found("private topic", topic.id()));
        }

        for subscriber in topic.instances().values() {
            subscriber.drop_subscription(topic).await;
        }

        self.inner.state.lock().private_topics.remove(topic.id());

        if let Err(e) = self.send_topic_list().await {
            log_push_failure(self.id(), "topic list", &e);
        }

        self.inner.events.on_remove_topic.emit(topic.clone());
        self.inner.events.on_remove_private_topic.emit(topic.clone());
        topic.events().on_remove_instance.emit(self.clone());

        Ok(())
    }

    /// Subscribe to a topic visible to this instance.
    pub async fn sub(&self, topic: &Topic) -> Result<()> {
        if self.topic_by_id(topic.id()).as_ref() != Some(topic) {
            return Err(PubSubError::CannotSubscribe {
                instance_id: self.id().to_string(),
                topic_id: topic.id().to_string(),
            });
        }

        topic.add_instance(self);

        if let Err(e) = self.send_subscribed(topic).await {
            log_push_failure(self.id(), "subscribed topic", &e);
        }

        self.inner.events.on_sub_to_topic.emit(topic.clone());
        Ok(())
    }

    /// Unsubscribe from a visible topic this instance is subscribed to.
    pub async fn unsub(&self, topic: &Topic) -> Result<()> {
        if self.topic_by_id(topic.id()).as_ref() != Some(topic) {
            return Err(PubSubError::CannotUnsubscribe {
                instance_id: self.id().to_string(),
                topic_id: topic.id().to_string(),
            });
        }
        if !topic.is_subscribed(self) {
            return Err(PubSubError::NotSubscribed {
                instance_id: self.id().to_string(),
                topic_id: topic.id().to_string(),
            });
        }

        self.drop_subscription(topic).await;
        Ok(())
    }

    /// Unsubscribe without resolving `topic` against the visible set.
    ///
    /// Used by teardown paths, where the topic may already be on its way
    /// out of the visible set. Returns whether a subscription existed.
    pub(crate) async fn drop_subscription(&self, topic: &Topic) -> bool {
        if !topic.remove_instance(self) {
            return false;
        }

        if let Err(e) = self.send_unsubscribed(topic).await {
            log_push_failure(self.id(), "unsubscribed topic", &e);
        }

        self.inner.events.on_unsub_from_topic.emit(topic.clone());
        true
    }

    /// Run the event stream of the carrying connection.
    ///
    /// See [`Connection::start`].
    pub async fn start<F, Fut>(&self, cancel: CancellationToken, on_frame: F) -> Result<()>
    where
        F: FnMut(Frame) -> Fut,
        Fut: Future<Output = ()>,
    {
        let connection = self
            .connection()
            .ok_or_else(|| PubSubError::not_found("instance", self.id()))?;
        connection.start(cancel, on_frame).await
    }

    /// Record membership in `group` and announce its topics.
    pub(crate) async fn add_group(&self, group: &Group) {
        self.inner
            .state
            .lock()
            .groups
            .insert(group.id().to_string(), group.downgrade());

        self.inner.events.on_new_group.emit(group.clone());
        for topic in group.topics().into_values() {
            self.inner.events.on_new_topic.emit(topic.clone());
            self.inner.events.on_new_group_topic.emit(GroupTopic {
                group: group.clone(),
                topic,
            });
        }

        if let Err(e) = self.send_topic_list().await {
            log_push_failure(self.id(), "topic list", &e);
        }
    }

    /// Clear membership in `group` and retract its topics.
    pub(crate) async fn remove_group(&self, group: &Group) {
        self.inner.state.lock().groups.remove(group.id());

        self.inner.events.on_remove_group.emit(group.clone());
        for topic in group.topics().into_values() {
            self.inner.events.on_remove_topic.emit(topic.clone());
            self.inner.events.on_remove_group_topic.emit(GroupTopic {
                group: group.clone(),
                topic,
            });
        }

        if let Err(e) = self.send_topic_list().await {
            log_push_failure(self.id(), "topic list", &e);
        }
    }

    pub(crate) async fn send(&self, data: &ConnectionData) -> Result<()> {
        let connection = self
            .connection()
            .ok_or_else(|| PubSubError::not_found("instance", self.id()))?;
        connection.send(data).await
    }

    /// Push the full list of visible topics.
    pub(crate) async fn send_topic_list(&self) -> Result<()> {
        let data = EventData::sys(self.topic_list());
        self.send(&ConnectionData::for_instance(self.id(), data)).await
    }

    async fn send_subscribed(&self, topic: &Topic) -> Result<()> {
        let data = EventData::sys(SysEvent::subscribed([topic.id().to_string()]));
        self.send(&ConnectionData::for_instance(self.id(), data)).await
    }

    async fn send_unsubscribed(&self, topic: &Topic) -> Result<()> {
        let data = EventData::sys(SysEvent::unsubscribed([topic.id().to_string()]));
        self.send(&ConnectionData::for_instance(self.id(), data)).await
    }

    fn topic_list(&self) -> SysEvent {
        SysEvent::topics(
            self.all_topics()
                .into_values()
                .map(|t| (t.id().to_string(), t.kind())),
        )
    }

    /// Section of the initial frame describing this instance: visible
    /// topics and current subscriptions, each omitted when empty.
    pub(crate) fn init_data(&self) -> InstanceData {
        let topics = self.all_topics();
        let mut data = EventData::default();

        if !topics.is_empty() {
            data.sys.push(SysEvent::topics(
                topics.values().map(|t| (t.id().to_string(), t.kind())),
            ));
        }

        let subscribed: Vec<String> = topics
            .values()
            .filter(|t| t.is_subscribed(self))
            .map(|t| t.id().to_string())
            .collect();
        if !subscribed.is_empty() {
            data.sys.push(SysEvent::subscribed(subscribed));
        }

        InstanceData {
            id: self.id().to_string(),
            data,
        }
    }

    pub(crate) fn downgrade(&self) -> WeakInstance {
        WeakInstance(Arc::downgrade(&self.inner))
    }
}

fn log_push_failure(instance_id: &str, what: &str, error: &PubSubError) {
    match error {
        PubSubError::NotReceiving { .. } => {
            tracing::debug!(instance_id, error = %error, "Skipped pushing {what}");
        }
        _ => tracing::warn!(instance_id, error = %error, "Failed to push {what}"),
    }
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Instance {}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance").field("id", &self.inner.id).finish()
    }
}

/// Non-owning instance handle, held by topics and groups.
#[derive(Clone)]
pub(crate) struct WeakInstance(Weak<InstanceInner>);

impl WeakInstance {
    pub(crate) fn upgrade(&self) -> Option<Instance> {
        self.0.upgrade().map(|inner| Instance { inner })
    }

    /// Whether this handle points at `instance`.
    pub(crate) fn is(&self, instance: &Instance) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&instance.inner))
    }
}
