//! The subscription engine's root object.
//!
//! A [`PubSubService`] is constructed explicitly and passed around; it owns
//! every connection, group and public topic. Private topics are owned by
//! their instance and group topics by their group.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use super::connection::Connection;
use super::group::Group;
use super::instance::Instance;
use super::registry::Registry;
use super::topic::{Topic, TopicKind};
use crate::error::{PubSubError, Result};
use crate::flow::backpressure::BackpressurePolicy;
use crate::flow::NotificationBus;
use crate::generate_id;

/// Default time a connection may sit in `Waiting` before timing out.
pub const DEFAULT_INSTANCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound of a connection's outbound stream.
pub const DEFAULT_STREAM_CAPACITY: usize = 100;

/// Settings applied to newly created connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    pub instance_timeout: Duration,
    pub stream_capacity: usize,
    pub backpressure: BackpressurePolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            instance_timeout: DEFAULT_INSTANCE_TIMEOUT,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            backpressure: BackpressurePolicy::default(),
        }
    }
}

/// Lifecycle events of the whole service.
#[derive(Debug, Default)]
pub struct ServiceEvents {
    pub on_new_instance: NotificationBus<Instance>,
    pub on_new_public_topic: NotificationBus<Topic>,
    pub on_new_group: NotificationBus<Group>,
    pub on_remove_instance: NotificationBus<Instance>,
    pub on_remove_public_topic: NotificationBus<Topic>,
    pub on_remove_group: NotificationBus<Group>,
}

pub(crate) struct ServiceInner {
    id: String,
    settings: Mutex<ServiceConfig>,
    connections: Registry<Connection>,
    groups: Registry<Group>,
    public_topics: Registry<Topic>,
    events: ServiceEvents,
}

/// Registry and factory for connections, instances, topics and groups.
#[derive(Clone)]
pub struct PubSubService {
    inner: Arc<ServiceInner>,
}

impl PubSubService {
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    pub fn with_config(config: ServiceConfig) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                id: generate_id("S"),
                settings: Mutex::new(config),
                connections: Registry::new(),
                groups: Registry::new(),
                public_topics: Registry::new(),
                events: ServiceEvents::default(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn events(&self) -> &ServiceEvents {
        &self.inner.events
    }

    pub fn config(&self) -> ServiceConfig {
        *self.inner.settings.lock()
    }

    pub fn instance_timeout(&self) -> Duration {
        self.inner.settings.lock().instance_timeout
    }

    /// Change the timeout applied to connections created from now on.
    pub fn set_instance_timeout(&self, timeout: Duration) {
        self.inner.settings.lock().instance_timeout = timeout;
    }

    // Instances

    /// Create an instance, carried by `connection` or by a fresh one.
    ///
    /// A supplied connection that already reached a terminal status cannot
    /// carry anything, so a fresh connection is used instead.
    pub async fn new_instance(&self, connection: Option<&Connection>) -> Instance {
        let existing = connection.and_then(|c| {
            let instance = c.new_instance();
            if instance.is_none() {
                tracing::warn!(
                    connection_id = %c.id(),
                    status = %c.status(),
                    "Connection is closed, creating a new one"
                );
            }
            instance.map(|instance| (c.clone(), instance))
        });
        let (connection, instance) = match existing {
            Some(pair) => pair,
            None => self.fresh_connection(None),
        };

        self.inner.connections.register(connection.id(), connection.clone());
        if connection.status().is_terminal() {
            // Closed after attaching; its teardown already ran.
            self.forget_connection(&connection);
        }
        tracing::debug!(
            instance_id = %instance.id(),
            connection_id = %connection.id(),
            "Created instance"
        );

        if connection.status() == super::ConnectionStatus::Receiving {
            if let Err(e) = instance.send_topic_list().await {
                tracing::warn!(instance_id = %instance.id(), error = %e, "Failed to push topic list");
            }
        }

        self.inner.events.on_new_instance.emit(instance.clone());
        for topic in self.inner.public_topics.values() {
            topic.events().on_new_instance.emit(instance.clone());
        }

        instance
    }

    /// Tear `instance` down and drop its connection if it was the last one
    /// carried. Calling this again for the same instance does nothing.
    pub async fn remove_instance(&self, instance: &Instance) {
        let Some(connection) = instance.connection() else {
            return;
        };
        if !connection.remove_instance(instance).await {
            return;
        }
        tracing::debug!(
            instance_id = %instance.id(),
            connection_id = %connection.id(),
            "Removed instance"
        );

        if connection.instance_count() == 0 {
            self.forget_connection(&connection);
            connection.halt();
        }
    }

    /// A new connection carrying `instance`, or a new instance when `None`.
    fn fresh_connection(&self, instance: Option<&Instance>) -> (Connection, Instance) {
        let connection = Connection::new(self, &self.config());
        let instance = match instance {
            Some(instance) => instance.clone(),
            None => Instance::new(&connection),
        };
        // A connection that was never started cannot be closed yet.
        let _ = connection.attach(&instance);
        (connection, instance)
    }

    /// Carry `instance` over `connection` from now on.
    pub async fn move_instance(&self, instance: &Instance, connection: &Connection) -> Result<()> {
        if self.connection_by_id(connection.id()).as_ref() != Some(connection) {
            return Err(PubSubError::not_found("connection", connection.id()));
        }
        if connection.status().is_terminal() {
            return Err(PubSubError::ConnectionClosed {
                connection_id: connection.id().to_string(),
            });
        }
        let current = instance
            .connection()
            .ok_or_else(|| PubSubError::not_found("instance", instance.id()))?;
        if current == *connection {
            return Ok(());
        }
        if !current.detach(instance) {
            return Err(PubSubError::not_found("instance", instance.id()));
        }

        if !connection.attach(instance) {
            // Put it back where it was, or on a new connection if that one
            // closed meanwhile.
            if !current.attach(instance) {
                let (fresh, _) = self.fresh_connection(Some(instance));
                self.inner.connections.register(fresh.id(), fresh.clone());
            }
            return Err(PubSubError::ConnectionClosed {
                connection_id: connection.id().to_string(),
            });
        }
        if current.instance_count() == 0 {
            self.forget_connection(&current);
            current.halt();
        }

        tracing::debug!(
            instance_id = %instance.id(),
            from = %current.id(),
            to = %connection.id(),
            "Moved instance"
        );

        if let Err(e) = instance.send_topic_list().await {
            tracing::debug!(instance_id = %instance.id(), error = %e, "Topic list not pushed");
        }
        Ok(())
    }

    /// Every instance carried by a registered connection.
    pub fn instances(&self) -> HashMap<String, Instance> {
        self.inner
            .connections
            .values()
            .into_iter()
            .flat_map(|c| c.instances())
            .collect()
    }

    pub fn instance_by_id(&self, id: &str) -> Option<Instance> {
        self.inner
            .connections
            .values()
            .into_iter()
            .find_map(|c| c.instances().remove(id))
    }

    // Connections

    pub fn connections(&self) -> HashMap<String, Connection> {
        self.inner.connections.snapshot()
    }

    pub fn connection_by_id(&self, id: &str) -> Option<Connection> {
        self.inner.connections.get(id)
    }

    /// Unregister `connection` if it is the one registered under its id.
    pub(crate) fn forget_connection(&self, connection: &Connection) {
        self.inner
            .connections
            .unregister_if(connection.id(), |c| c == connection);
    }

    // Public topics

    pub fn public_topics(&self) -> HashMap<String, Topic> {
        self.inner.public_topics.snapshot()
    }

    pub fn public_topic_by_id(&self, id: &str) -> Option<Topic> {
        self.inner.public_topics.get(id)
    }

    /// Create a topic visible to every instance.
    pub async fn new_public_topic(&self) -> Topic {
        let topic = Topic::new(TopicKind::Public);
        self.inner.public_topics.register(topic.id(), topic.clone());

        for instance in self.instances().into_values() {
            if let Err(e) = instance.send_topic_list().await {
                tracing::debug!(instance_id = %instance.id(), error = %e, "Topic list not pushed");
            }
            instance.events().on_new_topic.emit(topic.clone());
            instance.events().on_new_public_topic.emit(topic.clone());
            topic.events().on_new_instance.emit(instance);
        }

        self.inner.events.on_new_public_topic.emit(topic.clone());
        topic
    }

    /// Remove a public topic, unsubscribing every subscriber first.
    pub async fn remove_public_topic(&self, topic: &Topic) -> Result<()> {
        if topic.kind() != TopicKind::Public {
            tracing::error!(topic_id = %topic.id(), kind = %topic.kind(), "Not a public topic");
            return Err(PubSubError::WrongTopicKind {
                topic_id: topic.id().to_string(),
                expected: TopicKind::Public,
                actual: topic.kind(),
            });
        }
        if self.public_topic_by_id(topic.id()).as_ref() != Some(topic) {
            tracing::error!(topic_id = %topic.id(), "Public topic does not exist");
            return Err(PubSubError::not_found("public topic", topic.id()));
        }

        for subscriber in topic.instances().values() {
            subscriber.drop_subscription(topic).await;
        }

        self.inner
            .public_topics
            .unregister_if(topic.id(), |t| t == topic);

        for instance in self.instances().into_values() {
            if let Err(e) = instance.send_topic_list().await {
                tracing::debug!(instance_id = %instance.id(), error = %e, "Topic list not pushed");
            }
            instance.events().on_remove_topic.emit(topic.clone());
            instance.events().on_remove_public_topic.emit(topic.clone());
            topic.events().on_remove_instance.emit(instance);
        }

        self.inner.events.on_remove_public_topic.emit(topic.clone());
        Ok(())
    }

    // Groups

    pub fn groups(&self) -> HashMap<String, Group> {
        self.inner.groups.snapshot()
    }

    pub fn group_by_id(&self, id: &str) -> Option<Group> {
        self.inner.groups.get(id)
    }

    pub fn new_group(&self) -> Group {
        let group = Group::new();
        self.inner.groups.register(group.id(), group.clone());
        self.inner.events.on_new_group.emit(group.clone());
        group
    }

    /// Remove a group: its topics first, then its members.
    pub async fn remove_group(&self, group: &Group) -> Result<()> {
        if self.group_by_id(group.id()).as_ref() != Some(group) {
            tracing::error!(group_id = %group.id(), "Group does not exist");
            return Err(PubSubError::not_found("group", group.id()));
        }

        for topic in group.topics().values() {
            if let Err(e) = group.remove_topic(topic).await {
                tracing::warn!(group_id = %group.id(), topic_id = %topic.id(), error = %e, "Failed to remove group topic");
            }
        }
        for member in group.instances().values() {
            if let Err(e) = group.remove_instance(member).await {
                tracing::warn!(group_id = %group.id(), instance_id = %member.id(), error = %e, "Failed to remove group member");
            }
        }

        self.inner.groups.unregister_if(group.id(), |g| g == group);
        self.inner.events.on_remove_group.emit(group.clone());
        Ok(())
    }

    pub(crate) fn downgrade(&self) -> WeakService {
        WeakService(Arc::downgrade(&self.inner))
    }
}

impl Default for PubSubService {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PubSubService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSubService")
            .field("id", &self.inner.id)
            .field("connections", &self.inner.connections.len())
            .field("groups", &self.inner.groups.len())
            .field("public_topics", &self.inner.public_topics.len())
            .finish()
    }
}

/// Non-owning service handle, held by connections.
#[derive(Clone)]
pub(crate) struct WeakService(Weak<ServiceInner>);

impl WeakService {
    pub(crate) fn upgrade(&self) -> Option<PubSubService> {
        self.0.upgrade().map(|inner| PubSubService { inner })
    }
}
