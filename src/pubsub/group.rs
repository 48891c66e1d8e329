//! Groups: sets of instances sharing group-scoped topics.
//!
//! Membership implies visibility of the group's topics, not a
//! subscription to them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::instance::{Instance, WeakInstance};
use super::topic::{Topic, TopicKind};
use crate::error::{PubSubError, Result};
use crate::flow::NotificationBus;
use crate::generate_id;

/// A group topic together with the group exposing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupTopic {
    pub group: Group,
    pub topic: Topic,
}

/// Lifecycle events of a group.
#[derive(Debug, Default)]
pub struct GroupEvents {
    pub on_new_instance: NotificationBus<Instance>,
    pub on_new_group_topic: NotificationBus<Topic>,
    pub on_remove_instance: NotificationBus<Instance>,
    pub on_remove_group_topic: NotificationBus<Topic>,
}

struct GroupState {
    topics: HashMap<String, Topic>,
    members: HashMap<String, WeakInstance>,
}

pub(crate) struct GroupInner {
    id: String,
    state: Mutex<GroupState>,
    events: GroupEvents,
}

/// A named set of instances. Cloning yields another handle to the same
/// group; equality is identity.
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

impl Group {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(GroupInner {
                id: generate_id("G"),
                state: Mutex::new(GroupState {
                    topics: HashMap::new(),
                    members: HashMap::new(),
                }),
                events: GroupEvents::default(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn events(&self) -> &GroupEvents {
        &self.inner.events
    }

    pub fn topics(&self) -> HashMap<String, Topic> {
        self.inner.state.lock().topics.clone()
    }

    pub fn topic_by_id(&self, id: &str) -> Option<Topic> {
        self.inner.state.lock().topics.get(id).cloned()
    }

    /// Snapshot of the current members.
    pub fn instances(&self) -> HashMap<String, Instance> {
        self.inner
            .state
            .lock()
            .members
            .iter()
            .filter_map(|(id, weak)| weak.upgrade().map(|i| (id.clone(), i)))
            .collect()
    }

    pub fn instance_by_id(&self, id: &str) -> Option<Instance> {
        self.inner
            .state
            .lock()
            .members
            .get(id)
            .and_then(WeakInstance::upgrade)
    }

    fn is_member(&self, instance: &Instance) -> bool {
        self.inner
            .state
            .lock()
            .members
            .get(instance.id())
            .is_some_and(|weak| weak.is(instance))
    }

    /// Create a topic visible to every member.
    pub async fn new_topic(&self) -> Topic {
        let topic = Topic::new(TopicKind::Group);
        self.inner
            .state
            .lock()
            .topics
            .insert(topic.id().to_string(), topic.clone());

        for member in self.instances().into_values() {
            if let Err(e) = member.send_topic_list().await {
                tracing::debug!(
                    group_id = %self.id(),
                    instance_id = %member.id(),
                    error = %e,
                    "Topic list not pushed"
                );
            }

            member.events().on_new_topic.emit(topic.clone());
            member.events().on_new_group_topic.emit(GroupTopic {
                group: self.clone(),
                topic: topic.clone(),
            });
            topic.events().on_new_instance.emit(member);
        }

        self.inner.events.on_new_group_topic.emit(topic.clone());
        topic
    }

    /// Remove one of this group's topics, unsubscribing every subscriber.
    pub async fn remove_topic(&self, topic: &Topic) -> Result<()> {
        if topic.kind() != TopicKind::Group {
            tracing::error!(topic_id = %topic.id(), kind = %topic.kind(), "Not a group topic");
            return Err(PubSubError::WrongTopicKind {
                topic_id: topic.id().to_string(),
                expected: TopicKind::Group,
                actual: topic.kind(),
            });
        }
        if self.topic_by_id(topic.id()).as_ref() != Some(topic) {
            tracing::error!(
                group_id = %self.id(),
                topic_id = %topic.id(),
                "Topic does not exist in group"
            );
            return Err(PubSubError::not_found("group topic", topic.id()));
        }

        for subscriber in topic.instances().values() {
            subscriber.drop_subscription(topic).await;
        }

        self.inner.state.lock().topics.remove(topic.id());

        for member in self.instances().into_values() {
            if let Err(e) = member.send_topic_list().await {
                tracing::debug!(
                    group_id = %self.id(),
                    instance_id = %member.id(),
                    error = %e,
                    "Topic list not pushed"
                );
            }

            member.events().on_remove_topic.emit(topic.clone());
            member.events().on_remove_group_topic.emit(GroupTopic {
                group: self.clone(),
                topic: topic.clone(),
            });
            topic.events().on_remove_instance.emit(member);
        }

        self.inner.events.on_remove_group_topic.emit(topic.clone());
        Ok(())
    }

    /// Add `instance` as a member.
    pub async fn add_instance(&self, instance: &Instance) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.members.contains_key(instance.id()) {
                drop(state);
                tracing::error!(
                    group_id = %self.id(),
                    instance_id = %instance.id(),
                    "Instance is already a member"
                );
                return Err(PubSubError::AlreadyMember {
                    group_id: self.id().to_string(),
                    instance_id: instance.id().to_string(),
                });
            }
            state
                .members
                .insert(instance.id().to_string(), instance.downgrade());
        }

        instance.add_group(self).await;

        self.inner.events.on_new_instance.emit(instance.clone());
        for topic in self.topics().into_values() {
            topic.events().on_new_instance.emit(instance.clone());
        }
        Ok(())
    }

    /// Remove a member, unsubscribing it from every group topic first.
    pub async fn remove_instance(&self, instance: &Instance) -> Result<()> {
        if !self.is_member(instance) {
            tracing::error!(
                group_id = %self.id(),
                instance_id = %instance.id(),
                "Instance is not a member"
            );
            return Err(PubSubError::NotMember {
                group_id: self.id().to_string(),
                instance_id: instance.id().to_string(),
            });
        }

        let topics = self.topics();
        for topic in topics.values() {
            instance.drop_subscription(topic).await;
        }

        self.inner.state.lock().members.remove(instance.id());
        instance.remove_group(self).await;

        self.inner.events.on_remove_instance.emit(instance.clone());
        for topic in topics.into_values() {
            topic.events().on_remove_instance.emit(instance.clone());
        }
        Ok(())
    }

    pub(crate) fn downgrade(&self) -> WeakGroup {
        WeakGroup(Arc::downgrade(&self.inner))
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Group {}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group").field("id", &self.inner.id).finish()
    }
}

/// Non-owning group handle, held by member instances.
#[derive(Clone)]
pub(crate) struct WeakGroup(Weak<GroupInner>);

impl WeakGroup {
    pub(crate) fn upgrade(&self) -> Option<Group> {
        self.0.upgrade().map(|inner| Group { inner })
    }
}
