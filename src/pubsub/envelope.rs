//! Wire format of the event stream.
//!
//! One [`ConnectionData`] is rendered per flush. It addresses one or more
//! instances carried by the connection; each instance gets a `sys` section
//! for topology changes and an `updates` section for published data.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TopicKind;

/// Top-level frame body sent over a connection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionData {
    pub instances: Vec<InstanceData>,
}

/// The part of a frame addressed to a single instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceData {
    pub id: String,
    pub data: EventData,
}

/// Topology changes and data updates for one instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sys: Vec<SysEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updates: Vec<Update>,
}

/// Kind of a topology change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SysEventKind {
    /// Full list of visible topics.
    Topics,
    /// Newly subscribed topics.
    Subscribed,
    /// Newly unsubscribed topics.
    Unsubscribed,
}

/// One topology change with the topics it concerns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysEvent {
    #[serde(rename = "type")]
    pub kind: SysEventKind,
    pub list: Vec<TopicRef>,
}

/// Reference to a topic inside a [`SysEvent`]. The kind is only present in
/// topic lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRef {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<TopicKind>,
}

/// Data published on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub topic: String,
    pub data: Value,
}

impl SysEvent {
    pub fn topics(list: impl IntoIterator<Item = (String, TopicKind)>) -> Self {
        Self {
            kind: SysEventKind::Topics,
            list: list
                .into_iter()
                .map(|(id, kind)| TopicRef {
                    id,
                    kind: Some(kind),
                })
                .collect(),
        }
    }

    pub fn subscribed(ids: impl IntoIterator<Item = String>) -> Self {
        Self::ids(SysEventKind::Subscribed, ids)
    }

    pub fn unsubscribed(ids: impl IntoIterator<Item = String>) -> Self {
        Self::ids(SysEventKind::Unsubscribed, ids)
    }

    fn ids(kind: SysEventKind, ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            kind,
            list: ids
                .into_iter()
                .map(|id| TopicRef { id, kind: None })
                .collect(),
        }
    }
}

impl EventData {
    pub fn sys(event: SysEvent) -> Self {
        Self {
            sys: vec![event],
            updates: Vec::new(),
        }
    }

    pub fn update(topic: impl Into<String>, data: Value) -> Self {
        Self {
            sys: Vec::new(),
            updates: vec![Update {
                topic: topic.into(),
                data,
            }],
        }
    }
}

impl ConnectionData {
    /// Frame body addressed to a single instance.
    pub fn for_instance(id: impl Into<String>, data: EventData) -> Self {
        Self {
            instances: vec![InstanceData {
                id: id.into(),
                data,
            }],
        }
    }
}

/// A rendered frame body, ready for the streaming writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(String);

impl Frame {
    /// Render `data` to JSON.
    pub fn render(data: &ConnectionData) -> serde_json::Result<Self> {
        serde_json::to_string(data).map(Self)
    }

    /// The JSON body.
    pub fn json(&self) -> &str {
        &self.0
    }

    /// Parse the body back into a [`ConnectionData`].
    pub fn decode(&self) -> serde_json::Result<ConnectionData> {
        serde_json::from_str(&self.0)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
