//! Error types for the subscription engine.
//!
//! Every fallible core operation returns [`PubSubError`]. Failures are
//! grouped into the coarse [`ErrorKind`] classes that the HTTP layer maps
//! onto status codes.

use thiserror::Error;

use crate::pubsub::TopicKind;

/// Crate-wide result alias.
pub type Result<T, E = PubSubError> = std::result::Result<T, E>;

/// Coarse classification of a [`PubSubError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// An instance, connection, topic or group id did not resolve.
    NotFound,
    /// A state precondition was violated (wrong kind, already receiving, ...).
    InvalidState,
    /// Unsubscribe from a topic that is not currently joined.
    NotSubscribed,
    /// The outbound stream stayed saturated for the whole retry window.
    Backpressure,
    /// A payload could not be rendered to the wire format.
    Serialization,
}

/// Errors raised by the subscription engine.
#[derive(Debug, Error)]
pub enum PubSubError {
    #[error("{kind} {id} does not exist")]
    NotFound { kind: &'static str, id: String },

    #[error("[I:{instance_id}]: topic {topic_id} does not exist or instance can not subscribe to it")]
    CannotSubscribe {
        instance_id: String,
        topic_id: String,
    },

    #[error("[I:{instance_id}]: topic {topic_id} does not exist or instance can not unsubscribe from it")]
    CannotUnsubscribe {
        instance_id: String,
        topic_id: String,
    },

    #[error("[I:{instance_id}]: instance is not subscribed to topic {topic_id}")]
    NotSubscribed {
        instance_id: String,
        topic_id: String,
    },

    #[error("[C:{connection_id}]: connection is already receiving")]
    AlreadyReceiving { connection_id: String },

    #[error("[C:{connection_id}]: connection is closed")]
    ConnectionClosed { connection_id: String },

    #[error("[C:{connection_id}]: connection is not receiving")]
    NotReceiving { connection_id: String },

    #[error("[C:{connection_id}]: stream is full")]
    StreamFull { connection_id: String },

    #[error("topic {topic_id} is {actual}, expected {expected}")]
    WrongTopicKind {
        topic_id: String,
        expected: TopicKind,
        actual: TopicKind,
    },

    #[error("instance {instance_id} is already a member of group {group_id}")]
    AlreadyMember {
        group_id: String,
        instance_id: String,
    },

    #[error("instance {instance_id} is not a member of group {group_id}")]
    NotMember {
        group_id: String,
        instance_id: String,
    },

    #[error("failed to render frame: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PubSubError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. }
            | Self::CannotSubscribe { .. }
            | Self::CannotUnsubscribe { .. } => ErrorKind::NotFound,
            Self::AlreadyReceiving { .. }
            | Self::ConnectionClosed { .. }
            | Self::NotReceiving { .. }
            | Self::WrongTopicKind { .. }
            | Self::AlreadyMember { .. }
            | Self::NotMember { .. } => ErrorKind::InvalidState,
            Self::NotSubscribed { .. } => ErrorKind::NotSubscribed,
            Self::StreamFull { .. } => ErrorKind::Backpressure,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }
}
