//! Subscription engine.
//!
//! Entity graph, owners first:
//!
//! - [`PubSubService`] owns [`Connection`]s, [`Group`]s and public [`Topic`]s.
//! - A [`Connection`] owns the [`Instance`]s it carries.
//! - An [`Instance`] owns its private topics; a [`Group`] owns its topics.
//!
//! Every other edge (instance to connection, topic to subscriber, group to
//! member) is a weak back-reference. Each entity guards its own fields with
//! its own lock and never holds it while calling into another entity.

pub mod connection;
pub mod envelope;
pub mod group;
pub mod instance;
pub mod registry;
pub mod service;
pub mod topic;

pub use connection::{Connection, ConnectionStatus};
pub use envelope::{ConnectionData, EventData, Frame, InstanceData, SysEvent, SysEventKind, TopicRef, Update};
pub use group::{Group, GroupEvents, GroupTopic};
pub use instance::{Instance, InstanceEvents};
pub use registry::Registry;
pub use service::{PubSubService, ServiceConfig, ServiceEvents};
pub use topic::{Topic, TopicEvents, TopicKind};
