//! pubsub-sse: a publish/subscribe broker delivered to browsers over
//! Server-Sent Events.
//!
//! Many logical subscribers ([`pubsub::Instance`]) can share one physical
//! event stream ([`pubsub::Connection`]). Instances see public topics,
//! their own private topics and the topics of every group they belong to,
//! and subscribe to any of them at runtime.
//!
//! # Architecture
//!
//! - **Explicit root**: a [`pubsub::PubSubService`] is constructed and
//!   passed around, there is no global state
//! - **Bounded streams**: a slow consumer makes its own deliveries fail
//!   instead of blocking publishers
//! - **Observable**: every entity exposes typed notification buses, plus
//!   tracing and OpenTelemetry metrics
//!
//! # Modules
//!
//! - [`config`]: CLI and environment configuration
//! - [`error`]: Error taxonomy
//! - [`flow`]: Notification bus and backpressure policy
//! - [`observability`]: Metrics and tracing setup
//! - [`pubsub`]: The subscription engine
//! - [`server`]: HTTP server setup
//! - [`service`]: HTTP handlers (control plane, event stream)

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // pubsub::service::PubSubService is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc,      // Panic docs can be verbose
    clippy::similar_names,           // instance/instances are fine
    clippy::too_many_lines           // Some functions are inherently long
)]

pub mod config;
pub mod error;
pub mod flow;
pub mod observability;
pub mod pubsub;
pub mod server;
pub mod service;

pub use error::{PubSubError, Result};

use uuid::Uuid;

/// Generate a prefixed UUIDv7 (time-sortable) entity id.
///
/// # Example
///
/// ```
/// let id = pubsub_sse::generate_id("T");
/// assert!(id.starts_with("T-"));
/// assert_eq!(id.len(), 38);
/// ```
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::now_v7())
}
