//! Flow control and notification infrastructure.
//!
//! Provides:
//! - Bounded-retry backpressure for connection streams
//! - Typed notification bus used by every entity for lifecycle events

pub mod backpressure;
pub mod notify;

pub use backpressure::{BackpressurePolicy, EnqueueError};
pub use notify::{ListenerId, NotificationBus};
