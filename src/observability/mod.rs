//! Observability infrastructure.
//!
//! Provides:
//! - Structured logging through `tracing`
//! - OpenTelemetry metrics for publishes, deliveries and status changes

pub mod metrics;
pub mod tracing;
