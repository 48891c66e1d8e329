//! Configuration parsing for the pubsub-sse server.
//!
//! Supports:
//! - CLI arguments via clap
//! - Environment variable overrides
//! - Sensible defaults for quick start

use std::time::Duration;

use clap::Parser;

use crate::flow::backpressure::{DEFAULT_RETRY_DELAY, DEFAULT_SEND_ATTEMPTS};
use crate::flow::BackpressurePolicy;
use crate::observability::tracing::DEFAULT_FILTER;
use crate::pubsub::service::{DEFAULT_INSTANCE_TIMEOUT, DEFAULT_STREAM_CAPACITY};
use crate::pubsub::ServiceConfig;

/// pubsub-sse: topic-scoped push to browsers over Server-Sent Events.
#[derive(Parser, Debug, Clone)]
#[command(name = "pubsub-sse")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Host address to bind to
    #[arg(long, env = "PUBSUB_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "PUBSUB_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Log filter (trace, debug, info, warn, error, or per-target directives)
    #[arg(long, env = "RUST_LOG", default_value = DEFAULT_FILTER)]
    pub log_level: String,

    /// Seconds a connection may stay disconnected before its instances are dropped
    #[arg(long, env = "PUBSUB_INSTANCE_TIMEOUT_SECS", default_value_t = DEFAULT_INSTANCE_TIMEOUT.as_secs())]
    pub instance_timeout_secs: u64,

    /// Bound of each connection's outbound frame queue
    #[arg(long, env = "PUBSUB_STREAM_CAPACITY", default_value_t = DEFAULT_STREAM_CAPACITY)]
    pub stream_capacity: usize,

    /// Enqueue attempts before a frame is dropped
    #[arg(long, env = "PUBSUB_SEND_ATTEMPTS", default_value_t = DEFAULT_SEND_ATTEMPTS)]
    pub send_attempts: u32,

    /// Delay between two enqueue attempts, in milliseconds
    #[arg(long, env = "PUBSUB_SEND_RETRY_DELAY_MS", default_value_t = DEFAULT_RETRY_DELAY.as_millis() as u64)]
    pub send_retry_delay_ms: u64,

    /// OpenTelemetry collector endpoint for metrics export (optional)
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otel_endpoint: Option<String>,
}

impl Config {
    /// Parse configuration from CLI arguments and environment.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Settings for the subscription engine.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            instance_timeout: Duration::from_secs(self.instance_timeout_secs),
            stream_capacity: self.stream_capacity,
            backpressure: BackpressurePolicy::new(
                self.send_attempts,
                Duration::from_millis(self.send_retry_delay_ms),
            ),
        }
    }

    /// Create a configuration for testing.
    pub fn test_config() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0, // Random port
            log_level: "debug".into(),
            instance_timeout_secs: 1,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            log_level: DEFAULT_FILTER.into(),
            instance_timeout_secs: DEFAULT_INSTANCE_TIMEOUT.as_secs(),
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            send_attempts: DEFAULT_SEND_ATTEMPTS,
            send_retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            otel_endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.service_config(), ServiceConfig::default());
    }

    #[test]
    fn test_parse_overrides() {
        let config = Config::try_parse_from([
            "pubsub-sse",
            "--port",
            "9000",
            "--instance-timeout-secs",
            "30",
            "--send-attempts",
            "3",
        ])
        .unwrap();

        let service = config.service_config();
        assert_eq!(config.port, 9000);
        assert_eq!(service.instance_timeout, Duration::from_secs(30));
        assert_eq!(service.backpressure.attempts(), 3);
    }

    #[test]
    fn test_log_level_flag() {
        let config = Config::try_parse_from(["pubsub-sse", "--log-level", "warn"]).unwrap();
        assert_eq!(config.log_level, "warn");
        assert_eq!(Config::default().log_level, DEFAULT_FILTER);
    }
}
