//! pubsub-sse: topic-scoped push to browsers over Server-Sent Events.
//!
//! # Usage
//!
//! ```bash
//! pubsub-sse --port 8080 --instance-timeout-secs 10 --log-level info
//! ```
//!
//! Environment variables can also be used:
//! - `PUBSUB_PORT`: Port to listen on
//! - `PUBSUB_INSTANCE_TIMEOUT_SECS`: Grace period for disconnected streams
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)

use anyhow::Context;
use pubsub_sse::config::Config;
use pubsub_sse::observability::metrics::init_metrics_with_endpoint;
use pubsub_sse::observability::tracing::init_tracing;
use pubsub_sse::server::run_server;
use tokio::sync::watch;

/// Print startup banner with version and configuration.
fn print_banner(config: &Config) {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        r#"
                 _                 _
   _ __  _   _| |__  ___ _   _| |__        ___ ___  ___
  | '_ \| | | | '_ \/ __| | | | '_ \ _____/ __/ __|/ _ \
  | |_) | |_| | |_) \__ \ |_| | |_) |_____\__ \__ \  __/
  | .__/ \__,_|_.__/|___/\__,_|_.__/      |___/___/\___|
  |_|

  pubsub-sse v{} - Server-Sent-Events Pub/Sub Broker

  Configuration:
    Address:          {}:{}
    Instance Timeout: {}s
    Stream Capacity:  {}
    Log Level:        {}

  Press Ctrl+C to shutdown gracefully.
"#,
        version,
        config.host,
        config.port,
        config.instance_timeout_secs,
        config.stream_capacity,
        config.log_level
    );
}

/// Run the server until `shutdown_rx` fires.
async fn serve_until_shutdown(
    config: Config,
    shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    run_server(config, shutdown_rx)
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("server failed")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration from CLI arguments and environment
    let config = Config::parse_args();

    // Initialize tracing/logging
    init_tracing("pubsub-sse", &config.log_level);

    // Initialize metrics (with optional OTLP export)
    init_metrics_with_endpoint(config.otel_endpoint.as_deref());

    print_banner(&config);

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;

    // Spawn signal handler task
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {
                    tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown...");
                }
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, initiating shutdown...");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = ctrl_c.await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                return;
            }
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }

        // Signal shutdown
        let _ = shutdown_tx.send(true);
    });

    // Run the server
    serve_until_shutdown(config, shutdown_rx).await?;

    tracing::info!("pubsub-sse shutdown complete");
    Ok(())
}
