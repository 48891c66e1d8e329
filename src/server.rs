//! HTTP server setup and lifecycle.
//!
//! Configures the axum server with:
//! - Control-plane and event-stream handlers
//! - Graceful shutdown support
//! - Health and readiness endpoints

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::pubsub::PubSubService;
use crate::service::create_router;

/// Server state shared across handlers.
pub struct ServerState {
    pub pubsub: PubSubService,
    /// Cancelled on shutdown. Every open event stream holds a child token.
    pub shutdown: CancellationToken,
}

impl ServerState {
    pub fn new(pubsub: PubSubService) -> Self {
        Self {
            pubsub,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Run the pubsub-sse HTTP server.
///
/// # Arguments
///
/// * `config` - Server configuration
/// * `shutdown_rx` - Receiver for shutdown signal
///
/// # Returns
///
/// Returns when the server has shut down.
pub async fn run_server(
    config: Config,
    shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;

    let pubsub = PubSubService::with_config(config.service_config());
    serve(listener, pubsub, shutdown_rx).await
}

/// Serve `pubsub` on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    pubsub: PubSubService,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = Arc::new(ServerState::new(pubsub));
    let app = create_router(state.clone());

    tracing::info!(address = %listener.local_addr()?, "Starting pubsub-sse HTTP server");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("Shutdown signal received, closing event streams");
            // Open event streams never finish on their own.
            shutdown.cancel();
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
