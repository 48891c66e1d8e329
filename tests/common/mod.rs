//! Test utilities and server harness for pubsub-sse tests.
//!
//! Provides:
//! - In-process test server setup
//! - Polling helper for eventually-consistent assertions

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use pubsub_sse::pubsub::{PubSubService, ServiceConfig};
use pubsub_sse::server::serve;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// In-process server bound to a random local port.
///
/// Shuts down gracefully when dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    pub pubsub: PubSubService,
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a server with default settings.
    pub async fn start() -> Self {
        Self::with_config(ServiceConfig::default()).await
    }

    /// Start a server with custom engine settings.
    pub async fn with_config(config: ServiceConfig) -> Self {
        pubsub_sse::observability::tracing::init_test_tracing();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind test listener");
        let addr = listener.local_addr().expect("no local address");
        let pubsub = PubSubService::with_config(config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let server = pubsub.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = serve(listener, server, shutdown_rx).await {
                panic!("test server failed: {e}");
            }
        });

        Self {
            addr,
            pubsub,
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Base URL, e.g. `http://127.0.0.1:12345`.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop the server and wait for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("server did not shut down in time")
                .expect("server task panicked");
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Wait for a condition to become true with timeout.
///
/// # Arguments
///
/// * `timeout` - Maximum time to wait
/// * `condition` - Closure that returns true when condition is met
///
/// # Returns
///
/// `true` if condition was met, `false` if timeout expired
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
