//! Bounded-retry enqueue onto a connection's outbound stream.
//!
//! A connection's stream is a bounded queue drained by the streaming
//! writer. When the writer falls behind, producers retry a fixed number of
//! times with a fixed delay and then give up: a slow consumer makes its own
//! deliveries fail instead of growing memory or blocking publishers.

use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::Sender;

/// Default number of enqueue attempts.
pub const DEFAULT_SEND_ATTEMPTS: u32 = 10;

/// Default delay between two enqueue attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Why an enqueue did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Queue stayed full for every attempt.
    Full,
    /// The receiving side is gone.
    Closed,
}

/// Retry policy applied to every frame pushed onto a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackpressurePolicy {
    attempts: u32,
    retry_delay: Duration,
}

impl Default for BackpressurePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

impl BackpressurePolicy {
    /// Create a policy. `attempts` is clamped to at least one.
    pub fn new(attempts: u32, retry_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            retry_delay,
        }
    }

    /// Number of non-blocking enqueue attempts.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Sleep between two attempts.
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Upper bound on how long [`enqueue`](Self::enqueue) can take.
    pub fn window(&self) -> Duration {
        self.retry_delay * self.attempts.saturating_sub(1)
    }

    /// Push `item` onto `sender` without ever blocking on queue space.
    pub async fn enqueue<T>(&self, sender: &Sender<T>, item: T) -> Result<(), EnqueueError> {
        let mut item = item;
        for attempt in 1..=self.attempts {
            match sender.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(EnqueueError::Closed),
                Err(TrySendError::Full(returned)) => {
                    tracing::debug!(attempt, "stream is full");
                    if attempt == self.attempts {
                        break;
                    }
                    item = returned;
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
        Err(EnqueueError::Full)
    }
}
