//! Connections: one physical event stream carrying one or more instances.
//!
//! Status moves along a small state machine:
//!
//! ```text
//! Created ──start──▶ Receiving ──loop exit──▶ Waiting ──watchdog──▶ Timeout
//!    │                  ▲  │                    │
//!    │                  └──┼────── start ◀──────┘
//!    └──────────────── stop ──────────────────────────▶ Stopped
//! ```
//!
//! `Timeout` and `Stopped` are terminal and tear down every carried
//! instance.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::envelope::{ConnectionData, Frame};
use super::instance::Instance;
use super::service::{PubSubService, ServiceConfig, WeakService};
use crate::error::{PubSubError, Result};
use crate::flow::{BackpressurePolicy, EnqueueError};
use crate::generate_id;
use crate::observability::metrics::{record_delivery_failure, record_status_transition};

/// Lifecycle status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Not streamed yet.
    Created,
    /// Stream ended; the watchdog is running.
    Waiting,
    /// The receive loop is running.
    Receiving,
    /// The watchdog fired before the peer came back.
    Timeout,
    /// Explicitly stopped.
    Stopped,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Waiting => "waiting",
            Self::Receiving => "receiving",
            Self::Timeout => "timeout",
            Self::Stopped => "stopped",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Timeout | Self::Stopped)
    }

    fn can_move_to(self, target: Self) -> bool {
        use ConnectionStatus::*;
        matches!(
            (self, target),
            (Receiving, Waiting) | (Waiting, Timeout) | (Created | Waiting | Receiving, Stopped)
        )
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct ConnectionState {
    status: ConnectionStatus,
    stream: Option<mpsc::Sender<Frame>>,
    stop: Option<CancellationToken>,
    /// Bumped by every `start`; a watchdog only fires for its own cycle.
    generation: u64,
    instances: HashMap<String, Instance>,
}

pub(crate) struct ConnectionInner {
    id: String,
    service: WeakService,
    timeout: Duration,
    capacity: usize,
    policy: BackpressurePolicy,
    state: Mutex<ConnectionState>,
}

/// One physical event stream. Cloning yields another handle to the same
/// connection; equality is identity.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(service: &PubSubService, config: &ServiceConfig) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: generate_id("C"),
                service: service.downgrade(),
                timeout: config.instance_timeout,
                capacity: config.stream_capacity.max(1),
                policy: config.backpressure,
                state: Mutex::new(ConnectionState {
                    status: ConnectionStatus::Created,
                    stream: None,
                    stop: None,
                    generation: 0,
                    instances: HashMap::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status
    }

    /// How long the connection may sit in `Waiting` before timing out.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn instances(&self) -> HashMap<String, Instance> {
        self.inner.state.lock().instances.clone()
    }

    pub fn instance_count(&self) -> usize {
        self.inner.state.lock().instances.len()
    }

    pub(crate) fn service(&self) -> Option<PubSubService> {
        self.inner.service.upgrade()
    }

    /// Create a new instance carried by this connection. `None` once the
    /// connection is closed.
    pub(crate) fn new_instance(&self) -> Option<Instance> {
        let instance = Instance::new(self);
        self.attach(&instance).then_some(instance)
    }

    /// Carry `instance`. Refused once the connection is closed, so a
    /// teardown cascade never misses it.
    pub(crate) fn attach(&self, instance: &Instance) -> bool {
        let mut state = self.inner.state.lock();
        if state.status.is_terminal() {
            return false;
        }
        instance.set_connection(self);
        state
            .instances
            .insert(instance.id().to_string(), instance.clone());
        true
    }

    /// Drop `instance` from the carried set without any teardown.
    pub(crate) fn detach(&self, instance: &Instance) -> bool {
        let mut state = self.inner.state.lock();
        let carried = state
            .instances
            .get(instance.id())
            .is_some_and(|carried| carried == instance);
        if carried {
            state.instances.remove(instance.id());
        }
        carried
    }

    /// Push a frame onto the stream.
    ///
    /// Fails with [`PubSubError::NotReceiving`] unless the receive loop is
    /// running, and with [`PubSubError::StreamFull`] once the backpressure
    /// policy gives up. Neither failure changes the status.
    pub async fn send(&self, data: &ConnectionData) -> Result<()> {
        let frame = Frame::render(data)?;

        let stream = {
            let state = self.inner.state.lock();
            if state.status == ConnectionStatus::Receiving {
                state.stream.clone()
            } else {
                None
            }
        };
        let Some(stream) = stream else {
            record_delivery_failure("not_receiving");
            return Err(PubSubError::NotReceiving {
                connection_id: self.id().to_string(),
            });
        };

        match self.inner.policy.enqueue(&stream, frame).await {
            Ok(()) => {
                tracing::trace!(connection_id = %self.id(), "Enqueued frame");
                Ok(())
            }
            Err(EnqueueError::Full) => {
                record_delivery_failure("stream_full");
                Err(PubSubError::StreamFull {
                    connection_id: self.id().to_string(),
                })
            }
            Err(EnqueueError::Closed) => {
                record_delivery_failure("closed");
                Err(PubSubError::NotReceiving {
                    connection_id: self.id().to_string(),
                })
            }
        }
    }

    /// Run the receive loop, handing every frame to `on_frame`.
    ///
    /// The first frame describes every carried instance. The loop ends when
    /// `cancel` fires, when the connection is stopped, or when the stream
    /// closes; the connection then moves to `Waiting`.
    pub async fn start<F, Fut>(&self, cancel: CancellationToken, mut on_frame: F) -> Result<()>
    where
        F: FnMut(Frame) -> Fut,
        Fut: Future<Output = ()>,
    {
        let (mut rx, stop) = self.open()?;
        let carried: Vec<Instance> = self.instances().into_values().collect();
        self.announce(ConnectionStatus::Receiving, &carried);

        let result = self.receive(&cancel, &stop, &mut rx, &mut on_frame).await;

        self.stop(ConnectionStatus::Waiting).await;
        result
    }

    fn open(&self) -> Result<(mpsc::Receiver<Frame>, CancellationToken)> {
        let mut state = self.inner.state.lock();
        match state.status {
            ConnectionStatus::Receiving => {
                return Err(PubSubError::AlreadyReceiving {
                    connection_id: self.id().to_string(),
                })
            }
            ConnectionStatus::Timeout | ConnectionStatus::Stopped => {
                return Err(PubSubError::ConnectionClosed {
                    connection_id: self.id().to_string(),
                })
            }
            ConnectionStatus::Created | ConnectionStatus::Waiting => {}
        }

        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let stop = CancellationToken::new();
        state.status = ConnectionStatus::Receiving;
        state.stream = Some(tx);
        state.stop = Some(stop.clone());
        state.generation += 1;
        Ok((rx, stop))
    }

    async fn receive<F, Fut>(
        &self,
        cancel: &CancellationToken,
        stop: &CancellationToken,
        rx: &mut mpsc::Receiver<Frame>,
        on_frame: &mut F,
    ) -> Result<()>
    where
        F: FnMut(Frame) -> Fut,
        Fut: Future<Output = ()>,
    {
        on_frame(self.init_frame()?).await;

        loop {
            tokio::select! {
                frame = rx.recv() => match frame {
                    Some(frame) => on_frame(frame).await,
                    None => break,
                },
                _ = cancel.cancelled() => break,
                _ = stop.cancelled() => break,
            }
        }
        Ok(())
    }

    fn init_frame(&self) -> Result<Frame> {
        let data = ConnectionData {
            instances: self.instances().values().map(Instance::init_data).collect(),
        };
        Ok(Frame::render(&data)?)
    }

    /// Move to `target`. Returns `false` if the edge is not allowed from the
    /// current status.
    pub(crate) async fn stop(&self, target: ConnectionStatus) -> bool {
        self.transition(target, None).await
    }

    async fn transition(&self, target: ConnectionStatus, generation: Option<u64>) -> bool {
        let (generation, carried) = {
            let mut state = self.inner.state.lock();
            if !state.status.can_move_to(target) {
                return false;
            }
            if generation.is_some_and(|g| g != state.generation) {
                return false;
            }
            state.status = target;
            state.stream = None;
            if let Some(stop) = state.stop.take() {
                stop.cancel();
            }
            let carried: Vec<Instance> = state.instances.values().cloned().collect();
            (state.generation, carried)
        };

        self.announce(target, &carried);

        match target {
            ConnectionStatus::Waiting => self.arm_watchdog(generation),
            ConnectionStatus::Timeout | ConnectionStatus::Stopped => self.close(&carried).await,
            _ => {}
        }
        true
    }

    /// Stop a connection that carries nothing anymore.
    pub(crate) fn halt(&self) {
        let moved = {
            let mut state = self.inner.state.lock();
            if !state.instances.is_empty() || !state.status.can_move_to(ConnectionStatus::Stopped) {
                false
            } else {
                state.status = ConnectionStatus::Stopped;
                state.stream = None;
                if let Some(stop) = state.stop.take() {
                    stop.cancel();
                }
                true
            }
        };
        if moved {
            self.announce(ConnectionStatus::Stopped, &[]);
        }
    }

    fn announce(&self, status: ConnectionStatus, carried: &[Instance]) {
        tracing::info!(
            connection_id = %self.id(),
            status = %status,
            instances = carried.len(),
            "Status changed"
        );
        record_status_transition(status.as_str());
        for instance in carried {
            instance.events().on_status_change.emit(status);
        }
    }

    fn arm_watchdog(&self, generation: u64) {
        let Ok(handle) = Handle::try_current() else {
            tracing::warn!(connection_id = %self.id(), "No runtime, watchdog not armed");
            return;
        };
        let connection = self.downgrade();
        let timeout = self.inner.timeout;

        handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(connection) = connection.upgrade() {
                if connection
                    .transition(ConnectionStatus::Timeout, Some(generation))
                    .await
                {
                    tracing::debug!(connection_id = %connection.id(), "Watchdog expired");
                }
            }
        });
    }

    /// Tear down every carried instance and leave the service.
    async fn close(&self, carried: &[Instance]) {
        match self.service() {
            Some(service) => {
                for instance in carried {
                    service.remove_instance(instance).await;
                }
                service.forget_connection(self);
            }
            None => {
                for instance in carried {
                    self.remove_instance(instance).await;
                }
            }
        }
    }

    /// Detach `instance` and undo everything it could see or was part of.
    ///
    /// Returns `false` if this connection was not carrying it. The service
    /// emits its removal event once per successful call.
    pub(crate) async fn remove_instance(&self, instance: &Instance) -> bool {
        if !self.detach(instance) {
            return false;
        }

        for topic in instance.subscribed_topics().values() {
            instance.drop_subscription(topic).await;
        }

        for topic in instance.public_topics().into_values() {
            instance.events().on_remove_topic.emit(topic.clone());
            instance.events().on_remove_public_topic.emit(topic.clone());
            topic.events().on_remove_instance.emit(instance.clone());
        }

        for topic in instance.private_topics().values() {
            if let Err(e) = instance.remove_private_topic(topic).await {
                tracing::warn!(
                    instance_id = %instance.id(),
                    topic_id = %topic.id(),
                    error = %e,
                    "Failed to remove private topic during teardown"
                );
            }
        }

        for group in instance.groups().values() {
            if let Err(e) = group.remove_instance(instance).await {
                tracing::warn!(
                    instance_id = %instance.id(),
                    group_id = %group.id(),
                    error = %e,
                    "Failed to leave group during teardown"
                );
            }
        }

        if let Some(service) = self.service() {
            service.events().on_remove_instance.emit(instance.clone());
        }
        instance.clear_connection();
        true
    }

    pub(crate) fn downgrade(&self) -> WeakConnection {
        WeakConnection(Arc::downgrade(&self.inner))
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

/// Non-owning connection handle, held by instances.
#[derive(Clone, Default)]
pub(crate) struct WeakConnection(Weak<ConnectionInner>);

impl WeakConnection {
    pub(crate) fn upgrade(&self) -> Option<Connection> {
        self.0.upgrade().map(|inner| Connection { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::envelope::{EventData, SysEventKind};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn fast_config(timeout: Duration) -> ServiceConfig {
        ServiceConfig {
            instance_timeout: timeout,
            stream_capacity: 100,
            backpressure: BackpressurePolicy::new(3, Duration::from_millis(1)),
        }
    }

    async fn next<T>(rx: &mut UnboundedReceiver<T>) -> Option<T> {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Spawn the receive loop, forwarding frames into a channel.
    fn spawn_stream(
        instance: &Instance,
    ) -> (
        CancellationToken,
        UnboundedReceiver<Frame>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let cancel = CancellationToken::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let instance = instance.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            instance
                .start(token, move |frame| {
                    let _ = tx.send(frame);
                    async {}
                })
                .await
        });
        (cancel, rx, handle)
    }

    #[test]
    fn test_allowed_edges() {
        use ConnectionStatus::*;
        assert!(Receiving.can_move_to(Waiting));
        assert!(Waiting.can_move_to(Timeout));
        assert!(Created.can_move_to(Stopped));
        assert!(!Created.can_move_to(Waiting));
        assert!(!Created.can_move_to(Timeout));
        assert!(!Receiving.can_move_to(Timeout));
        assert!(!Timeout.can_move_to(Stopped));
        assert!(!Stopped.can_move_to(Stopped));
    }

    #[tokio::test]
    async fn test_send_requires_receiving() {
        let service = PubSubService::new();
        let instance = service.new_instance(None).await;
        let connection = instance.connection().unwrap();

        let data = ConnectionData::for_instance(instance.id(), EventData::update("T", json!(1)));
        let err = connection.send(&data).await.unwrap_err();
        assert!(matches!(err, PubSubError::NotReceiving { .. }));
        assert_eq!(connection.status(), ConnectionStatus::Created);
    }

    #[tokio::test]
    async fn test_start_sends_init_frame_then_waits() {
        let service = PubSubService::new();
        let instance = service.new_instance(None).await;
        let topic = service.new_public_topic().await;
        instance.sub(&topic).await.unwrap();

        let (cancel, mut frames, handle) = spawn_stream(&instance);

        let init = next(&mut frames).await.unwrap().decode().unwrap();
        assert_eq!(init.instances.len(), 1);
        let sys = &init.instances[0].data.sys;
        assert_eq!(sys[0].kind, SysEventKind::Topics);
        assert_eq!(sys[1].kind, SysEventKind::Subscribed);
        assert_eq!(sys[1].list[0].id, topic.id());

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(instance.status(), ConnectionStatus::Waiting);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let service = PubSubService::new();
        let instance = service.new_instance(None).await;
        let (cancel, mut frames, handle) = spawn_stream(&instance);
        next(&mut frames).await.unwrap();

        let err = instance
            .start(CancellationToken::new(), |_| async {})
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::AlreadyReceiving { .. }));
        assert_eq!(instance.status(), ConnectionStatus::Receiving);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_published_frame_reaches_stream() {
        let service = PubSubService::new();
        let instance = service.new_instance(None).await;
        let topic = service.new_public_topic().await;
        instance.sub(&topic).await.unwrap();
        let (cancel, mut frames, handle) = spawn_stream(&instance);
        next(&mut frames).await.unwrap();

        topic.publish("x").await.unwrap();

        let frame = next(&mut frames).await.unwrap().decode().unwrap();
        let updates = &frame.instances[0].data.updates;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].topic, topic.id());
        assert_eq!(updates[0].data, json!("x"));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_full_stream_reports_backpressure() {
        let service = PubSubService::with_config(ServiceConfig {
            stream_capacity: 1,
            ..fast_config(Duration::from_secs(10))
        });
        let instance = service.new_instance(None).await;
        let connection = instance.connection().unwrap();

        // A consumer that never returns keeps the queue saturated.
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let release = Arc::new(tokio::sync::Mutex::new(Some(release_rx)));
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let runner = instance.clone();
        let handle = tokio::spawn(async move {
            runner
                .start(token, move |_| {
                    let release = release.clone();
                    async move {
                        if let Some(rx) = release.lock().await.take() {
                            let _ = rx.await;
                        }
                    }
                })
                .await
        });

        // The init frame parks the consumer; the queue is empty from here on.
        for _ in 0..200 {
            if connection.status() == ConnectionStatus::Receiving {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(connection.status(), ConnectionStatus::Receiving);

        let data = ConnectionData::for_instance(instance.id(), EventData::update("T", json!(1)));
        let mut saw_full = false;
        for _ in 0..10 {
            match connection.send(&data).await {
                Err(PubSubError::StreamFull { .. }) => {
                    saw_full = true;
                    break;
                }
                Ok(()) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(saw_full);
        assert_eq!(connection.status(), ConnectionStatus::Receiving);

        let _ = release_tx.send(());
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_watchdog_times_out_and_tears_down() {
        let service = PubSubService::with_config(fast_config(Duration::from_millis(50)));
        let instance = service.new_instance(None).await;
        let connection = instance.connection().unwrap();
        let (_, mut removed) = service.events().on_remove_instance.subscribe();

        let (cancel, mut frames, handle) = spawn_stream(&instance);
        next(&mut frames).await.unwrap();
        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(connection.status(), ConnectionStatus::Waiting);

        assert_eq!(next(&mut removed).await, Some(instance.clone()));
        assert_eq!(connection.status(), ConnectionStatus::Timeout);
        assert!(service.connection_by_id(connection.id()).is_none());
        assert!(service.instance_by_id(instance.id()).is_none());
    }

    #[tokio::test]
    async fn test_reconnect_disarms_previous_watchdog() {
        let service = PubSubService::with_config(fast_config(Duration::from_millis(100)));
        let instance = service.new_instance(None).await;

        let (cancel, mut frames, handle) = spawn_stream(&instance);
        next(&mut frames).await.unwrap();
        cancel.cancel();
        handle.await.unwrap().unwrap();

        let (cancel, mut frames, handle) = spawn_stream(&instance);
        next(&mut frames).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(instance.status(), ConnectionStatus::Receiving);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stopped_connection_cannot_restart() {
        let service = PubSubService::new();
        let instance = service.new_instance(None).await;
        let connection = instance.connection().unwrap();

        assert!(connection.stop(ConnectionStatus::Stopped).await);
        assert!(!connection.stop(ConnectionStatus::Stopped).await);

        let err = connection
            .start(CancellationToken::new(), |_| async {})
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::ConnectionClosed { .. }));
        assert_eq!(connection.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_status_change_reaches_every_carried_instance() {
        let service = PubSubService::new();
        let a = service.new_instance(None).await;
        let connection = a.connection().unwrap();
        let b = service.new_instance(Some(&connection)).await;
        assert_eq!(connection.instance_count(), 2);

        let (_, mut a_status) = a.events().on_status_change.subscribe();
        let (_, mut b_status) = b.events().on_status_change.subscribe();

        let (cancel, mut frames, handle) = spawn_stream(&a);
        let init = next(&mut frames).await.unwrap().decode().unwrap();
        assert_eq!(init.instances.len(), 2);
        cancel.cancel();
        handle.await.unwrap().unwrap();

        // Listener dispatch is unordered, so compare as sets.
        for rx in [&mut a_status, &mut b_status] {
            let seen = [next(rx).await, next(rx).await];
            assert!(seen.contains(&Some(ConnectionStatus::Receiving)));
            assert!(seen.contains(&Some(ConnectionStatus::Waiting)));
        }
    }
}
