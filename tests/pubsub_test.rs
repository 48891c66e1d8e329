//! End-to-end scenarios for the subscription engine, driven through the
//! library API.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use common::wait_for;
use pubsub_sse::flow::BackpressurePolicy;
use pubsub_sse::pubsub::{
    ConnectionData, ConnectionStatus, Instance, PubSubService, ServiceConfig, SysEventKind,
};
use serde_json::json;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Stream {
    cancel: CancellationToken,
    frames: UnboundedReceiver<ConnectionData>,
    handle: JoinHandle<pubsub_sse::Result<()>>,
}

impl Stream {
    fn open(instance: &Instance) -> Self {
        let cancel = CancellationToken::new();
        let (tx, frames) = unbounded_channel();
        let runner = instance.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            runner
                .start(token, move |frame| {
                    let _ = tx.send(frame.decode().expect("frame is valid JSON"));
                    async {}
                })
                .await
        });
        Self {
            cancel,
            frames,
            handle,
        }
    }

    async fn next(&mut self) -> Option<ConnectionData> {
        tokio::time::timeout(Duration::from_secs(2), self.frames.recv())
            .await
            .ok()
            .flatten()
    }

    async fn close(self) {
        self.cancel.cancel();
        self.handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn publish_reaches_subscribed_stream_once() {
    let service = PubSubService::new();
    let topic = service.new_public_topic().await;
    let a = service.new_instance(None).await;
    a.sub(&topic).await.unwrap();

    let mut stream = Stream::open(&a);
    stream.next().await.unwrap();

    topic.publish("x").await.unwrap();

    let frame = stream.next().await.unwrap();
    assert_eq!(frame.instances.len(), 1);
    assert_eq!(frame.instances[0].id, a.id());
    let updates = &frame.instances[0].data.updates;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].topic, topic.id());
    assert_eq!(updates[0].data, json!("x"));

    // Nothing else was queued.
    assert!(tokio::time::timeout(Duration::from_millis(100), stream.frames.recv())
        .await
        .is_err());
    stream.close().await;
}

#[tokio::test]
async fn unsubscribed_instance_gets_no_updates() {
    let service = PubSubService::new();
    let topic = service.new_public_topic().await;
    let a = service.new_instance(None).await;
    let b = service.new_instance(None).await;
    a.sub(&topic).await.unwrap();

    let mut a_stream = Stream::open(&a);
    let mut b_stream = Stream::open(&b);
    a_stream.next().await.unwrap();
    b_stream.next().await.unwrap();

    topic.publish(&json!({"n": 1})).await.unwrap();

    assert!(a_stream.next().await.is_some());
    assert!(tokio::time::timeout(Duration::from_millis(100), b_stream.frames.recv())
        .await
        .is_err());

    a_stream.close().await;
    b_stream.close().await;
}

#[tokio::test]
async fn topology_changes_push_topic_lists() {
    let service = PubSubService::new();
    let a = service.new_instance(None).await;
    let mut stream = Stream::open(&a);
    let init = stream.next().await.unwrap();
    assert!(init.instances[0].data.sys.is_empty());

    let public = service.new_public_topic().await;
    let frame = stream.next().await.unwrap();
    let sys = &frame.instances[0].data.sys[0];
    assert_eq!(sys.kind, SysEventKind::Topics);
    assert_eq!(sys.list.len(), 1);
    assert_eq!(sys.list[0].id, public.id());

    let private = a.new_private_topic().await;
    let frame = stream.next().await.unwrap();
    let ids: HashSet<_> = frame.instances[0].data.sys[0]
        .list
        .iter()
        .map(|t| t.id.clone())
        .collect();
    assert_eq!(
        ids,
        HashSet::from([public.id().to_string(), private.id().to_string()])
    );

    a.sub(&private).await.unwrap();
    let frame = stream.next().await.unwrap();
    let sys = &frame.instances[0].data.sys[0];
    assert_eq!(sys.kind, SysEventKind::Subscribed);
    assert_eq!(sys.list.len(), 1);
    assert_eq!(sys.list[0].kind, None);

    stream.close().await;
}

#[tokio::test]
async fn removing_public_topic_unsubscribes_everyone() {
    let service = PubSubService::new();
    let topic = service.new_public_topic().await;
    let mut instances = Vec::new();
    for _ in 0..3 {
        let instance = service.new_instance(None).await;
        instance.sub(&topic).await.unwrap();
        instances.push(instance);
    }
    let mut removed = Vec::new();
    for instance in &instances {
        removed.push(instance.events().on_remove_public_topic.subscribe().1);
    }

    service.remove_public_topic(&topic).await.unwrap();

    assert!(topic.instances().is_empty());
    for (instance, rx) in instances.iter().zip(removed.iter_mut()) {
        assert!(!topic.is_subscribed(instance));
        let first = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
        assert_eq!(first.ok().flatten(), Some(topic.clone()));
        let second = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(second.is_err());
    }
}

#[tokio::test]
async fn status_follows_allowed_edges_only() {
    let service = PubSubService::with_config(ServiceConfig {
        instance_timeout: Duration::from_millis(100),
        ..ServiceConfig::default()
    });
    let instance = service.new_instance(None).await;
    let connection = instance.connection().unwrap();
    let mut observed = vec![connection.status()];

    for _ in 0..2 {
        let mut stream = Stream::open(&instance);
        stream.next().await.unwrap();
        observed.push(connection.status());
        stream.close().await;
        observed.push(connection.status());
    }
    assert!(
        wait_for(Duration::from_secs(2), || connection.status() == ConnectionStatus::Timeout)
            .await
    );
    observed.push(connection.status());

    use ConnectionStatus::*;
    assert_eq!(
        observed,
        vec![Created, Receiving, Waiting, Receiving, Waiting, Timeout]
    );
    assert!(wait_for(Duration::from_secs(1), || service.instance_by_id(instance.id()).is_none()).await);
}

#[tokio::test]
async fn group_topic_scenario() {
    let service = PubSubService::new();
    let group = service.new_group();
    let a = service.new_instance(None).await;
    group.add_instance(&a).await.unwrap();
    let before = a.all_topics().len();
    let (_, mut group_topics) = a.events().on_new_group_topic.subscribe();

    let topic = group.new_topic().await;

    let first = tokio::time::timeout(Duration::from_millis(500), group_topics.recv()).await;
    assert_eq!(first.ok().flatten().map(|gt| gt.topic), Some(topic.clone()));
    let second = tokio::time::timeout(Duration::from_millis(100), group_topics.recv()).await;
    assert!(second.is_err());
    assert_eq!(a.all_topics().len(), before + 1);
}

#[tokio::test]
async fn slow_stream_does_not_block_other_subscribers() {
    let service = PubSubService::with_config(ServiceConfig {
        stream_capacity: 2,
        backpressure: BackpressurePolicy::new(5, Duration::from_millis(5)),
        ..ServiceConfig::default()
    });
    let topic = service.new_public_topic().await;
    let slow = service.new_instance(None).await;
    let fast = service.new_instance(None).await;
    slow.sub(&topic).await.unwrap();
    fast.sub(&topic).await.unwrap();

    // The slow stream never drains past its first frame.
    let cancel = CancellationToken::new();
    let (release_tx, release_rx) = tokio::sync::watch::channel(false);
    let slow_runner = slow.clone();
    let token = cancel.clone();
    let slow_handle = tokio::spawn(async move {
        slow_runner
            .start(token, move |_| {
                let mut release = release_rx.clone();
                async move {
                    let _ = release.wait_for(|released| *released).await;
                }
            })
            .await
    });
    let mut fast_stream = Stream::open(&fast);
    fast_stream.next().await.unwrap();
    assert!(
        wait_for(Duration::from_secs(1), || slow.status() == ConnectionStatus::Receiving).await
    );

    for n in 0..5 {
        topic.publish(&n).await.unwrap();
    }

    for n in 0..5 {
        let frame = fast_stream.next().await.unwrap();
        assert_eq!(frame.instances[0].data.updates[0].data, json!(n));
    }
    assert_eq!(slow.status(), ConnectionStatus::Receiving);

    let _ = release_tx.send(true);
    cancel.cancel();
    slow_handle.await.unwrap().unwrap();
    fast_stream.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_churn_leaves_no_residue() {
    let service = PubSubService::new();
    let topic = service.new_public_topic().await;
    let group = service.new_group();
    let group_topic = group.new_topic().await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let service = service.clone();
        let topic = topic.clone();
        let group = group.clone();
        let group_topic = group_topic.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                let instance = service.new_instance(None).await;
                instance.sub(&topic).await.unwrap();
                group.add_instance(&instance).await.unwrap();
                instance.sub(&group_topic).await.unwrap();
                let private = instance.new_private_topic().await;
                instance.sub(&private).await.unwrap();
                topic.publish(&i).await.unwrap();
                group_topic.publish(&i).await.unwrap();
                service.remove_instance(&instance).await;
            }
        }));
    }
    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    assert!(topic.instances().is_empty());
    assert!(group_topic.instances().is_empty());
    assert!(group.instances().is_empty());
    assert!(service.instances().is_empty());
    assert!(service.connections().is_empty());
}
