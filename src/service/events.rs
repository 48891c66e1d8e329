//! The Server-Sent-Events stream.
//!
//! `GET /event?instance_id=` runs the receive loop of the instance's
//! connection for as long as the HTTP response is being read. Dropping the
//! response, or shutting the server down, ends the loop and moves the
//! connection to `Waiting`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::Stream;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::{find_instance, ApiError, ApiQuery, Params};
use crate::error::PubSubError;
use crate::pubsub::{ConnectionStatus, Frame, Instance};
use crate::server::ServerState;

/// Frames buffered between the receive loop and the response body.
const RESPONSE_BUFFER: usize = 16;

/// Handle GET /event - open the event stream of an instance.
pub async fn handle_event_stream(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let instance = find_instance(&state.pubsub, params.instance_id()?)?;
    if state.shutdown.is_cancelled() {
        return Err(ApiError::ShuttingDown);
    }
    if instance.status() == ConnectionStatus::Receiving {
        return Err(PubSubError::AlreadyReceiving {
            connection_id: instance.connection_id().unwrap_or_default(),
        }
        .into());
    }

    let (tx, rx) = mpsc::channel::<Frame>(RESPONSE_BUFFER);
    tokio::spawn(run_stream(instance, tx, state.shutdown.child_token()));

    let stream = ReceiverStream::new(rx).map(|frame| Ok(Event::default().data(frame.json())));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Drive the receive loop until the client goes away or `cancel` fires.
async fn run_stream(instance: Instance, tx: mpsc::Sender<Frame>, cancel: CancellationToken) {
    let watcher = {
        let tx = tx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => cancel.cancel(),
                _ = cancel.cancelled() => {}
            }
        })
    };

    tracing::debug!(instance_id = %instance.id(), "Event stream opened");

    let result = instance
        .start(cancel.clone(), |frame| {
            let tx = tx.clone();
            async move {
                // Closed only once the client is gone; the watcher cancels.
                let _ = tx.send(frame).await;
            }
        })
        .await;

    if let Err(e) = result {
        tracing::warn!(instance_id = %instance.id(), error = %e, "Event stream rejected");
    }

    cancel.cancel();
    let _ = watcher.await;
    tracing::debug!(instance_id = %instance.id(), "Event stream closed");
}

#[cfg(test)]
mod tests {
    use crate::pubsub::ConnectionStatus;
    use crate::service::test_support::{app, call};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn wait_for_status(instance: &crate::pubsub::Instance, status: ConnectionStatus) {
        for _ in 0..100 {
            if instance.status() == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("instance never reached {status}");
    }

    #[tokio::test]
    async fn test_stream_delivers_init_frame_and_updates() {
        let (app, state) = app();
        let instance = state.pubsub.new_instance(None).await;
        let topic = state.pubsub.new_public_topic().await;
        instance.sub(&topic).await.unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/event?instance_id={}", instance.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            "text/event-stream"
        );
        let mut body = response.into_body();

        let chunk = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.starts_with("data: "));
        assert!(text.contains("\"subscribed\""));

        wait_for_status(&instance, ConnectionStatus::Receiving).await;

        let (status, _) = call(
            &app,
            "GET",
            &format!("/event?instance_id={}", instance.id()),
            "",
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        topic.publish("x").await.unwrap();
        let chunk = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.contains("\"updates\""));
        assert!(text.contains(topic.id()));

        drop(body);
        wait_for_status(&instance, ConnectionStatus::Waiting).await;
    }

    #[tokio::test]
    async fn test_shutdown_ends_stream() {
        let (app, state) = app();
        let instance = state.pubsub.new_instance(None).await;

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/event?instance_id={}", instance.id()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let mut body = response.into_body();
        body.frame().await.unwrap().unwrap();

        state.shutdown.cancel();
        let rest = tokio::time::timeout(Duration::from_secs(2), body.collect())
            .await
            .unwrap();
        assert!(rest.is_ok());
        wait_for_status(&instance, ConnectionStatus::Waiting).await;
    }

    #[tokio::test]
    async fn test_unknown_instance() {
        let (app, _) = app();
        let (status, body) = call(&app, "GET", "/event?instance_id=I-nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
    }
}
