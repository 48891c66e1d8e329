//! HTTP handlers: the control plane and the event stream.
//!
//! Every response body is JSON of the form `{"ok": bool, ...}`, except the
//! event stream itself once it has been opened.

pub mod events;
pub mod groups;
pub mod instances;
pub mod subscribe;
pub mod topics;

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query},
    http::{request::Parts, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::error::{ErrorKind, PubSubError};
use crate::pubsub::{Group, Instance, PubSubService, Topic};
use crate::server::ServerState;

/// Create the HTTP router.
pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/add/instance", post(instances::handle_add_instance))
        .route("/remove/instance", post(instances::handle_remove_instance))
        .route("/add/topic/public", post(topics::handle_add_public_topic))
        .route("/add/topic/private", post(topics::handle_add_private_topic))
        .route("/add/topic/group", post(topics::handle_add_group_topic))
        .route("/remove/topic", post(topics::handle_remove_topic))
        .route("/add/group", post(groups::handle_add_group))
        .route("/remove/group", post(groups::handle_remove_group))
        .route("/group/join", post(groups::handle_join_group))
        .route("/group/leave", post(groups::handle_leave_group))
        .route("/sub", post(subscribe::handle_sub))
        .route("/unsub", post(subscribe::handle_unsub))
        .route("/pub", post(subscribe::handle_pub))
        .route("/event", get(events::handle_event_stream))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .fallback(unknown_route)
        .layer(middleware::map_response(json_method_not_allowed))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle GET /health - Basic health check.
async fn health_handler() -> Json<Value> {
    Json(json!({"ok": true}))
}

/// Handle GET /ready - Readiness check.
async fn ready_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> Response {
    if state.shutdown.is_cancelled() {
        ApiError::ShuttingDown.into_response()
    } else {
        Json(json!({"ok": true, "service_id": state.pubsub.id()})).into_response()
    }
}

async fn unknown_route(uri: Uri) -> ApiError {
    ApiError::UnknownRoute(uri.path().to_string())
}

/// Give the router's bare 405 a JSON body.
async fn json_method_not_allowed(response: Response) -> Response {
    if response.status() == StatusCode::METHOD_NOT_ALLOWED {
        return ApiError::MethodNotAllowed.into_response();
    }
    response
}

/// `Query` whose rejection is an [`ApiError`].
#[derive(Debug)]
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Query::try_from_uri(&parts.uri)
            .map(|Query(value)| Self(value))
            .map_err(|e| ApiError::BadRequest(e.body_text()))
    }
}

/// Query parameters shared by every endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct Params {
    pub instance_id: Option<String>,
    pub connection_id: Option<String>,
    pub topic_id: Option<String>,
    pub group_id: Option<String>,
}

impl Params {
    pub fn instance_id(&self) -> Result<&str, ApiError> {
        self.instance_id
            .as_deref()
            .ok_or(ApiError::MissingParam("instance_id"))
    }

    pub fn topic_id(&self) -> Result<&str, ApiError> {
        self.topic_id
            .as_deref()
            .ok_or(ApiError::MissingParam("topic_id"))
    }

    pub fn group_id(&self) -> Result<&str, ApiError> {
        self.group_id
            .as_deref()
            .ok_or(ApiError::MissingParam("group_id"))
    }
}

/// Failure of an HTTP request.
#[derive(Debug)]
pub enum ApiError {
    MissingParam(&'static str),
    BadRequest(String),
    UnknownRoute(String),
    MethodNotAllowed,
    ShuttingDown,
    PubSub(PubSubError),
}

impl From<PubSubError> for ApiError {
    fn from(e: PubSubError) -> Self {
        Self::PubSub(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingParam(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownRoute(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::PubSub(PubSubError::AlreadyReceiving { .. }) => StatusCode::CONFLICT,
            Self::PubSub(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::InvalidState | ErrorKind::NotSubscribed => StatusCode::BAD_REQUEST,
                ErrorKind::Backpressure => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Serialization => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            Self::MissingParam(name) => format!("missing query parameter {name}"),
            Self::BadRequest(msg) => msg.clone(),
            Self::UnknownRoute(path) => format!("no route for {path}"),
            Self::MethodNotAllowed => "method not allowed".to_string(),
            Self::ShuttingDown => "server is shutting down".to_string(),
            Self::PubSub(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self.message(), "Request failed");
        } else {
            tracing::debug!(status = %status, error = %self.message(), "Request rejected");
        }
        (status, Json(json!({"ok": false, "error": self.message()}))).into_response()
    }
}

/// Successful response carrying extra fields next to `ok`.
pub(crate) fn ok_with(fields: Value) -> Json<Value> {
    let mut body = json!({"ok": true});
    if let (Some(body), Value::Object(fields)) = (body.as_object_mut(), fields) {
        body.extend(fields);
    }
    Json(body)
}

pub(crate) fn ok() -> Json<Value> {
    Json(json!({"ok": true}))
}

pub(crate) fn find_instance(pubsub: &PubSubService, id: &str) -> Result<Instance, ApiError> {
    pubsub
        .instance_by_id(id)
        .ok_or_else(|| PubSubError::not_found("instance", id).into())
}

pub(crate) fn find_group(pubsub: &PubSubService, id: &str) -> Result<Group, ApiError> {
    pubsub
        .group_by_id(id)
        .ok_or_else(|| PubSubError::not_found("group", id).into())
}

/// Resolve a topic id among public, group and private topics.
pub(crate) fn find_topic(pubsub: &PubSubService, id: &str) -> Result<Topic, ApiError> {
    pubsub
        .public_topic_by_id(id)
        .or_else(|| {
            pubsub
                .groups()
                .values()
                .find_map(|g| g.topic_by_id(id))
        })
        .or_else(|| {
            pubsub
                .instances()
                .values()
                .find_map(|i| i.private_topic_by_id(id))
        })
        .ok_or_else(|| PubSubError::not_found("topic", id).into())
}


#[cfg(test)]
mod tests {
    use super::test_support::{app, call};
    use super::*;

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = app();
        let (status, body) = call(&app, "GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_ready_endpoint_during_shutdown() {
        let (app, state) = app();
        let (status, _) = call(&app, "GET", "/ready", "").await;
        assert_eq!(status, StatusCode::OK);

        state.shutdown.cancel();
        let (status, body) = call(&app, "GET", "/ready", "").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ok"], false);
    }

    #[tokio::test]
    async fn test_malformed_query_is_json() {
        let (app, _) = app();
        let (status, body) = call(&app, "POST", "/sub?topic_id=T-1&topic_id=T-2", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["ok"], false);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_route_and_method_are_json() {
        let (app, _) = app();

        let (status, body) = call(&app, "POST", "/nope", "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
        assert_eq!(body["error"], "no route for /nope");

        let (status, body) = call(&app, "GET", "/sub", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["ok"], false);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (ApiError::MissingParam("topic_id"), StatusCode::BAD_REQUEST),
            (
                PubSubError::not_found("topic", "T-1").into(),
                StatusCode::NOT_FOUND,
            ),
            (
                PubSubError::AlreadyReceiving {
                    connection_id: "C-1".into(),
                }
                .into(),
                StatusCode::CONFLICT,
            ),
            (
                PubSubError::StreamFull {
                    connection_id: "C-1".into(),
                }
                .into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                PubSubError::NotSubscribed {
                    instance_id: "I-1".into(),
                    topic_id: "T-1".into(),
                }
                .into(),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(error.status(), status);
        }
    }

    #[tokio::test]
    async fn test_find_topic_searches_every_kind() {
        let pubsub = PubSubService::new();
        let instance = pubsub.new_instance(None).await;
        let private = instance.new_private_topic().await;
        let group = pubsub.new_group();
        let group_topic = group.new_topic().await;
        let public = pubsub.new_public_topic().await;

        for topic in [&private, &group_topic, &public] {
            assert_eq!(find_topic(&pubsub, topic.id()).unwrap(), *topic);
        }
        assert!(find_topic(&pubsub, "T-missing").is_err());
    }
}
