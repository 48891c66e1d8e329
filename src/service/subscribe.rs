//! Subscribe, unsubscribe and publish endpoints.

use std::sync::Arc;

use axum::{body::Bytes, extract::State, Json};
use serde_json::Value;

use super::{find_instance, find_topic, ok, ApiError, ApiQuery, Params};
use crate::server::ServerState;

/// Handle POST /sub.
pub async fn handle_sub(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
) -> Result<Json<Value>, ApiError> {
    let instance = find_instance(&state.pubsub, params.instance_id()?)?;
    let topic = find_topic(&state.pubsub, params.topic_id()?)?;
    instance.sub(&topic).await?;
    Ok(ok())
}

/// Handle POST /unsub.
pub async fn handle_unsub(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
) -> Result<Json<Value>, ApiError> {
    let instance = find_instance(&state.pubsub, params.instance_id()?)?;
    let topic = find_topic(&state.pubsub, params.topic_id()?)?;
    instance.unsub(&topic).await?;
    Ok(ok())
}

/// Handle POST /pub - publish the JSON request body on a topic.
pub async fn handle_pub(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let topic = find_topic(&state.pubsub, params.topic_id()?)?;
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;

    topic.publish(&payload).await?;
    Ok(ok())
}
