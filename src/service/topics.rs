//! Topic lifecycle endpoints.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::{find_group, find_instance, ok, ok_with, ApiError, ApiQuery, Params};
use crate::error::PubSubError;
use crate::server::ServerState;

/// Handle POST /add/topic/public.
pub async fn handle_add_public_topic(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let topic = state.pubsub.new_public_topic().await;
    ok_with(json!({"topic_id": topic.id()}))
}

/// Handle POST /add/topic/private - create a topic owned by one instance.
pub async fn handle_add_private_topic(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
) -> Result<Json<Value>, ApiError> {
    let instance = find_instance(&state.pubsub, params.instance_id()?)?;
    let topic = instance.new_private_topic().await;
    Ok(ok_with(json!({"topic_id": topic.id()})))
}

/// Handle POST /add/topic/group.
pub async fn handle_add_group_topic(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
) -> Result<Json<Value>, ApiError> {
    let group = find_group(&state.pubsub, params.group_id()?)?;
    let topic = group.new_topic().await;
    Ok(ok_with(json!({"topic_id": topic.id()})))
}

/// Handle POST /remove/topic.
///
/// With `instance_id` the topic is one of that instance's private topics,
/// with `group_id` one of that group's topics, otherwise a public topic.
pub async fn handle_remove_topic(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
) -> Result<Json<Value>, ApiError> {
    let topic_id = params.topic_id()?;

    if let Some(instance_id) = params.instance_id.as_deref() {
        let instance = find_instance(&state.pubsub, instance_id)?;
        let topic = instance
            .private_topic_by_id(topic_id)
            .ok_or_else(|| PubSubError::not_found("private topic", topic_id))?;
        instance.remove_private_topic(&topic).await?;
    } else if let Some(group_id) = params.group_id.as_deref() {
        let group = find_group(&state.pubsub, group_id)?;
        let topic = group
            .topic_by_id(topic_id)
            .ok_or_else(|| PubSubError::not_found("group topic", topic_id))?;
        group.remove_topic(&topic).await?;
    } else {
        let topic = state
            .pubsub
            .public_topic_by_id(topic_id)
            .ok_or_else(|| PubSubError::not_found("public topic", topic_id))?;
        state.pubsub.remove_public_topic(&topic).await?;
    }

    Ok(ok())
}
