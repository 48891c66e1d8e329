//! Instance lifecycle endpoints.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::{find_instance, ok, ok_with, ApiError, ApiQuery, Params};
use crate::error::PubSubError;
use crate::server::ServerState;

/// Handle POST /add/instance - create an instance, optionally on an
/// existing connection.
pub async fn handle_add_instance(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
) -> Result<Json<Value>, ApiError> {
    let connection = match params.connection_id.as_deref() {
        Some(id) => Some(
            state
                .pubsub
                .connection_by_id(id)
                .ok_or_else(|| PubSubError::not_found("connection", id))?,
        ),
        None => None,
    };

    let instance = state.pubsub.new_instance(connection.as_ref()).await;
    Ok(ok_with(json!({
        "instance_id": instance.id(),
        "connection_id": instance.connection_id(),
    })))
}

/// Handle POST /remove/instance.
pub async fn handle_remove_instance(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
) -> Result<Json<Value>, ApiError> {
    let instance = find_instance(&state.pubsub, params.instance_id()?)?;
    state.pubsub.remove_instance(&instance).await;
    Ok(ok())
}
