//! Group endpoints.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::{find_group, find_instance, ok, ok_with, ApiError, ApiQuery, Params};
use crate::server::ServerState;

/// Handle POST /add/group.
pub async fn handle_add_group(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let group = state.pubsub.new_group();
    ok_with(json!({"group_id": group.id()}))
}

/// Handle POST /remove/group.
pub async fn handle_remove_group(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
) -> Result<Json<Value>, ApiError> {
    let group = find_group(&state.pubsub, params.group_id()?)?;
    state.pubsub.remove_group(&group).await?;
    Ok(ok())
}

/// Handle POST /group/join.
pub async fn handle_join_group(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
) -> Result<Json<Value>, ApiError> {
    let group = find_group(&state.pubsub, params.group_id()?)?;
    let instance = find_instance(&state.pubsub, params.instance_id()?)?;
    group.add_instance(&instance).await?;
    Ok(ok())
}

/// Handle POST /group/leave.
pub async fn handle_leave_group(
    State(state): State<Arc<ServerState>>,
    ApiQuery(params): ApiQuery<Params>,
) -> Result<Json<Value>, ApiError> {
    let group = find_group(&state.pubsub, params.group_id()?)?;
    let instance = find_instance(&state.pubsub, params.instance_id()?)?;
    group.remove_instance(&instance).await?;
    Ok(ok())
}

#[cfg(test)]
mod tests {
    use crate::service::test_support::{app, call};
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_join_and_leave() {
        let (app, state) = app();
        let instance = state.pubsub.new_instance(None).await;

        let (status, body) = call(&app, "POST", "/add/group", "").await;
        assert_eq!(status, StatusCode::OK);
        let group_id = body["group_id"].as_str().unwrap().to_string();
        let group = state.pubsub.group_by_id(&group_id).unwrap();

        let uri = format!("/group/join?group_id={group_id}&instance_id={}", instance.id());
        let (status, _) = call(&app, "POST", &uri, "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(group.instances().len(), 1);

        let (status, body) = call(&app, "POST", &uri, "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("already a member"));

        let uri = format!("/group/leave?group_id={group_id}&instance_id={}", instance.id());
        let (status, _) = call(&app, "POST", &uri, "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(instance.groups().is_empty());
    }

    #[tokio::test]
    async fn test_remove_group() {
        let (app, state) = app();
        let group = state.pubsub.new_group();

        let uri = format!("/remove/group?group_id={}", group.id());
        let (status, _) = call(&app, "POST", &uri, "").await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.pubsub.groups().is_empty());

        let (status, _) = call(&app, "POST", &uri, "").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
