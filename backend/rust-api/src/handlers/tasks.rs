use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    error::AppResult,
    extractors::{AppJson, AppPath},
    middlewares::auth::Principal,
    models::task::{CreateTaskRequest, ListTasksQuery, UpdateTaskRequest},
    services::{task_service::TaskService, AppState},
};

/// POST /tasks - creates the task and assigns it to every student of the classroom
pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppJson(req): AppJson<CreateTaskRequest>,
) -> AppResult<impl IntoResponse> {
    let created = TaskService::new(state.db.clone())
        .create(&principal, req)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /tasks?classroom_id=
pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListTasksQuery>,
) -> AppResult<impl IntoResponse> {
    let tasks = TaskService::new(state.db.clone())
        .list(&principal, query.classroom_id)
        .await?;
    Ok(Json(tasks))
}

/// GET /tasks/{id}
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(task_id): AppPath<i64>,
) -> AppResult<impl IntoResponse> {
    let task = TaskService::new(state.db.clone())
        .get(&principal, task_id)
        .await?;
    Ok(Json(task))
}

/// PUT /tasks/{id}
pub async fn update_task(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(task_id): AppPath<i64>,
    AppJson(req): AppJson<UpdateTaskRequest>,
) -> AppResult<impl IntoResponse> {
    let task = TaskService::new(state.db.clone())
        .update(&principal, task_id, req)
        .await?;
    Ok(Json(task))
}

/// DELETE /tasks/{id}
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(task_id): AppPath<i64>,
) -> AppResult<impl IntoResponse> {
    TaskService::new(state.db.clone())
        .delete(&principal, task_id)
        .await?;
    Ok(Json(json!({ "message": "Task deleted", "id": task_id })))
}
