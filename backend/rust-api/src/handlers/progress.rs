use axum::{extract::State, response::IntoResponse, Extension, Json};
use std::sync::Arc;

use crate::{
    error::AppResult,
    extractors::{AppJson, AppPath},
    middlewares::auth::Principal,
    models::progress::{SubmitTaskRequest, UpdateProgressRequest},
    services::{progress_service::ProgressService, AppState},
};

fn progress_service(state: &AppState) -> ProgressService {
    ProgressService::new(state.db.clone(), state.config.grading_mode)
}

/// GET /progress/student/{id}
pub async fn student_progress(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(student_id): AppPath<i64>,
) -> AppResult<impl IntoResponse> {
    let rows = progress_service(&state)
        .list_for_student(&principal, student_id)
        .await?;
    Ok(Json(rows))
}

/// GET /progress/task/{id}
pub async fn task_progress(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(task_id): AppPath<i64>,
) -> AppResult<impl IntoResponse> {
    let rows = progress_service(&state)
        .list_for_task(&principal, task_id)
        .await?;
    Ok(Json(rows))
}

/// POST /progress/submit - the authenticated student submits answers for a task
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppJson(req): AppJson<SubmitTaskRequest>,
) -> AppResult<impl IntoResponse> {
    let progress = progress_service(&state)
        .submit_task(&principal, req)
        .await?;
    Ok(Json(progress))
}

/// PUT /progress/update
pub async fn update_progress(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppJson(req): AppJson<UpdateProgressRequest>,
) -> AppResult<impl IntoResponse> {
    let progress = progress_service(&state)
        .update_status(&principal, req)
        .await?;
    Ok(Json(progress))
}
