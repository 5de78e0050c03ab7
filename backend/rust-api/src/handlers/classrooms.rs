use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use std::sync::Arc;

use crate::{
    error::AppResult,
    extractors::{AppJson, AppPath},
    middlewares::auth::Principal,
    models::classroom::{CreateClassroomRequest, UpdateClassroomRequest},
    services::{classroom_service::ClassroomService, AppState},
};

/// POST /classrooms
pub async fn create_classroom(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppJson(req): AppJson<CreateClassroomRequest>,
) -> AppResult<impl IntoResponse> {
    let classroom = ClassroomService::new(state.db.clone())
        .create(&principal, req)
        .await?;
    Ok((StatusCode::CREATED, Json(classroom)))
}

/// GET /classrooms
pub async fn list_classrooms(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> AppResult<impl IntoResponse> {
    let classrooms = ClassroomService::new(state.db.clone())
        .list_for_teacher(&principal)
        .await?;
    Ok(Json(classrooms))
}

/// GET /classrooms/{id}
pub async fn get_classroom(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(classroom_id): AppPath<i64>,
) -> AppResult<impl IntoResponse> {
    let classroom = ClassroomService::new(state.db.clone())
        .get(&principal, classroom_id)
        .await?;
    Ok(Json(classroom))
}

/// PUT /classrooms/{id}
pub async fn update_classroom(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(classroom_id): AppPath<i64>,
    AppJson(req): AppJson<UpdateClassroomRequest>,
) -> AppResult<impl IntoResponse> {
    let classroom = ClassroomService::new(state.db.clone())
        .update(&principal, classroom_id, req)
        .await?;
    Ok(Json(classroom))
}

/// DELETE /classrooms/{id}
pub async fn delete_classroom(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(classroom_id): AppPath<i64>,
) -> AppResult<impl IntoResponse> {
    let deleted = ClassroomService::new(state.db.clone())
        .delete(&principal, classroom_id)
        .await?;
    Ok(Json(deleted))
}
