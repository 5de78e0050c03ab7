use axum::{
    extract::{multipart::Field, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::{AppError, AppResult},
    extractors::{AppJson, AppPath},
    middlewares::auth::Principal,
    models::user::{
        LoginRequest, RegisterStudentForm, RegisterTeacherRequest, UpdateUserRequest,
        UploadedPhoto,
    },
    services::{auth_service::AuthService, user_service::UserService, AppState},
};

fn user_service(state: &AppState) -> UserService {
    UserService::new(
        state.db.clone(),
        state.config.public_base_url.clone(),
        state.config.upload_dir.clone(),
        state.images.clone(),
    )
}

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.db.clone(),
        state.jwt(),
        state.config.public_base_url.clone(),
    )
}

/// POST /users/register/teacher
pub async fn register_teacher(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RegisterTeacherRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    tracing::info!("Registering teacher: {}", req.username);

    let profile = auth_service(&state).register_teacher(req).await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// POST /users/register/student (multipart: username, password, classroom_id, photo)
pub async fn register_student(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let form = read_student_form(multipart, state.config.upload_max_bytes).await?;

    let profile = user_service(&state)
        .register_student(&principal, form)
        .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// POST /users/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let response = auth_service(&state).login(req).await?;
    Ok(Json(response))
}

/// GET /users
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
) -> AppResult<impl IntoResponse> {
    let users = user_service(&state).list(&principal).await?;
    Ok(Json(users))
}

/// GET /users/{id}
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(user_id): AppPath<i64>,
) -> AppResult<impl IntoResponse> {
    let user = user_service(&state).get(&principal, user_id).await?;
    Ok(Json(user))
}

/// PUT /users/{id}
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(user_id): AppPath<i64>,
    AppJson(req): AppJson<UpdateUserRequest>,
) -> AppResult<impl IntoResponse> {
    let user = user_service(&state)
        .update(&principal, user_id, req)
        .await?;
    Ok(Json(user))
}

/// POST /users/{id}/photo (multipart: photo)
pub async fn update_photo(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(user_id): AppPath<i64>,
    mut multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let mut photo = None;
    while let Some(field) = next_field(&mut multipart).await? {
        if field.name() == Some("photo") {
            photo = Some(read_photo(field, state.config.upload_max_bytes).await?);
        }
    }
    let photo = photo.ok_or_else(|| AppError::validation("photo is required"))?;

    let user = user_service(&state)
        .update_photo(&principal, user_id, photo)
        .await?;
    Ok(Json(user))
}

/// DELETE /users/{id}
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    AppPath(user_id): AppPath<i64>,
) -> AppResult<impl IntoResponse> {
    user_service(&state).delete(&principal, user_id).await?;
    Ok(Json(json!({ "message": "User deleted", "id": user_id })))
}

async fn next_field(multipart: &mut Multipart) -> AppResult<Option<Field<'_>>> {
    multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("Invalid multipart data: {}", e.body_text())))
}

async fn read_text(field: Field<'_>) -> AppResult<String> {
    let name = field.name().unwrap_or_default().to_string();
    field
        .text()
        .await
        .map_err(|_| AppError::validation(format!("Invalid value for {}", name)))
}

async fn read_photo(mut field: Field<'_>, max_bytes: usize) -> AppResult<UploadedPhoto> {
    let original_name = field.file_name().map(str::to_string);
    let content_type = field.content_type().map(str::to_string);

    let mut bytes = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|_| AppError::validation("Failed to read uploaded file"))?
    {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(AppError::validation(format!(
                "Photo exceeds the {} byte limit",
                max_bytes
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(UploadedPhoto {
        original_name,
        content_type,
        bytes,
    })
}

async fn read_student_form(mut multipart: Multipart, max_bytes: usize) -> AppResult<RegisterStudentForm> {
    let mut form = RegisterStudentForm::default();

    while let Some(field) = next_field(&mut multipart).await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "username" => form.username = read_text(field).await?,
            "password" => form.password = read_text(field).await?,
            "classroom_id" => {
                let raw = read_text(field).await?;
                form.classroom_id = parse_optional_id(&raw)?;
            }
            "photo" => {
                let photo = read_photo(field, max_bytes).await?;
                // Browsers send an empty part when no file was picked.
                if !photo.bytes.is_empty() {
                    form.photo = Some(photo);
                }
            }
            other => tracing::debug!("Ignoring multipart field {}", other),
        }
    }

    Ok(form)
}

fn parse_optional_id(raw: &str) -> AppResult<Option<i64>> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "null" {
        return Ok(None);
    }
    raw.parse()
        .map(Some)
        .map_err(|_| AppError::validation("classroom_id must be a number"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classroom_id_field_accepts_blank_values() {
        assert_eq!(parse_optional_id("").unwrap(), None);
        assert_eq!(parse_optional_id(" null ").unwrap(), None);
        assert_eq!(parse_optional_id("12").unwrap(), Some(12));
        assert!(parse_optional_id("twelve").is_err());
    }
}
