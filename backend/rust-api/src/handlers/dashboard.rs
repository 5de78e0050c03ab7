use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    error::AppResult,
    middlewares::auth::Principal,
    models::dashboard::DashboardQuery,
    services::{dashboard_service::DashboardService, AppState},
};

/// GET /dashboard?classroom_id=
pub async fn teacher_dashboard(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<DashboardQuery>,
) -> AppResult<impl IntoResponse> {
    let dashboard = DashboardService::new(state.db.clone())
        .teacher_dashboard(&principal, query.classroom_id)
        .await?;
    Ok(Json(dashboard))
}
