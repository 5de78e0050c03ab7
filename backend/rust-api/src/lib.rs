use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;

pub use config::Config;
pub use services::AppState;

use middlewares::auth::{auth_middleware, student_guard, teacher_guard};
use models::user::STUDENT_IMAGES_ROOT;

/// Headroom for the non-file parts of a multipart body.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(middlewares::request_id::REQUEST_ID_HEADER),
        ])
        .allow_origin(Any);

    let images = ServeDir::new(&app_state.config.upload_dir);
    let upload_limit = DefaultBodyLimit::max(
        app_state.config.upload_max_bytes + MULTIPART_OVERHEAD_BYTES,
    );

    let protected = Router::new()
        .merge(user_routes(upload_limit))
        .merge(classroom_routes())
        .merge(task_routes())
        .merge(progress_routes())
        .route(
            "/dashboard",
            get(handlers::dashboard::teacher_dashboard)
                .route_layer(middleware::from_fn(teacher_guard)),
        )
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .route(
            "/users/register/teacher",
            post(handlers::users::register_teacher),
        )
        .route("/users/login", post(handlers::users::login))
        .merge(protected)
        .nest_service(STUDENT_IMAGES_ROOT.trim_end_matches('/'), images)
        .with_state(app_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(
                    middlewares::request_id::request_id_middleware,
                ))
                .layer(middleware::from_fn(
                    middlewares::metrics::metrics_middleware,
                ))
                .layer(CompressionLayer::new())
                .layer(cors),
        )
}

fn user_routes(upload_limit: DefaultBodyLimit) -> Router<Arc<AppState>> {
    use handlers::users;

    Router::new()
        .route(
            "/users/register/student",
            post(users::register_student)
                .layer(upload_limit)
                .route_layer(middleware::from_fn(teacher_guard)),
        )
        .route(
            "/users",
            get(users::list_users).route_layer(middleware::from_fn(teacher_guard)),
        )
        .route(
            "/users/{id}",
            get(users::get_user).put(users::update_user).merge(
                axum::routing::delete(users::delete_user)
                    .route_layer(middleware::from_fn(teacher_guard)),
            ),
        )
        .route(
            "/users/{id}/photo",
            post(users::update_photo).layer(upload_limit),
        )
}

fn classroom_routes() -> Router<Arc<AppState>> {
    use handlers::classrooms;

    Router::new()
        .route(
            "/classrooms",
            get(classrooms::list_classrooms).post(classrooms::create_classroom),
        )
        .route(
            "/classrooms/{id}",
            get(classrooms::get_classroom)
                .put(classrooms::update_classroom)
                .delete(classrooms::delete_classroom),
        )
        .route_layer(middleware::from_fn(teacher_guard))
}

fn task_routes() -> Router<Arc<AppState>> {
    use handlers::tasks;

    Router::new()
        .route(
            "/tasks",
            get(tasks::list_tasks).merge(
                post(tasks::create_task).route_layer(middleware::from_fn(teacher_guard)),
            ),
        )
        .route(
            "/tasks/{id}",
            get(tasks::get_task).merge(
                put(tasks::update_task)
                    .delete(tasks::delete_task)
                    .route_layer(middleware::from_fn(teacher_guard)),
            ),
        )
}

fn progress_routes() -> Router<Arc<AppState>> {
    use handlers::progress;

    Router::new()
        .route(
            "/progress/student/{id}",
            get(progress::student_progress),
        )
        .route(
            "/progress/task/{id}",
            get(progress::task_progress).route_layer(middleware::from_fn(teacher_guard)),
        )
        .route(
            "/progress/submit",
            post(progress::submit_task).route_layer(middleware::from_fn(student_guard)),
        )
        .route("/progress/update", put(progress::update_progress))
}
