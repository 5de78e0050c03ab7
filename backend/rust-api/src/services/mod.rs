use sqlx::PgPool;

use crate::config::Config;
use crate::middlewares::auth::JwtService;
use image_pipeline::ImageQueue;

pub struct AppState {
    pub config: Config,
    pub db: PgPool,
    pub images: ImageQueue,
}

impl AppState {
    pub fn new(config: Config, db: PgPool, images: ImageQueue) -> Self {
        Self { config, db, images }
    }

    pub fn jwt(&self) -> JwtService {
        JwtService::new(&self.config.jwt_secret, self.config.token_ttl_seconds)
    }
}

pub mod auth_service;
pub mod classroom_service;
pub mod dashboard_service;
pub mod grading;
pub mod image_pipeline;
pub mod progress_service;
pub mod task_service;
pub mod uploads;
pub mod user_service;
