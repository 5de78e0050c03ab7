use anyhow::Context;
use bcrypt::{hash, verify, DEFAULT_COST};
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::metrics::track_db_operation;
use crate::middlewares::auth::JwtService;
use crate::models::user::{
    LoginRequest, LoginResponse, RegisterTeacherRequest, User, UserProfile, UserType,
};
use crate::services::user_service::USER_COLUMNS;

pub struct AuthService {
    db: PgPool,
    jwt_service: JwtService,
    public_base_url: String,
}

impl AuthService {
    pub fn new(db: PgPool, jwt_service: JwtService, public_base_url: impl Into<String>) -> Self {
        Self {
            db,
            jwt_service,
            public_base_url: public_base_url.into(),
        }
    }

    /// Hash a password using bcrypt with the default cost
    pub fn hash_password(password: &str) -> AppResult<String> {
        Ok(hash(password, DEFAULT_COST).context("Failed to hash password")?)
    }

    /// Verify a password against a hash; a malformed hash never matches
    pub fn verify_password(password: &str, hash: &str) -> bool {
        verify(password, hash).unwrap_or(false)
    }

    /// Register a new teacher account
    pub async fn register_teacher(&self, req: RegisterTeacherRequest) -> AppResult<UserProfile> {
        let username = req.username.trim().to_string();
        let email = req.email.trim().to_lowercase();

        let taken: bool = track_db_operation(
            "users.exists",
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1 OR email = $2)")
                .bind(&username)
                .bind(&email)
                .fetch_one(&self.db),
        )
        .await?;

        if taken {
            return Err(AppError::validation(
                "A user with this username or email already exists",
            ));
        }

        let password_hash = Self::hash_password(&req.password)?;

        let user: User = track_db_operation(
            "users.insert",
            sqlx::query_as(&format!(
                "INSERT INTO users (username, email, password_hash, type)
                 VALUES ($1, $2, $3, $4)
                 RETURNING {}",
                USER_COLUMNS
            ))
            .bind(&username)
            .bind(&email)
            .bind(&password_hash)
            .bind(UserType::Teacher.as_str())
            .fetch_one(&self.db),
        )
        .await?;

        tracing::info!(user_id = user.id, "Teacher registered");

        Ok(UserProfile::from_user(user, &self.public_base_url))
    }

    /// Login with username or email
    pub async fn login(&self, req: LoginRequest) -> AppResult<LoginResponse> {
        let identifier = req
            .identifier()
            .ok_or_else(|| AppError::validation("Username or email is required"))?
            .to_string();

        let user: Option<User> = track_db_operation(
            "users.find_by_login",
            sqlx::query_as(&format!(
                "SELECT {} FROM users WHERE username = $1 OR email = lower($1) LIMIT 1",
                USER_COLUMNS
            ))
            .bind(&identifier)
            .fetch_optional(&self.db),
        )
        .await?;

        let user = user.ok_or_else(|| AppError::not_found("User not found"))?;

        if !Self::verify_password(&req.password, &user.password_hash) {
            tracing::warn!(user_id = user.id, "Failed login: wrong password");
            return Err(AppError::unauthorized("Invalid credentials"));
        }

        let token = self.jwt_service.issue(user.id, user.user_type)?;

        tracing::info!(user_id = user.id, role = user.user_type.as_str(), "User logged in");

        Ok(LoginResponse {
            token,
            user: UserProfile::from_user(user, &self.public_base_url),
        })
    }
}
