use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AppError;
use crate::models::user::UserType;
use crate::services::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String,  // user id
    pub role: String, // teacher | student
    pub exp: usize,   // expiration timestamp
    pub iat: usize,   // issued at timestamp
}

/// Authenticated caller, resolved from the bearer token and stored in request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: i64,
    pub role: UserType,
}

impl Principal {
    pub fn is_teacher(&self) -> bool {
        self.role == UserType::Teacher
    }

    pub fn is_student(&self) -> bool {
        self.role == UserType::Student
    }
}

impl TryFrom<&JwtClaims> for Principal {
    type Error = AuthError;

    fn try_from(claims: &JwtClaims) -> Result<Self, Self::Error> {
        let id = claims.sub.parse().map_err(|_| AuthError::InvalidToken)?;
        let role = UserType::try_from(claims.role.clone()).map_err(|_| AuthError::InvalidToken)?;
        Ok(Principal { id, role })
    }
}

#[derive(Debug)]
pub enum AuthError {
    InvalidToken,
    ExpiredToken,
    MissingToken,
    InvalidSignature,
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::InvalidToken => write!(f, "Invalid token"),
            AuthError::ExpiredToken => write!(f, "Token expired"),
            AuthError::MissingToken => write!(f, "Missing authorization token"),
            AuthError::InvalidSignature => write!(f, "Invalid token signature"),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::unauthorized(err.to_string())
    }
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
}

impl JwtService {
    pub fn new(secret: &str, ttl_seconds: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl_seconds,
        }
    }

    /// Issues a token for the given user, valid for the configured TTL.
    pub fn issue(&self, user_id: i64, role: UserType) -> Result<String, AuthError> {
        let now = chrono::Utc::now().timestamp();
        let claims = JwtClaims {
            sub: user_id.to_string(),
            role: role.as_str().to_string(),
            iat: now.max(0) as usize,
            exp: (now + self.ttl_seconds).max(0) as usize,
        };
        self.generate_token(claims)
    }

    pub fn generate_token(&self, claims: JwtClaims) -> Result<String, AuthError> {
        encode(&Header::default(), &claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let validation = Validation::default();

        decode::<JwtClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken,
            })
    }
}

/// Resolves the bearer token into a [`Principal`]; rejects the request with 401 otherwise.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let jwt_service = state.jwt();
    let claims = jwt_service.validate_token(token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        e
    })?;
    let principal = Principal::try_from(&claims)?;

    tracing::debug!(user_id = principal.id, role = %claims.role, "Authenticated request");

    request.extensions_mut().insert(principal);

    Ok(next.run(request).await)
}

pub async fn teacher_guard(request: Request, next: Next) -> Result<Response, AppError> {
    require_role(request, next, UserType::Teacher).await
}

pub async fn student_guard(request: Request, next: Next) -> Result<Response, AppError> {
    require_role(request, next, UserType::Student).await
}

async fn require_role(request: Request, next: Next, role: UserType) -> Result<Response, AppError> {
    match request.extensions().get::<Principal>() {
        Some(principal) if principal.role == role => Ok(next.run(request).await),
        Some(_) => {
            tracing::warn!("Access denied: {} role required", role.as_str());
            Err(AppError::forbidden(format!(
                "Only {}s can access this resource",
                role.as_str()
            )))
        }
        None => Err(AuthError::MissingToken.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_resolves_to_principal() {
        let service = JwtService::new("test-secret", 3600);

        let token = service.issue(12, UserType::Teacher).unwrap();
        let claims = service.validate_token(&token).unwrap();
        let principal = Principal::try_from(&claims).unwrap();

        assert_eq!(principal, Principal { id: 12, role: UserType::Teacher });
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = JwtService::new("one", 3600)
            .issue(1, UserType::Student)
            .unwrap();
        let err = JwtService::new("two", 3600).validate_token(&token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[test]
    fn expired_token_is_rejected() {
        let service = JwtService::new("test-secret", 3600);
        let now = chrono::Utc::now().timestamp() as usize;
        let token = service
            .generate_token(JwtClaims {
                sub: "1".to_string(),
                role: "student".to_string(),
                iat: now - 7200,
                exp: now - 3600,
            })
            .unwrap();
        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::ExpiredToken)
        ));
    }

    #[test]
    fn claims_with_unknown_role_are_invalid() {
        let claims = JwtClaims {
            sub: "3".to_string(),
            role: "admin".to_string(),
            iat: 0,
            exp: 0,
        };
        assert!(Principal::try_from(&claims).is_err());

        let claims = JwtClaims {
            sub: "not-a-number".to_string(),
            role: "teacher".to_string(),
            iat: 0,
            exp: 0,
        };
        assert!(Principal::try_from(&claims).is_err());
    }
}
