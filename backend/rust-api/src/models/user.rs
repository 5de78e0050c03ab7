use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::ParseEnumError;

/// Public path under which student photos and cartoons are served.
pub const STUDENT_IMAGES_ROOT: &str = "/images/students/";

/// Row of the `users` table.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    #[sqlx(rename = "type", try_from = "String")]
    pub user_type: UserType,
    pub classroom_id: Option<i64>,
    pub photo_path: Option<String>,
    pub cartoon_image_path: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Teacher,
    Student,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Teacher => "teacher",
            UserType::Student => "student",
        }
    }
}

impl TryFrom<String> for UserType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "teacher" => Ok(UserType::Teacher),
            "student" => Ok(UserType::Student),
            _ => Err(ParseEnumError::new("user type", value)),
        }
    }
}

/// User returned to clients: no password hash, image filenames expanded to URLs.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub user_type: UserType,
    pub classroom_id: Option<i64>,
    pub photo_url: Option<String>,
    pub cartoon_image_url: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn from_user(user: User, public_base_url: &str) -> Self {
        UserProfile {
            id: user.id,
            username: user.username,
            email: user.email,
            user_type: user.user_type,
            classroom_id: user.classroom_id,
            photo_url: student_image_url(public_base_url, user.photo_path.as_deref()),
            cartoon_image_url: student_image_url(
                public_base_url,
                user.cartoon_image_path.as_deref(),
            ),
            avatar_url: user.avatar_url,
            created_at: user.created_at,
        }
    }
}

/// Absolute URL of a stored student image, `None` when there is no file.
pub fn student_image_url(public_base_url: &str, filename: Option<&str>) -> Option<String> {
    let filename = filename?.trim();
    if filename.is_empty() {
        return None;
    }
    // Older rows stored the whole relative path; only the file name is public.
    let name = filename
        .replace('\\', "/")
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    Some(format!(
        "{}{}{}",
        public_base_url.trim_end_matches('/'),
        STUDENT_IMAGES_ROOT,
        name
    ))
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterTeacherRequest {
    #[validate(length(
        min = 3,
        max = 50,
        message = "Username must be between 3 and 50 characters"
    ))]
    pub username: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
}

/// Fields of the multipart form used to register a student.
#[derive(Debug, Default, Validate)]
pub struct RegisterStudentForm {
    #[validate(length(
        min = 3,
        max = 50,
        message = "Username must be between 3 and 50 characters"
    ))]
    pub username: String,

    #[validate(length(min = 4, message = "Password must be at least 4 characters"))]
    pub password: String,

    pub classroom_id: Option<i64>,
    pub photo: Option<UploadedPhoto>,
}

#[derive(Debug, Clone)]
pub struct UploadedPhoto {
    pub original_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Login accepts either the username or the email.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: String,
}

impl LoginRequest {
    pub fn identifier(&self) -> Option<&str> {
        self.username
            .as_deref()
            .or(self.email.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserProfile,
}

/// Partial update of a user; absent fields keep their stored value.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(
        min = 3,
        max = 50,
        message = "Username must be between 3 and 50 characters"
    ))]
    pub username: Option<String>,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(min = 4, message = "Password must be at least 4 characters"))]
    pub password: Option<String>,

    pub classroom_id: Option<i64>,

    #[validate(url(message = "avatar_url must be a valid URL"))]
    pub avatar_url: Option<String>,
}

impl UpdateUserRequest {
    pub fn is_empty(&self) -> bool {
        self.username.is_none()
            && self.email.is_none()
            && self.password.is_none()
            && self.classroom_id.is_none()
            && self.avatar_url.is_none()
    }
}

/// Final column values for an update, after merging a request over the current row.
#[derive(Debug, Clone, PartialEq)]
pub struct UserChanges {
    pub username: String,
    pub email: Option<String>,
    pub password_hash: String,
    pub classroom_id: Option<i64>,
    pub avatar_url: Option<String>,
}

impl UserChanges {
    /// `new_password_hash` is the hash of `req.password` when one was supplied.
    pub fn merge(current: &User, req: UpdateUserRequest, new_password_hash: Option<String>) -> Self {
        UserChanges {
            username: req.username.unwrap_or_else(|| current.username.clone()),
            email: req.email.or_else(|| current.email.clone()),
            password_hash: new_password_hash.unwrap_or_else(|| current.password_hash.clone()),
            classroom_id: req.classroom_id.or(current.classroom_id),
            avatar_url: req.avatar_url.or_else(|| current.avatar_url.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> User {
        User {
            id: 7,
            username: "ana".to_string(),
            email: None,
            password_hash: "hash".to_string(),
            user_type: UserType::Student,
            classroom_id: Some(3),
            photo_path: Some("public/images/students/photo-1.png".to_string()),
            cartoon_image_path: None,
            avatar_url: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn image_url_uses_file_name_only() {
        assert_eq!(
            student_image_url("http://localhost:3000/", Some("public\\images\\students\\a.png")),
            Some("http://localhost:3000/images/students/a.png".to_string())
        );
        assert_eq!(student_image_url("http://x", None), None);
        assert_eq!(student_image_url("http://x", Some("  ")), None);
    }

    #[test]
    fn profile_hides_password_and_expands_photo() {
        let profile = UserProfile::from_user(student(), "http://api.test");
        let json = serde_json::to_value(&profile).unwrap();
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["type"], "student");
        assert_eq!(
            json["photo_url"],
            "http://api.test/images/students/photo-1.png"
        );
    }

    #[test]
    fn merge_keeps_absent_fields() {
        let current = student();
        let req = UpdateUserRequest {
            username: Some("ana.maria".to_string()),
            ..Default::default()
        };
        let changes = UserChanges::merge(&current, req, None);
        assert_eq!(changes.username, "ana.maria");
        assert_eq!(changes.classroom_id, Some(3));
        assert_eq!(changes.password_hash, "hash");
    }

    #[test]
    fn login_identifier_prefers_username() {
        let req = LoginRequest {
            username: Some(" ana ".to_string()),
            email: Some("ana@example.com".to_string()),
            password: "x".to_string(),
        };
        assert_eq!(req.identifier(), Some("ana"));

        let req = LoginRequest {
            username: None,
            email: Some("".to_string()),
            password: "x".to_string(),
        };
        assert_eq!(req.identifier(), None);
    }

    #[test]
    fn user_type_rejects_unknown_values() {
        assert_eq!(
            UserType::try_from("teacher".to_string()).unwrap(),
            UserType::Teacher
        );
        assert!(UserType::try_from("admin".to_string()).is_err());
    }
}
