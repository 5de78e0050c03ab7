use sqlx::PgPool;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::metrics::track_db_operation;
use crate::middlewares::auth::Principal;
use crate::models::user::{
    RegisterStudentForm, UpdateUserRequest, UploadedPhoto, User, UserChanges, UserProfile,
    UserType,
};
use crate::services::auth_service::AuthService;
use crate::services::classroom_service::fetch_owned_classroom;
use crate::services::image_pipeline::{ImageQueue, StylizeJob};
use crate::services::uploads;

pub const USER_COLUMNS: &str = "id, username, email, password_hash, type, classroom_id, \
     photo_path, cartoon_image_path, avatar_url, created_at";

/// Whether `principal` may read or change `target`: themselves, or a student
/// whose classroom (owned by `classroom_owner`) belongs to the principal.
pub fn can_manage(principal: &Principal, target: &User, classroom_owner: Option<i64>) -> bool {
    principal.id == target.id
        || (principal.is_teacher()
            && target.user_type == UserType::Student
            && classroom_owner == Some(principal.id))
}

pub struct UserService {
    db: PgPool,
    public_base_url: String,
    upload_dir: String,
    images: ImageQueue,
}

impl UserService {
    pub fn new(
        db: PgPool,
        public_base_url: impl Into<String>,
        upload_dir: impl Into<String>,
        images: ImageQueue,
    ) -> Self {
        Self {
            db,
            public_base_url: public_base_url.into(),
            upload_dir: upload_dir.into(),
            images,
        }
    }

    fn profile(&self, user: User) -> UserProfile {
        UserProfile::from_user(user, &self.public_base_url)
    }

    /// Creates a student account, optionally with a photo that is then queued
    /// for stylization.
    pub async fn register_student(
        &self,
        teacher: &Principal,
        form: RegisterStudentForm,
    ) -> AppResult<UserProfile> {
        form.validate()?;

        let photo_file = match &form.photo {
            Some(photo) => Some(uploads::save_photo(&self.upload_dir, photo).await?),
            None => None,
        };

        let result = self
            .insert_student(teacher, &form, photo_file.as_deref())
            .await;

        let user = match result {
            Ok(user) => user,
            Err(e) => {
                if let Some(file) = &photo_file {
                    uploads::remove_photo(&self.upload_dir, file).await;
                }
                return Err(e);
            }
        };

        tracing::info!(
            user_id = user.id,
            classroom_id = ?user.classroom_id,
            teacher_id = teacher.id,
            "Student registered"
        );

        if let Some(file) = photo_file {
            self.images.enqueue(StylizeJob {
                user_id: user.id,
                photo_file: file,
            });
        }

        Ok(self.profile(user))
    }

    async fn insert_student(
        &self,
        teacher: &Principal,
        form: &RegisterStudentForm,
        photo_file: Option<&str>,
    ) -> AppResult<User> {
        let username = form.username.trim();
        // Hashing is slow; keep it outside the transaction.
        let password_hash = AuthService::hash_password(&form.password)?;

        let mut tx = self.db.begin().await?;

        if let Some(classroom_id) = form.classroom_id {
            fetch_owned_classroom(&mut *tx, classroom_id, teacher.id).await?;
        }

        let taken: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)")
            .bind(username)
            .fetch_one(&mut *tx)
            .await?;
        if taken {
            return Err(AppError::validation("Username is already taken"));
        }

        let user: User = sqlx::query_as(&format!(
            "INSERT INTO users (username, password_hash, type, classroom_id, photo_path)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(username)
        .bind(&password_hash)
        .bind(UserType::Student.as_str())
        .bind(form.classroom_id)
        .bind(photo_file)
        .fetch_one(&mut *tx)
        .await?;

        track_db_operation("users.register_student", tx.commit()).await?;
        Ok(user)
    }

    /// The teacher and the students of their classrooms.
    pub async fn list(&self, teacher: &Principal) -> AppResult<Vec<UserProfile>> {
        let users = track_db_operation(
            "users.list",
            sqlx::query_as::<_, User>(&format!(
                "SELECT {} FROM users
                 WHERE id = $1
                    OR (type = 'student'
                        AND classroom_id IN (SELECT id FROM classroom WHERE teacher_id = $1))
                 ORDER BY type DESC, username",
                USER_COLUMNS
            ))
            .bind(teacher.id)
            .fetch_all(&self.db),
        )
        .await?;

        Ok(users.into_iter().map(|u| self.profile(u)).collect())
    }

    pub async fn get(&self, principal: &Principal, user_id: i64) -> AppResult<UserProfile> {
        let user = self.find(user_id).await?;
        self.ensure_access(principal, &user).await?;
        Ok(self.profile(user))
    }

    pub async fn update(
        &self,
        principal: &Principal,
        user_id: i64,
        req: UpdateUserRequest,
    ) -> AppResult<UserProfile> {
        req.validate()?;
        if req.is_empty() {
            return Err(AppError::validation("No fields to update"));
        }

        let current = self.find(user_id).await?;
        self.ensure_access(principal, &current).await?;

        if let Some(classroom_id) = req.classroom_id {
            if current.user_type != UserType::Student {
                return Err(AppError::validation("Only students belong to a classroom"));
            }
            if !principal.is_teacher() {
                return Err(AppError::forbidden("Only a teacher can move a student"));
            }
            fetch_owned_classroom(&self.db, classroom_id, principal.id).await?;
        }

        let new_hash = match req.password.as_deref() {
            Some(password) => Some(AuthService::hash_password(password)?),
            None => None,
        };
        let changes = UserChanges::merge(&current, req, new_hash);

        let user: User = track_db_operation(
            "users.update",
            sqlx::query_as(&format!(
                "UPDATE users
                 SET username = $1, email = $2, password_hash = $3, classroom_id = $4, avatar_url = $5
                 WHERE id = $6
                 RETURNING {}",
                USER_COLUMNS
            ))
            .bind(changes.username.trim())
            .bind(changes.email.as_deref().map(str::to_lowercase))
            .bind(&changes.password_hash)
            .bind(changes.classroom_id)
            .bind(&changes.avatar_url)
            .bind(user_id)
            .fetch_one(&self.db),
        )
        .await?;

        tracing::info!(user_id, by = principal.id, "User updated");
        Ok(self.profile(user))
    }

    /// Replaces the photo, clears the old cartoon and queues a new stylization.
    pub async fn update_photo(
        &self,
        principal: &Principal,
        user_id: i64,
        photo: UploadedPhoto,
    ) -> AppResult<UserProfile> {
        let current = self.find(user_id).await?;
        self.ensure_access(principal, &current).await?;

        let file = uploads::save_photo(&self.upload_dir, &photo).await?;

        let result = track_db_operation(
            "users.update_photo",
            sqlx::query_as::<_, User>(&format!(
                "UPDATE users SET photo_path = $1, cartoon_image_path = NULL
                 WHERE id = $2
                 RETURNING {}",
                USER_COLUMNS
            ))
            .bind(&file)
            .bind(user_id)
            .fetch_one(&self.db),
        )
        .await;

        let user = match result {
            Ok(user) => user,
            Err(e) => {
                uploads::remove_photo(&self.upload_dir, &file).await;
                return Err(e.into());
            }
        };

        self.remove_images(&current).await;
        self.images.enqueue(StylizeJob {
            user_id,
            photo_file: file,
        });

        tracing::info!(user_id, by = principal.id, "Photo replaced");
        Ok(self.profile(user))
    }

    /// Deletes a student of one of the teacher's classrooms.
    pub async fn delete(&self, teacher: &Principal, user_id: i64) -> AppResult<()> {
        let target = self.find(user_id).await?;
        if target.id == teacher.id || !self.manages(teacher, &target).await? {
            return Err(AppError::forbidden(
                "Teachers can only delete students of their own classrooms",
            ));
        }

        track_db_operation(
            "users.delete",
            sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(user_id)
                .execute(&self.db),
        )
        .await?;

        self.remove_images(&target).await;

        tracing::info!(user_id, teacher_id = teacher.id, "Student deleted");
        Ok(())
    }

    async fn find(&self, user_id: i64) -> AppResult<User> {
        let user: Option<User> = track_db_operation(
            "users.find",
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS))
                .bind(user_id)
                .fetch_optional(&self.db),
        )
        .await?;
        user.ok_or_else(|| AppError::not_found("User not found"))
    }

    async fn manages(&self, principal: &Principal, target: &User) -> AppResult<bool> {
        let owner = match target.classroom_id {
            Some(classroom_id) => {
                sqlx::query_scalar::<_, i64>("SELECT teacher_id FROM classroom WHERE id = $1")
                    .bind(classroom_id)
                    .fetch_optional(&self.db)
                    .await?
            }
            None => None,
        };
        Ok(can_manage(principal, target, owner))
    }

    async fn ensure_access(&self, principal: &Principal, target: &User) -> AppResult<()> {
        if self.manages(principal, target).await? {
            Ok(())
        } else {
            Err(AppError::forbidden("You cannot access this user"))
        }
    }

    async fn remove_images(&self, user: &User) {
        for file in [&user.photo_path, &user.cartoon_image_path].into_iter().flatten() {
            uploads::remove_photo(&self.upload_dir, file).await;
        }
    }
}
