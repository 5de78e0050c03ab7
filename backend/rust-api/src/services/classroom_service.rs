use sqlx::{PgExecutor, PgPool};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::metrics::track_db_operation;
use crate::middlewares::auth::Principal;
use crate::models::classroom::{
    Classroom, ClassroomDeleted, CreateClassroomRequest, UpdateClassroomRequest,
};
use crate::models::user::UserType;

const CLASSROOM_COLUMNS: &str = "id, name, description, teacher_id, created_at";

/// Loads a classroom and checks that `teacher_id` owns it.
pub async fn fetch_owned_classroom<'e, E>(
    executor: E,
    classroom_id: i64,
    teacher_id: i64,
) -> AppResult<Classroom>
where
    E: PgExecutor<'e>,
{
    let classroom: Option<Classroom> = sqlx::query_as(&format!(
        "SELECT {} FROM classroom WHERE id = $1",
        CLASSROOM_COLUMNS
    ))
    .bind(classroom_id)
    .fetch_optional(executor)
    .await?;

    let classroom = classroom.ok_or_else(|| AppError::not_found("Classroom not found"))?;
    if classroom.teacher_id != teacher_id {
        return Err(AppError::forbidden("Classroom belongs to another teacher"));
    }
    Ok(classroom)
}

pub struct ClassroomService {
    db: PgPool,
}

impl ClassroomService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        teacher: &Principal,
        req: CreateClassroomRequest,
    ) -> AppResult<Classroom> {
        req.validate()?;

        let classroom: Classroom = track_db_operation(
            "classroom.insert",
            sqlx::query_as(&format!(
                "INSERT INTO classroom (name, description, teacher_id)
                 VALUES ($1, $2, $3)
                 RETURNING {}",
                CLASSROOM_COLUMNS
            ))
            .bind(req.name.trim())
            .bind(&req.description)
            .bind(teacher.id)
            .fetch_one(&self.db),
        )
        .await?;

        tracing::info!(
            classroom_id = classroom.id,
            teacher_id = teacher.id,
            "Classroom created"
        );
        Ok(classroom)
    }

    pub async fn list_for_teacher(&self, teacher: &Principal) -> AppResult<Vec<Classroom>> {
        let classrooms = track_db_operation(
            "classroom.list",
            sqlx::query_as::<_, Classroom>(&format!(
                "SELECT {} FROM classroom WHERE teacher_id = $1 ORDER BY name, id",
                CLASSROOM_COLUMNS
            ))
            .bind(teacher.id)
            .fetch_all(&self.db),
        )
        .await?;
        Ok(classrooms)
    }

    pub async fn get(&self, teacher: &Principal, classroom_id: i64) -> AppResult<Classroom> {
        fetch_owned_classroom(&self.db, classroom_id, teacher.id).await
    }

    pub async fn update(
        &self,
        teacher: &Principal,
        classroom_id: i64,
        req: UpdateClassroomRequest,
    ) -> AppResult<Classroom> {
        req.validate()?;
        if req.is_empty() {
            return Err(AppError::validation("No fields to update"));
        }

        let current = fetch_owned_classroom(&self.db, classroom_id, teacher.id).await?;

        if let Some(new_owner) = req.teacher_id.filter(|id| *id != current.teacher_id) {
            let owner_type: Option<String> =
                sqlx::query_scalar("SELECT type FROM users WHERE id = $1")
                    .bind(new_owner)
                    .fetch_optional(&self.db)
                    .await?;
            if owner_type.as_deref() != Some(UserType::Teacher.as_str()) {
                return Err(AppError::not_found("New owner is not an existing teacher"));
            }
        }

        let merged = req.merge(&current);

        let updated: Classroom = track_db_operation(
            "classroom.update",
            sqlx::query_as(&format!(
                "UPDATE classroom SET name = $1, description = $2, teacher_id = $3
                 WHERE id = $4
                 RETURNING {}",
                CLASSROOM_COLUMNS
            ))
            .bind(&merged.name)
            .bind(&merged.description)
            .bind(merged.teacher_id)
            .bind(classroom_id)
            .fetch_one(&self.db),
        )
        .await?;

        if updated.teacher_id != current.teacher_id {
            tracing::info!(
                classroom_id,
                from = current.teacher_id,
                to = updated.teacher_id,
                "Classroom handed over"
            );
        }
        Ok(updated)
    }

    /// Deletes the classroom; its students stay, detached from any classroom.
    pub async fn delete(&self, teacher: &Principal, classroom_id: i64) -> AppResult<ClassroomDeleted> {
        let mut tx = self.db.begin().await?;

        fetch_owned_classroom(&mut *tx, classroom_id, teacher.id).await?;

        let detached = sqlx::query("UPDATE users SET classroom_id = NULL WHERE classroom_id = $1")
            .bind(classroom_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM classroom WHERE id = $1")
            .bind(classroom_id)
            .execute(&mut *tx)
            .await?;

        track_db_operation("classroom.delete", tx.commit()).await?;

        tracing::info!(classroom_id, detached, "Classroom deleted");
        Ok(ClassroomDeleted {
            id: classroom_id,
            detached_students: detached,
        })
    }
}
