use serde_json::Value;
use sqlx::{PgExecutor, PgPool};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::metrics::track_db_operation;
use crate::middlewares::auth::Principal;
use crate::models::task::{
    encode_answer, CreateTaskRequest, CreateTaskResponse, Task, TaskType, TaskView,
    UpdateTaskRequest,
};
use crate::services::classroom_service::fetch_owned_classroom;
use crate::services::grading::parse_canonical;

pub const TASK_COLUMNS: &str =
    "t.id, t.title, t.type, t.content, t.difficulty, t.classroom_id, t.teacher_id, t.answer, t.created_at";

/// Stored form of a task answer, checked against what the task type needs.
/// Auto-graded types require a sequence; open-ended tasks may omit the answer.
pub fn canonical_answer_text(task_type: TaskType, answer: Option<&Value>) -> AppResult<Option<String>> {
    let encoded = answer.filter(|a| !a.is_null()).map(encode_answer);

    if task_type.is_auto_graded() {
        let text = encoded.as_deref().ok_or_else(|| {
            AppError::validation(format!(
                "Tasks of type '{}' require an answer",
                task_type.as_str()
            ))
        })?;
        parse_canonical(0, Some(text)).map_err(|_| {
            AppError::validation(format!(
                "The answer of a '{}' task must be a JSON list",
                task_type.as_str()
            ))
        })?;
    }

    Ok(encoded)
}

/// Loads a task together with the teacher who owns its classroom.
pub async fn fetch_task_with_owner<'e, E>(executor: E, task_id: i64) -> AppResult<(Task, i64)>
where
    E: PgExecutor<'e>,
{
    let row: Option<TaskWithOwner> = sqlx::query_as(&format!(
        "SELECT {}, c.teacher_id AS owner_id
         FROM tasks t
         JOIN classroom c ON c.id = t.classroom_id
         WHERE t.id = $1",
        TASK_COLUMNS
    ))
    .bind(task_id)
    .fetch_optional(executor)
    .await?;

    row.map(|r| (r.task, r.owner_id))
        .ok_or_else(|| AppError::not_found("Task not found"))
}

#[derive(sqlx::FromRow)]
struct TaskWithOwner {
    #[sqlx(flatten)]
    task: Task,
    owner_id: i64,
}

pub struct TaskService {
    db: PgPool,
}

impl TaskService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Creates the task and one progress row per student currently in the classroom,
    /// all or nothing.
    pub async fn create(
        &self,
        teacher: &Principal,
        req: CreateTaskRequest,
    ) -> AppResult<CreateTaskResponse> {
        req.validate()?;
        let answer = canonical_answer_text(req.task_type, req.answer.as_ref())?;

        let mut tx = self.db.begin().await?;

        fetch_owned_classroom(&mut *tx, req.classroom_id, teacher.id).await?;

        let task: Task = sqlx::query_as(&format!(
            "INSERT INTO tasks AS t (title, type, content, difficulty, classroom_id, teacher_id, answer)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {}",
            TASK_COLUMNS
        ))
        .bind(req.title.trim())
        .bind(req.task_type.as_str())
        .bind(&req.content)
        .bind(&req.difficulty)
        .bind(req.classroom_id)
        .bind(teacher.id)
        .bind(&answer)
        .fetch_one(&mut *tx)
        .await?;

        let assigned = sqlx::query(
            "INSERT INTO task_progress (student_id, task_id)
             SELECT id, $1 FROM users
             WHERE type = 'student' AND classroom_id = $2",
        )
        .bind(task.id)
        .bind(req.classroom_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        track_db_operation("tasks.create", tx.commit()).await?;

        tracing::info!(
            task_id = task.id,
            classroom_id = task.classroom_id,
            assigned,
            "Task created"
        );

        Ok(CreateTaskResponse {
            task: TaskView::new(task, true),
            assigned_students: assigned,
        })
    }

    /// Teachers see the tasks of their classrooms; students those of their own classroom.
    pub async fn list(&self, principal: &Principal, classroom_id: Option<i64>) -> AppResult<Vec<TaskView>> {
        let tasks: Vec<Task> = if principal.is_teacher() {
            track_db_operation(
                "tasks.list",
                sqlx::query_as(&format!(
                    "SELECT {} FROM tasks t
                     JOIN classroom c ON c.id = t.classroom_id
                     WHERE c.teacher_id = $1 AND ($2::BIGINT IS NULL OR t.classroom_id = $2)
                     ORDER BY t.created_at DESC, t.id DESC",
                    TASK_COLUMNS
                ))
                .bind(principal.id)
                .bind(classroom_id)
                .fetch_all(&self.db),
            )
            .await?
        } else {
            track_db_operation(
                "tasks.list",
                sqlx::query_as(&format!(
                    "SELECT {} FROM tasks t
                     JOIN users u ON u.classroom_id = t.classroom_id
                     WHERE u.id = $1 AND ($2::BIGINT IS NULL OR t.classroom_id = $2)
                     ORDER BY t.created_at DESC, t.id DESC",
                    TASK_COLUMNS
                ))
                .bind(principal.id)
                .bind(classroom_id)
                .fetch_all(&self.db),
            )
            .await?
        };

        let include_answer = principal.is_teacher();
        Ok(tasks
            .into_iter()
            .map(|task| TaskView::new(task, include_answer))
            .collect())
    }

    pub async fn get(&self, principal: &Principal, task_id: i64) -> AppResult<TaskView> {
        let (task, owner_id) = fetch_task_with_owner(&self.db, task_id).await?;

        if principal.is_teacher() {
            if owner_id != principal.id {
                return Err(AppError::forbidden("Task belongs to another teacher"));
            }
            return Ok(TaskView::new(task, true));
        }

        // A student sees tasks assigned to them or posted to their current classroom.
        let visible: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM task_progress WHERE student_id = $1 AND task_id = $2)
                 OR EXISTS(SELECT 1 FROM users WHERE id = $1 AND classroom_id = $3)",
        )
        .bind(principal.id)
        .bind(task_id)
        .bind(task.classroom_id)
        .fetch_one(&self.db)
        .await?;

        if !visible {
            return Err(AppError::forbidden("Task is not assigned to you"));
        }
        Ok(TaskView::new(task, false))
    }

    pub async fn update(
        &self,
        teacher: &Principal,
        task_id: i64,
        req: UpdateTaskRequest,
    ) -> AppResult<TaskView> {
        req.validate()?;
        if req.is_empty() {
            return Err(AppError::validation("No fields to update"));
        }

        let (current, owner_id) = fetch_task_with_owner(&self.db, task_id).await?;
        if owner_id != teacher.id {
            return Err(AppError::forbidden("Task belongs to another teacher"));
        }

        let merged = req.merge(&current);
        if merged.task_type.is_auto_graded() {
            parse_canonical(task_id, merged.answer.as_deref()).map_err(|_| {
                AppError::validation(format!(
                    "The answer of a '{}' task must be a JSON list",
                    merged.task_type.as_str()
                ))
            })?;
        }

        let task: Task = track_db_operation(
            "tasks.update",
            sqlx::query_as(&format!(
                "UPDATE tasks AS t
                 SET title = $1, type = $2, content = $3, difficulty = $4, answer = $5
                 WHERE t.id = $6
                 RETURNING {}",
                TASK_COLUMNS
            ))
            .bind(&merged.title)
            .bind(merged.task_type.as_str())
            .bind(&merged.content)
            .bind(&merged.difficulty)
            .bind(&merged.answer)
            .bind(task_id)
            .fetch_one(&self.db),
        )
        .await?;

        tracing::info!(task_id, "Task updated");
        Ok(TaskView::new(task, true))
    }

    /// Deletes the task; its progress rows go with it.
    pub async fn delete(&self, teacher: &Principal, task_id: i64) -> AppResult<()> {
        let (_, owner_id) = fetch_task_with_owner(&self.db, task_id).await?;
        if owner_id != teacher.id {
            return Err(AppError::forbidden("Task belongs to another teacher"));
        }

        track_db_operation(
            "tasks.delete",
            sqlx::query("DELETE FROM tasks WHERE id = $1")
                .bind(task_id)
                .execute(&self.db),
        )
        .await?;

        tracing::info!(task_id, "Task deleted");
        Ok(())
    }
}
