use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::config::GradingMode;
use crate::error::{AppError, AppResult};
use crate::metrics::{track_db_operation, TASK_SUBMISSIONS_TOTAL};
use crate::middlewares::auth::Principal;
use crate::models::progress::{
    ProgressChange, ProgressStatus, StudentProgressEntry, SubmitTaskRequest, TaskProgress,
    TaskProgressEntry, UpdateProgressRequest,
};
use crate::models::task::Task;
use crate::services::grading;
use crate::services::task_service::{fetch_task_with_owner, TASK_COLUMNS};

const PROGRESS_COLUMNS: &str =
    "student_id, task_id, status, score, answers, completion_date, number_of_attempts";

/// Where the score of a submission comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubmissionScore {
    /// Graded here (`None` for manually graded types); the attempt counter is bumped.
    Computed(Option<f64>),
    /// Graded by the client; score and attempt count are stored as given.
    Reported { score: f64, attempts: i32 },
}

/// State of a progress row after a submission.
pub fn apply_submission(
    current: &TaskProgress,
    outcome: SubmissionScore,
    answers: String,
    now: DateTime<Utc>,
) -> ProgressChange {
    let (score, number_of_attempts) = match outcome {
        SubmissionScore::Computed(score) => (score, current.number_of_attempts.saturating_add(1)),
        SubmissionScore::Reported { score, attempts } => (Some(score), attempts),
    };

    ProgressChange {
        status: ProgressStatus::Submitted,
        score,
        answers: Some(answers),
        completion_date: current.completion_date.or(Some(now)),
        number_of_attempts,
    }
}

/// State of a progress row after a partial status/score update. An absent score
/// keeps the stored one.
pub fn apply_status_update(
    current: &TaskProgress,
    status: Option<ProgressStatus>,
    score: Option<f64>,
    now: DateTime<Utc>,
) -> ProgressChange {
    let status = status.unwrap_or(current.status);
    let completion_date = match current.completion_date {
        Some(done) => Some(done),
        None if status.is_completed() => Some(now),
        None => None,
    };

    ProgressChange {
        status,
        score: score.or(current.score),
        answers: current.answers.clone(),
        completion_date,
        number_of_attempts: current.number_of_attempts,
    }
}

pub fn validate_score(score: f64) -> AppResult<()> {
    if !score.is_finite() || !(0.0..=100.0).contains(&score) {
        return Err(AppError::validation("Score must be between 0 and 100"));
    }
    Ok(())
}

/// Score and attempts sent by a client that grades on its own.
pub fn client_reported_score(req: &SubmitTaskRequest) -> AppResult<SubmissionScore> {
    let score = req
        .score
        .ok_or_else(|| AppError::validation("score is required"))?;
    validate_score(score)?;

    let attempts = req
        .number_of_attempts
        .ok_or_else(|| AppError::validation("number_of_attempts is required"))?;
    if attempts < 1 {
        return Err(AppError::validation("number_of_attempts must be at least 1"));
    }

    Ok(SubmissionScore::Reported { score, attempts })
}

pub struct ProgressService {
    db: PgPool,
    grading_mode: GradingMode,
}

impl ProgressService {
    pub fn new(db: PgPool, grading_mode: GradingMode) -> Self {
        Self { db, grading_mode }
    }

    /// Records a student's submission for a task and scores it.
    pub async fn submit_task(
        &self,
        student: &Principal,
        req: SubmitTaskRequest,
    ) -> AppResult<TaskProgress> {
        let reported = match self.grading_mode {
            GradingMode::Client => Some(client_reported_score(&req)?),
            GradingMode::Server => None,
        };

        let mut tx = self.db.begin().await?;

        let current = lock_progress(&mut tx, student.id, req.task_id)
            .await?
            .ok_or_else(|| AppError::not_found("No progress record for this task"))?;

        let task: Task = sqlx::query_as::<_, Task>(&format!(
            "SELECT {} FROM tasks t WHERE t.id = $1",
            TASK_COLUMNS
        ))
        .bind(req.task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::not_found("Task not found"))?;

        let (outcome, label) = match reported {
            Some(reported) => (reported, "client"),
            None => {
                let score = grading::grade(&task, &req.answers)?;
                let label = if score.is_some() { "auto" } else { "manual" };
                (SubmissionScore::Computed(score), label)
            }
        };

        let change = apply_submission(&current, outcome, req.answers.to_string(), Utc::now());
        let updated = write_change(&mut tx, student.id, req.task_id, &change).await?;

        track_db_operation("task_progress.submit", tx.commit()).await?;

        TASK_SUBMISSIONS_TOTAL.with_label_values(&[label]).inc();
        tracing::info!(
            student_id = student.id,
            task_id = req.task_id,
            score = ?updated.score,
            attempts = updated.number_of_attempts,
            grading = label,
            "Task submitted"
        );

        Ok(updated)
    }

    /// Partial update of status and/or score. Students may only move their own
    /// status; the teacher owning the task may set both.
    pub async fn update_status(
        &self,
        principal: &Principal,
        req: UpdateProgressRequest,
    ) -> AppResult<TaskProgress> {
        if req.status.is_none() && req.score.is_none() {
            return Err(AppError::validation("Provide a status or a score to update"));
        }
        if let Some(score) = req.score {
            validate_score(score)?;
        }

        if principal.is_student() {
            if principal.id != req.student_id {
                return Err(AppError::forbidden("Students can only update their own progress"));
            }
            if req.score.is_some() {
                return Err(AppError::forbidden("Only teachers can set a score"));
            }
        }

        let mut tx = self.db.begin().await?;

        let (_, owner_id) = fetch_task_with_owner(&mut *tx, req.task_id).await?;
        if principal.is_teacher() && owner_id != principal.id {
            return Err(AppError::forbidden("Task belongs to another teacher"));
        }

        let current = lock_progress(&mut tx, req.student_id, req.task_id)
            .await?
            .ok_or_else(|| AppError::not_found("No progress record for this student and task"))?;

        let change = apply_status_update(&current, req.status, req.score, Utc::now());
        let updated = write_change(&mut tx, req.student_id, req.task_id, &change).await?;

        track_db_operation("task_progress.update", tx.commit()).await?;

        tracing::info!(
            student_id = req.student_id,
            task_id = req.task_id,
            status = updated.status.as_str(),
            by = principal.id,
            "Progress updated"
        );

        Ok(updated)
    }

    /// All progress of one student. A teacher only sees the tasks of their own classrooms.
    pub async fn list_for_student(
        &self,
        principal: &Principal,
        student_id: i64,
    ) -> AppResult<Vec<StudentProgressEntry>> {
        let teacher_scope = if principal.is_student() {
            if principal.id != student_id {
                return Err(AppError::forbidden("Students can only view their own progress"));
            }
            None
        } else {
            let owner: Option<Option<i64>> = sqlx::query_scalar(
                "SELECT c.teacher_id FROM users u
                 LEFT JOIN classroom c ON c.id = u.classroom_id
                 WHERE u.id = $1 AND u.type = 'student'",
            )
            .bind(student_id)
            .fetch_optional(&self.db)
            .await?;

            match owner {
                None => return Err(AppError::not_found("Student not found")),
                Some(Some(owner)) if owner == principal.id => Some(principal.id),
                Some(_) => return Err(AppError::forbidden("Student is not in your classrooms")),
            }
        };

        let rows = track_db_operation(
            "task_progress.by_student",
            sqlx::query_as::<_, StudentProgressEntry>(
                "SELECT tp.task_id, t.title, t.type, tp.status, tp.score,
                        tp.completion_date, tp.number_of_attempts
                 FROM task_progress tp
                 JOIN tasks t ON t.id = tp.task_id
                 JOIN classroom c ON c.id = t.classroom_id
                 WHERE tp.student_id = $1 AND ($2::BIGINT IS NULL OR c.teacher_id = $2)
                 ORDER BY t.created_at, t.id",
            )
            .bind(student_id)
            .bind(teacher_scope)
            .fetch_all(&self.db),
        )
        .await?;

        Ok(rows)
    }

    /// Every student's progress on one task, for the teacher who owns it.
    pub async fn list_for_task(
        &self,
        teacher: &Principal,
        task_id: i64,
    ) -> AppResult<Vec<TaskProgressEntry>> {
        let (_, owner_id) = fetch_task_with_owner(&self.db, task_id).await?;
        if owner_id != teacher.id {
            return Err(AppError::forbidden("Task belongs to another teacher"));
        }

        let rows = track_db_operation(
            "task_progress.by_task",
            sqlx::query_as::<_, TaskProgressEntry>(
                "SELECT tp.student_id, u.username, u.email, tp.status, tp.score, tp.answers,
                        tp.completion_date, tp.number_of_attempts
                 FROM task_progress tp
                 JOIN users u ON u.id = tp.student_id
                 WHERE tp.task_id = $1
                 ORDER BY u.username",
            )
            .bind(task_id)
            .fetch_all(&self.db),
        )
        .await?;

        Ok(rows)
    }
}

async fn lock_progress(
    conn: &mut PgConnection,
    student_id: i64,
    task_id: i64,
) -> AppResult<Option<TaskProgress>> {
    let row = sqlx::query_as::<_, TaskProgress>(&format!(
        "SELECT {} FROM task_progress WHERE student_id = $1 AND task_id = $2 FOR UPDATE",
        PROGRESS_COLUMNS
    ))
    .bind(student_id)
    .bind(task_id)
    .fetch_optional(conn)
    .await?;
    Ok(row)
}

async fn write_change(
    conn: &mut PgConnection,
    student_id: i64,
    task_id: i64,
    change: &ProgressChange,
) -> AppResult<TaskProgress> {
    let row = sqlx::query_as::<_, TaskProgress>(&format!(
        "UPDATE task_progress
         SET status = $1, score = $2, answers = $3, completion_date = $4, number_of_attempts = $5
         WHERE student_id = $6 AND task_id = $7
         RETURNING {}",
        PROGRESS_COLUMNS
    ))
    .bind(change.status.as_str())
    .bind(change.score)
    .bind(&change.answers)
    .bind(change.completion_date)
    .bind(change.number_of_attempts)
    .bind(student_id)
    .bind(task_id)
    .fetch_one(conn)
    .await?;
    Ok(row)
}
