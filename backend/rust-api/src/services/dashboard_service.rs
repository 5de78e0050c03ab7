//! Per-teacher statistics.
//!
//! The rows in scope (classrooms, enrolled students, tasks and their progress) are
//! read inside one repeatable-read transaction, then [`aggregate`] derives every
//! figure from that single snapshot so the three sections always agree.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::metrics::track_db_operation;
use crate::middlewares::auth::Principal;
use crate::models::dashboard::{
    DashboardFacts, GeneralStats, ProgressFact, StudentFact, StudentPerformance, TaskFact,
    TaskPerformance, TeacherDashboard,
};
use crate::services::grading::round2;

#[derive(Default)]
struct ScoreAccumulator {
    sum: f64,
    count: u32,
}

impl ScoreAccumulator {
    fn add(&mut self, score: Option<f64>) {
        if let Some(score) = score {
            self.sum += score;
            self.count += 1;
        }
    }

    /// `None` when no row carried a score.
    fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| round2(self.sum / f64::from(self.count)))
    }
}

/// Compares optional averages so that `None` is the smallest value.
fn cmp_scores(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => Ordering::Equal,
    }
}

/// Builds the dashboard from the rows in scope.
///
/// Only progress rows of the listed (currently enrolled) students count, so the
/// general stats always add up to the per-student and per-task breakdowns.
/// Students are ordered by average descending with unscored students last;
/// tasks by average ascending with unscored tasks first.
pub fn aggregate(facts: &DashboardFacts) -> TeacherDashboard {
    let mut overall = ScoreAccumulator::default();
    let mut completed = 0i64;
    let mut pending = 0i64;

    let enrolled: HashSet<i64> = facts.students.iter().map(|s| s.id).collect();
    let mut per_student: HashMap<i64, (ScoreAccumulator, i64)> = HashMap::new();
    let mut per_task: HashMap<i64, (ScoreAccumulator, i64, i64)> = HashMap::new();

    for row in facts.progress.iter().filter(|row| enrolled.contains(&row.student_id)) {
        overall.add(row.score);
        let done = row.status.is_completed();
        if done {
            completed += 1;
        } else {
            pending += 1;
        }

        let student = per_student.entry(row.student_id).or_default();
        student.0.add(row.score);
        if done {
            student.1 += 1;
        }

        let task = per_task.entry(row.task_id).or_default();
        task.0.add(row.score);
        task.2 += 1;
        if done {
            task.1 += 1;
        }
    }

    let mut student_performance: Vec<StudentPerformance> = facts
        .students
        .iter()
        .map(|s| {
            let (average_score, completed_tasks) = per_student
                .get(&s.id)
                .map(|(acc, done)| (acc.average(), *done))
                .unwrap_or((None, 0));
            StudentPerformance {
                id: s.id,
                username: s.username.clone(),
                average_score,
                completed_tasks,
            }
        })
        .collect();
    student_performance.sort_by(|a, b| {
        cmp_scores(b.average_score, a.average_score)
            .then_with(|| a.username.cmp(&b.username))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut task_performance: Vec<TaskPerformance> = facts
        .tasks
        .iter()
        .map(|t| {
            let (average_score, completions, total_assigned) = per_task
                .get(&t.id)
                .map(|(acc, done, total)| (acc.average(), *done, *total))
                .unwrap_or((None, 0, 0));
            TaskPerformance {
                id: t.id,
                title: t.title.clone(),
                average_score,
                completions,
                total_assigned,
            }
        })
        .collect();
    task_performance.sort_by(|a, b| {
        cmp_scores(a.average_score, b.average_score).then_with(|| a.id.cmp(&b.id))
    });

    TeacherDashboard {
        general_stats: GeneralStats {
            total_students: facts.students.len() as i64,
            total_classrooms: facts.classroom_ids.len() as i64,
            total_tasks: facts.tasks.len() as i64,
            completed_tasks: completed,
            pending_tasks: pending,
            average_score: overall.average(),
        },
        student_performance,
        task_performance,
    }
}

pub struct DashboardService {
    db: PgPool,
}

impl DashboardService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn teacher_dashboard(
        &self,
        teacher: &Principal,
        classroom_id: Option<i64>,
    ) -> AppResult<TeacherDashboard> {
        let facts = track_db_operation("dashboard.load", self.load_facts(teacher.id, classroom_id)).await?;

        tracing::debug!(
            teacher_id = teacher.id,
            classrooms = facts.classroom_ids.len(),
            progress_rows = facts.progress.len(),
            "Dashboard facts loaded"
        );

        Ok(aggregate(&facts))
    }

    async fn load_facts(&self, teacher_id: i64, classroom_id: Option<i64>) -> AppResult<DashboardFacts> {
        let mut tx = self.db.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let is_teacher: Option<bool> =
            sqlx::query_scalar("SELECT type = 'teacher' FROM users WHERE id = $1")
                .bind(teacher_id)
                .fetch_optional(&mut *tx)
                .await?;
        if is_teacher != Some(true) {
            return Err(AppError::not_found("Teacher not found"));
        }

        if let Some(classroom_id) = classroom_id {
            let owner: Option<i64> = sqlx::query_scalar("SELECT teacher_id FROM classroom WHERE id = $1")
                .bind(classroom_id)
                .fetch_optional(&mut *tx)
                .await?;
            match owner {
                None => return Err(AppError::not_found("Classroom not found")),
                Some(owner) if owner != teacher_id => {
                    return Err(AppError::forbidden("Classroom belongs to another teacher"))
                }
                Some(_) => {}
            }
        }

        let classroom_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM classroom
             WHERE teacher_id = $1 AND ($2::BIGINT IS NULL OR id = $2)
             ORDER BY id",
        )
        .bind(teacher_id)
        .bind(classroom_id)
        .fetch_all(&mut *tx)
        .await?;

        let students: Vec<StudentFact> = sqlx::query_as(
            "SELECT id, username FROM users
             WHERE type = 'student' AND classroom_id = ANY($1)",
        )
        .bind(&classroom_ids)
        .fetch_all(&mut *tx)
        .await?;

        let tasks: Vec<TaskFact> =
            sqlx::query_as("SELECT id, title FROM tasks WHERE classroom_id = ANY($1)")
                .bind(&classroom_ids)
                .fetch_all(&mut *tx)
                .await?;

        // Rows of students who left the task's classroom are history, not workload.
        let progress: Vec<ProgressFact> = sqlx::query_as(
            "SELECT tp.student_id, tp.task_id, tp.status, tp.score
             FROM task_progress tp
             JOIN tasks t ON t.id = tp.task_id
             JOIN users u ON u.id = tp.student_id AND u.classroom_id = t.classroom_id
             WHERE t.classroom_id = ANY($1)",
        )
        .bind(&classroom_ids)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(DashboardFacts {
            classroom_ids,
            students,
            tasks,
            progress,
        })
    }
}
