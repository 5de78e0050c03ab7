use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::progress::ProgressStatus;

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub classroom_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralStats {
    pub total_students: i64,
    pub total_classrooms: i64,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub pending_tasks: i64,
    pub average_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentPerformance {
    pub id: i64,
    pub username: String,
    pub average_score: Option<f64>,
    pub completed_tasks: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskPerformance {
    pub id: i64,
    pub title: String,
    pub average_score: Option<f64>,
    pub completions: i64,
    pub total_assigned: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeacherDashboard {
    pub general_stats: GeneralStats,
    /// Best average first, students without any score last.
    pub student_performance: Vec<StudentPerformance>,
    /// Worst average first, tasks without any score first of all.
    pub task_performance: Vec<TaskPerformance>,
}

/// Raw rows loaded for one teacher (and optional classroom) before aggregation.
#[derive(Debug, Clone, Default)]
pub struct DashboardFacts {
    pub classroom_ids: Vec<i64>,
    pub students: Vec<StudentFact>,
    pub tasks: Vec<TaskFact>,
    pub progress: Vec<ProgressFact>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StudentFact {
    pub id: i64,
    pub username: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct TaskFact {
    pub id: i64,
    pub title: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProgressFact {
    pub student_id: i64,
    pub task_id: i64,
    #[sqlx(try_from = "String")]
    pub status: ProgressStatus,
    pub score: Option<f64>,
}
