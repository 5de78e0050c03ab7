use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use super::{task::TaskType, ParseEnumError};

/// Lifecycle of a student's work on a task. Transitions are not enforced;
/// only the first entry into a completed state stamps the completion date.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ProgressStatus {
    #[serde(rename = "Not Started")]
    NotStarted,
    #[serde(rename = "In Progress")]
    InProgress,
    #[serde(rename = "Submitted")]
    Submitted,
    #[serde(rename = "Graded")]
    Graded,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "Not Started",
            ProgressStatus::InProgress => "In Progress",
            ProgressStatus::Submitted => "Submitted",
            ProgressStatus::Graded => "Graded",
        }
    }

    /// Submitted and Graded count as completed work.
    pub fn is_completed(&self) -> bool {
        matches!(self, ProgressStatus::Submitted | ProgressStatus::Graded)
    }
}

impl TryFrom<String> for ProgressStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "Not Started" => Ok(ProgressStatus::NotStarted),
            "In Progress" => Ok(ProgressStatus::InProgress),
            "Submitted" => Ok(ProgressStatus::Submitted),
            "Graded" => Ok(ProgressStatus::Graded),
            _ => Err(ParseEnumError::new("progress status", value)),
        }
    }
}

/// Row of the `task_progress` table, keyed by (student_id, task_id).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TaskProgress {
    pub student_id: i64,
    pub task_id: i64,
    #[sqlx(try_from = "String")]
    pub status: ProgressStatus,
    pub score: Option<f64>,
    pub answers: Option<String>,
    pub completion_date: Option<DateTime<Utc>>,
    pub number_of_attempts: i32,
}

/// Values written back to a progress row after a submission or status update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressChange {
    pub status: ProgressStatus,
    pub score: Option<f64>,
    pub answers: Option<String>,
    pub completion_date: Option<DateTime<Utc>>,
    pub number_of_attempts: i32,
}

#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    pub task_id: i64,
    pub answers: Value,
    /// Only read when the service trusts client-side grading.
    pub score: Option<f64>,
    /// Only read when the service trusts client-side grading.
    pub number_of_attempts: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProgressRequest {
    pub student_id: i64,
    pub task_id: i64,
    pub status: Option<ProgressStatus>,
    pub score: Option<f64>,
}

/// A student's progress joined with the task it belongs to.
#[derive(Debug, Serialize, FromRow)]
pub struct StudentProgressEntry {
    pub task_id: i64,
    pub title: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type", try_from = "String")]
    pub task_type: TaskType,
    #[sqlx(try_from = "String")]
    pub status: ProgressStatus,
    pub score: Option<f64>,
    pub completion_date: Option<DateTime<Utc>>,
    pub number_of_attempts: i32,
}

/// One student's progress on a given task.
#[derive(Debug, Serialize, FromRow)]
pub struct TaskProgressEntry {
    pub student_id: i64,
    pub username: String,
    pub email: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: ProgressStatus,
    pub score: Option<f64>,
    pub answers: Option<String>,
    pub completion_date: Option<DateTime<Utc>>,
    pub number_of_attempts: i32,
}
