use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use validator::Validate;

use super::ParseEnumError;

/// Kind of exercise. Everything except `OpenEnded` is graded automatically.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    MixedOperations,
    MultipleChoice,
    FillInBlank,
    OpenEnded,
}

impl TaskType {
    pub const ALL: [TaskType; 8] = [
        TaskType::Addition,
        TaskType::Subtraction,
        TaskType::Multiplication,
        TaskType::Division,
        TaskType::MixedOperations,
        TaskType::MultipleChoice,
        TaskType::FillInBlank,
        TaskType::OpenEnded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Addition => "addition",
            TaskType::Subtraction => "subtraction",
            TaskType::Multiplication => "multiplication",
            TaskType::Division => "division",
            TaskType::MixedOperations => "mixed_operations",
            TaskType::MultipleChoice => "multiple_choice",
            TaskType::FillInBlank => "fill_in_blank",
            TaskType::OpenEnded => "open_ended",
        }
    }

    pub fn is_auto_graded(&self) -> bool {
        !matches!(self, TaskType::OpenEnded)
    }
}

impl TryFrom<String> for TaskType {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == value)
            .ok_or_else(|| ParseEnumError::new("task type", value))
    }
}

/// Row of the `tasks` table. `answer` holds the JSON-encoded canonical answer.
#[derive(Debug, Clone, FromRow)]
pub struct Task {
    pub id: i64,
    pub title: String,
    #[sqlx(rename = "type", try_from = "String")]
    pub task_type: TaskType,
    pub content: Option<Value>,
    pub difficulty: Option<String>,
    pub classroom_id: i64,
    pub teacher_id: i64,
    pub answer: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Task as sent to clients. Students never receive the canonical answer.
#[derive(Debug, Serialize)]
pub struct TaskView {
    pub id: i64,
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub content: Option<Value>,
    pub difficulty: Option<String>,
    pub classroom_id: i64,
    pub teacher_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl TaskView {
    pub fn new(task: Task, include_answer: bool) -> Self {
        let answer = if include_answer {
            task.answer
                .as_deref()
                .map(|raw| serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
        } else {
            None
        };

        TaskView {
            id: task.id,
            title: task.title,
            task_type: task.task_type,
            content: task.content,
            difficulty: task.difficulty,
            classroom_id: task.classroom_id,
            teacher_id: task.teacher_id,
            answer,
            created_at: task.created_at,
        }
    }
}

/// Text stored in `tasks.answer` for an answer received as JSON.
/// A JSON string is taken as already encoded; anything else is serialized.
pub fn encode_answer(answer: &Value) -> String {
    match answer {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(length(
        min = 1,
        max = 200,
        message = "Title must be between 1 and 200 characters"
    ))]
    pub title: String,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    pub content: Option<Value>,

    #[validate(length(max = 50, message = "Difficulty is too long"))]
    pub difficulty: Option<String>,

    pub classroom_id: i64,

    pub answer: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    #[serde(flatten)]
    pub task: TaskView,
    /// Number of progress rows created for the enrolled students.
    pub assigned_students: u64,
}

/// Partial update of a task; absent fields keep their stored value.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateTaskRequest {
    #[validate(length(
        min = 1,
        max = 200,
        message = "Title must be between 1 and 200 characters"
    ))]
    pub title: Option<String>,

    #[serde(rename = "type")]
    pub task_type: Option<TaskType>,

    pub content: Option<Value>,

    #[validate(length(max = 50, message = "Difficulty is too long"))]
    pub difficulty: Option<String>,

    pub answer: Option<Value>,
}

impl UpdateTaskRequest {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.task_type.is_none()
            && self.content.is_none()
            && self.difficulty.is_none()
            && self.answer.is_none()
    }

    pub fn merge(self, current: &Task) -> Task {
        Task {
            id: current.id,
            title: self.title.unwrap_or_else(|| current.title.clone()),
            task_type: self.task_type.unwrap_or(current.task_type),
            content: self.content.or_else(|| current.content.clone()),
            difficulty: self.difficulty.or_else(|| current.difficulty.clone()),
            classroom_id: current.classroom_id,
            teacher_id: current.teacher_id,
            answer: self
                .answer
                .as_ref()
                .map(encode_answer)
                .or_else(|| current.answer.clone()),
            created_at: current.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub classroom_id: Option<i64>,
}
