use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// Row of the `classroom` table. Every classroom has exactly one teacher owner.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Classroom {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub teacher_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateClassroomRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be between 1 and 100 characters"
    ))]
    pub name: String,

    #[validate(length(max = 1000, message = "Description is too long"))]
    pub description: Option<String>,
}

/// Partial update. `teacher_id` hands the classroom over to another teacher.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct UpdateClassroomRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be between 1 and 100 characters"
    ))]
    pub name: Option<String>,

    #[validate(length(max = 1000, message = "Description is too long"))]
    pub description: Option<String>,

    pub teacher_id: Option<i64>,
}

impl UpdateClassroomRequest {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.teacher_id.is_none()
    }

    pub fn merge(self, current: &Classroom) -> Classroom {
        Classroom {
            id: current.id,
            name: self.name.unwrap_or_else(|| current.name.clone()),
            description: self.description.or_else(|| current.description.clone()),
            teacher_id: self.teacher_id.unwrap_or(current.teacher_id),
            created_at: current.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClassroomDeleted {
    pub id: i64,
    pub detached_students: u64,
}
