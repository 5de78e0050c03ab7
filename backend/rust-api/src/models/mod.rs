use thiserror::Error;

pub mod classroom;
pub mod dashboard;
pub mod progress;
pub mod task;
pub mod user;

/// A text column holds a value outside the enum it maps to.
#[derive(Debug, Error)]
#[error("invalid {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: String) -> Self {
        Self { kind, value }
    }
}
