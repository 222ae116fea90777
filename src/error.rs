use thiserror::Error;

use crate::persist::PersistError;
use crate::roster::RosterError;
use crate::validate::Violation;

pub type GradeResult<T> = Result<T, GradeError>;

#[derive(Debug, Error)]
pub enum GradeError {
    /// User-correctable input; nothing was written.
    #[error("{} validation issue(s): {}", .0.len(), summarize(.0))]
    Validation(Vec<Violation>),
    #[error("no valid grades to save")]
    NoValidGrades,
    #[error("no saved grade for student {0}")]
    NotFound(String),
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistError),
    #[error("roster lookup failed: {0}")]
    Roster(#[from] RosterError),
    #[error("no grade session; select class and exam first")]
    NoSession,
}

impl GradeError {
    /// Stable code used on the IPC wire.
    pub fn code(&self) -> &'static str {
        match self {
            GradeError::Validation(_) => "validation_failed",
            GradeError::NoValidGrades => "no_valid_grades",
            GradeError::NotFound(_) => "not_found",
            GradeError::Persistence(_) => "persistence_failed",
            GradeError::Roster(_) => "roster_failed",
            GradeError::NoSession => "no_session",
        }
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}
