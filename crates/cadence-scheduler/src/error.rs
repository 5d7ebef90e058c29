use thiserror::Error;

use crate::types::ScheduleId;

/// Errors that can occur within the scheduling subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed schedule parameters. Raised before any state is mutated.
    #[error("Invalid schedule: {0}")]
    Validation(String),

    #[error("Job not found: {key}")]
    JobNotFound { key: String },

    /// Schedule row is already gone. Callers cleaning up treat this as done.
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(ScheduleId),

    #[error("Subscriber not found: {chat_id}")]
    SubjectNotFound { chat_id: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Subscriber store error: {0}")]
    Users(#[from] cadence_users::UserError),
}

impl SchedulerError {
    /// Short error code string returned to HTTP clients.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Validation(_) => "VALIDATION_ERROR",
            SchedulerError::JobNotFound { .. } => "JOB_NOT_FOUND",
            SchedulerError::ScheduleNotFound(_) => "SCHEDULE_NOT_FOUND",
            SchedulerError::SubjectNotFound { .. } => "SUBJECT_NOT_FOUND",
            SchedulerError::Database(_) => "DATABASE_ERROR",
            SchedulerError::Serialization(_) => "SERIALIZATION_ERROR",
            SchedulerError::Users(cadence_users::UserError::NotFound(_)) => "SUBJECT_NOT_FOUND",
            SchedulerError::Users(_) => "DATABASE_ERROR",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SchedulerError::JobNotFound { .. }
                | SchedulerError::ScheduleNotFound(_)
                | SchedulerError::SubjectNotFound { .. }
                | SchedulerError::Users(cadence_users::UserError::NotFound(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
