use thiserror::Error;

/// All subscriber-layer errors. Kept separate from the scheduler errors so the
/// gateway can map them without coupling layers.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("Subscriber not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, UserError>;
