use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("task not found: {0}")]
    NotFound(String),
}

impl QueueError {
    pub fn code(&self) -> &'static str {
        match self {
            QueueError::Database(_) => "QUEUE_DATABASE_ERROR",
            QueueError::NotFound(_) => "QUEUE_TASK_NOT_FOUND",
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
