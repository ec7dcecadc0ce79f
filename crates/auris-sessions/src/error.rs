use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("agent not found: {0}")]
    AgentNotFound(String),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "SESSION_NOT_FOUND",
            SessionError::Database(_) => "SESSION_DATABASE_ERROR",
            SessionError::AgentNotFound(_) => "SESSION_AGENT_NOT_FOUND",
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
