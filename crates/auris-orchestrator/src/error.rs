use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session store error: {0}")]
    Session(#[from] auris_sessions::SessionError),
}

impl OrchestratorError {
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::SessionNotFound(_) => "ORCHESTRATOR_SESSION_NOT_FOUND",
            OrchestratorError::Session(_) => "ORCHESTRATOR_SESSION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
