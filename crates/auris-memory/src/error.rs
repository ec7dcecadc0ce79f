use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("fact not found: {0}")]
    NotFound(String),

    #[error("vector store error: {0}")]
    VectorStore(#[from] auris_vectorstore::VectorStoreError),

    #[error("memory extraction suspended: {0}")]
    ErrorGuardOpen(String),

    #[error("invalid manual fact payload: {0}")]
    InvalidManualFact(String),
}

impl MemoryError {
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::Database(_) => "MEMORY_DATABASE_ERROR",
            MemoryError::NotFound(_) => "MEMORY_NOT_FOUND",
            MemoryError::VectorStore(_) => "MEMORY_VECTORSTORE_ERROR",
            MemoryError::ErrorGuardOpen(_) => "MEMORY_ERROR_GUARD_OPEN",
            MemoryError::InvalidManualFact(_) => "MEMORY_INVALID_MANUAL_FACT",
        }
    }
}

pub type Result<T> = std::result::Result<T, MemoryError>;
