use thiserror::Error;

#[derive(Debug, Error)]
pub enum VectorStoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vector store returned status {status}: {message}")]
    Api { status: u16, message: String },
}

impl VectorStoreError {
    pub fn code(&self) -> &'static str {
        match self {
            VectorStoreError::Http(_) => "VECTORSTORE_HTTP_ERROR",
            VectorStoreError::Api { .. } => "VECTORSTORE_API_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, VectorStoreError>;
