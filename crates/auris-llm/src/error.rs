use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Http(String),
    #[error("api error: status={status} message={message}")]
    Api { status: u16, message: String },
    #[error("rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("authentication failed")]
    Authentication,
    #[error("request timed out")]
    Timeout,
    #[error("provider unavailable")]
    Unavailable,
    #[error("response parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e.to_string())
        }
    }
}

impl ProviderError {
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::Http(_) => "LLM_TRANSPORT_ERROR",
            ProviderError::Api { .. } => "LLM_API_ERROR",
            ProviderError::RateLimited { .. } => "LLM_RATE_LIMITED",
            ProviderError::Authentication => "LLM_AUTHENTICATION_FAILED",
            ProviderError::Timeout => "LLM_TIMEOUT",
            ProviderError::Unavailable => "LLM_PROVIDER_UNAVAILABLE",
            ProviderError::Parse(_) => "LLM_PARSE_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
