use thiserror::Error;

#[derive(Debug, Error)]
pub enum SttError {
    #[error("no STT connection for session")]
    NotConnected,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connect timed out")]
    Timeout,
}

impl SttError {
    pub fn code(&self) -> &'static str {
        match self {
            SttError::NotConnected => "STT_NOT_CONNECTED",
            SttError::WebSocket(_) => "STT_WEBSOCKET_ERROR",
            SttError::Timeout => "STT_TIMEOUT",
        }
    }
}

pub type Result<T> = std::result::Result<T, SttError>;
