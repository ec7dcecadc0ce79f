//! STT client pool (C3): one WebSocket connection per session to the
//! speech-to-text engine, with auto-reconnect and graceful degradation.
//! Grounded on `src/services/stt_service.py`'s `STTService`.

mod error;
mod pool;
mod types;
mod wire;

pub use error::{Result, SttError};
pub use pool::{SttClientPool, SttPoolConfig};
pub use types::{
    AudioFormat, ConnectionStatus, ConnectionStatusSnapshot, SttMetrics, TranscriptCallback,
    TranscriptMetadata,
};
