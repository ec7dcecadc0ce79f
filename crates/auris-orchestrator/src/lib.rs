//! Session orchestrator (C9): the real-time STT→LLM→TTS pipeline that
//! drives one session through IDLE → LISTENING → FINALIZING → GENERATING
//! → SPEAKING → IDLE, with silence detection and barge-in cancellation.

pub mod error;
pub mod manager;
pub mod session;
pub mod types;

pub use error::{OrchestratorError, Result};
pub use manager::SessionOrchestrator;
pub use session::SessionHandle;
pub use types::{AudioChunkCallback, SessionState};
