use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use auris_core::ids::{AgentId, SessionId, UserId};
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::types::{AudioChunkCallback, SessionState};

/// Per-session orchestration state (§4.9): current transcript,
/// `is_finalizing`, `last_audio_time`, and the cancellation signal for the
/// in-flight LLM/TTS pair. `last_audio_time`/`is_finalizing` are read on
/// every silence-monitor tick, so they're plain atomics rather than
/// behind the state mutex.
pub struct SessionHandle {
    pub id: SessionId,
    pub user_id: UserId,
    pub agent_id: AgentId,
    pub state: Mutex<SessionState>,
    pub transcript: Mutex<String>,
    last_audio_time_ms: AtomicI64,
    pub is_finalizing: AtomicBool,
    pub degraded: AtomicBool,
    generation: Mutex<CancellationToken>,
    pub silence_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    pub audio_sink: Mutex<Option<AudioChunkCallback>>,
}

impl SessionHandle {
    pub fn new(id: SessionId, user_id: UserId, agent_id: AgentId) -> Self {
        Self {
            id,
            user_id,
            agent_id,
            state: Mutex::new(SessionState::Idle),
            transcript: Mutex::new(String::new()),
            last_audio_time_ms: AtomicI64::new(Utc::now().timestamp_millis()),
            is_finalizing: AtomicBool::new(false),
            degraded: AtomicBool::new(false),
            generation: Mutex::new(CancellationToken::new()),
            silence_task: Mutex::new(None),
            audio_sink: Mutex::new(None),
        }
    }

    pub fn touch_audio(&self) {
        self.last_audio_time_ms.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    pub fn silence_ms(&self) -> i64 {
        Utc::now().timestamp_millis() - self.last_audio_time_ms.load(Ordering::SeqCst)
    }

    /// Cancels whatever LLM/TTS stream is in flight and swaps in a fresh
    /// token for the next turn (ordering guarantee 4: barge-in cascades
    /// from the interrupting utterance to the current generation).
    pub async fn cancel_generation(&self) {
        let mut token = self.generation.lock().await;
        token.cancel();
        *token = CancellationToken::new();
    }

    pub async fn current_generation_token(&self) -> CancellationToken {
        self.generation.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> SessionHandle {
        SessionHandle::new(SessionId::new(), UserId::new("u1"), AgentId::new("main"))
    }

    #[test]
    fn fresh_handle_has_near_zero_silence() {
        let h = handle();
        assert!(h.silence_ms() < 50);
    }

    #[tokio::test]
    async fn cancel_generation_cancels_all_outstanding_clones() {
        let h = handle();
        let token = h.current_generation_token().await;
        assert!(!token.is_cancelled());

        h.cancel_generation().await;
        assert!(token.is_cancelled());

        let fresh = h.current_generation_token().await;
        assert!(!fresh.is_cancelled());
    }
}
