use std::sync::Arc;

/// The single-session state machine (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Finalizing,
    Generating,
    Speaking,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Listening => "listening",
            SessionState::Finalizing => "finalizing",
            SessionState::Generating => "generating",
            SessionState::Speaking => "speaking",
        };
        write!(f, "{s}")
    }
}

/// `f(audio_chunk)`, invoked once per TTS chunk in receive order. The
/// transport layer (out of scope here) registers one of these per session
/// to get synthesized audio out of the orchestrator.
pub type AudioChunkCallback = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_displays_as_lowercase() {
        assert_eq!(SessionState::Listening.to_string(), "listening");
        assert_eq!(SessionState::Finalizing.to_string(), "finalizing");
    }
}
