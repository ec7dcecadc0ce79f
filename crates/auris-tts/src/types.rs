use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsStatus {
    Idle,
    Synthesizing,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

/// Voice parameters specific to the Chatterbox-style streaming TTS engine.
#[derive(Debug, Clone)]
pub struct VoiceParams {
    pub voice_id: Option<String>,
    pub exaggeration: Option<f32>,
    pub cfg_weight: Option<f32>,
    pub temperature: Option<f32>,
    pub language_id: String,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            voice_id: None,
            exaggeration: None,
            cfg_weight: None,
            temperature: None,
            language_id: "en".to_string(),
        }
    }
}

/// One completed (or failed) synthesis attempt, kept in a bounded ring.
#[derive(Debug, Clone, Serialize)]
pub struct TtsMetricRecord {
    pub session_id: String,
    pub text_length: usize,
    pub audio_bytes: usize,
    pub time_to_first_byte_s: f64,
    pub total_duration_s: f64,
    pub voice_id: String,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
}
