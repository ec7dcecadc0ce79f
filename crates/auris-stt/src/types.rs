use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mirrors `STTConnection.status` in the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Opus,
    Pcm,
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Opus => "opus",
            AudioFormat::Pcm => "pcm",
        }
    }
}

/// Metadata passed alongside a transcript callback invocation.
#[derive(Debug, Clone, Default)]
pub struct TranscriptMetadata {
    pub kind: &'static str,
    pub timestamp: Option<DateTime<Utc>>,
    pub confidence: Option<f64>,
    pub duration: Option<f64>,
    pub error: Option<String>,
}

/// `f(text, is_final, metadata)`, invoked from the per-connection receive
/// loop. `Fn`, not `FnMut`: callbacks may be invoked concurrently across
/// sessions (never for the same session, since one receive loop owns it).
pub type TranscriptCallback = Arc<dyn Fn(String, bool, TranscriptMetadata) + Send + Sync>;

/// Snapshot returned by `get_connection_status`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatusSnapshot {
    pub session_id: String,
    pub connected: bool,
    pub status: ConnectionStatus,
    pub url: Option<String>,
    pub reconnect_attempts: u32,
    pub uptime_seconds: f64,
    pub idle_seconds: f64,
    pub has_callback: bool,
}

/// Process-wide metrics, per `get_metrics()`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SttMetrics {
    pub active_connections: usize,
    pub total_connections: u64,
    pub total_reconnections: u64,
    pub total_failures: u64,
    pub total_transcriptions: u64,
}
