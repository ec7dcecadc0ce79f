use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use auris_core::events::{ErrorSink, ServiceErrorEvent, ServiceErrorType};
use chrono::Utc;
use dashmap::DashMap;
use futures_util::StreamExt;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::types::{TtsMetricRecord, TtsStatus, VoiceInfo, VoiceParams};

const MAX_METRICS_HISTORY: usize = 100;

#[derive(Debug, Clone)]
pub struct TtsClientConfig {
    pub base_url: String,
    pub default_voice_id: String,
    pub timeout_s: f64,
    pub chunk_size: usize,
}

impl Default for TtsClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8004".to_string(),
            default_voice_id: "default".to_string(),
            timeout_s: 60.0,
            chunk_size: 8192,
        }
    }
}

/// Streaming TTS client (C4), grounded on `src/services/tts_service.py`'s
/// `TTSService`. One active synthesis per session; a new request cancels
/// whatever was in flight, matching the source's idempotence rule.
pub struct TtsClient {
    client: reqwest::Client,
    config: TtsClientConfig,
    errors: ErrorSink,
    active: DashMap<String, CancellationToken>,
    metrics: Mutex<VecDeque<TtsMetricRecord>>,
}

#[derive(Serialize)]
struct SpeechForm<'a> {
    input: &'a str,
    response_format: &'a str,
    voice: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    exaggeration: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cfg_weight: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl TtsClient {
    pub fn new(config: TtsClientConfig, errors: ErrorSink) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            errors,
            active: DashMap::new(),
            metrics: Mutex::new(VecDeque::with_capacity(MAX_METRICS_HISTORY)),
        }
    }

    /// Streaming mode when `callback` is `Some`: each audio chunk is sent
    /// down the channel as it arrives and the returned buffer is empty.
    /// Buffered mode (`callback = None`) accumulates the full audio and
    /// returns it.
    pub async fn synthesize_speech(
        &self,
        session_id: &str,
        text: &str,
        voice: VoiceParams,
        callback: Option<mpsc::Sender<Vec<u8>>>,
    ) -> Vec<u8> {
        info!(session_id, text_len = text.len(), "TTS request");

        self.cancel_tts(session_id).await;

        if !self.test_tts_health().await {
            warn!("TTS engine unavailable, cannot synthesize");
            self.record_metrics(TtsMetricRecord {
                session_id: session_id.to_string(),
                text_length: text.len(),
                audio_bytes: 0,
                time_to_first_byte_s: 0.0,
                total_duration_s: 0.0,
                voice_id: voice.voice_id.clone().unwrap_or_else(|| self.config.default_voice_id.clone()),
                success: false,
                error: Some("Service unavailable".to_string()),
                timestamp: Utc::now(),
            })
            .await;
            self.errors.emit(
                ServiceErrorEvent::new(
                    "chatterbox",
                    ServiceErrorType::TtsServiceUnavailable,
                    "Voice synthesis service unavailable. Response will be text-only.",
                    "health probe failed before synthesis",
                )
                .with_session(session_id),
            );
            return Vec::new();
        }

        let token = CancellationToken::new();
        self.active.insert(session_id.to_string(), token.clone());

        let result = self.stream_tts(session_id, text, &voice, callback, &token).await;
        self.active.remove(session_id);
        result
    }

    async fn stream_tts(
        &self,
        session_id: &str,
        text: &str,
        voice: &VoiceParams,
        callback: Option<mpsc::Sender<Vec<u8>>>,
        token: &CancellationToken,
    ) -> Vec<u8> {
        let started_at = Instant::now();
        let voice_id = voice
            .voice_id
            .clone()
            .unwrap_or_else(|| self.config.default_voice_id.clone());

        let form = SpeechForm {
            input: text,
            response_format: "wav",
            voice: &voice_id,
            language: &voice.language_id,
            exaggeration: voice.exaggeration,
            cfg_weight: voice.cfg_weight,
            temperature: voice.temperature,
        };

        let url = format!("{}/audio/speech/stream/upload", self.config.base_url);
        let request = self
            .client
            .post(&url)
            .timeout(Duration::from_secs_f64(self.config.timeout_s))
            .form(&form)
            .send();

        let response = match request.await {
            Ok(resp) => resp,
            Err(e) if e.is_timeout() => {
                return self
                    .fail(session_id, text, &voice_id, started_at, ServiceErrorType::TtsTimeout,
                        "Voice synthesis timed out. Response will be text-only.",
                        format!("TTS timeout after {}s", self.config.timeout_s), true)
                    .await;
            }
            Err(e) => {
                return self
                    .fail(session_id, text, &voice_id, started_at, ServiceErrorType::TtsSynthesisFailed,
                        "Voice synthesis failed. Response will be text-only.",
                        format!("TTS request error: {e}"), false)
                    .await;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let (error_type, user_msg) = match status.as_u16() {
                503 => (
                    ServiceErrorType::TtsServiceUnavailable,
                    "Voice synthesis service unavailable. Response will be text-only.",
                ),
                404 => (
                    ServiceErrorType::TtsInvalidVoice,
                    "Requested voice not found. Using default voice.",
                ),
                _ => (
                    ServiceErrorType::TtsSynthesisFailed,
                    "Voice synthesis failed. Response will be text-only.",
                ),
            };
            return self
                .fail(
                    session_id,
                    text,
                    &voice_id,
                    started_at,
                    error_type,
                    user_msg,
                    format!("Chatterbox HTTP error: status={status}"),
                    false,
                )
                .await;
        }

        let mut byte_stream = response.bytes_stream();
        let mut audio_buffer = Vec::new();
        let mut total_bytes = 0usize;
        let mut time_to_first_byte_s = 0.0;
        let mut first_byte = true;

        while let Some(chunk) = byte_stream.next().await {
            if token.is_cancelled() {
                info!(session_id, "TTS stream cancelled");
                break;
            }

            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    error!(session_id, error = %e, "TTS stream read error");
                    break;
                }
            };

            if first_byte {
                time_to_first_byte_s = started_at.elapsed().as_secs_f64();
                info!(session_id, latency_s = time_to_first_byte_s, "TTS first byte");
                first_byte = false;
            }

            total_bytes += chunk.len();
            match &callback {
                Some(tx) => {
                    if tx.send(chunk.to_vec()).await.is_err() {
                        break;
                    }
                }
                None => audio_buffer.extend_from_slice(&chunk),
            }
        }

        let total_duration_s = started_at.elapsed().as_secs_f64();
        info!(session_id, total_bytes, total_duration_s, "TTS streaming complete");
        self.record_metrics(TtsMetricRecord {
            session_id: session_id.to_string(),
            text_length: text.len(),
            audio_bytes: total_bytes,
            time_to_first_byte_s,
            total_duration_s,
            voice_id,
            success: true,
            error: None,
            timestamp: Utc::now(),
        })
        .await;

        if callback.is_some() {
            Vec::new()
        } else {
            audio_buffer
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn fail(
        &self,
        session_id: &str,
        text: &str,
        voice_id: &str,
        started_at: Instant,
        error_type: ServiceErrorType,
        user_message: &str,
        technical_details: String,
        retry_suggested: bool,
    ) -> Vec<u8> {
        error!(session_id, %technical_details, "TTS synthesis failed");
        self.record_metrics(TtsMetricRecord {
            session_id: session_id.to_string(),
            text_length: text.len(),
            audio_bytes: 0,
            time_to_first_byte_s: 0.0,
            total_duration_s: started_at.elapsed().as_secs_f64(),
            voice_id: voice_id.to_string(),
            success: false,
            error: Some(technical_details.clone()),
            timestamp: Utc::now(),
        })
        .await;

        let mut event = ServiceErrorEvent::new("chatterbox", error_type, user_message, technical_details)
            .with_session(session_id);
        if retry_suggested {
            event = event.retry_suggested();
        }
        self.errors.emit(event);
        Vec::new()
    }

    pub async fn cancel_tts(&self, session_id: &str) {
        if let Some((_, token)) = self.active.remove(session_id) {
            info!(session_id, "cancelling active TTS");
            token.cancel();
        }
    }

    pub async fn test_tts_health(&self) -> bool {
        let url = format!("{}/health", self.config.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "TTS health check failed");
                false
            }
        }
    }

    pub async fn get_available_voices(&self) -> Result<Vec<VoiceInfo>> {
        let url = format!("{}/v1/voices", self.config.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(Vec::new());
        }
        let body: serde_json::Value = resp.json().await.unwrap_or_default();
        let voices = body
            .get("voices")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| {
                        Some(VoiceInfo {
                            id: v.get("id")?.as_str()?.to_string(),
                            name: v.get("name").and_then(|n| n.as_str()).unwrap_or("").to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(voices)
    }

    async fn record_metrics(&self, record: TtsMetricRecord) {
        let mut history = self.metrics.lock().await;
        history.push_back(record);
        while history.len() > MAX_METRICS_HISTORY {
            history.pop_front();
        }
    }

    pub async fn get_metrics(&self, session_id: Option<&str>) -> Vec<TtsMetricRecord> {
        let history = self.metrics.lock().await;
        match session_id {
            Some(id) => history.iter().filter(|m| m.session_id == id).cloned().collect(),
            None => history.iter().cloned().collect(),
        }
    }

    pub async fn close(&self) {
        let sessions: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        for session_id in sessions {
            self.cancel_tts(&session_id).await;
        }
        info!("TTS client closed");
    }
}

/// Builds the current synthesis status for a session, useful for
/// diagnostics dashboards; mirrors `ActiveTTS.status` transitions.
pub fn status_for(has_active: bool, streaming: bool) -> TtsStatus {
    if !has_active {
        TtsStatus::Idle
    } else if streaming {
        TtsStatus::Streaming
    } else {
        TtsStatus::Synthesizing
    }
}

pub type SharedTtsClient = Arc<TtsClient>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_for_reports_idle_without_active_synthesis() {
        assert_eq!(status_for(false, false), TtsStatus::Idle);
    }

    #[test]
    fn status_for_reports_streaming_when_active_and_streaming() {
        assert_eq!(status_for(true, true), TtsStatus::Streaming);
    }

    #[tokio::test]
    async fn record_metrics_caps_history_at_100_entries() {
        let client = TtsClient::new(TtsClientConfig::default(), ErrorSink::new(Default::default()));
        for i in 0..150 {
            client
                .record_metrics(TtsMetricRecord {
                    session_id: format!("s{i}"),
                    text_length: 1,
                    audio_bytes: 1,
                    time_to_first_byte_s: 0.0,
                    total_duration_s: 0.0,
                    voice_id: "default".to_string(),
                    success: true,
                    error: None,
                    timestamp: Utc::now(),
                })
                .await;
        }
        assert_eq!(client.get_metrics(None).await.len(), MAX_METRICS_HISTORY);
    }
}
