use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use auris_core::events::{ErrorSink, ServiceErrorEvent, ServiceErrorType};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::types::{
    AudioFormat, ConnectionStatus, ConnectionStatusSnapshot, SttMetrics, TranscriptCallback,
    TranscriptMetadata,
};
use crate::wire::{ControlFrame, IncomingFrame};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Backoff and retry settings, mirroring `STTService.__init__`'s constructor
/// arguments (`max_retries`, `backoff_multiplier`, `timeout_s`).
#[derive(Debug, Clone)]
pub struct SttPoolConfig {
    pub default_url: String,
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub timeout_s: f64,
}

impl Default for SttPoolConfig {
    fn default() -> Self {
        Self {
            default_url: "ws://localhost:9090".to_string(),
            max_retries: 5,
            backoff_multiplier: 2.0,
            timeout_s: 30.0,
        }
    }
}

struct PoolInner {
    config: SttPoolConfig,
    errors: ErrorSink,
    total_connections: AtomicU64,
    total_reconnections: AtomicU64,
    total_failures: AtomicU64,
    total_transcriptions: AtomicU64,
}

struct ConnectionHandle {
    session_id: String,
    inner: Arc<PoolInner>,
    url: String,
    status: Mutex<ConnectionStatus>,
    sink: Mutex<Option<WsSink>>,
    callback: Mutex<Option<TranscriptCallback>>,
    reconnect_attempts: AtomicU32,
    audio_format_sent: AtomicBool,
    last_activity: Mutex<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    listen_task: Mutex<Option<JoinHandle<()>>>,
}

/// Per-session WebSocket connection pool to the STT engine (C3), grounded
/// on `STTService` in the source system. All public operations are
/// infallible from the caller's point of view: transport errors are
/// reported through the error bus (C11), never returned as `Err`.
pub struct SttClientPool {
    connections: DashMap<String, Arc<ConnectionHandle>>,
    inner: Arc<PoolInner>,
}

impl SttClientPool {
    pub fn new(config: SttPoolConfig, errors: ErrorSink) -> Self {
        Self {
            connections: DashMap::new(),
            inner: Arc::new(PoolInner {
                config,
                errors,
                total_connections: AtomicU64::new(0),
                total_reconnections: AtomicU64::new(0),
                total_failures: AtomicU64::new(0),
                total_transcriptions: AtomicU64::new(0),
            }),
        }
    }

    pub async fn connect(&self, session_id: &str, url: Option<String>) -> bool {
        if let Some(existing) = self.connections.get(session_id) {
            if *existing.status.lock().await == ConnectionStatus::Connected {
                warn!(session_id, "STT already connected");
                return true;
            }
        }

        let url = url.unwrap_or_else(|| self.inner.config.default_url.clone());
        let now = Utc::now();
        let handle = Arc::new(ConnectionHandle {
            session_id: session_id.to_string(),
            inner: self.inner.clone(),
            url: url.clone(),
            status: Mutex::new(ConnectionStatus::Connecting),
            sink: Mutex::new(None),
            callback: Mutex::new(None),
            reconnect_attempts: AtomicU32::new(0),
            audio_format_sent: AtomicBool::new(false),
            last_activity: Mutex::new(now),
            created_at: now,
            listen_task: Mutex::new(None),
        });
        self.connections.insert(session_id.to_string(), handle.clone());

        let success = establish_connection(&handle).await;
        if success {
            self.inner.total_connections.fetch_add(1, Ordering::SeqCst);
            info!(session_id, "STT connected");
        } else {
            *handle.status.lock().await = ConnectionStatus::Failed;
            self.inner.total_failures.fetch_add(1, Ordering::SeqCst);
            self.inner.errors.emit(
                ServiceErrorEvent::new(
                    "whisperx",
                    ServiceErrorType::SttConnectionFailed,
                    "Speech recognition is temporarily unavailable.",
                    format!("connect failed for session {session_id} after retries"),
                )
                .with_session(session_id)
                .retry_suggested(),
            );
        }
        success
    }

    pub async fn send_audio(&self, session_id: &str, data: Vec<u8>, format: AudioFormat) -> bool {
        let Some(handle) = self.connections.get(session_id).map(|r| r.clone()) else {
            warn!(session_id, "no STT connection for session");
            return false;
        };

        if *handle.status.lock().await != ConnectionStatus::Connected {
            warn!(session_id, "STT not connected, dropping audio frame");
            return false;
        }

        if !handle.audio_format_sent.load(Ordering::SeqCst) {
            let frame = ControlFrame::Start {
                user_id: session_id,
                audio_format: format.as_str(),
            };
            let json = serde_json::to_string(&frame).expect("control frame always serializes");
            debug!(session_id, format = format.as_str(), "sending STT start frame");

            let sent = {
                let mut sink = handle.sink.lock().await;
                match sink.as_mut() {
                    Some(sink) => sink.send(Message::Text(json)).await.is_ok(),
                    None => false,
                }
            };
            if !sent {
                return self.handle_send_failure(&handle).await;
            }
            handle.audio_format_sent.store(true, Ordering::SeqCst);
        }

        let sent = {
            let mut sink = handle.sink.lock().await;
            match sink.as_mut() {
                Some(sink) => sink.send(Message::Binary(data)).await.is_ok(),
                None => false,
            }
        };

        if sent {
            *handle.last_activity.lock().await = Utc::now();
            true
        } else {
            self.handle_send_failure(&handle).await
        }
    }

    async fn handle_send_failure(&self, handle: &Arc<ConnectionHandle>) -> bool {
        *handle.status.lock().await = ConnectionStatus::Disconnected;
        self.inner.errors.emit(
            ServiceErrorEvent::new(
                "whisperx",
                ServiceErrorType::SttConnectionFailed,
                "Speech recognition connection lost. Reconnecting...",
                "error sending audio to STT",
            )
            .with_session(&handle.session_id)
            .retry_suggested(),
        );

        let handle = handle.clone();
        tokio::spawn(async move {
            attempt_reconnect(&handle).await;
        });
        false
    }

    pub async fn register_callback(&self, session_id: &str, callback: TranscriptCallback) {
        let Some(handle) = self.connections.get(session_id) else {
            warn!(session_id, "no STT connection for session");
            return;
        };
        *handle.callback.lock().await = Some(callback);
        info!(session_id, "STT callback registered");
    }

    pub async fn finalize_transcript(&self, session_id: &str) -> bool {
        let Some(handle) = self.connections.get(session_id).map(|r| r.clone()) else {
            warn!(session_id, "no STT connection for session");
            return false;
        };
        if *handle.status.lock().await != ConnectionStatus::Connected {
            return false;
        }

        let json = serde_json::to_string(&ControlFrame::Finalize).unwrap();
        let mut sink = handle.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => {
                let ok = sink.send(Message::Text(json)).await.is_ok();
                if !ok {
                    drop(sink);
                    self.inner.errors.emit(
                        ServiceErrorEvent::new(
                            "whisperx",
                            ServiceErrorType::SttTranscriptionFailed,
                            "Speech recognition failed. Please speak again.",
                            "error sending finalize message to STT",
                        )
                        .with_session(session_id)
                        .retry_suggested(),
                    );
                }
                ok
            }
            None => false,
        }
    }

    pub async fn disconnect(&self, session_id: &str) {
        let Some((_, handle)) = self.connections.remove(session_id) else {
            warn!(session_id, "no STT connection to disconnect");
            return;
        };

        if let Some(task) = handle.listen_task.lock().await.take() {
            task.abort();
        }

        let mut sink = handle.sink.lock().await;
        if let Some(sink) = sink.as_mut() {
            let json = serde_json::to_string(&ControlFrame::Close).unwrap();
            let _ = sink.send(Message::Text(json)).await;
            let _ = sink.close().await;
        }
        info!(session_id, "STT disconnected");
    }

    pub async fn is_connected(&self, session_id: &str) -> bool {
        match self.connections.get(session_id) {
            Some(handle) => *handle.status.lock().await == ConnectionStatus::Connected,
            None => false,
        }
    }

    pub async fn get_connection_status(&self, session_id: &str) -> ConnectionStatusSnapshot {
        let Some(handle) = self.connections.get(session_id).map(|r| r.clone()) else {
            return ConnectionStatusSnapshot {
                session_id: session_id.to_string(),
                connected: false,
                status: ConnectionStatus::Disconnected,
                url: None,
                reconnect_attempts: 0,
                uptime_seconds: 0.0,
                idle_seconds: 0.0,
                has_callback: false,
            };
        };

        let status = *handle.status.lock().await;
        let now = Utc::now();
        let last_activity = *handle.last_activity.lock().await;
        ConnectionStatusSnapshot {
            session_id: session_id.to_string(),
            connected: status == ConnectionStatus::Connected,
            status,
            url: Some(handle.url.clone()),
            reconnect_attempts: handle.reconnect_attempts.load(Ordering::SeqCst),
            uptime_seconds: (now - handle.created_at).num_milliseconds() as f64 / 1000.0,
            idle_seconds: (now - last_activity).num_milliseconds() as f64 / 1000.0,
            has_callback: handle.callback.lock().await.is_some(),
        }
    }

    pub async fn get_metrics(&self) -> SttMetrics {
        let mut active = 0;
        for entry in self.connections.iter() {
            if *entry.status.lock().await == ConnectionStatus::Connected {
                active += 1;
            }
        }
        SttMetrics {
            active_connections: active,
            total_connections: self.inner.total_connections.load(Ordering::SeqCst),
            total_reconnections: self.inner.total_reconnections.load(Ordering::SeqCst),
            total_failures: self.inner.total_failures.load(Ordering::SeqCst),
            total_transcriptions: self.inner.total_transcriptions.load(Ordering::SeqCst),
        }
    }

    pub async fn shutdown(&self) {
        let sessions: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        info!(count = sessions.len(), "shutting down STT client pool");
        for session_id in sessions {
            self.disconnect(&session_id).await;
        }
    }

    #[cfg(test)]
    pub(crate) fn session_ids(&self) -> HashMap<String, ()> {
        self.connections.iter().map(|e| (e.key().clone(), ())).collect()
    }
}

async fn establish_connection(handle: &Arc<ConnectionHandle>) -> bool {
    let mut attempt: u32 = 0;
    let max_retries = handle.inner.config.max_retries;
    let timeout_s = handle.inner.config.timeout_s;
    let backoff_multiplier = handle.inner.config.backoff_multiplier;

    loop {
        *handle.status.lock().await = if attempt == 0 {
            ConnectionStatus::Connecting
        } else {
            ConnectionStatus::Reconnecting
        };

        info!(
            session_id = %handle.session_id,
            attempt = attempt + 1,
            max_attempts = max_retries + 1,
            "connecting to STT engine"
        );

        let connect_result = tokio::time::timeout(
            Duration::from_secs_f64(timeout_s),
            tokio_tungstenite::connect_async(&handle.url),
        )
        .await;

        match connect_result {
            Ok(Ok((stream, _response))) => {
                let (sink, source) = stream.split();
                *handle.sink.lock().await = Some(sink);
                *handle.status.lock().await = ConnectionStatus::Connected;
                handle.reconnect_attempts.store(attempt, Ordering::SeqCst);
                *handle.last_activity.lock().await = Utc::now();
                handle.audio_format_sent.store(false, Ordering::SeqCst);

                let task = tokio::spawn(receive_loop(handle.clone(), source));
                *handle.listen_task.lock().await = Some(task);

                info!(session_id = %handle.session_id, "STT connected");
                return true;
            }
            Ok(Err(e)) => {
                warn!(session_id = %handle.session_id, attempt = attempt + 1, error = %e, "STT connect failed");
            }
            Err(_) => {
                warn!(session_id = %handle.session_id, attempt = attempt + 1, "STT connect timed out");
            }
        }

        attempt += 1;
        if attempt > max_retries {
            break;
        }
        let delay = backoff_multiplier.powi(attempt as i32).min(30.0);
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
    }

    false
}

async fn attempt_reconnect(handle: &Arc<ConnectionHandle>) {
    warn!(session_id = %handle.session_id, "attempting STT reconnect");
    handle.inner.total_reconnections.fetch_add(1, Ordering::SeqCst);

    if let Some(mut sink) = handle.sink.lock().await.take() {
        let _ = sink.close().await;
    }

    let success = establish_connection(handle).await;
    if success {
        info!(session_id = %handle.session_id, "STT reconnected");
    } else {
        warn!(session_id = %handle.session_id, "STT reconnect failed");
        handle.inner.total_failures.fetch_add(1, Ordering::SeqCst);
        *handle.status.lock().await = ConnectionStatus::Failed;
        handle.inner.errors.emit(
            ServiceErrorEvent::new(
                "whisperx",
                ServiceErrorType::SttConnectionFailed,
                "Speech recognition is temporarily unavailable.",
                "reconnect exhausted all retries",
            )
            .with_session(&handle.session_id)
            .retry_suggested(),
        );
    }
}

async fn receive_loop(handle: Arc<ConnectionHandle>, mut source: WsSource) {
    info!(session_id = %handle.session_id, "STT receive loop started");

    loop {
        let message = source.next().await;
        match message {
            Some(Ok(Message::Text(text))) => {
                *handle.last_activity.lock().await = Utc::now();
                handle_frame(&handle, &text).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                info!(session_id = %handle.session_id, "STT connection closed");
                *handle.status.lock().await = ConnectionStatus::Disconnected;
                break;
            }
            Some(Ok(_)) => {
                // binary/ping/pong frames carry no transcript payload.
            }
            Some(Err(e)) => {
                warn!(session_id = %handle.session_id, error = %e, "STT receive loop error");
                *handle.status.lock().await = ConnectionStatus::Disconnected;
                break;
            }
        }
    }
}

async fn handle_frame(handle: &Arc<ConnectionHandle>, text: &str) {
    let frame: IncomingFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!(session_id = %handle.session_id, error = %e, "invalid JSON from STT engine");
            return;
        }
    };

    let callback = handle.callback.lock().await.clone();
    let Some(callback) = callback else { return };

    match frame.kind.as_str() {
        "partial" => {
            if !frame.text.is_empty() {
                callback(
                    frame.text,
                    false,
                    TranscriptMetadata {
                        kind: "partial",
                        timestamp: Some(Utc::now()),
                        confidence: frame.confidence,
                        duration: None,
                        error: None,
                    },
                );
            }
        }
        "final" => {
            handle.inner.total_transcriptions.fetch_add(1, Ordering::SeqCst);
            callback(
                frame.text,
                true,
                TranscriptMetadata {
                    kind: "final",
                    timestamp: Some(Utc::now()),
                    confidence: frame.confidence,
                    duration: frame.duration,
                    error: None,
                },
            );
        }
        "error" => {
            let error = frame.error.unwrap_or_else(|| "unknown error".to_string());
            callback(
                String::new(),
                true,
                TranscriptMetadata {
                    kind: "error",
                    timestamp: Some(Utc::now()),
                    confidence: None,
                    duration: None,
                    error: Some(error),
                },
            );
        }
        other => {
            warn!(session_id = %handle.session_id, kind = other, "unknown STT frame type");
        }
    }
}
