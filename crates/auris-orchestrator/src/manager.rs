use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use auris_core::config::OrchestratorConfig;
use auris_core::events::{EventBus, OutboundEvent, ServiceErrorEvent, ServiceErrorType};
use auris_core::ids::{AgentId, SessionId, UserId};
use auris_core::types::{Agent, MessageRole, ProviderKind as CoreProviderKind};
use auris_llm::{ChatMessage, GenerationConfig, LlmRouterClient, ProviderKind as LlmProviderKind, Role};
use auris_sessions::{ConversationCache, SessionType};
use auris_stt::{AudioFormat, SttClientPool, TranscriptMetadata};
use auris_tts::{TtsClient, VoiceParams};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::session::SessionHandle;
use crate::types::{AudioChunkCallback, SessionState};

/// Drives the real-time STT→LLM→TTS pipeline for every active session
/// (C9), grounded on `skynet-agent::pipeline::process_message_non_streaming`'s
/// load-context → generate → persist → side-effects shape, restructured
/// around the turn-taking state machine and barge-in cancellation that a
/// voice session needs and a text pipeline doesn't.
pub struct SessionOrchestrator {
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
    stt: Arc<SttClientPool>,
    tts: Arc<TtsClient>,
    llm: Arc<LlmRouterClient>,
    cache: Arc<ConversationCache>,
    events: EventBus,
    config: OrchestratorConfig,
}

impl SessionOrchestrator {
    pub fn new(
        stt: Arc<SttClientPool>,
        tts: Arc<TtsClient>,
        llm: Arc<LlmRouterClient>,
        cache: Arc<ConversationCache>,
        events: EventBus,
        config: OrchestratorConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            stt,
            tts,
            llm,
            cache,
            events,
            config,
        })
    }

    /// Creates/loads the session, opens the STT connection, registers the
    /// transcript callback, and starts the silence monitor. IDLE is the
    /// starting state; the first audio frame moves it to LISTENING.
    pub async fn start_session(
        self: &Arc<Self>,
        session_id: SessionId,
        user_id: UserId,
        agent_id: AgentId,
        session_type: SessionType,
        title: Option<&str>,
    ) -> crate::error::Result<()> {
        self.cache
            .get_or_create_session(&session_id, &user_id, &agent_id, session_type, title)
            .await?;

        let handle = Arc::new(SessionHandle::new(session_id, user_id, agent_id));
        self.sessions.insert(session_id, handle.clone());

        let sid = session_id.to_string();
        if !self.stt.connect(&sid, None).await {
            warn!(session_id = %sid, "STT connect failed at session start, marking degraded");
            handle.degraded.store(true, Ordering::SeqCst);
        }

        let orchestrator = self.clone();
        self.stt
            .register_callback(
                &sid,
                Arc::new(move |text: String, is_final: bool, meta: TranscriptMetadata| {
                    let orchestrator = orchestrator.clone();
                    tokio::spawn(async move {
                        orchestrator.on_transcript(session_id, text, is_final, meta).await;
                    });
                }),
            )
            .await;

        self.spawn_silence_monitor(handle.clone()).await;
        info!(session_id = %sid, "session started");
        Ok(())
    }

    /// Registers the per-session audio sink the transport layer uses to
    /// receive synthesized TTS chunks in receive order.
    pub async fn register_audio_sink(&self, session_id: &SessionId, sink: AudioChunkCallback) {
        if let Some(handle) = self.sessions.get(session_id) {
            *handle.audio_sink.lock().await = Some(sink);
        }
    }

    /// IDLE → LISTENING on the first frame; a frame arriving while
    /// GENERATING/SPEAKING is a barge-in and cancels the in-flight turn.
    pub async fn on_audio_frame(&self, session_id: &SessionId, data: Vec<u8>, format: AudioFormat) -> bool {
        let Some(handle) = self.sessions.get(session_id).map(|r| r.clone()) else {
            warn!(%session_id, "audio frame for unknown session");
            return false;
        };
        handle.touch_audio();

        let should_barge_in = {
            let mut state = handle.state.lock().await;
            match *state {
                SessionState::Idle => {
                    *state = SessionState::Listening;
                    false
                }
                SessionState::Generating | SessionState::Speaking if self.config.barge_in_enabled => {
                    *state = SessionState::Listening;
                    true
                }
                _ => false,
            }
        };

        if should_barge_in {
            info!(%session_id, "barge-in detected, cancelling in-flight generation");
            handle.cancel_generation().await;
            *handle.transcript.lock().await = String::new();
            handle.is_finalizing.store(false, Ordering::SeqCst);
        }

        self.stt.send_audio(&session_id.to_string(), data, format).await
    }

    async fn spawn_silence_monitor(&self, handle: Arc<SessionHandle>) {
        let stt = self.stt.clone();
        let threshold_ms = self.config.silence_threshold_ms;
        let tick = Duration::from_millis(self.config.silence_tick_ms.max(1));
        let session_id = handle.id;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            loop {
                ticker.tick().await;
                let state = *handle.state.lock().await;
                if state != SessionState::Listening {
                    continue;
                }
                if handle.is_finalizing.load(Ordering::SeqCst) {
                    continue;
                }
                if handle.silence_ms() < threshold_ms {
                    continue;
                }
                let has_transcript = !handle.transcript.lock().await.trim().is_empty();
                if !has_transcript {
                    continue;
                }

                handle.is_finalizing.store(true, Ordering::SeqCst);
                *handle.state.lock().await = SessionState::Finalizing;
                debug!(%session_id, "silence threshold crossed, finalizing transcript");
                stt.finalize_transcript(&session_id.to_string()).await;
            }
        });

        *handle.silence_task.lock().await = Some(task);
    }

    /// STT callback entry point: partial transcripts update the live
    /// buffer, `final` triggers the generate/speak turn, `error` frames
    /// abandon the current utterance and return to LISTENING.
    async fn on_transcript(&self, session_id: SessionId, text: String, is_final: bool, meta: TranscriptMetadata) {
        let Some(handle) = self.sessions.get(&session_id).map(|r| r.clone()) else {
            return;
        };

        if meta.kind == "error" {
            warn!(%session_id, error = ?meta.error, "STT reported a transcription error");
            self.events.error(
                ServiceErrorEvent::new(
                    "whisperx",
                    ServiceErrorType::SttTranscriptionFailed,
                    "Speech recognition failed. Please speak again.",
                    meta.error.unwrap_or_else(|| "unknown STT error".to_string()),
                )
                .with_session(session_id.to_string()),
            );
            *handle.transcript.lock().await = String::new();
            handle.is_finalizing.store(false, Ordering::SeqCst);
            *handle.state.lock().await = SessionState::Listening;
            return;
        }

        if !is_final {
            *handle.transcript.lock().await = text.clone();
            self.events
                .publish(OutboundEvent::PartialTranscript { session_id: session_id.to_string(), text });
            return;
        }

        *handle.transcript.lock().await = text.clone();
        self.process_final_transcript(session_id, handle, text).await;
    }

    /// Empty-transcript policy: skip LLM/TTS entirely and go back to
    /// LISTENING. Otherwise runs the full generate→speak turn.
    async fn process_final_transcript(&self, session_id: SessionId, handle: Arc<SessionHandle>, text: String) {
        handle.is_finalizing.store(false, Ordering::SeqCst);
        let trimmed = text.trim().to_string();
        self.events
            .publish(OutboundEvent::FinalTranscript { session_id: session_id.to_string(), text: trimmed.clone() });

        if trimmed.is_empty() {
            *handle.transcript.lock().await = String::new();
            *handle.state.lock().await = SessionState::Listening;
            return;
        }

        *handle.state.lock().await = SessionState::Finalizing;
        self.run_turn(session_id, handle, trimmed).await;
    }

    /// FINALIZING → GENERATING → SPEAKING → IDLE. Persists the user
    /// message, streams an LLM response, persists the assistant message
    /// (ordering guarantee 1) before TTS starts, then streams audio.
    /// Cancellation (barge-in) can interrupt either stream; the already
    /// -persisted assistant text is never rolled back (guarantee 4).
    async fn run_turn(&self, session_id: SessionId, handle: Arc<SessionHandle>, user_text: String) {
        if let Err(e) = self.cache.add_message(&session_id, MessageRole::User, &user_text, None).await {
            error!(%session_id, error = %e, "failed to persist user message");
            *handle.state.lock().await = SessionState::Idle;
            return;
        }

        let agent = match self.cache.get_agent_config(&session_id).await {
            Ok(a) => a,
            Err(e) => {
                error!(%session_id, error = %e, "failed to load agent config");
                *handle.state.lock().await = SessionState::Idle;
                return;
            }
        };

        let context = match self
            .cache
            .get_conversation_context(&session_id, self.config.context_window_messages, true, Some(&user_text))
            .await
        {
            Ok(c) => c,
            Err(e) => {
                error!(%session_id, error = %e, "failed to compose conversation context");
                *handle.state.lock().await = SessionState::Idle;
                return;
            }
        };

        *handle.state.lock().await = SessionState::Generating;
        let token = handle.current_generation_token().await;

        let messages: Vec<ChatMessage> = context
            .iter()
            .map(|m| ChatMessage::new(role_for(m.role), m.content.clone()))
            .collect();
        let generation = generation_config_for(&agent);

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(32);
        let llm = self.llm.clone();
        let sid = session_id.to_string();
        let llm_task = tokio::spawn(async move { llm.generate_response_streaming(&sid, messages, &generation, chunk_tx).await });

        let mut streamed = String::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!(%session_id, "generation cancelled by barge-in");
                    llm_task.abort();
                    return;
                }
                chunk = chunk_rx.recv() => {
                    match chunk {
                        Some(text) => {
                            streamed.push_str(&text);
                            self.events.publish(OutboundEvent::AiResponseChunk {
                                session_id: session_id.to_string(),
                                text,
                            });
                        }
                        None => break,
                    }
                }
            }
        }

        let final_text = match llm_task.await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => streamed,
            Err(e) => {
                error!(%session_id, error = %e, "LLM task panicked");
                String::new()
            }
        };

        if final_text.trim().is_empty() {
            self.events.error(
                ServiceErrorEvent::new(
                    "llm-router",
                    ServiceErrorType::LlmInvalidResponse,
                    "The AI didn't generate a response.",
                    "empty completion after streaming",
                )
                .with_session(session_id.to_string()),
            );
            *handle.state.lock().await = SessionState::Idle;
            return;
        }

        if let Err(e) = self.cache.add_message(&session_id, MessageRole::Assistant, &final_text, None).await {
            error!(%session_id, error = %e, "failed to persist assistant message");
            self.events.error(
                ServiceErrorEvent::new(
                    "session-orchestrator",
                    ServiceErrorType::MemoryError,
                    "Something went wrong saving the response.",
                    e.to_string(),
                )
                .with_session(session_id.to_string()),
            );
            *handle.state.lock().await = SessionState::Idle;
            return;
        }
        self.events.publish(OutboundEvent::AiResponseComplete { session_id: session_id.to_string() });

        self.speak(session_id, handle, agent, final_text, token).await;
    }

    async fn speak(
        &self,
        session_id: SessionId,
        handle: Arc<SessionHandle>,
        agent: Agent,
        text: String,
        token: tokio_util::sync::CancellationToken,
    ) {
        *handle.state.lock().await = SessionState::Speaking;
        self.events.publish(OutboundEvent::TtsStart { session_id: session_id.to_string() });

        let voice = VoiceParams {
            voice_id: Some(agent.tts.voice),
            exaggeration: Some(agent.tts.exaggeration),
            cfg_weight: Some(agent.tts.cfg_weight),
            temperature: Some(agent.tts.temperature),
            language_id: agent.tts.language,
        };

        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(32);
        let tts = self.tts.clone();
        let sid = session_id.to_string();
        let tts_task = tokio::spawn(async move { tts.synthesize_speech(&sid, &text, voice, Some(audio_tx)).await });

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!(%session_id, "TTS cancelled by barge-in");
                    self.tts.cancel_tts(&session_id.to_string()).await;
                    tts_task.abort();
                    return;
                }
                chunk = audio_rx.recv() => {
                    match chunk {
                        Some(bytes) => {
                            let sink = handle.audio_sink.lock().await.clone();
                            if let Some(sink) = sink {
                                sink(bytes);
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        let _ = tts_task.await;

        self.events.publish(OutboundEvent::TtsComplete { session_id: session_id.to_string() });
        *handle.state.lock().await = SessionState::Idle;
    }

    pub async fn get_session_state(&self, session_id: &SessionId) -> crate::error::Result<SessionState> {
        let handle = self
            .sessions
            .get(session_id)
            .ok_or_else(|| crate::error::OrchestratorError::SessionNotFound(session_id.to_string()))?;
        Ok(*handle.state.lock().await)
    }

    /// Any state → IDLE on session end: cancels in-flight generation,
    /// stops the silence monitor, tears down the STT/TTS connections.
    pub async fn end_session(&self, session_id: &SessionId, persist: bool) {
        if let Some((_, handle)) = self.sessions.remove(session_id) {
            handle.cancel_generation().await;
            if let Some(task) = handle.silence_task.lock().await.take() {
                task.abort();
            }
        }
        let sid = session_id.to_string();
        self.stt.disconnect(&sid).await;
        self.tts.cancel_tts(&sid).await;
        if let Err(e) = self.cache.end_session(session_id, persist).await {
            warn!(%session_id, error = %e, "failed to persist session end");
        }
    }

    pub fn active_session_ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|e| *e.key()).collect()
    }
}

fn role_for(role: MessageRole) -> Role {
    match role {
        MessageRole::System => Role::System,
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
    }
}

fn generation_config_for(agent: &Agent) -> GenerationConfig {
    let provider_kind = match agent.llm.provider_kind {
        CoreProviderKind::Openrouter => LlmProviderKind::OpenRouter,
        CoreProviderKind::Local => LlmProviderKind::Local,
        CoreProviderKind::ProviderRef => match agent.llm.provider_ref {
            Some(id) => LlmProviderKind::ProviderRef(id),
            None => LlmProviderKind::OpenRouter,
        },
    };

    GenerationConfig {
        provider_kind,
        model: agent.llm.model.clone(),
        temperature: agent.llm.temperature,
        system_prompt: None,
        fallback: Some(LlmProviderKind::Local),
    }
}
