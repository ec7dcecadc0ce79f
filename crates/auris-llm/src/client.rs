use std::sync::Arc;

use auris_core::config::LlmRouterConfig;
use auris_core::events::{ErrorSink, ServiceErrorEvent, ServiceErrorType};
use auris_core::ids::ProviderId;
use auris_vault::Vault;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::error::ProviderError;
use crate::provider::HttpLlmProvider;
use crate::router::{ProviderRouter, ProviderSlot};
use crate::types::{ChatMessage, ChatRequest, GenerationConfig, ProviderKind, ProviderRow, Role, StreamEvent};

/// Looks up a stored `LLMProvider` row by id. The relational store itself
/// is out of scope here; callers (C11 wiring) supply an implementation
/// backed by whatever persistence they chose.
#[async_trait::async_trait]
pub trait ProviderLookup: Send + Sync {
    async fn find(&self, id: &ProviderId) -> Option<ProviderRow>;
}

/// Streaming, provider-typed LLM calls with config + error callbacks (C5).
/// Grounded on `skynet-agent::router::ProviderRouter` generalized to
/// resolve providers the way `llm_provider_service.py` does: `provider_ref`
/// loads a stored row and decrypts its key, otherwise the kind's
/// process-wide env defaults apply.
pub struct LlmRouterClient {
    config: LlmRouterConfig,
    vault: Arc<Vault>,
    lookup: Option<Arc<dyn ProviderLookup>>,
    errors: ErrorSink,
}

impl LlmRouterClient {
    pub fn new(config: LlmRouterConfig, vault: Arc<Vault>, errors: ErrorSink) -> Self {
        Self {
            config,
            vault,
            lookup: None,
            errors,
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn ProviderLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    async fn resolve(&self, kind: &ProviderKind, model: &str) -> (String, Option<String>, String) {
        match kind {
            ProviderKind::OpenRouter => (
                self.config.openrouter_base_url.clone(),
                self.config.openrouter_api_key.clone(),
                model.to_string(),
            ),
            ProviderKind::Local => (
                self.config.local_llm_url.clone(),
                self.config.local_llm_api_key.clone(),
                model.to_string(),
            ),
            ProviderKind::ProviderRef(id) => {
                let Some(lookup) = &self.lookup else {
                    warn!("provider_ref given but no provider lookup configured");
                    return (self.config.openrouter_base_url.clone(), None, model.to_string());
                };
                match lookup.find(id).await {
                    Some(row) => {
                        let api_key = match row.api_key_encrypted {
                            Some(enc) => self.vault.decrypt_field(&enc).ok(),
                            None => None,
                        };
                        let resolved_model = if model.is_empty() {
                            row.default_model.unwrap_or_else(|| model.to_string())
                        } else {
                            model.to_string()
                        };
                        (row.base_url, api_key, resolved_model)
                    }
                    None => {
                        warn!(provider_id = %id, "stored provider not found");
                        (self.config.openrouter_base_url.clone(), None, model.to_string())
                    }
                }
            }
        }
    }

    fn build_messages(&self, system_prompt: Option<&str>, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        match system_prompt {
            Some(prompt) if !prompt.is_empty() => {
                let mut out = vec![ChatMessage::new(Role::System, prompt)];
                out.extend(messages);
                out
            }
            _ => messages,
        }
    }

    async fn slot_for(&self, kind: &ProviderKind, model: &str) -> ProviderRouter {
        let (base_url, api_key, _model) = self.resolve(kind, model).await;
        let provider = Arc::new(HttpLlmProvider::new(provider_label(kind), base_url, api_key));
        ProviderRouter::new(vec![ProviderSlot {
            provider,
            max_retries: self.config.max_retries_per_provider,
        }])
    }

    /// Buffered mode: accumulates the full response and returns it.
    /// Per spec, the fallback is a single explicit retry on a *recoverable*
    /// failure class, emitting `LLM_FALLBACK_TRIGGERED` the moment it's
    /// attempted, not just on total exhaustion.
    pub async fn generate_response(
        &self,
        session_id: &str,
        messages: Vec<ChatMessage>,
        generation: &GenerationConfig,
    ) -> String {
        let request = ChatRequest {
            model: generation.model.clone(),
            messages: self.build_messages(generation.system_prompt.as_deref(), messages),
            temperature: generation.temperature,
            stream: false,
        };

        let primary = self.slot_for(&generation.provider_kind, &generation.model).await;
        match primary.send(request.clone()).await {
            Ok(response) => return response.text,
            Err(e) => {
                self.emit_provider_failure(session_id, &e);
                if !is_recoverable(&e) {
                    return String::new();
                }
            }
        }

        let Some(fallback_kind) = &generation.fallback else {
            return String::new();
        };
        self.emit_fallback_triggered(session_id);
        let fallback = self.slot_for(fallback_kind, &generation.model).await;
        match fallback.send(request).await {
            Ok(response) => response.text,
            Err(e) => {
                self.emit_provider_failure(session_id, &e);
                String::new()
            }
        }
    }

    /// Streaming mode: invokes `callback(chunk)` for each delta, returns
    /// the fully accumulated text once the stream completes.
    pub async fn generate_response_streaming(
        &self,
        session_id: &str,
        messages: Vec<ChatMessage>,
        generation: &GenerationConfig,
        callback: mpsc::Sender<String>,
    ) -> String {
        let request = ChatRequest {
            model: generation.model.clone(),
            messages: self.build_messages(generation.system_prompt.as_deref(), messages),
            temperature: generation.temperature,
            stream: true,
        };

        let primary = self.slot_for(&generation.provider_kind, &generation.model).await;
        match self.drive_stream(primary, request.clone(), callback.clone()).await {
            Ok(text) => return text,
            Err(e) => {
                self.emit_provider_failure(session_id, &e);
                if !is_recoverable(&e) {
                    return String::new();
                }
            }
        }

        let Some(fallback_kind) = &generation.fallback else {
            return String::new();
        };
        self.emit_fallback_triggered(session_id);
        let fallback = self.slot_for(fallback_kind, &generation.model).await;
        match self.drive_stream(fallback, request, callback).await {
            Ok(text) => text,
            Err(e) => {
                self.emit_provider_failure(session_id, &e);
                String::new()
            }
        }
    }

    async fn drive_stream(
        &self,
        router: ProviderRouter,
        request: ChatRequest,
        callback: mpsc::Sender<String>,
    ) -> Result<String, ProviderError> {
        let (tx, mut rx) = mpsc::channel(64);
        let forward = tokio::spawn(async move {
            let mut accumulated = String::new();
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::TextDelta(chunk) => {
                        accumulated.push_str(&chunk);
                        if callback.send(chunk).await.is_err() {
                            break;
                        }
                    }
                    StreamEvent::Done | StreamEvent::Error(_) => break,
                }
            }
            accumulated
        });

        match router.send_stream(request, tx).await {
            Ok(()) => Ok(forward.await.unwrap_or_default()),
            Err(e) => {
                forward.abort();
                Err(e)
            }
        }
    }

    fn emit_fallback_triggered(&self, session_id: &str) {
        self.errors.emit(
            ServiceErrorEvent::new(
                "llm-router",
                ServiceErrorType::LlmFallbackTriggered,
                "Switching to a backup AI provider.",
                "primary provider failed with a recoverable error",
            )
            .with_session(session_id),
        );
    }

    fn emit_provider_failure(&self, session_id: &str, error: &ProviderError) {
        let (error_type, user_message) = match error {
            ProviderError::RateLimited { .. } => (
                ServiceErrorType::LlmRateLimited,
                "The AI service is temporarily rate-limited.",
            ),
            ProviderError::Authentication => (
                ServiceErrorType::LlmAuthenticationFailed,
                "AI service authentication failed.",
            ),
            ProviderError::Timeout => (ServiceErrorType::LlmTimeout, "The AI service took too long to respond."),
            ProviderError::Parse(_) => (
                ServiceErrorType::LlmInvalidResponse,
                "Received an unexpected response from the AI service.",
            ),
            _ => (ServiceErrorType::LlmProviderFailed, "The AI service is unavailable."),
        };

        error!(session_id, %error, "LLM generation failed");
        self.errors.emit(
            ServiceErrorEvent::new("llm-router", error_type, user_message, error.to_string()).with_session(session_id),
        );
    }
}

fn provider_label(kind: &ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenRouter => "openrouter",
        ProviderKind::Local => "local",
        ProviderKind::ProviderRef(_) => "provider_ref",
    }
}

/// Rate limits, timeouts, and transport/availability errors are worth a
/// fallback attempt; auth failures and bad responses are not (they'd just
/// fail the same way against another key/model).
fn is_recoverable(error: &ProviderError) -> bool {
    matches!(
        error,
        ProviderError::RateLimited { .. } | ProviderError::Timeout | ProviderError::Http(_) | ProviderError::Unavailable
    )
}
